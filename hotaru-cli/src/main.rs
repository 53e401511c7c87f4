//! Hotaru CLI - コマンドラインインターフェース
//!
//! ターゲットを起動して指定した行にブレークポイントを置き、
//! 停止するたびにローカル変数を表示します。

use anyhow::Result;
use clap::{Parser, Subcommand};
use hotaru_core::{NativeRuntime, Session, SessionConfig, TargetSpec};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Hotaru - minimal breakpoint debugger
#[derive(Parser)]
#[command(name = "hotaru")]
#[command(version)]
#[command(about = "Prints local variables whenever a breakpoint line is hit", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch an executable and report locals at breakpoint lines
    Run {
        /// Path to the executable binary
        binary: PathBuf,

        /// Source file under debug (path suffix, e.g. src/main.rs)
        #[arg(short, long)]
        class: String,

        /// Line number to break on (repeatable)
        #[arg(short, long = "line", required = true)]
        lines: Vec<u32>,

        /// Wait for events in slices of this many milliseconds instead of blocking
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        DebugCommand::Run {
            binary,
            class,
            lines,
            timeout_ms,
            args,
        } => {
            let spec = TargetSpec::new(binary, class)
                .with_options(args)
                .with_breakpoint_lines(lines);
            run(&spec, timeout_ms.map(Duration::from_millis))
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// ログ出力を初期化する（出力先は標準エラー）
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// セッションを一回分実行する
fn run(spec: &TargetSpec, deadline: Option<Duration>) -> Result<ExitCode> {
    let config = SessionConfig::from_spec(spec).with_receive_deadline(deadline);
    let mut session = Session::new(NativeRuntime::new(), config);

    if let Err(e) = session.launch(spec) {
        // 起動失敗までにターゲットが出した出力を診断用に表示する
        io::stdout().write_all(&e.partial_stdout)?;
        io::stderr().write_all(&e.partial_stderr)?;
        return Err(e.into());
    }

    println!("{}", session.runtime_info());
    println!();

    let summary = session.run(io::stdout().lock());
    tracing::debug!(
        batches = summary.batches,
        hits = summary.breakpoint_hits,
        exit_code = ?summary.exit_code,
        state = ?summary.final_state,
        "session finished"
    );

    if let Err(e) = session.drain_output(&mut io::stdout(), &mut io::stderr()) {
        tracing::warn!("failed to read target output: {}", e);
    }

    Ok(match summary.exit_code {
        Some(code) => ExitCode::from(code as u8),
        None => ExitCode::SUCCESS,
    })
}
