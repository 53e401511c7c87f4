//! ネイティブランタイム（ptrace + DWARF、Linux / x86_64）
//!
//! ELF 実行ファイルを ptrace 下で起動し、DWARF の行テーブルとローカル変数情報を使って
//! [`DebugRuntime`] を実装します。
//!
//! - クラスはソースファイル（コンパイル単位のパスのサフィックス、例: `src/main.rs`）です。
//!   コードは execve の時点で全てロード済みのため、起動後最初の受信で監視中のクラスの
//!   ClassLoaded をまとめて通知します。
//! - ブレークポイントは INT3 です。ヒット時に RIP を巻き戻し、次の再開時に元の命令を
//!   1命令ステップしてから再設定します。

use crate::errors::{LaunchError, RuntimeError, ERR_DWARF_NOT_LOADED, ERR_NOT_LAUNCHED};
use crate::process::{ProcessHandle, DRAIN_CHUNK};
use crate::runtime::{DebugRuntime, Receive, RuntimeBreakpoint, RuntimeInfo};
use crate::types::{
    ClassId, ClassInfo, CodeLocation, DebugEvent, FrameLocation, LineEntry, LocalVariable,
    TargetSpec, ThreadId, TopFrame, Value,
};
use hotaru_dwarf::{
    path_matches, DisplayValue, DwarfLoader, LineInfoProvider, LineTableReader, SymbolTable,
    ValueDecoder, VariableLocator,
};
use hotaru_target::{
    Memory, Process, RegisterSnapshot, Registers, Signal, SoftwareBreakpoint, StopReason,
};
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

/// シグナルで終了したときの終了コードの基数（シェルの慣習）
const SIGNAL_EXIT_BASE: i32 = 128;

/// デバッグ対象バイナリの静的な情報
struct Binary {
    loader: DwarfLoader,
    symbols: SymbolTable,
    lines: LineInfoProvider,
}

impl Binary {
    fn load(loader: DwarfLoader) -> anyhow::Result<Self> {
        let symbols = SymbolTable::new(&loader)?;
        let lines = LineInfoProvider::new(&loader)?;
        Ok(Self {
            loader,
            symbols,
            lines,
        })
    }
}

/// ランタイム側のブレークポイント
struct NativeBreakpoint {
    location: CodeLocation,
    software: SoftwareBreakpoint,
}

/// ネイティブランタイム
pub struct NativeRuntime {
    binary: Option<Binary>,
    process: Option<Process>,
    memory: Option<Memory>,
    /// PIE のロードアドレス（DWARF 上のアドレスに加算する）
    load_bias: u64,
    watched: Vec<ClassId>,
    /// ClassLoaded を通知済みか
    announced: bool,
    breakpoints: HashMap<RuntimeBreakpoint, NativeBreakpoint>,
    by_address: HashMap<u64, RuntimeBreakpoint>,
    next_handle: u64,
    /// 次の再開時にステップで越えるブレークポイント
    step_over: Option<RuntimeBreakpoint>,
    /// 次の再開時に配送するシグナル
    pending_signal: Option<Signal>,
    /// ステップ中に観測した終了
    pending_exit: Option<i32>,
    decoder: ValueDecoder,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self {
            binary: None,
            process: None,
            memory: None,
            load_bias: 0,
            watched: Vec::new(),
            announced: false,
            breakpoints: HashMap::new(),
            by_address: HashMap::new(),
            next_handle: 1,
            step_over: None,
            pending_signal: None,
            pending_exit: None,
            decoder: ValueDecoder::default(),
        }
    }

    /// PIE のロードアドレス
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    fn binary(&self) -> Result<&Binary, RuntimeError> {
        self.binary
            .as_ref()
            .ok_or_else(|| RuntimeError::Failed(anyhow::anyhow!(ERR_DWARF_NOT_LOADED)))
    }

    fn memory(&self) -> Result<&Memory, RuntimeError> {
        self.memory
            .as_ref()
            .ok_or_else(|| RuntimeError::Failed(anyhow::anyhow!(ERR_NOT_LAUNCHED)))
    }

    /// 起動中のプロセス（破棄後・終了後は Disconnected）
    fn live_process(&mut self) -> Result<&mut Process, RuntimeError> {
        match self.process.as_mut() {
            Some(process) if !process.has_exited() => Ok(process),
            _ => Err(RuntimeError::Disconnected),
        }
    }

    /// 監視中のクラスの ClassLoaded を作る
    fn class_load_events(&self) -> Result<Vec<DebugEvent>, RuntimeError> {
        let binary = self.binary()?;
        let reader = LineTableReader::new(&binary.loader);

        if !reader.has_line_programs()? {
            tracing::warn!(path = ?binary.loader.path(), "binary has no line tables");
            return Ok(self
                .watched
                .iter()
                .map(|class| DebugEvent::ClassLoaded(ClassInfo::new(class.clone(), None)))
                .collect());
        }

        let mut events = Vec::new();
        for class in &self.watched {
            match reader.source_lines(class)? {
                Some(lines) => {
                    tracing::debug!(class = %class, path = %lines.path, "class found in line tables");
                    let table = lines
                        .rows
                        .iter()
                        .map(|row| LineEntry {
                            line: row.line,
                            address: row.address + self.load_bias,
                        })
                        .collect();
                    events.push(DebugEvent::ClassLoaded(ClassInfo::new(class.clone(), Some(table))));
                }
                None => tracing::warn!(class = %class, "no compilation unit matches class"),
            }
        }
        Ok(events)
    }

    /// SIGTRAP の原因を調べる
    fn on_trap(&mut self) -> Result<DebugEvent, RuntimeError> {
        let pid = self.live_process()?.pid();
        let registers = Registers::new(pid);
        let pc = registers.get_pc()?;

        let address = SoftwareBreakpoint::trap_address(pc);
        if let Some(&handle) = self.by_address.get(&address) {
            if let Some(bp) = self.breakpoints.get(&handle) {
                if bp.software.was_hit(pc) {
                    bp.software.rewind(&registers)?;
                    self.step_over = Some(handle);
                    return Ok(DebugEvent::BreakpointHit {
                        thread: pid,
                        location: bp.location.clone(),
                    });
                }
            }
        }

        Ok(DebugEvent::Other(format!("SIGTRAP at 0x{:x}", pc)))
    }

    /// ブレークポイントを外して1命令進め、再び設定する
    fn step_over_breakpoint(&mut self, handle: RuntimeBreakpoint) -> Result<(), RuntimeError> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| RuntimeError::Failed(anyhow::anyhow!(ERR_NOT_LAUNCHED)))?;
        let process = match self.process.as_mut() {
            Some(process) if !process.has_exited() => process,
            _ => return Err(RuntimeError::Disconnected),
        };
        let Some(bp) = self.breakpoints.get_mut(&handle) else {
            return Ok(());
        };

        match bp.software.step_over(memory, process)? {
            Some(StopReason::Exited(code)) => self.pending_exit = Some(code),
            Some(StopReason::Killed(signal)) => {
                self.pending_exit = Some(SIGNAL_EXIT_BASE + signal as i32)
            }
            _ => {}
        }
        Ok(())
    }

    fn read_frame(&self, thread: ThreadId) -> Result<TopFrame, RuntimeError> {
        let binary = self.binary()?;
        let memory = self.memory()?;

        let snapshot = RegisterSnapshot::capture(&Registers::new(thread))?;
        let pc = snapshot.pc().wrapping_sub(self.load_bias);

        let line_info = binary.lines.lookup(pc)?;
        let class = line_info.as_ref().and_then(|info| {
            self.watched
                .iter()
                .find(|class| path_matches(&info.file, class))
                .cloned()
        });
        let location = FrameLocation {
            class,
            line: line_info.as_ref().map(|info| info.line),
            function: binary
                .symbols
                .reverse_resolve(pc)
                .map(|sym| sym.display_name().to_string()),
        };

        let locals = match VariableLocator::new(&binary.loader).scope_at(pc)? {
            Some(scope) => {
                // CFA はフレームポインタを使う関数の場合の近似値
                let cfa = snapshot.frame_pointer().checked_add(16);
                let values = scope.read_values(&snapshot, memory, cfa, &self.decoder)?;
                Some(
                    values
                        .into_iter()
                        .map(|local| LocalVariable::new(local.name, local.type_name, to_value(local.value)))
                        .collect(),
                )
            }
            None => None,
        };

        Ok(TopFrame { location, locals })
    }
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRuntime for NativeRuntime {
    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            name: "hotaru-native".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "ptrace/DWARF runtime for Linux x86_64 ELF executables".to_string(),
        }
    }

    fn spawn(&mut self, spec: &TargetSpec) -> Result<ProcessHandle, LaunchError> {
        let program = spec.entry.display().to_string();
        if self.process.is_some() {
            return Err(LaunchError::new(program, "a target is already running"));
        }

        let binary = DwarfLoader::load(&spec.entry)
            .and_then(Binary::load)
            .map_err(|e| LaunchError::new(&program, format!("{:#}", e)))?;

        let mut process = Process::spawn(&spec.entry, &spec.options)
            .map_err(|e| LaunchError::new(&program, format!("{:#}", e)))?;

        // execve 直後の SIGTRAP を待つ
        match process.wait(None) {
            Ok(Some(StopReason::Trap)) => {}
            Ok(reason) => {
                let reason = format!("target did not stop at exec: {:?}", reason);
                return Err(failed_launch(&program, reason, process));
            }
            Err(e) => return Err(failed_launch(&program, format!("{:#}", e), process)),
        }

        let pid = process.pid();
        let memory = Memory::new(pid);
        let load_bias = if binary.loader.is_pie() {
            match memory.load_base(&spec.entry) {
                Ok(base) => base,
                Err(e) => {
                    let reason = format!("failed to compute load address: {:#}", e);
                    return Err(failed_launch(&program, reason, process));
                }
            }
        } else {
            0
        };
        tracing::debug!(pid, "target stopped at exec (load bias 0x{:x})", load_bias);

        let mut handle = ProcessHandle::new(pid as u32);
        if let Some(stdout) = process.take_stdout() {
            handle = handle.with_stdout(Box::new(stdout));
        }
        if let Some(stderr) = process.take_stderr() {
            handle = handle.with_stderr(Box::new(stderr));
        }

        self.binary = Some(binary);
        self.process = Some(process);
        self.memory = Some(memory);
        self.load_bias = load_bias;
        self.announced = false;
        Ok(handle)
    }

    fn watch_class_load(&mut self, class_filter: &str) -> Result<(), RuntimeError> {
        if !self.watched.iter().any(|class| class == class_filter) {
            self.watched.push(class_filter.to_string());
        }
        Ok(())
    }

    fn create_breakpoint(
        &mut self,
        location: &CodeLocation,
    ) -> Result<RuntimeBreakpoint, RuntimeError> {
        // 同じアドレスに INT3 を二重に置かない
        if let Some(&handle) = self.by_address.get(&location.address) {
            return Ok(handle);
        }

        let handle = RuntimeBreakpoint(self.next_handle);
        self.next_handle += 1;

        self.by_address.insert(location.address, handle);
        self.breakpoints.insert(
            handle,
            NativeBreakpoint {
                location: location.clone(),
                software: SoftwareBreakpoint::new(location.address),
            },
        );
        tracing::debug!(location = %location, "created breakpoint at 0x{:x}", location.address);
        Ok(handle)
    }

    fn set_breakpoint_enabled(
        &mut self,
        breakpoint: RuntimeBreakpoint,
        enabled: bool,
    ) -> Result<(), RuntimeError> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| RuntimeError::Failed(anyhow::anyhow!(ERR_NOT_LAUNCHED)))?;
        let bp = self
            .breakpoints
            .get_mut(&breakpoint)
            .ok_or_else(|| anyhow::anyhow!("unknown runtime breakpoint {:?}", breakpoint))?;

        if enabled {
            bp.software.enable(memory)?;
        } else {
            bp.software.disable(memory)?;
        }
        Ok(())
    }

    fn next_event_batch(&mut self, deadline: Option<Duration>) -> Result<Receive, RuntimeError> {
        if let Some(code) = self.pending_exit.take() {
            return Ok(Receive::Batch(vec![DebugEvent::ProcessExited(code)]));
        }
        self.live_process()?;

        if !self.announced {
            self.announced = true;
            let events = self.class_load_events()?;
            if !events.is_empty() {
                return Ok(Receive::Batch(events));
            }
            // 通知するクラスがなければ exec 停止からそのまま再開する
            self.live_process()?.continue_execution(None)?;
        }

        let reason = match self.live_process()?.wait(deadline)? {
            Some(reason) => reason,
            None => return Ok(Receive::TimedOut),
        };

        let event = match reason {
            StopReason::Trap => self.on_trap()?,
            StopReason::Signal(signal) => {
                self.pending_signal = Some(signal);
                DebugEvent::Other(format!("signal {:?}", signal))
            }
            StopReason::Exited(code) => DebugEvent::ProcessExited(code),
            StopReason::Killed(signal) => DebugEvent::ProcessExited(SIGNAL_EXIT_BASE + signal as i32),
            StopReason::Other => DebugEvent::Other("unrecognized stop".to_string()),
        };
        Ok(Receive::Batch(vec![event]))
    }

    fn resume(&mut self) -> Result<(), RuntimeError> {
        if let Some(handle) = self.step_over.take() {
            self.step_over_breakpoint(handle)?;
            if self.pending_exit.is_some() {
                return Ok(());
            }
        }

        let signal = self.pending_signal.take();
        self.live_process()?.continue_execution(signal)?;
        Ok(())
    }

    fn read_top_frame(&mut self, thread: ThreadId) -> Result<TopFrame, RuntimeError> {
        self.live_process()?;
        self.read_frame(thread)
    }

    fn dispose(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill() {
                tracing::warn!(pid = process.pid(), "failed to kill target: {:#}", e);
            }
        }
        self.memory = None;
        self.breakpoints.clear();
        self.by_address.clear();
        self.step_over = None;
        self.pending_signal = None;
    }
}

/// 起動に失敗したプロセスを片付け、診断用に出力を回収する
fn failed_launch(program: &str, reason: String, mut process: Process) -> LaunchError {
    if let Err(e) = process.kill() {
        tracing::debug!(pid = process.pid(), "failed to kill target: {:#}", e);
    }
    let stdout = read_partial(process.take_stdout());
    let stderr = read_partial(process.take_stderr());
    LaunchError::new(program, reason).with_output(stdout, stderr)
}

/// 終了したプロセスのパイプから読めるだけ読む
fn read_partial<S: Read>(stream: Option<S>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(stream) = stream {
        if let Err(e) = stream.take(DRAIN_CHUNK as u64).read_to_end(&mut buf) {
            tracing::debug!("failed to read partial output: {}", e);
        }
    }
    buf
}

/// DWARF のデコード結果をランタイム共通の値に変換する
fn to_value(value: DisplayValue) -> Value {
    match value {
        DisplayValue::Int(v) => Value::Int(v),
        DisplayValue::Uint(v) => Value::Uint(v),
        DisplayValue::Float(v) => Value::Float(v),
        DisplayValue::Bool(v) => Value::Bool(v),
        DisplayValue::Char(c) => Value::Char(c),
        DisplayValue::Str(s, false) => Value::Str(s),
        DisplayValue::Unavailable(reason) => Value::Unavailable(reason),
        other => Value::Raw(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_value() {
        assert_eq!(to_value(DisplayValue::Int(-3)), Value::Int(-3));
        assert_eq!(
            to_value(DisplayValue::Str("hi".to_string(), false)),
            Value::Str("hi".to_string())
        );
        assert_eq!(
            to_value(DisplayValue::Str("hi".to_string(), true)),
            Value::Raw("\"hi\"...".to_string())
        );
        assert_eq!(to_value(DisplayValue::Ptr(0x10)), Value::Raw("0x10".to_string()));
    }

    #[test]
    fn test_read_partial_caps_output() {
        let data = vec![b'a'; DRAIN_CHUNK * 2];
        assert_eq!(read_partial(Some(&data[..])).len(), DRAIN_CHUNK);
        assert!(read_partial::<&[u8]>(None).is_empty());
    }

    #[test]
    fn test_runtime_before_launch() {
        let mut runtime = NativeRuntime::new();

        assert!(runtime.next_event_batch(None).unwrap_err().is_disconnected());
        assert!(runtime.resume().unwrap_err().is_disconnected());

        // 破棄は何度呼んでもよい
        runtime.dispose();
        runtime.dispose();
    }

    #[test]
    fn test_create_breakpoint_dedupes_address() {
        let mut runtime = NativeRuntime::new();
        let location = CodeLocation {
            class: "src/main.rs".to_string(),
            line: 4,
            address: 0x5555_0000_1000,
        };
        let alias = CodeLocation {
            line: 5,
            ..location.clone()
        };

        let first = runtime.create_breakpoint(&location).unwrap();
        assert_eq!(runtime.create_breakpoint(&alias).unwrap(), first);
    }

    #[test]
    fn test_launch_missing_binary() {
        let mut runtime = NativeRuntime::new();
        let spec = TargetSpec::new("/nonexistent/hotaru-target", "src/main.rs");

        let err = runtime.spawn(&spec).unwrap_err();
        assert_eq!(err.program, "/nonexistent/hotaru-target");
        assert!(err.partial_stdout.is_empty());
    }
}
