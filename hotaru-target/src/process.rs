//! プロセス制御機能

use crate::Result;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// スレッドID（シングルスレッドのターゲットではPIDと同じ）
pub type ThreadId = i32;

/// タイムアウト付き待機のポーリング間隔
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// SIGTRAP による停止（ブレークポイント、ステップ、execve 直後）
    Trap,
    /// その他のシグナルによる停止
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// シグナルによる強制終了
    Killed(Signal),
    /// その他の停止
    Other,
}

impl StopReason {
    /// プロセスが終了したかどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopReason::Exited(_) | StopReason::Killed(_))
    }
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exited: bool,
}

impl Process {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// 子プロセスは execve の直前に PTRACE_TRACEME を設定するため、
    /// execve 直後に SIGTRAP で停止します。この停止は [`Process::wait`] で受け取ります。
    /// 標準出力と標準エラーはパイプで接続されます。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        let program = program.as_ref();

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // SAFETY: fork 後の子プロセスでは async-signal-safe な ptrace(2) のみを呼ぶ
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(std::io::Error::from));
        }

        let mut child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {:?}: {}", program, e))?;

        let pid = Pid::from_raw(child.id() as i32);
        tracing::debug!(pid = pid.as_raw(), program = ?program, "spawned traced process");

        // 回収は waitpid で行うので Child はパイプだけ取り出して捨てる
        Ok(Self {
            pid,
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            exited: false,
        })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスが終了済みかどうか
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// 標準出力のパイプを取り出す（一度だけ取得できる）
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// 標準エラーのパイプを取り出す（一度だけ取得できる）
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// 次の停止イベントを待機する
    ///
    /// `timeout` を指定した場合は WNOHANG でポーリングし、期限までに
    /// 停止しなければ `Ok(None)` を返します。
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<StopReason>> {
        let status = match timeout {
            None => waitpid(self.pid, None)?,
            Some(timeout) => {
                let started = Instant::now();
                loop {
                    match waitpid(self.pid, Some(WaitPidFlag::WNOHANG))? {
                        WaitStatus::StillAlive => {
                            if started.elapsed() >= timeout {
                                return Ok(None);
                            }
                            std::thread::sleep(POLL_INTERVAL);
                        }
                        status => break status,
                    }
                }
            }
        };

        let reason = classify(status);
        if reason.is_terminal() {
            self.exited = true;
        }
        Ok(Some(reason))
    }

    /// プロセスを実行継続する
    ///
    /// `signal` を指定すると、停止の原因となったシグナルをそのまま配送します。
    pub fn continue_execution(&self, signal: Option<Signal>) -> Result<()> {
        ptrace::cont(self.pid, signal)?;
        Ok(())
    }

    /// 1命令だけ実行して停止する（ステップ実行）
    pub fn step(&mut self) -> Result<StopReason> {
        ptrace::step(self.pid, None)?;
        let status = waitpid(self.pid, None)?;
        let reason = classify(status);
        if reason.is_terminal() {
            self.exited = true;
        }
        Ok(reason)
    }

    /// プロセスを強制終了して回収する
    ///
    /// 終了済みの場合は何もしません。
    pub fn kill(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        nix::sys::signal::kill(self.pid, Signal::SIGKILL)?;
        waitpid(self.pid, None)?;
        self.exited = true;
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::debug!(pid = self.pid.as_raw(), "failed to kill traced process: {}", e);
        }
    }
}

/// waitpid の結果を停止イベントに変換する
fn classify(status: WaitStatus) -> StopReason {
    match status {
        WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Trap,
        WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
        WaitStatus::Exited(_, code) => StopReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => StopReason::Killed(signal),
        _ => StopReason::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_wait_status() {
        let pid = Pid::from_raw(42);

        assert_eq!(classify(WaitStatus::Stopped(pid, Signal::SIGTRAP)), StopReason::Trap);
        assert_eq!(
            classify(WaitStatus::Stopped(pid, Signal::SIGSEGV)),
            StopReason::Signal(Signal::SIGSEGV)
        );
        assert_eq!(classify(WaitStatus::Exited(pid, 3)), StopReason::Exited(3));
        assert_eq!(
            classify(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            StopReason::Killed(Signal::SIGKILL)
        );
        assert_eq!(classify(WaitStatus::Continued(pid)), StopReason::Other);
    }

    #[test]
    fn test_terminal_reasons() {
        assert!(StopReason::Exited(0).is_terminal());
        assert!(StopReason::Killed(Signal::SIGKILL).is_terminal());
        assert!(!StopReason::Trap.is_terminal());
        assert!(!StopReason::Signal(Signal::SIGINT).is_terminal());
    }
}
