//! デバッグセッション
//!
//! ランタイム・プロセスマネージャ・リゾルバ・ブレークポイントテーブル・インスペクタを所有し、
//! 起動からイベントループの終了、出力の回収までを一つの流れとしてまとめます。

use crate::breakpoint::BreakpointTable;
use crate::errors::LaunchError;
use crate::event_loop::{CancelHandle, EventLoop, LoopState, LoopSummary};
use crate::inspector::FrameInspector;
use crate::process::{ProcessHandle, TargetProcessManager};
use crate::resolver::SymbolResolver;
use crate::runtime::{DebugRuntime, RuntimeInfo};
use crate::types::{ClassId, TargetSpec};
use std::io::{self, Write};
use std::time::Duration;

/// セッション設定
///
/// イベントループとリゾルバにはこの設定を明示的に渡します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// デバッグ対象クラス
    pub debug_class: ClassId,
    /// ブレークポイントを置く行（重複なし、指定順）
    pub breakpoint_lines: Vec<u32>,
    /// イベント受信の期限（None は無期限に待つ）
    pub receive_deadline: Option<Duration>,
}

impl SessionConfig {
    /// ターゲット指定から設定を作る（重複した行は一つにまとめる）
    pub fn from_spec(spec: &TargetSpec) -> Self {
        let mut breakpoint_lines = Vec::with_capacity(spec.breakpoint_lines.len());
        for &line in &spec.breakpoint_lines {
            if !breakpoint_lines.contains(&line) {
                breakpoint_lines.push(line);
            }
        }

        Self {
            debug_class: spec.debug_class.clone(),
            breakpoint_lines,
            receive_deadline: None,
        }
    }

    pub fn with_receive_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.receive_deadline = deadline;
        self
    }
}

/// デバッグセッション
pub struct Session<R: DebugRuntime> {
    runtime: R,
    processes: TargetProcessManager,
    resolver: SymbolResolver,
    breakpoints: BreakpointTable,
    inspector: FrameInspector,
    config: SessionConfig,
    cancel: CancelHandle,
    disconnected: bool,
}

impl<R: DebugRuntime> Session<R> {
    pub fn new(runtime: R, config: SessionConfig) -> Self {
        let inspector = FrameInspector::new(config.debug_class.clone());
        Self {
            runtime,
            processes: TargetProcessManager::new(),
            resolver: SymbolResolver::new(),
            breakpoints: BreakpointTable::new(),
            inspector,
            config,
            cancel: CancelHandle::new(),
            disconnected: false,
        }
    }

    /// ランタイムの説明
    pub fn runtime_info(&self) -> RuntimeInfo {
        self.runtime.info()
    }

    /// ターゲットを起動する
    pub fn launch(&mut self, spec: &TargetSpec) -> Result<&ProcessHandle, LaunchError> {
        self.processes.launch(&mut self.runtime, spec)
    }

    /// イベントループを終端まで回し、接続を破棄する
    ///
    /// ループの出力は `out` に書き出します。
    pub fn run<W: Write>(&mut self, out: W) -> LoopSummary {
        if self.disconnected {
            tracing::warn!("session already disconnected");
            return LoopSummary {
                batches: 0,
                breakpoint_hits: 0,
                exit_code: self.processes.exit_code(),
                final_state: LoopState::Terminated,
            };
        }

        let summary = EventLoop::new(
            &mut self.runtime,
            &mut self.resolver,
            &mut self.breakpoints,
            &self.inspector,
            &self.config,
            out,
        )
        .with_cancel(self.cancel.clone())
        .run();

        if let Some(code) = summary.exit_code {
            self.processes.record_exit(code);
        }
        tracing::debug!(?summary, "event loop finished");

        self.disconnect();
        summary
    }

    /// 接続を破棄する（何度呼んでもよい）
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        self.runtime.dispose();
        self.processes.mark_stopped();
    }

    /// ターゲットの出力を一度だけ回収する
    pub fn drain_output(&mut self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<usize> {
        self.processes.drain_output(out, err)
    }

    /// キャンセルハンドルを取得する
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn processes(&self) -> &TargetProcessManager {
        &self.processes
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

impl<R: DebugRuntime> Drop for Session<R> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deduplicates_lines() {
        let spec = TargetSpec::new("Main", "Main").with_breakpoint_lines([7, 3, 7, 9, 3]);
        let config = SessionConfig::from_spec(&spec);

        assert_eq!(config.debug_class, "Main");
        assert_eq!(config.breakpoint_lines, vec![7, 3, 9]);
        assert_eq!(config.receive_deadline, None);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let spec = TargetSpec::new("Main", "Main");
        let mut session = Session::new(
            crate::scripted::ScriptedRuntime::new(),
            SessionConfig::from_spec(&spec),
        );

        session.disconnect();
        session.disconnect();
        assert_eq!(session.runtime().dispose_count(), 1);

        // 切断後はイベント処理に戻らない
        let summary = session.run(std::io::sink());
        assert_eq!(summary.final_state, LoopState::Terminated);
        assert_eq!(session.runtime().receive_count(), 0);
    }
}
