//! イベントループ
//!
//! ランタイムからイベントの組を受け取り、配送順に処理してから一度だけターゲットを再開します。
//!
//! ```text
//! Idle --(クラスロード監視を設定)--> Running --(Disconnected)--> Draining
//!                                      |                            |
//!                                      +--(終了 / イベント終端)--> Terminated <--+
//! ```

use crate::breakpoint::{BreakpointId, BreakpointTable};
use crate::errors::{InspectError, RuntimeError};
use crate::inspector::FrameInspector;
use crate::resolver::SymbolResolver;
use crate::runtime::{DebugRuntime, Receive};
use crate::session::SessionConfig;
use crate::types::{ClassInfo, CodeLocation, DebugEvent, ThreadId};
use crate::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// イベントループの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// 実行結果のまとめ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    /// 受信したイベントの組の数
    pub batches: usize,
    /// 処理したブレークポイントヒットの数
    pub breakpoint_hits: usize,
    /// ターゲットの終了コード（終了を観測した場合）
    pub exit_code: Option<i32>,
    pub final_state: LoopState,
}

/// キャンセルハンドル
///
/// セットするとイベントループは次の受信待ちの時点で終了します。
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// イベントループ
///
/// ブレークポイントテーブル・リゾルバ・インスペクタ・ランタイムを実行中だけ借用します。
pub struct EventLoop<'a, R: DebugRuntime + ?Sized, W: Write> {
    runtime: &'a mut R,
    resolver: &'a mut SymbolResolver,
    breakpoints: &'a mut BreakpointTable,
    inspector: &'a FrameInspector,
    config: &'a SessionConfig,
    cancel: CancelHandle,
    out: W,
    state: LoopState,
    batches: usize,
    breakpoint_hits: usize,
    exit_code: Option<i32>,
    disconnect_reported: bool,
}

impl<'a, R: DebugRuntime + ?Sized, W: Write> EventLoop<'a, R, W> {
    pub fn new(
        runtime: &'a mut R,
        resolver: &'a mut SymbolResolver,
        breakpoints: &'a mut BreakpointTable,
        inspector: &'a FrameInspector,
        config: &'a SessionConfig,
        out: W,
    ) -> Self {
        Self {
            runtime,
            resolver,
            breakpoints,
            inspector,
            config,
            cancel: CancelHandle::new(),
            out,
            state: LoopState::Idle,
            batches: 0,
            breakpoint_hits: 0,
            exit_code: None,
            disconnect_reported: false,
        }
    }

    /// キャンセルハンドルを差し替える
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// ループを終端まで回す
    ///
    /// 接続終了・ターゲット終了は正常な終端として扱い、エラーは返しません。
    pub fn run(mut self) -> LoopSummary {
        if let Err(e) = self.runtime.watch_class_load(&self.config.debug_class) {
            tracing::error!(class = %self.config.debug_class, "failed to watch class load: {}", e);
            self.state = LoopState::Terminated;
            return self.summary();
        }
        self.state = LoopState::Running;

        while self.state != LoopState::Terminated {
            if self.cancel.is_cancelled() {
                tracing::info!("event loop cancelled");
                self.state = LoopState::Terminated;
                break;
            }

            match self.runtime.next_event_batch(self.config.receive_deadline) {
                Ok(Receive::Batch(events)) => self.handle_batch(events),
                Ok(Receive::TimedOut) => {
                    tracing::trace!("no events before deadline");
                }
                Err(RuntimeError::Disconnected) => {
                    self.report_disconnect();
                    self.state = LoopState::Terminated;
                }
                Err(RuntimeError::Failed(e)) => {
                    tracing::error!("failed to receive events: {:#}", e);
                    self.state = LoopState::Terminated;
                }
            }
        }

        self.summary()
    }

    /// イベントの組を配送順に処理し、最後に一度だけ再開する
    fn handle_batch(&mut self, events: Vec<DebugEvent>) {
        self.batches += 1;

        if events.is_empty() {
            tracing::debug!("empty event batch, no more events");
            self.state = LoopState::Terminated;
            return;
        }

        let mut exited = false;
        for event in events {
            tracing::debug!(event = %event, "handling event");
            match event {
                DebugEvent::Disconnected => {
                    // 残りのイベントは処理してから終了する
                    self.report_disconnect();
                    self.state = LoopState::Draining;
                }
                DebugEvent::ProcessExited(code) => {
                    tracing::info!(code, "target exited");
                    self.exit_code = Some(code);
                    exited = true;
                }
                event => {
                    if let Err(e) = self.handle_event(event) {
                        tracing::warn!("failed to handle event: {:#}", e);
                    }
                }
            }
        }

        if exited || self.state == LoopState::Draining {
            self.state = LoopState::Terminated;
            return;
        }

        match self.runtime.resume() {
            Ok(()) => {}
            Err(RuntimeError::Disconnected) => {
                self.report_disconnect();
                self.state = LoopState::Terminated;
            }
            Err(RuntimeError::Failed(e)) => {
                tracing::error!("failed to resume target: {:#}", e);
                self.state = LoopState::Terminated;
            }
        }
    }

    fn handle_event(&mut self, event: DebugEvent) -> Result<()> {
        match event {
            DebugEvent::ClassLoaded(info) => self.on_class_loaded(&info),
            DebugEvent::BreakpointHit { thread, location } => self.on_breakpoint_hit(thread, &location),
            DebugEvent::Other(description) => {
                tracing::debug!(%description, "ignoring event");
                writeln!(self.out, "{}", description)?;
                Ok(())
            }
            DebugEvent::Disconnected | DebugEvent::ProcessExited(_) => Ok(()),
        }
    }

    /// 保留中の行を解決してブレークポイントを設定する
    fn on_class_loaded(&mut self, info: &ClassInfo) -> Result<()> {
        self.resolver.on_class_loaded(info);

        let config = self.config;
        if info.name != config.debug_class {
            return Ok(());
        }

        for &line in &config.breakpoint_lines {
            let location = match self.resolver.resolve(&info.name, line) {
                Ok(location) => location,
                Err(e) => {
                    tracing::warn!(class = %info.name, line, "skipping breakpoint: {}", e);
                    continue;
                }
            };

            match self.install_breakpoint(location) {
                Ok(id) => tracing::info!(class = %info.name, line, id, "breakpoint set"),
                Err(e) => tracing::warn!(class = %info.name, line, "failed to set breakpoint: {:#}", e),
            }
        }
        Ok(())
    }

    /// テーブルに登録し、ランタイムに作成・有効化する
    fn install_breakpoint(&mut self, location: CodeLocation) -> Result<BreakpointId> {
        let id = self.breakpoints.install(location.clone());

        let handle = match self.breakpoints.runtime_handle(id) {
            Some(handle) => handle,
            None => {
                let handle = self.runtime.create_breakpoint(&location)?;
                self.breakpoints.bind(id, handle)?;
                handle
            }
        };

        self.runtime.set_breakpoint_enabled(handle, true)?;
        self.breakpoints.enable(id)?;
        Ok(id)
    }

    /// ローカル変数を読んで表示する
    fn on_breakpoint_hit(&mut self, thread: ThreadId, location: &CodeLocation) -> Result<()> {
        self.breakpoint_hits += 1;
        tracing::debug!(
            thread,
            location = %location,
            id = ?self.breakpoints.find(location),
            "breakpoint hit"
        );

        match self.inspector.inspect_frame(&mut *self.runtime, thread, 0) {
            Ok(frame) if !frame.in_debug_class => {
                tracing::debug!(location = %location, frame = %frame.location, "hit outside debug class, skipped");
            }
            Ok(frame) => {
                match &frame.location.function {
                    Some(function) => {
                        writeln!(self.out, "Variables at {} ({}) >", location, function)?
                    }
                    None => writeln!(self.out, "Variables at {} >", location)?,
                }
                for binding in &frame.bindings {
                    writeln!(self.out, "{}", binding)?;
                }
            }
            Err(InspectError::NoDebugInfo { location: at }) => {
                writeln!(self.out, "Variables at {} >", location)?;
                writeln!(self.out, "<locals unavailable: no debug info at {}>", at)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// 切断を一度だけ出力に報告する
    fn report_disconnect(&mut self) {
        if self.disconnect_reported {
            return;
        }
        self.disconnect_reported = true;
        tracing::info!(state = ?self.state, "target disconnected");
        if let Err(e) = writeln!(self.out, "{}", RuntimeError::Disconnected) {
            tracing::warn!("failed to write report: {}", e);
        }
    }

    fn summary(&self) -> LoopSummary {
        LoopSummary {
            batches: self.batches,
            breakpoint_hits: self.breakpoint_hits,
            exit_code: self.exit_code,
            final_state: self.state,
        }
    }
}
