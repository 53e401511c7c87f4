//! 台本どおりにイベントを返すランタイム
//!
//! あらかじめ積んだイベントの組・フレームを順に返し、呼び出しをすべて記録します。
//! ライブプロセスなしでイベントループやセッションを検証するために使います。

use crate::errors::{LaunchError, RuntimeError};
use crate::process::ProcessHandle;
use crate::runtime::{DebugRuntime, Receive, RuntimeBreakpoint, RuntimeInfo};
use crate::types::{CodeLocation, DebugEvent, TargetSpec, ThreadId, TopFrame};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::time::Duration;

/// 台本の1ステップ
#[derive(Debug, Clone)]
enum Step {
    Batch(Vec<DebugEvent>),
    TimedOut,
    Fail(String),
}

/// 記録されたランタイム呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Spawn,
    WatchClassLoad(String),
    CreateBreakpoint(CodeLocation),
    SetBreakpointEnabled(RuntimeBreakpoint, bool),
    Receive,
    Resume,
    ReadTopFrame(ThreadId),
    Dispose,
}

/// 台本ランタイム
#[derive(Debug)]
pub struct ScriptedRuntime {
    pid: u32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    launch_failure: Option<(String, Vec<u8>, Vec<u8>)>,
    script: VecDeque<Step>,
    frames: HashMap<ThreadId, TopFrame>,
    breakpoints: HashMap<RuntimeBreakpoint, (CodeLocation, bool)>,
    next_handle: u64,
    calls: Vec<Call>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            pid: 4242,
            stdout: Vec::new(),
            stderr: Vec::new(),
            launch_failure: None,
            script: VecDeque::new(),
            frames: HashMap::new(),
            breakpoints: HashMap::new(),
            next_handle: 1,
            calls: Vec::new(),
        }
    }

    /// ターゲットの標準出力・標準エラーの内容を設定する
    pub fn with_output(mut self, stdout: &[u8], stderr: &[u8]) -> Self {
        self.stdout = stdout.to_vec();
        self.stderr = stderr.to_vec();
        self
    }

    /// 起動を失敗させる
    pub fn with_launch_failure(mut self, reason: &str, stdout: &[u8], stderr: &[u8]) -> Self {
        self.launch_failure = Some((reason.to_string(), stdout.to_vec(), stderr.to_vec()));
        self
    }

    /// スレッドの最上位フレームを設定する
    pub fn with_frame(mut self, thread: ThreadId, frame: TopFrame) -> Self {
        self.frames.insert(thread, frame);
        self
    }

    /// イベントの組を台本に積む
    pub fn with_batch(mut self, events: Vec<DebugEvent>) -> Self {
        self.script.push_back(Step::Batch(events));
        self
    }

    /// 受信タイムアウトを台本に積む
    pub fn with_timeout(mut self) -> Self {
        self.script.push_back(Step::TimedOut);
        self
    }

    /// 受信失敗を台本に積む
    pub fn with_receive_failure(mut self, message: &str) -> Self {
        self.script.push_back(Step::Fail(message.to_string()));
        self
    }

    /// 記録された呼び出し（呼ばれた順）
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// `resume` が呼ばれた回数
    pub fn resume_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Resume))
    }

    /// `next_event_batch` が呼ばれた回数
    pub fn receive_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Receive))
    }

    /// `dispose` が呼ばれた回数
    pub fn dispose_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Dispose))
    }

    /// フレームを読んだスレッド（読んだ順）
    pub fn frames_read(&self) -> Vec<ThreadId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::ReadTopFrame(thread) => Some(*thread),
                _ => None,
            })
            .collect()
    }

    /// 作成されたブレークポイントの位置（作成順）
    pub fn created_breakpoints(&self) -> Vec<CodeLocation> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateBreakpoint(location) => Some(location.clone()),
                _ => None,
            })
            .collect()
    }

    /// ランタイム側で有効なブレークポイントの数
    pub fn enabled_breakpoints(&self) -> usize {
        self.breakpoints.values().filter(|(_, enabled)| *enabled).count()
    }

    /// 台本に残っているステップ数
    pub fn remaining_steps(&self) -> usize {
        self.script.len()
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRuntime for ScriptedRuntime {
    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            name: "scripted".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "in-memory runtime replaying canned event batches".to_string(),
        }
    }

    fn spawn(&mut self, spec: &TargetSpec) -> Result<ProcessHandle, LaunchError> {
        self.calls.push(Call::Spawn);

        if let Some((reason, stdout, stderr)) = self.launch_failure.take() {
            return Err(LaunchError::new(spec.entry.display().to_string(), reason)
                .with_output(stdout, stderr));
        }

        Ok(ProcessHandle::new(self.pid)
            .with_stdout(Box::new(Cursor::new(std::mem::take(&mut self.stdout))))
            .with_stderr(Box::new(Cursor::new(std::mem::take(&mut self.stderr)))))
    }

    fn watch_class_load(&mut self, class_filter: &str) -> Result<(), RuntimeError> {
        self.calls.push(Call::WatchClassLoad(class_filter.to_string()));
        Ok(())
    }

    fn create_breakpoint(
        &mut self,
        location: &CodeLocation,
    ) -> Result<RuntimeBreakpoint, RuntimeError> {
        self.calls.push(Call::CreateBreakpoint(location.clone()));

        let handle = RuntimeBreakpoint(self.next_handle);
        self.next_handle += 1;
        self.breakpoints.insert(handle, (location.clone(), false));
        Ok(handle)
    }

    fn set_breakpoint_enabled(
        &mut self,
        breakpoint: RuntimeBreakpoint,
        enabled: bool,
    ) -> Result<(), RuntimeError> {
        self.calls.push(Call::SetBreakpointEnabled(breakpoint, enabled));

        let (_, state) = self
            .breakpoints
            .get_mut(&breakpoint)
            .ok_or_else(|| anyhow::anyhow!("unknown runtime breakpoint {:?}", breakpoint))?;
        *state = enabled;
        Ok(())
    }

    fn next_event_batch(&mut self, _deadline: Option<Duration>) -> Result<Receive, RuntimeError> {
        self.calls.push(Call::Receive);

        // 台本を使い切ったら接続終了
        match self.script.pop_front() {
            Some(Step::Batch(events)) => Ok(Receive::Batch(events)),
            Some(Step::TimedOut) => Ok(Receive::TimedOut),
            Some(Step::Fail(message)) => Err(RuntimeError::Failed(anyhow::anyhow!(message))),
            None => Err(RuntimeError::Disconnected),
        }
    }

    fn resume(&mut self) -> Result<(), RuntimeError> {
        self.calls.push(Call::Resume);
        Ok(())
    }

    fn read_top_frame(&mut self, thread: ThreadId) -> Result<TopFrame, RuntimeError> {
        self.calls.push(Call::ReadTopFrame(thread));

        self.frames
            .get(&thread)
            .cloned()
            .ok_or_else(|| RuntimeError::Failed(anyhow::anyhow!("no frame for thread {}", thread)))
    }

    fn dispose(&mut self) {
        self.calls.push(Call::Dispose);
    }
}
