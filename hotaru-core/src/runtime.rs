//! デバッグランタイムのインターフェース
//!
//! プロセスの起動、ブレークポイントの登録、イベントの受信、フレームの読み取りといった
//! 実際のデバッグ操作はこのトレイトの実装に委譲します。
//! セッションとイベントループはこのトレイトを通してのみターゲットに触れます。

use crate::errors::{LaunchError, RuntimeError};
use crate::process::ProcessHandle;
use crate::types::{CodeLocation, DebugEvent, TargetSpec, ThreadId, TopFrame};
use std::fmt;
use std::time::Duration;

/// ランタイムの説明（セッション開始時のバナーに使う）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl fmt::Display for RuntimeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Runtime name: {}", self.name)?;
        writeln!(f, "Runtime version: {}", self.version)?;
        write!(f, "Runtime description: {}", self.description)
    }
}

/// ランタイム側のブレークポイントハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeBreakpoint(pub u64);

/// イベント受信の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive {
    /// 1回の停止で届いたイベントの組（配送順）
    Batch(Vec<DebugEvent>),
    /// 期限までにイベントが届かなかった
    TimedOut,
}

/// デバッグランタイム
pub trait DebugRuntime {
    /// ランタイムの説明
    fn info(&self) -> RuntimeInfo;

    /// ターゲットを起動する
    fn spawn(&mut self, spec: &TargetSpec) -> Result<ProcessHandle, LaunchError>;

    /// クラスのロード通知を購読する
    fn watch_class_load(&mut self, class_filter: &str) -> Result<(), RuntimeError>;

    /// コード位置にブレークポイントを作成する（作成直後は無効）
    fn create_breakpoint(
        &mut self,
        location: &CodeLocation,
    ) -> Result<RuntimeBreakpoint, RuntimeError>;

    /// ブレークポイントを有効化／無効化する
    fn set_breakpoint_enabled(
        &mut self,
        breakpoint: RuntimeBreakpoint,
        enabled: bool,
    ) -> Result<(), RuntimeError>;

    /// 次のイベントの組を受信する
    ///
    /// `deadline` が None の場合はイベントが届くまでブロックします。
    /// 接続が切れている場合は `RuntimeError::Disconnected` を返します。
    fn next_event_batch(&mut self, deadline: Option<Duration>) -> Result<Receive, RuntimeError>;

    /// 停止中のターゲットを再開する
    fn resume(&mut self) -> Result<(), RuntimeError>;

    /// 停止中スレッドの最上位フレームを読み取る
    fn read_top_frame(&mut self, thread: ThreadId) -> Result<TopFrame, RuntimeError>;

    /// ターゲットとの接続を破棄する（複数回呼んでもよい）
    fn dispose(&mut self);
}
