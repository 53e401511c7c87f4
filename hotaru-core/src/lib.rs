//! Hotaru デバッガのコア機能
//!
//! ターゲットの起動、クラスロード時のブレークポイント解決と設定、デバッグイベントの
//! 受信と処理、停止したフレームのローカル変数の読み取りを行います。
//! 実際のターゲット操作は [`DebugRuntime`] の実装に委譲します。

pub mod breakpoint;
pub mod errors;
pub mod event_loop;
pub mod inspector;
pub mod native;
pub mod process;
pub mod resolver;
pub mod runtime;
pub mod scripted;
pub mod session;
pub mod types;

pub use breakpoint::{Breakpoint, BreakpointId, BreakpointTable};
pub use errors::{BreakpointError, InspectError, LaunchError, ResolveError, RuntimeError};
pub use event_loop::{CancelHandle, EventLoop, LoopState, LoopSummary};
pub use inspector::{FrameInspector, InspectedFrame};
pub use native::NativeRuntime;
pub use process::{ProcessHandle, TargetProcessManager};
pub use resolver::SymbolResolver;
pub use runtime::{DebugRuntime, Receive, RuntimeBreakpoint, RuntimeInfo};
pub use scripted::ScriptedRuntime;
pub use session::{Session, SessionConfig};
pub use types::{
    ClassId, ClassInfo, CodeLocation, DebugEvent, FrameLocation, LineEntry, LocalVariable,
    TargetSpec, ThreadId, TopFrame, Value, VariableBinding,
};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
