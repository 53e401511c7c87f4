//! エラー型とエラーメッセージ定数

use crate::breakpoint::BreakpointId;
use crate::types::ClassId;
use thiserror::Error;

/// プロセスが起動されていない場合のエラーメッセージ
pub const ERR_NOT_LAUNCHED: &str = "Target process not launched";

/// DWARF情報がロードされていない場合のエラーメッセージ
pub const ERR_DWARF_NOT_LOADED: &str = "DWARF information not loaded";

/// ターゲットを起動できなかった
///
/// 失敗までにターゲットが出力した内容を診断用に保持します。
#[derive(Debug, Error)]
#[error("failed to launch {program}: {reason}")]
pub struct LaunchError {
    pub program: String,
    pub reason: String,
    pub partial_stdout: Vec<u8>,
    pub partial_stderr: Vec<u8>,
}

impl LaunchError {
    pub fn new(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            reason: reason.into(),
            partial_stdout: Vec::new(),
            partial_stderr: Vec::new(),
        }
    }

    /// 起動失敗までの出力を添付する
    pub fn with_output(mut self, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        self.partial_stdout = stdout;
        self.partial_stderr = stderr;
        self
    }
}

/// (クラス, 行) をコード位置に解決できなかった
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no executable code at {class}:{line}")]
    NoSuchLine { class: ClassId, line: u32 },
    #[error("{class} was compiled without line number information")]
    MissingDebugInfo { class: ClassId },
}

/// フレームを検査できなかった
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("local variable information is not available at {location}")]
    NoDebugInfo { location: String },
    #[error("frame {index} is not available (only the top frame can be inspected)")]
    NoSuchFrame { index: usize },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// ランタイム呼び出しの失敗
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// 接続終了（正常な終端条件）
    #[error("Target disconnected")]
    Disconnected,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, RuntimeError::Disconnected)
    }
}

/// ブレークポイントテーブル操作の失敗
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BreakpointError {
    #[error("Breakpoint not found: {0}")]
    NotFound(BreakpointId),
}
