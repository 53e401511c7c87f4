//! Hotaru ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace によるプロセス起動と待機、メモリ・レジスタアクセス、INT3 ブレークポイントを扱います。
//! 現時点では Linux / x86_64 のみをサポートします。

pub mod process;
pub mod memory;
pub mod registers;
pub mod breakpoint;

pub use process::{Process, StopReason, ThreadId};
pub use nix::sys::signal::Signal;
pub use memory::{Memory, MemoryMapping};
pub use registers::{RegisterSnapshot, Registers};
pub use breakpoint::SoftwareBreakpoint;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
