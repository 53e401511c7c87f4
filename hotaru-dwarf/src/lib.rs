//! Hotaru DWARF デバッグ情報解析
//!
//! ELFファイルとDWARFデバッグ情報の解析機能を提供します。
//! ソースファイルの行テーブル取得、アドレスからソース行・関数名への変換、
//! ローカル変数のロケーション評価と値のデコードを行います。

pub mod decode;
pub mod lines;
pub mod loader;
pub mod loc_eval;
pub mod symbols;
pub mod variables;

pub use decode::{BaseEncoding, DecodeConfig, DisplayValue, ValueDecoder};
pub use lines::{path_matches, LineInfo, LineInfoProvider, LineRow, LineTableReader, SourceLines};
pub use loader::{DwarfLoader, DwarfSlice};
pub use loc_eval::{FrameContext, Loc, LocationEvaluator, MemoryReader, RegisterReader};
pub use symbols::{Symbol, SymbolTable};
pub use variables::{FunctionScope, LocalValue, TypeShape, Variable, VariableLocator};

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
