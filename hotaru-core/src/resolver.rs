//! シンボル解決（クラス + 行 → コード位置）

use crate::errors::ResolveError;
use crate::types::{ClassId, ClassInfo, CodeLocation, LineEntry};
use std::collections::HashMap;

/// シンボルリゾルバ
///
/// ClassLoaded イベントで受け取った行テーブルを保持し、
/// ロード済みのクラスに限って行番号をコード位置に解決します。
#[derive(Debug, Default)]
pub struct SymbolResolver {
    /// クラス -> 行テーブル（None はデバッグ情報なし）
    classes: HashMap<ClassId, Option<Vec<LineEntry>>>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// ロードされたクラスを登録する
    pub fn on_class_loaded(&mut self, info: &ClassInfo) {
        tracing::debug!(
            class = %info.name,
            rows = info.line_table.as_ref().map(Vec::len),
            "class loaded"
        );
        self.classes.insert(info.name.clone(), info.line_table.clone());
    }

    /// クラスがロード済みかどうか
    pub fn is_loaded(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// 行番号をコード位置に解決する
    ///
    /// 一つの行に複数のアドレスが対応する場合（ループの戻り辺、インライン展開など）は
    /// 最も小さいアドレスを選びます。
    ///
    /// # Panics
    ///
    /// `class` の ClassLoaded をまだ受け取っていない場合。
    pub fn resolve(&self, class: &str, line: u32) -> Result<CodeLocation, ResolveError> {
        let table = match self.classes.get(class) {
            Some(table) => table,
            None => panic!("resolve({}:{}) called before {} was loaded", class, line, class),
        };

        let table = table.as_ref().ok_or_else(|| ResolveError::MissingDebugInfo {
            class: class.to_string(),
        })?;

        let address = table
            .iter()
            .filter(|entry| entry.line == line)
            .map(|entry| entry.address)
            .min()
            .ok_or_else(|| ResolveError::NoSuchLine {
                class: class.to_string(),
                line,
            })?;

        Ok(CodeLocation {
            class: class.to_string(),
            line,
            address,
        })
    }
}
