//! ブレークポイント管理

use crate::errors::BreakpointError;
use crate::runtime::RuntimeBreakpoint;
use crate::types::CodeLocation;
use std::collections::{BTreeMap, HashMap};

/// ブレークポイントID
pub type BreakpointId = usize;

/// ブレークポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: CodeLocation,
    pub enabled: bool,
}

/// ブレークポイントテーブル
///
/// 論理的なブレークポイント情報と、ランタイムに登録したハンドルを一緒に管理します。
/// 一つのコード位置に対してブレークポイントは高々一つです。
#[derive(Debug)]
pub struct BreakpointTable {
    breakpoints: BTreeMap<BreakpointId, (Breakpoint, Option<RuntimeBreakpoint>)>,
    by_location: HashMap<CodeLocation, BreakpointId>,
    next_id: BreakpointId,
}

impl BreakpointTable {
    /// 新しいブレークポイントテーブルを作成する
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            by_location: HashMap::new(),
            next_id: 1,
        }
    }

    /// コード位置にブレークポイントを登録する（登録直後は無効）
    ///
    /// 同じ位置に登録済みの場合は既存のIDを返します。
    pub fn install(&mut self, location: CodeLocation) -> BreakpointId {
        if let Some(&id) = self.by_location.get(&location) {
            return id;
        }

        let id = self.next_id;
        self.next_id += 1;

        let bp = Breakpoint {
            id,
            location: location.clone(),
            enabled: false,
        };
        self.by_location.insert(location, id);
        self.breakpoints.insert(id, (bp, None));
        id
    }

    /// ランタイム側のハンドルを関連付ける
    pub fn bind(&mut self, id: BreakpointId, handle: RuntimeBreakpoint) -> Result<(), BreakpointError> {
        let (_, slot) = self
            .breakpoints
            .get_mut(&id)
            .ok_or(BreakpointError::NotFound(id))?;
        *slot = Some(handle);
        Ok(())
    }

    /// ランタイム側のハンドルを取得する
    pub fn runtime_handle(&self, id: BreakpointId) -> Option<RuntimeBreakpoint> {
        self.breakpoints.get(&id).and_then(|(_, handle)| *handle)
    }

    /// ブレークポイントを有効化する
    pub fn enable(&mut self, id: BreakpointId) -> Result<(), BreakpointError> {
        self.set_enabled(id, true)
    }

    /// ブレークポイントを無効化する
    pub fn disable(&mut self, id: BreakpointId) -> Result<(), BreakpointError> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<(), BreakpointError> {
        let (bp, _) = self
            .breakpoints
            .get_mut(&id)
            .ok_or(BreakpointError::NotFound(id))?;
        bp.enabled = enabled;
        Ok(())
    }

    /// ブレークポイントを取得する
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id).map(|(bp, _)| bp)
    }

    /// コード位置に登録済みのブレークポイントIDを探す
    pub fn find(&self, location: &CodeLocation) -> Option<BreakpointId> {
        self.by_location.get(location).copied()
    }

    /// 全てのブレークポイントをID順に取得する
    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values().map(|(bp, _)| bp)
    }

    /// 有効なブレークポイントの数
    pub fn enabled_count(&self) -> usize {
        self.all().filter(|bp| bp.enabled).count()
    }

    /// ブレークポイントの数を取得する
    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(line: u32, address: u64) -> CodeLocation {
        CodeLocation {
            class: "Main".to_string(),
            line,
            address,
        }
    }

    #[test]
    fn test_install_is_idempotent_per_location() {
        let mut table = BreakpointTable::new();

        let first = table.install(location(5, 0x1010));
        let again = table.install(location(5, 0x1010));
        let other = table.install(location(6, 0x1020));

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(&location(5, 0x1010)), Some(first));
    }

    #[test]
    fn test_enable_disable() {
        let mut table = BreakpointTable::new();
        let id = table.install(location(5, 0x1010));
        assert!(!table.get(id).unwrap().enabled);

        table.enable(id).unwrap();
        assert!(table.get(id).unwrap().enabled);
        assert_eq!(table.enabled_count(), 1);

        table.disable(id).unwrap();
        assert!(!table.get(id).unwrap().enabled);
        assert_eq!(table.enabled_count(), 0);
    }

    #[test]
    fn test_unknown_id() {
        let mut table = BreakpointTable::new();
        assert_eq!(table.enable(42), Err(BreakpointError::NotFound(42)));
        assert_eq!(
            table.bind(42, RuntimeBreakpoint(1)),
            Err(BreakpointError::NotFound(42))
        );
    }

    #[test]
    fn test_bind_runtime_handle() {
        let mut table = BreakpointTable::new();
        let id = table.install(location(5, 0x1010));
        assert_eq!(table.runtime_handle(id), None);

        table.bind(id, RuntimeBreakpoint(9)).unwrap();
        assert_eq!(table.runtime_handle(id), Some(RuntimeBreakpoint(9)));
    }

    #[test]
    fn test_all_in_id_order() {
        let mut table = BreakpointTable::new();
        table.install(location(9, 0x1090));
        table.install(location(3, 0x1030));

        let lines: Vec<_> = table.all().map(|bp| bp.location.line).collect();
        assert_eq!(lines, vec![9, 3]);
    }
}
