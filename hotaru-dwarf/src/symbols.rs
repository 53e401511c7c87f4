//! ELFシンボルテーブル

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol, SymbolKind};

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする（ハッシュ接尾辞は落とす）
fn demangle_symbol(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{:#}", demangled),
        Err(_) => name.to_string(),
    }
}

/// 関数シンボルのテーブル
pub struct SymbolTable {
    /// アドレス順にソートされた関数シンボル
    symbols_by_address: Vec<Symbol>,
}

impl SymbolTable {
    /// ELFのシンボルテーブルから関数シンボルを集める
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let mut symbols = Vec::new();

        for symbol in loader.object_file().symbols() {
            if symbol.kind() != SymbolKind::Text {
                continue;
            }
            let name = match symbol.name() {
                Ok(name) if !name.is_empty() => name,
                _ => continue,
            };

            symbols.push(Symbol::new(name.to_string(), symbol.address(), symbol.size()));
        }

        Ok(Self::from_symbols(symbols))
    }

    fn from_symbols(mut symbols_by_address: Vec<Symbol>) -> Self {
        symbols_by_address.sort_by_key(|s| s.address);
        Self { symbols_by_address }
    }

    /// デマングル済みの名前（`crate::module::function`）からアドレスを解決する
    pub fn resolve_demangled(&self, name: &str) -> Option<u64> {
        self.symbols_by_address
            .iter()
            .find(|s| s.demangled_name == name)
            .map(|s| s.address)
    }

    /// アドレスを含む関数シンボルを返す
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = match self
            .symbols_by_address
            .binary_search_by_key(&addr, |s| s.address)
        {
            Ok(idx) => return self.symbols_by_address.get(idx),
            Err(0) => return None,
            Err(idx) => idx - 1,
        };

        let sym = &self.symbols_by_address[idx];
        // サイズ情報がないシンボルは直前の関数として扱う
        if sym.size == 0 || addr < sym.address + sym.size {
            Some(sym)
        } else {
            None
        }
    }

    /// シンボル数
    pub fn len(&self) -> usize {
        self.symbols_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(symbols: &[(&str, u64, u64)]) -> SymbolTable {
        SymbolTable::from_symbols(
            symbols
                .iter()
                .map(|(name, address, size)| Symbol::new(name.to_string(), *address, *size))
                .collect(),
        )
    }

    #[test]
    fn test_reverse_resolve_within_size() {
        let table = table(&[("main", 0x1000, 0x40), ("helper", 0x1100, 0x20)]);

        assert_eq!(table.reverse_resolve(0x1000).unwrap().name, "main");
        assert_eq!(table.reverse_resolve(0x1010).unwrap().name, "main");
        assert!(table.reverse_resolve(0x1080).is_none());
        assert_eq!(table.reverse_resolve(0x1105).unwrap().name, "helper");
        assert!(table.reverse_resolve(0x0fff).is_none());
        assert_eq!(table.resolve_demangled("main"), Some(0x1000));
    }

    #[test]
    fn test_symbols_are_sorted_by_address() {
        let table = table(&[("late", 0x3000, 0x10), ("early", 0x1000, 0x10)]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.reverse_resolve(0x1008).unwrap().name, "early");
        assert_eq!(table.reverse_resolve(0x3008).unwrap().name, "late");
    }

    #[test]
    fn test_demangle_rust_symbol() {
        let sym = Symbol::new(
            "_ZN13sample_target7compute17h0123456789abcdefE".to_string(),
            0x2000,
            0x10,
        );
        assert_eq!(sym.display_name(), "sample_target::compute");
    }
}
