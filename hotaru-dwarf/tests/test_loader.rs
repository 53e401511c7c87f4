//! サンプルバイナリに対するDWARF読み込みのテスト
//!
//! `cargo build -p sample_target` 済みであることが前提です。

use hotaru_dwarf::{DwarfLoader, LineInfoProvider, LineTableReader, SymbolTable, VariableLocator};

const SAMPLE_BINARY: &str = "../target/debug/sample_target";

#[test]
#[ignore = "requires demos/sample_target to be built"]
fn test_load_sample_target() {
    let loader = DwarfLoader::load(SAMPLE_BINARY).expect("Failed to load sample_target");
    assert!(loader.has_debug_info());

    let symbols = SymbolTable::new(&loader).expect("Failed to read symbols");
    assert!(!symbols.is_empty());
}

#[test]
#[ignore = "requires demos/sample_target to be built"]
fn test_source_lines_and_reverse_lookup() {
    let loader = DwarfLoader::load(SAMPLE_BINARY).expect("Failed to load sample_target");
    let reader = LineTableReader::new(&loader);
    assert!(reader.has_line_programs().unwrap());

    let lines = reader
        .source_lines("sample_target/src/main.rs")
        .unwrap()
        .expect("main.rs should appear in the line table");
    assert!(lines.path.ends_with("src/main.rs"));
    assert!(!lines.rows.is_empty());

    // 行テーブルの先頭アドレスを addr2line で引き直すと同じファイルになる
    let row = lines.rows[0];
    let provider = LineInfoProvider::new(&loader).unwrap();
    let info = provider.lookup(row.address).unwrap().expect("address should map back");
    assert!(info.file.ends_with("src/main.rs"));

    assert!(reader.source_lines("no/such/file.rs").unwrap().is_none());
}

#[test]
#[ignore = "requires demos/sample_target to be built"]
fn test_scope_of_compute_has_locals() {
    let loader = DwarfLoader::load(SAMPLE_BINARY).expect("Failed to load sample_target");
    let symbols = SymbolTable::new(&loader).unwrap();

    let compute = symbols
        .resolve_demangled("sample_target::compute")
        .expect("compute should be a function symbol");
    let scope = VariableLocator::new(&loader)
        .scope_at(compute + 1)
        .unwrap()
        .expect("compute should have a DWARF scope");

    assert_eq!(scope.name.as_deref(), Some("compute"));
    let names: Vec<_> = scope.variables.iter().map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"base"), "parameters: {:?}", names);
}
