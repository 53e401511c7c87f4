//! ソース行情報

use crate::{DwarfLoader, DwarfSlice, Result};
use gimli::Reader;
use std::collections::HashMap;

/// 行テーブルの1行（ソース行 → 命令アドレス）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    pub line: u32,
    pub address: u64,
}

/// あるソースファイルに属する行テーブル
#[derive(Debug, Clone)]
pub struct SourceLines {
    /// 行テーブル上のファイルパス（最初にマッチしたもの）
    pub path: String,
    /// ステートメント境界の行。アドレス順とは限らない
    pub rows: Vec<LineRow>,
}

/// パスがファイル名サフィックスにマッチするか
///
/// `src/main.rs` は `/home/u/proj/src/main.rs` にマッチするが、
/// `ain.rs` はディレクトリ境界をまたがないのでマッチしない。
pub fn path_matches(path: &str, suffix: &str) -> bool {
    if path == suffix {
        return true;
    }
    path.strip_suffix(suffix)
        .map(|head| head.ends_with('/'))
        .unwrap_or(false)
}

/// 行テーブル読み取り
pub struct LineTableReader<'a> {
    loader: &'a DwarfLoader,
}

impl<'a> LineTableReader<'a> {
    pub fn new(loader: &'a DwarfLoader) -> Self {
        Self { loader }
    }

    /// いずれかのコンパイルユニットが行プログラムを持つか
    pub fn has_line_programs(&self) -> Result<bool> {
        let dwarf = self.loader.dwarf();
        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            if unit.line_program.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// サフィックスにマッチするソースファイルの行テーブルを集める
    ///
    /// どの行プログラムにも該当ファイルが現れない場合は `None` を返します。
    pub fn source_lines(&self, suffix: &str) -> Result<Option<SourceLines>> {
        let dwarf = self.loader.dwarf();
        let mut matched_path: Option<String> = None;
        let mut rows_out = Vec::new();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            let program = match unit.line_program.clone() {
                Some(program) => program,
                None => continue,
            };

            // ファイルインデックスごとの判定結果
            let mut file_matches: HashMap<u64, Option<String>> = HashMap::new();

            let mut rows = program.rows();
            while let Some((header, row)) = rows.next_row()? {
                if row.end_sequence() || !row.is_stmt() {
                    continue;
                }
                let line = match row.line() {
                    Some(line) => line.get() as u32,
                    None => continue,
                };

                let matched = match file_matches.get(&row.file_index()) {
                    Some(matched) => matched.clone(),
                    None => {
                        let matched = match row.file(header) {
                            Some(file) => {
                                let path = file_path(dwarf, &unit, header, file)?;
                                path_matches(&path, suffix).then_some(path)
                            }
                            None => None,
                        };
                        file_matches.insert(row.file_index(), matched.clone());
                        matched
                    }
                };

                if let Some(path) = matched {
                    matched_path.get_or_insert(path);
                    rows_out.push(LineRow {
                        line,
                        address: row.address(),
                    });
                }
            }
        }

        tracing::debug!(suffix, rows = rows_out.len(), "collected line table rows");
        Ok(matched_path.map(|path| SourceLines {
            path,
            rows: rows_out,
        }))
    }
}

/// 行テーブルのファイルエントリからパスを組み立てる
fn file_path<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    file: &gimli::FileEntry<R>,
) -> Result<String> {
    let name = dwarf.attr_string(unit, file.path_name())?;
    let name = name.to_string_lossy()?.into_owned();
    if name.starts_with('/') {
        return Ok(name);
    }

    let mut path = match file.directory(header) {
        Some(dir) => dwarf.attr_string(unit, dir)?.to_string_lossy()?.into_owned(),
        None => String::new(),
    };
    if path.is_empty() {
        return Ok(name);
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(&name);
    Ok(path)
}

/// ソース行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
}

/// アドレスからソース行情報を引く（addr2line）
pub struct LineInfoProvider {
    context: addr2line::Context<DwarfSlice>,
}

impl LineInfoProvider {
    /// ソース行情報プロバイダを作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let context = addr2line::Context::from_dwarf(loader.load_dwarf()?)
            .map_err(|e| anyhow::anyhow!("Failed to build addr2line context: {}", e))?;
        Ok(Self { context })
    }

    /// アドレスからソース行情報を取得する
    pub fn lookup(&self, addr: u64) -> Result<Option<LineInfo>> {
        let location = self
            .context
            .find_location(addr)
            .map_err(|e| anyhow::anyhow!("Failed to look up 0x{:x}: {}", addr, e))?;

        Ok(location.and_then(|loc| {
            Some(LineInfo {
                file: loc.file?.to_string(),
                line: loc.line?,
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matches() {
        assert!(path_matches("src/main.rs", "src/main.rs"));
        assert!(path_matches("/home/u/proj/src/main.rs", "src/main.rs"));
        assert!(path_matches("/home/u/proj/src/main.rs", "main.rs"));
        assert!(!path_matches("/home/u/proj/src/domain.rs", "main.rs"));
        assert!(!path_matches("/home/u/proj/src/lib.rs", "src/main.rs"));
    }
}
