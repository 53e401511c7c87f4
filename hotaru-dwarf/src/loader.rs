//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::{Path, PathBuf};

/// 読み込んだバイナリ全体を指すDWARFリーダー
pub type DwarfSlice = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
pub struct DwarfLoader {
    /// 読み込んだファイルのパス
    path: PathBuf,
    /// オブジェクトファイル
    object_file: object::File<'static>,
    /// エンディアン
    endian: gimli::RunTimeEndian,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<DwarfSlice>,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // セクションへの参照をセッション中保持するため、'staticライフタイムに昇格させる
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let dwarf = load_sections(&object_file, endian)?;
        tracing::debug!(path = ?path, "loaded DWARF sections");

        Ok(Self {
            path: path.to_path_buf(),
            object_file,
            endian,
            dwarf,
        })
    }

    /// 読み込んだファイルのパスを取得
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<DwarfSlice> {
        &self.dwarf
    }

    /// 同じセクションから新しいDWARFコンテキストを構築する
    ///
    /// addr2line のように `gimli::Dwarf` の所有権を要求するコンシューマ向け。
    pub fn load_dwarf(&self) -> Result<gimli::Dwarf<DwarfSlice>> {
        load_sections(&self.object_file, self.endian)
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// .debug_info セクションを持つかどうか
    pub fn has_debug_info(&self) -> bool {
        self.object_file
            .section_by_name(".debug_info")
            .map(|section| section.size() > 0)
            .unwrap_or(false)
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルの場合、DWARF上のアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        use object::ObjectKind;

        // ET_DYN = PIE実行ファイルまたは共有ライブラリ
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }
}

/// オブジェクトファイルからDWARFセクションを読み込む
fn load_sections(
    object_file: &object::File<'static>,
    endian: gimli::RunTimeEndian,
) -> Result<gimli::Dwarf<DwarfSlice>> {
    let load_section = |id: gimli::SectionId| -> Result<DwarfSlice> {
        let data = object_file
            .section_by_name(id.name())
            .and_then(|section| section.data().ok())
            .unwrap_or(&[]);
        Ok(gimli::EndianSlice::new(data, endian))
    };

    gimli::Dwarf::load(load_section)
        .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
}
