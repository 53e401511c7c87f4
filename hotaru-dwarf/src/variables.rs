//! フレームのローカル変数
//!
//! PCを含む関数DIEを探し、その配下の `DW_TAG_variable` / `DW_TAG_formal_parameter`
//! を集めます。値はロケーション式を停止中のレジスタとメモリに対して評価して読み取ります。

use crate::decode::{BaseEncoding, DisplayValue, ValueDecoder};
use crate::loc_eval::{FrameContext, Loc, LocationEvaluator, MemoryReader, RegisterReader};
use crate::{DwarfLoader, DwarfSlice, Result};
use gimli::Reader;

/// typedef / const / volatile をたどる最大段数
const MAX_TYPE_DEPTH: usize = 8;

/// 1変数あたりに読み取る最大バイト数
const MAX_VALUE_BYTES: usize = 256;

/// 値の読み方を決める型の形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    Base(BaseEncoding),
    Pointer,
    /// Rust の `&str`（ptr, len）
    StrSlice,
    Other,
}

/// 変数情報
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_name: String,
    pub byte_size: Option<u64>,
    pub shape: TypeShape,
    /// ロケーション式（None は最適化で削除されたもの）
    location: Option<gimli::Expression<DwarfSlice>>,
}

/// 読み取った変数の値
#[derive(Debug, Clone)]
pub struct LocalValue {
    pub name: String,
    pub type_name: String,
    pub value: DisplayValue,
}

/// PCを含む関数のスコープ
#[derive(Debug, Clone)]
pub struct FunctionScope {
    /// DW_AT_name（修飾なし）
    pub name: Option<String>,
    pub low_pc: u64,
    pub variables: Vec<Variable>,
    encoding: gimli::Encoding,
    frame_base: Option<gimli::Expression<DwarfSlice>>,
}

impl FunctionScope {
    /// DW_AT_frame_base を評価してフレーム情報を作る
    pub fn frame_context(
        &self,
        registers: &dyn RegisterReader,
        memory: &dyn MemoryReader,
        cfa: Option<u64>,
    ) -> Result<FrameContext> {
        let mut frame = FrameContext {
            frame_base: None,
            cfa,
        };

        if let Some(expr) = &self.frame_base {
            let loc = LocationEvaluator::new(expr.clone(), self.encoding)
                .evaluate(registers, memory, frame)?;
            frame.frame_base = match loc {
                Loc::Reg { reg } => Some(registers.dwarf_register(reg)?),
                Loc::Addr { addr } => Some(addr),
                Loc::Value { value } => Some(value),
                Loc::Empty => None,
            };
        }

        Ok(frame)
    }

    /// 全ローカル変数の値を読み取る
    ///
    /// 個々の変数の読み取り失敗は `DisplayValue::Unavailable` として返し、
    /// 他の変数の読み取りは続けます。
    pub fn read_values(
        &self,
        registers: &dyn RegisterReader,
        memory: &dyn MemoryReader,
        cfa: Option<u64>,
        decoder: &ValueDecoder,
    ) -> Result<Vec<LocalValue>> {
        let frame = self.frame_context(registers, memory, cfa)?;

        Ok(self
            .variables
            .iter()
            .map(|var| LocalValue {
                name: var.name.clone(),
                type_name: var.type_name.clone(),
                value: self.read_value(var, registers, memory, frame, decoder),
            })
            .collect())
    }

    fn read_value(
        &self,
        var: &Variable,
        registers: &dyn RegisterReader,
        memory: &dyn MemoryReader,
        frame: FrameContext,
        decoder: &ValueDecoder,
    ) -> DisplayValue {
        let expr = match &var.location {
            Some(expr) => expr.clone(),
            None => return DisplayValue::Unavailable("optimized out".to_string()),
        };

        let loc = match LocationEvaluator::new(expr, self.encoding).evaluate(registers, memory, frame)
        {
            Ok(loc) => loc,
            Err(e) => return DisplayValue::Unavailable(format!("location: {}", e)),
        };

        let size = match var.byte_size {
            Some(size) => (size as usize).min(MAX_VALUE_BYTES),
            None => return DisplayValue::Unavailable("unsized type".to_string()),
        };

        let bytes = match loc {
            Loc::Addr { addr } => match memory.read(addr as usize, size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return DisplayValue::Unavailable(format!("unreadable at 0x{:x}: {}", addr, e))
                }
            },
            Loc::Reg { reg } => match registers.dwarf_register(reg) {
                Ok(value) => value.to_le_bytes()[..size.min(8)].to_vec(),
                Err(e) => return DisplayValue::Unavailable(e.to_string()),
            },
            Loc::Value { value } => value.to_le_bytes()[..size.min(8)].to_vec(),
            Loc::Empty => return DisplayValue::Unavailable("optimized out".to_string()),
        };

        match var.shape {
            TypeShape::Base(encoding) => decoder.decode_base(&bytes, encoding),
            TypeShape::Pointer => decoder.decode_pointer(&bytes),
            TypeShape::StrSlice => {
                decoder.decode_str_slice(&bytes, |addr, len| memory.read(addr as usize, len))
            }
            TypeShape::Other => decoder.decode_bytes(&bytes),
        }
    }
}

/// 変数ロケーター
pub struct VariableLocator<'a> {
    loader: &'a DwarfLoader,
}

impl<'a> VariableLocator<'a> {
    /// 変数ロケーターを作成する
    pub fn new(loader: &'a DwarfLoader) -> Self {
        Self { loader }
    }

    /// PCを含む関数のスコープを取得する
    ///
    /// PCがどの関数DIEにも含まれない場合（デバッグ情報のないコード）は `None`。
    pub fn scope_at(&self, pc: u64) -> Result<Option<FunctionScope>> {
        let dwarf = self.loader.dwarf();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            if let Some((offset, low_pc)) = find_function_at_pc(&unit, pc)? {
                return Ok(Some(collect_scope(dwarf, &unit, offset, low_pc, pc)?));
            }
        }

        Ok(None)
    }
}

/// PCを含む関数DIEを探す
fn find_function_at_pc<R: Reader>(
    unit: &gimli::Unit<R>,
    pc: u64,
) -> Result<Option<(gimli::UnitOffset<R::Offset>, u64)>> {
    let mut entries = unit.entries();
    while let Some((_, entry)) = entries.next_dfs()? {
        if entry.tag() != gimli::DW_TAG_subprogram {
            continue;
        }
        if let Some((low, high)) = pc_range(entry)? {
            if pc >= low && pc < high {
                return Ok(Some((entry.offset(), low)));
            }
        }
    }
    Ok(None)
}

/// DW_AT_low_pc / DW_AT_high_pc からアドレス範囲を取得
///
/// DW_AT_ranges しか持たないエントリは `None`。
fn pc_range<R: Reader>(entry: &gimli::DebuggingInformationEntry<R>) -> Result<Option<(u64, u64)>> {
    let low = match entry.attr_value(gimli::DW_AT_low_pc)? {
        Some(gimli::AttributeValue::Addr(addr)) => addr,
        _ => return Ok(None),
    };
    let high = match entry.attr_value(gimli::DW_AT_high_pc)? {
        Some(gimli::AttributeValue::Addr(addr)) => addr,
        Some(gimli::AttributeValue::Udata(len)) => low + len,
        _ => return Ok(None),
    };
    Ok(Some((low, high)))
}

/// 関数DIE配下の変数を集める
fn collect_scope(
    dwarf: &gimli::Dwarf<DwarfSlice>,
    unit: &gimli::Unit<DwarfSlice>,
    offset: gimli::UnitOffset,
    low_pc: u64,
    pc: u64,
) -> Result<FunctionScope> {
    let (name, frame_base) = {
        let entry = unit.entry(offset)?;
        let frame_base = match entry.attr_value(gimli::DW_AT_frame_base)? {
            Some(gimli::AttributeValue::Exprloc(expr)) => Some(expr),
            _ => None,
        };
        (entry_name(dwarf, unit, &entry)?, frame_base)
    };

    let mut variables = Vec::new();
    let mut tree = unit.entries_tree(Some(offset))?;
    collect_variables(dwarf, unit, tree.root()?, pc, &mut variables)?;

    Ok(FunctionScope {
        name,
        low_pc,
        variables,
        encoding: unit.encoding(),
        frame_base,
    })
}

/// 子エントリを走査し、PCを含むレキシカルブロックには再帰する
fn collect_variables(
    dwarf: &gimli::Dwarf<DwarfSlice>,
    unit: &gimli::Unit<DwarfSlice>,
    node: gimli::EntriesTreeNode<'_, '_, '_, DwarfSlice>,
    pc: u64,
    out: &mut Vec<Variable>,
) -> Result<()> {
    let mut children = node.children();
    while let Some(child) = children.next()? {
        let tag = child.entry().tag();
        if tag == gimli::DW_TAG_variable || tag == gimli::DW_TAG_formal_parameter {
            if let Some(var) = extract_variable(dwarf, unit, child.entry())? {
                out.push(var);
            }
        } else if tag == gimli::DW_TAG_lexical_block {
            // 範囲が DW_AT_ranges の場合は保守的に含める
            let in_block = match pc_range(child.entry())? {
                Some((low, high)) => pc >= low && pc < high,
                None => true,
            };
            if in_block {
                collect_variables(dwarf, unit, child, pc, out)?;
            }
        }
    }
    Ok(())
}

/// 変数情報を抽出する
fn extract_variable(
    dwarf: &gimli::Dwarf<DwarfSlice>,
    unit: &gimli::Unit<DwarfSlice>,
    entry: &gimli::DebuggingInformationEntry<DwarfSlice>,
) -> Result<Option<Variable>> {
    let name = match entry_name(dwarf, unit, entry)? {
        Some(name) => name,
        None => return Ok(None),
    };

    let location = match entry.attr_value(gimli::DW_AT_location)? {
        Some(gimli::AttributeValue::Exprloc(expr)) => Some(expr),
        // ロケーションリストは未対応（-O0 ではほぼ現れない）
        Some(_) => {
            tracing::debug!(variable = %name, "skipping non-exprloc location");
            None
        }
        None => None,
    };

    let (type_name, byte_size, shape) = resolve_type(dwarf, unit, entry)?;

    Ok(Some(Variable {
        name,
        type_name,
        byte_size,
        shape,
        location,
    }))
}

/// 変数の型名・サイズ・形を解決する
fn resolve_type(
    dwarf: &gimli::Dwarf<DwarfSlice>,
    unit: &gimli::Unit<DwarfSlice>,
    entry: &gimli::DebuggingInformationEntry<DwarfSlice>,
) -> Result<(String, Option<u64>, TypeShape)> {
    let mut offset = match entry.attr_value(gimli::DW_AT_type)? {
        Some(gimli::AttributeValue::UnitRef(offset)) => offset,
        _ => return Ok(("<unknown>".to_string(), None, TypeShape::Other)),
    };
    let mut alias: Option<String> = None;

    for _ in 0..MAX_TYPE_DEPTH {
        let ty = unit.entry(offset)?;
        let name = entry_name(dwarf, unit, &ty)?;

        let tag = ty.tag();
        if tag == gimli::DW_TAG_typedef
            || tag == gimli::DW_TAG_const_type
            || tag == gimli::DW_TAG_volatile_type
        {
            if alias.is_none() {
                alias = name;
            }
            match ty.attr_value(gimli::DW_AT_type)? {
                Some(gimli::AttributeValue::UnitRef(next)) => {
                    offset = next;
                    continue;
                }
                _ => return Ok((alias.unwrap_or_else(|| "void".to_string()), None, TypeShape::Other)),
            }
        }

        let name = alias.or(name);
        let shape = if tag == gimli::DW_TAG_base_type {
            match ty.attr_value(gimli::DW_AT_encoding)? {
                Some(gimli::AttributeValue::Encoding(encoding)) => BaseEncoding::from_dwarf(encoding)
                    .map(TypeShape::Base)
                    .unwrap_or(TypeShape::Other),
                _ => TypeShape::Other,
            }
        } else if tag == gimli::DW_TAG_pointer_type || tag == gimli::DW_TAG_reference_type {
            TypeShape::Pointer
        } else if tag == gimli::DW_TAG_structure_type && name.as_deref() == Some("&str") {
            TypeShape::StrSlice
        } else {
            TypeShape::Other
        };

        let byte_size = match ty.attr_value(gimli::DW_AT_byte_size)? {
            Some(value) => value.udata_value(),
            None if shape == TypeShape::Pointer => Some(unit.encoding().address_size as u64),
            None => None,
        };
        let type_name = name.unwrap_or_else(|| match shape {
            TypeShape::Pointer => "*".to_string(),
            _ => "<anonymous>".to_string(),
        });

        return Ok((type_name, byte_size, shape));
    }

    Ok(("<unknown>".to_string(), None, TypeShape::Other))
}

/// DW_AT_name を文字列として取得
fn entry_name<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &gimli::DebuggingInformationEntry<R>,
) -> Result<Option<String>> {
    match entry.attr_value(gimli::DW_AT_name)? {
        Some(attr) => Ok(Some(
            dwarf.attr_string(unit, attr)?.to_string_lossy()?.into_owned(),
        )),
        None => Ok(None),
    }
}
