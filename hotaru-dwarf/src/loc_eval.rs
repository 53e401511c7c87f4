//! DWARF ロケーション式評価
//!
//! DWARFのロケーション式を評価して、変数のメモリ上の位置を特定します。

use crate::Result;
use gimli::{Evaluation, EvaluationResult, Location, Piece, Reader, Value};

/// ターゲットのメモリ読み取り
pub trait MemoryReader {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>>;
}

/// 停止中スレッドのレジスタ読み取り（DWARFレジスタ番号で指定）
pub trait RegisterReader {
    fn dwarf_register(&self, register: u16) -> Result<u64>;
}

/// ロケーション評価の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    /// レジスタに格納されている
    Reg { reg: u16 },
    /// メモリアドレス
    Addr { addr: u64 },
    /// 式が値そのものを計算した（DW_OP_stack_value）
    Value { value: u64 },
    /// 最適化により削除された
    Empty,
}

/// 評価に使うフレーム情報
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext {
    /// DW_AT_frame_base を評価した値
    pub frame_base: Option<u64>,
    /// Canonical Frame Address
    pub cfa: Option<u64>,
}

/// ロケーション評価器
pub struct LocationEvaluator<R: Reader> {
    eval: Evaluation<R>,
}

impl<R: Reader<Offset = usize>> LocationEvaluator<R> {
    /// 新しいロケーション評価器を作成する
    pub fn new(expr: gimli::Expression<R>, encoding: gimli::Encoding) -> Self {
        Self {
            eval: expr.evaluation(encoding),
        }
    }

    /// ロケーション式を評価する
    pub fn evaluate(
        mut self,
        registers: &dyn RegisterReader,
        memory: &dyn MemoryReader,
        frame: FrameContext,
    ) -> Result<Loc> {
        let mut result = self.eval.evaluate()?;
        loop {
            result = match result {
                EvaluationResult::Complete => break,
                EvaluationResult::RequiresRegister { register, .. } => {
                    let value = registers.dwarf_register(register.0)?;
                    self.eval.resume_with_register(Value::Generic(value))?
                }
                EvaluationResult::RequiresFrameBase => {
                    let fb = frame
                        .frame_base
                        .ok_or_else(|| anyhow::anyhow!("Frame base required but not provided"))?;
                    self.eval.resume_with_frame_base(fb)?
                }
                EvaluationResult::RequiresCallFrameCfa => {
                    let cfa = frame
                        .cfa
                        .ok_or_else(|| anyhow::anyhow!("CFA required but not provided"))?;
                    self.eval.resume_with_call_frame_cfa(cfa)?
                }
                EvaluationResult::RequiresMemory { address, size, .. } => {
                    let bytes = memory.read(address as usize, size as usize)?;
                    let mut value_bytes = [0u8; 8];
                    let copy_size = bytes.len().min(8);
                    value_bytes[..copy_size].copy_from_slice(&bytes[..copy_size]);
                    self.eval
                        .resume_with_memory(Value::Generic(u64::from_le_bytes(value_bytes)))?
                }
                other => {
                    return Err(anyhow::anyhow!("Unsupported evaluation result: {:?}", other));
                }
            };
        }

        let pieces = self.eval.result();
        match &pieces[..] {
            [] => Ok(Loc::Empty),
            [piece] => convert_piece(piece),
            _ => Err(anyhow::anyhow!(
                "Composite locations ({} pieces) are not supported",
                pieces.len()
            )),
        }
    }
}

/// Piece を Loc に変換する
fn convert_piece<R: Reader>(piece: &Piece<R>) -> Result<Loc> {
    match piece.location {
        Location::Empty => Ok(Loc::Empty),
        Location::Register { register } => Ok(Loc::Reg { reg: register.0 }),
        Location::Address { address } => Ok(Loc::Addr { addr: address }),
        Location::Value { value } => Ok(Loc::Value {
            value: value.to_u64(!0)?,
        }),
        _ => Err(anyhow::anyhow!("Unsupported piece location")),
    }
}
