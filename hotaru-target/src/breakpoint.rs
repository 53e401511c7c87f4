//! ブレークポイント機能
//!
//! INT3 による停止の判定、停止後の PC の巻き戻し、再開時の踏み越えまでを扱います。

use crate::{Memory, Process, Registers, Result, StopReason};

/// INT3命令のオペコード
pub const INT3_OPCODE: u8 = 0xCC;

/// INT3命令の長さ（停止時の PC はこの分だけ先に進んでいる）
pub const INT3_LEN: u64 = 1;

/// ソフトウェアブレークポイント（INT3命令）
#[derive(Debug)]
pub struct SoftwareBreakpoint {
    address: u64,
    saved_byte: Option<u8>,
}

impl SoftwareBreakpoint {
    /// ブレークポイントを作成する（この時点ではメモリを書き換えない）
    pub fn new(address: u64) -> Self {
        Self {
            address,
            saved_byte: None,
        }
    }

    /// SIGTRAP で停止した PC から、実行された INT3 のアドレスを求める
    pub fn trap_address(pc: u64) -> u64 {
        pc.wrapping_sub(INT3_LEN)
    }

    /// ブレークポイントが有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.saved_byte.is_some()
    }

    /// 停止した PC がこのブレークポイントの INT3 によるものか
    pub fn was_hit(&self, pc: u64) -> bool {
        self.is_enabled() && Self::trap_address(pc) == self.address
    }

    /// 先頭バイトを INT3 に置き換える（有効なら何もしない）
    pub fn enable(&mut self, memory: &Memory) -> Result<()> {
        if self.is_enabled() {
            return Ok(());
        }

        let original = memory.read_u8(self.address as usize)?;
        memory.write_u8(self.address as usize, INT3_OPCODE)?;
        self.saved_byte = Some(original);
        Ok(())
    }

    /// 退避しておいた元のバイトを書き戻す（無効なら何もしない）
    pub fn disable(&mut self, memory: &Memory) -> Result<()> {
        let Some(original) = self.saved_byte else {
            return Ok(());
        };

        memory.write_u8(self.address as usize, original)?;
        self.saved_byte = None;
        Ok(())
    }

    /// PC をブレークポイントのアドレスに戻す
    ///
    /// 再開時には元の命令を先頭から実行し直す必要があります。
    pub fn rewind(&self, registers: &Registers) -> Result<()> {
        registers.set_pc(self.address)
    }

    /// ブレークポイントを外して1命令進め、再び設定する
    ///
    /// 無効なブレークポイントは元の命令に戻っているので何もせず `None` を返します。
    /// ステップ中にプロセスが終了した場合は再設定せずにその停止理由を返します。
    pub fn step_over(&mut self, memory: &Memory, process: &mut Process) -> Result<Option<StopReason>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        self.disable(memory)?;
        let reason = process.step()?;
        if reason.is_terminal() {
            tracing::debug!(address = self.address, ?reason, "target ended while stepping over breakpoint");
            return Ok(Some(reason));
        }
        self.enable(memory)?;
        Ok(Some(reason))
    }
}
