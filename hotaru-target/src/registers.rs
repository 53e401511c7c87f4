//! レジスタアクセス機能

use crate::Result;
use nix::libc::user_regs_struct;
use nix::unistd::Pid;

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// レジスタに書き込む
    pub fn write(&self, regs: user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        let regs = self.read()?;
        Ok(regs.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = self.read()?;
        regs.rip = pc;
        self.write(regs)
    }
}

/// DWARF レジスタ番号（System V x86_64 ABI）に対応する値を取り出す
pub fn dwarf_register(regs: &user_regs_struct, register: u16) -> Option<u64> {
    let value = match register {
        0 => regs.rax,
        1 => regs.rdx,
        2 => regs.rcx,
        3 => regs.rbx,
        4 => regs.rsi,
        5 => regs.rdi,
        6 => regs.rbp,
        7 => regs.rsp,
        8 => regs.r8,
        9 => regs.r9,
        10 => regs.r10,
        11 => regs.r11,
        12 => regs.r12,
        13 => regs.r13,
        14 => regs.r14,
        15 => regs.r15,
        16 => regs.rip,
        _ => return None,
    };
    Some(value)
}

/// 停止時点のレジスタのスナップショット
///
/// フレーム検査の間はターゲットが停止しているため、一度読んだ値を使い回せます。
pub struct RegisterSnapshot {
    regs: user_regs_struct,
}

impl RegisterSnapshot {
    /// 現在のレジスタを読み取ってスナップショットを作る
    pub fn capture(registers: &Registers) -> Result<Self> {
        Ok(Self {
            regs: registers.read()?,
        })
    }

    pub fn pc(&self) -> u64 {
        self.regs.rip
    }

    pub fn frame_pointer(&self) -> u64 {
        self.regs.rbp
    }
}

impl hotaru_dwarf::RegisterReader for RegisterSnapshot {
    fn dwarf_register(&self, register: u16) -> Result<u64> {
        dwarf_register(&self.regs, register)
            .ok_or_else(|| anyhow::anyhow!("Unsupported DWARF register {}", register))
    }
}
