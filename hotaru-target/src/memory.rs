//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::Path;
use std::sync::OnceLock;

/// /proc/pid/maps の1行のフォーマット
///
/// 例: "55d0c8a00000-55d0c8a21000 r-xp 00001000 08:01 123456 /usr/bin/target"
const MAPS_LINE_PATTERN: &str =
    r"^([0-9a-f]+)-([0-9a-f]+)\s+([r-])([w-])([x-])[ps]\s+([0-9a-f]+)\s+\S+\s+\d+\s*(.*)$";

/// コンパイル済みの [`MAPS_LINE_PATTERN`]（初回呼び出し時に一度だけコンパイルする）
fn maps_line_regex() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(MAPS_LINE_PATTERN)?;
    Ok(PATTERN.get_or_init(|| pattern))
}

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// マッピング元ファイル内のオフセット
    pub offset: u64,
    /// マッピング元のパス（無名マッピングの場合は None）
    pub path: Option<String>,
}

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                // EIO (errno 5): 未マッピング領域など
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(5) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e)
            })?;
            data.extend_from_slice(&word.to_ne_bytes());
        }

        data.truncate(size);
        Ok(data)
    }

    /// メモリにデータを書き込む
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリに書き込みます。
    /// テキストセグメントのような読み取り専用ページにも書き込めます。
    pub fn write(&self, addr: usize, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", addr, e))?;

        file.write_all(data).map_err(|e| {
            anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e)
        })?;

        Ok(())
    }

    /// u8値を読み取る
    pub fn read_u8(&self, addr: usize) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Cannot read u8 from empty bytes"))
    }

    /// u8値を書き込む
    pub fn write_u8(&self, addr: usize, value: u8) -> Result<()> {
        self.write(addr, &[value])
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let maps = std::fs::read_to_string(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", maps_path, e))?;
        parse_mappings(&maps)
    }

    /// 実行可能ファイルのロードベースアドレスを取得する
    ///
    /// PIE実行ファイルは実行時にランダムなアドレスにロードされます。
    /// 指定したファイルのマッピングのうち最も低い開始アドレスを返します。
    pub fn load_base(&self, executable: &Path) -> Result<u64> {
        let canonical = std::fs::canonicalize(executable)
            .map_err(|e| anyhow::anyhow!("Failed to resolve {:?}: {}", executable, e))?;
        let canonical = canonical.to_string_lossy();

        self.get_mappings()?
            .iter()
            .filter(|m| m.path.as_deref() == Some(canonical.as_ref()))
            .map(|m| m.start - m.offset)
            .min()
            .ok_or_else(|| anyhow::anyhow!("No memory mapping found for {}", canonical))
    }
}

/// /proc/pid/maps の内容をパースする
pub fn parse_mappings(maps: &str) -> Result<Vec<MemoryMapping>> {
    let pattern = maps_line_regex()?;
    let mut mappings = Vec::new();

    for line in maps.lines() {
        let Some(caps) = pattern.captures(line) else {
            continue;
        };

        let start = u64::from_str_radix(&caps[1], 16)?;
        let end = u64::from_str_radix(&caps[2], 16)?;
        let offset = u64::from_str_radix(&caps[6], 16)?;
        let path = caps[7].trim();

        mappings.push(MemoryMapping {
            start,
            end,
            readable: &caps[3] == "r",
            writable: &caps[4] == "w",
            executable: &caps[5] == "x",
            offset,
            path: (!path.is_empty()).then(|| path.to_string()),
        });
    }

    Ok(mappings)
}

impl hotaru_dwarf::MemoryReader for Memory {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        Memory::read(self, addr, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAPS: &str = "\
55d0c8a00000-55d0c8a01000 r--p 00000000 08:01 1311 /opt/demo/sample_target
55d0c8a01000-55d0c8a21000 r-xp 00001000 08:01 1311 /opt/demo/sample_target
55d0c9e4f000-55d0c9e70000 rw-p 00000000 00:00 0          [heap]
7f3a1c000000-7f3a1c021000 rw-p 00000000 00:00 0
";

    #[test]
    fn test_parse_mappings() {
        let mappings = parse_mappings(SAMPLE_MAPS).unwrap();
        assert_eq!(mappings.len(), 4);

        let text = &mappings[1];
        assert_eq!(text.start, 0x55d0c8a01000);
        assert_eq!(text.end, 0x55d0c8a21000);
        assert!(text.readable && text.executable && !text.writable);
        assert_eq!(text.offset, 0x1000);
        assert_eq!(text.path.as_deref(), Some("/opt/demo/sample_target"));

        assert_eq!(mappings[2].path.as_deref(), Some("[heap]"));
        assert_eq!(mappings[3].path, None);
    }

    #[test]
    fn test_maps_pattern_is_compiled_once() {
        let first = maps_line_regex().unwrap();
        let second = maps_line_regex().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_parse_mappings_skips_garbage() {
        let mappings = parse_mappings("not a mapping line\n").unwrap();
        assert!(mappings.is_empty());
    }
}
