//! 値デコード機能
//!
//! メモリから読み取ったバイト列を、DWARFの型情報に基づいて表示用の値に変換します。

/// デコード設定
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// 文字列の最大表示バイト数
    pub max_string_bytes: usize,
    /// バイト列の最大表示バイト数
    pub max_bytes_display: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_string_bytes: 256,
            max_bytes_display: 64,
        }
    }
}

/// デコード結果の表示値
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Char(char),
    /// 文字列（値, truncated）
    Str(String, bool),
    /// バイト列（値, truncated）
    Bytes(Vec<u8>, bool),
    Ptr(u64),
    /// 値を取り出せない（理由付き）
    Unavailable(String),
}

impl std::fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DisplayValue::Int(v) => write!(f, "{}", v),
            DisplayValue::Uint(v) => write!(f, "{}", v),
            DisplayValue::Float(v) => write!(f, "{}", v),
            DisplayValue::Bool(v) => write!(f, "{}", v),
            DisplayValue::Char(c) => write!(f, "'{}'", c),
            DisplayValue::Str(s, truncated) => {
                write!(f, "\"{}\"", s)?;
                if *truncated {
                    write!(f, "...")?;
                }
                Ok(())
            }
            DisplayValue::Bytes(bytes, truncated) => {
                write!(f, "[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:#04x}", b)?;
                }
                if *truncated {
                    write!(f, ", ...")?;
                }
                write!(f, "]")
            }
            DisplayValue::Ptr(addr) => write!(f, "0x{:x}", addr),
            DisplayValue::Unavailable(reason) => write!(f, "<{}>", reason),
        }
    }
}

/// 基本型のエンコーディング（DW_AT_encoding を簡約したもの）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseEncoding {
    Signed,
    Unsigned,
    Float,
    Boolean,
    /// UTF-32 のコードポイント（Rust の char）
    Utf,
    /// 1バイト文字（C の char）
    ByteChar,
}

impl BaseEncoding {
    /// DW_ATE_* 定数から変換する
    pub fn from_dwarf(encoding: gimli::DwAte) -> Option<Self> {
        let encoding = match encoding {
            gimli::DW_ATE_signed => BaseEncoding::Signed,
            gimli::DW_ATE_unsigned => BaseEncoding::Unsigned,
            gimli::DW_ATE_float => BaseEncoding::Float,
            gimli::DW_ATE_boolean => BaseEncoding::Boolean,
            gimli::DW_ATE_UTF => BaseEncoding::Utf,
            gimli::DW_ATE_signed_char | gimli::DW_ATE_unsigned_char => BaseEncoding::ByteChar,
            _ => return None,
        };
        Some(encoding)
    }
}

/// 値デコーダー
#[derive(Default)]
pub struct ValueDecoder {
    config: DecodeConfig,
}

impl ValueDecoder {
    /// 新しい値デコーダーを作成する
    pub fn new(config: DecodeConfig) -> Self {
        Self { config }
    }

    /// 基本型をデコードする
    pub fn decode_base(&self, bytes: &[u8], encoding: BaseEncoding) -> DisplayValue {
        match (encoding, bytes.len()) {
            (BaseEncoding::Signed, 1) => DisplayValue::Int(bytes[0] as i8 as i64),
            (BaseEncoding::Signed, 2) => DisplayValue::Int(i16::from_le_bytes(le(bytes)) as i64),
            (BaseEncoding::Signed, 4) => DisplayValue::Int(i32::from_le_bytes(le(bytes)) as i64),
            (BaseEncoding::Signed, 8) => DisplayValue::Int(i64::from_le_bytes(le(bytes))),
            (BaseEncoding::Unsigned, 1) => DisplayValue::Uint(bytes[0] as u64),
            (BaseEncoding::Unsigned, 2) => DisplayValue::Uint(u16::from_le_bytes(le(bytes)) as u64),
            (BaseEncoding::Unsigned, 4) => DisplayValue::Uint(u32::from_le_bytes(le(bytes)) as u64),
            (BaseEncoding::Unsigned, 8) => DisplayValue::Uint(u64::from_le_bytes(le(bytes))),
            (BaseEncoding::Float, 4) => DisplayValue::Float(f32::from_le_bytes(le(bytes)) as f64),
            (BaseEncoding::Float, 8) => DisplayValue::Float(f64::from_le_bytes(le(bytes))),
            (BaseEncoding::Boolean, n) if n >= 1 => DisplayValue::Bool(bytes[0] != 0),
            (BaseEncoding::Utf, 4) => match char::from_u32(u32::from_le_bytes(le(bytes))) {
                Some(c) => DisplayValue::Char(c),
                None => DisplayValue::Unavailable("invalid char".to_string()),
            },
            (BaseEncoding::ByteChar, 1) => DisplayValue::Char(bytes[0] as char),
            _ => self.decode_bytes(bytes),
        }
    }

    /// バイト列をデコードする
    pub fn decode_bytes(&self, bytes: &[u8]) -> DisplayValue {
        let limit = bytes.len().min(self.config.max_bytes_display);
        let truncated = bytes.len() > self.config.max_bytes_display;
        DisplayValue::Bytes(bytes[..limit].to_vec(), truncated)
    }

    /// ポインタをデコードする（アドレスのみ）
    pub fn decode_pointer(&self, bytes: &[u8]) -> DisplayValue {
        if bytes.len() >= 8 {
            DisplayValue::Ptr(u64::from_le_bytes(le(&bytes[..8])))
        } else {
            DisplayValue::Unavailable("truncated pointer".to_string())
        }
    }

    /// `&str` のファットポインタ（ptr, len）をデコードする
    ///
    /// `read_mem` でポインタ先の文字列本体を読み取ります。
    pub fn decode_str_slice<F>(&self, bytes: &[u8], mut read_mem: F) -> DisplayValue
    where
        F: FnMut(u64, usize) -> crate::Result<Vec<u8>>,
    {
        if bytes.len() < 16 {
            return DisplayValue::Unavailable("truncated &str".to_string());
        }
        let ptr = u64::from_le_bytes(le(&bytes[..8]));
        let len = u64::from_le_bytes(le(&bytes[8..16])) as usize;

        if len == 0 {
            return DisplayValue::Str(String::new(), false);
        }
        let read_len = len.min(self.config.max_string_bytes);
        match read_mem(ptr, read_len) {
            Ok(data) => self.decode_utf8(&data, len > read_len),
            Err(e) => DisplayValue::Unavailable(format!("unreadable string at 0x{:x}: {}", ptr, e)),
        }
    }

    /// 読み取った文字列本体をデコードする
    ///
    /// 途中で切り詰めた場合は末尾で分断された文字を落とし、直前の文字境界までを表示します。
    /// それ以外で UTF-8 として無効な場合はバイト列として表示します。
    fn decode_utf8(&self, data: &[u8], truncated: bool) -> DisplayValue {
        match std::str::from_utf8(data) {
            Ok(s) => DisplayValue::Str(s.to_string(), truncated),
            Err(e) if truncated && e.error_len().is_none() => {
                let valid = &data[..e.valid_up_to()];
                DisplayValue::Str(String::from_utf8_lossy(valid).into_owned(), true)
            }
            Err(_) => self.decode_bytes(data),
        }
    }
}

/// 長さが型と一致していることを前提に固定長配列へ変換する
fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    let n = bytes.len().min(N);
    array[..n].copy_from_slice(&bytes[..n]);
    array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base_types() {
        let decoder = ValueDecoder::default();

        assert_eq!(
            decoder.decode_base(&(-5i32).to_le_bytes(), BaseEncoding::Signed),
            DisplayValue::Int(-5)
        );
        assert_eq!(
            decoder.decode_base(&12345u64.to_le_bytes(), BaseEncoding::Unsigned),
            DisplayValue::Uint(12345)
        );
        assert_eq!(
            decoder.decode_base(&1.5f64.to_le_bytes(), BaseEncoding::Float),
            DisplayValue::Float(1.5)
        );
        assert_eq!(decoder.decode_base(&[1], BaseEncoding::Boolean), DisplayValue::Bool(true));
        assert_eq!(
            decoder.decode_base(&('x' as u32).to_le_bytes(), BaseEncoding::Utf),
            DisplayValue::Char('x')
        );
        assert_eq!(decoder.decode_base(&[b'a'], BaseEncoding::ByteChar), DisplayValue::Char('a'));
    }

    #[test]
    fn test_decode_base_odd_size_falls_back_to_bytes() {
        let decoder = ValueDecoder::default();
        let value = decoder.decode_base(&[1, 2, 3], BaseEncoding::Signed);
        assert_eq!(value, DisplayValue::Bytes(vec![1, 2, 3], false));
        assert_eq!(value.to_string(), "[0x01, 0x02, 0x03]");
    }

    #[test]
    fn test_decode_str_slice() {
        let decoder = ValueDecoder::default();
        let mut fat = Vec::new();
        fat.extend_from_slice(&0x1000u64.to_le_bytes());
        fat.extend_from_slice(&5u64.to_le_bytes());

        let value = decoder.decode_str_slice(&fat, |addr, size| {
            assert_eq!(addr, 0x1000);
            assert_eq!(size, 5);
            Ok(b"hello".to_vec())
        });
        assert_eq!(value.to_string(), "\"hello\"");
    }

    /// `text` を指す `&str` をデコードする
    fn decode_slice(decoder: &ValueDecoder, text: &str) -> DisplayValue {
        let mut fat = Vec::new();
        fat.extend_from_slice(&0x2000u64.to_le_bytes());
        fat.extend_from_slice(&(text.len() as u64).to_le_bytes());
        decoder.decode_str_slice(&fat, |_, size| Ok(text.as_bytes()[..size].to_vec()))
    }

    #[test]
    fn test_decode_str_slice_truncated() {
        let decoder = ValueDecoder::new(DecodeConfig {
            max_string_bytes: 3,
            max_bytes_display: 64,
        });
        assert_eq!(decode_slice(&decoder, "abcdef").to_string(), "\"abc\"...");
    }

    #[test]
    fn test_truncation_inside_multibyte_char_keeps_prefix() {
        let decoder = ValueDecoder::new(DecodeConfig {
            max_string_bytes: 3,
            max_bytes_display: 64,
        });
        // 'é' は 2 バイトなので 3 バイト目で分断される
        assert_eq!(decode_slice(&decoder, "abéd").to_string(), "\"ab\"...");
    }

    #[test]
    fn test_invalid_utf8_string_falls_back_to_bytes() {
        let decoder = ValueDecoder::default();
        let mut fat = Vec::new();
        fat.extend_from_slice(&0x2000u64.to_le_bytes());
        fat.extend_from_slice(&2u64.to_le_bytes());

        let value = decoder.decode_str_slice(&fat, |_, _| Ok(vec![0xff, 0xfe]));
        assert_eq!(value, DisplayValue::Bytes(vec![0xff, 0xfe], false));
    }

    #[test]
    fn test_unavailable_display() {
        let value = DisplayValue::Unavailable("optimized out".to_string());
        assert_eq!(value.to_string(), "<optimized out>");
    }
}
