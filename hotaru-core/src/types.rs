//! セッション全体で共有するデータ型

use std::fmt;
use std::path::PathBuf;

/// クラス（デバッグ対象のコンパイル単位）の識別子
pub type ClassId = String;

/// ターゲット内のスレッドID
pub type ThreadId = i32;

/// デバッグ対象プログラムの指定
///
/// 起動時に一度だけ作られ、以後は変更されません。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// 起動するプログラム
    pub entry: PathBuf,
    /// デバッグ対象のクラス
    pub debug_class: ClassId,
    /// 起動オプション（そのままランタイムに渡す）
    pub options: Vec<String>,
    /// ブレークポイントを置く行番号
    pub breakpoint_lines: Vec<u32>,
}

impl TargetSpec {
    pub fn new(entry: impl Into<PathBuf>, debug_class: impl Into<ClassId>) -> Self {
        Self {
            entry: entry.into(),
            debug_class: debug_class.into(),
            options: Vec::new(),
            breakpoint_lines: Vec::new(),
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_breakpoint_lines(mut self, lines: impl IntoIterator<Item = u32>) -> Self {
        self.breakpoint_lines = lines.into_iter().collect();
        self
    }
}

/// 解決済みのコード位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeLocation {
    pub class: ClassId,
    pub line: u32,
    /// 実行時アドレス
    pub address: u64,
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.line)
    }
}

/// 行テーブルの1エントリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub line: u32,
    pub address: u64,
}

/// ロードされたクラスの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: ClassId,
    /// 行テーブル（デバッグ情報なしでコンパイルされた場合は None）
    pub line_table: Option<Vec<LineEntry>>,
}

impl ClassInfo {
    pub fn new(name: impl Into<ClassId>, line_table: Option<Vec<LineEntry>>) -> Self {
        Self {
            name: name.into(),
            line_table,
        }
    }
}

/// ランタイムから届くデバッグイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// クラスがロードされた
    ClassLoaded(ClassInfo),
    /// ブレークポイントで停止した
    BreakpointHit {
        thread: ThreadId,
        location: CodeLocation,
    },
    /// その他のイベント（説明文付き）
    Other(String),
    /// ランタイムとの接続が切れた
    Disconnected,
    /// ターゲットが終了した
    ProcessExited(i32),
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DebugEvent::ClassLoaded(info) => write!(f, "ClassLoaded({})", info.name),
            DebugEvent::BreakpointHit { thread, location } => {
                write!(f, "BreakpointHit({} @ thread {})", location, thread)
            }
            DebugEvent::Other(description) => write!(f, "{}", description),
            DebugEvent::Disconnected => write!(f, "Disconnected"),
            DebugEvent::ProcessExited(code) => write!(f, "ProcessExited({})", code),
        }
    }
}

/// ランタイムが返す変数の値
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
    /// 整形済みの値（構造体、ポインタなど）
    Raw(String),
    /// 値を取り出せない（理由付き）
    Unavailable(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(c) => write!(f, "'{}'", c),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Null => write!(f, "null"),
            Value::Raw(s) => write!(f, "{}", s),
            Value::Unavailable(reason) => write!(f, "<{}>", reason),
        }
    }
}

/// ランタイムが返すローカル変数
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub type_name: String,
    pub value: Value,
}

impl LocalVariable {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
        }
    }
}

/// スタックフレームの位置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLocation {
    /// フレームのコードが属するクラス（ランタイム・ライブラリ内なら None）
    pub class: Option<ClassId>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl fmt::Display for FrameLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.class, self.line) {
            (Some(class), Some(line)) => write!(f, "{}:{}", class, line)?,
            (Some(class), None) => write!(f, "{}", class)?,
            _ => write!(f, "<unknown>")?,
        }
        if let Some(function) = &self.function {
            write!(f, " ({})", function)?;
        }
        Ok(())
    }
}

/// 停止中スレッドの最上位フレーム
#[derive(Debug, Clone, PartialEq)]
pub struct TopFrame {
    pub location: FrameLocation,
    /// ローカル変数（名前情報がない場合は None）
    pub locals: Option<Vec<LocalVariable>>,
}

/// 表示用に整形した変数束縛
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBinding {
    pub name: String,
    pub value: String,
    pub type_name: String,
}

impl fmt::Display for VariableBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(-5).to_string(), "-5");
        assert_eq!(Value::Str("a".to_string()).to_string(), "\"a\"");
        assert_eq!(Value::Char('x').to_string(), "'x'");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(
            Value::Unavailable("optimized out".to_string()).to_string(),
            "<optimized out>"
        );
    }

    #[test]
    fn test_frame_location_display() {
        let location = FrameLocation {
            class: Some("src/main.rs".to_string()),
            line: Some(12),
            function: Some("sample_target::compute".to_string()),
        };
        assert_eq!(location.to_string(), "src/main.rs:12 (sample_target::compute)");
        assert_eq!(FrameLocation::default().to_string(), "<unknown>");
    }

    #[test]
    fn test_target_spec_builder() {
        let spec = TargetSpec::new("/bin/true", "Main")
            .with_options(["-v"])
            .with_breakpoint_lines([3, 7]);

        assert_eq!(spec.debug_class, "Main");
        assert_eq!(spec.options, vec!["-v".to_string()]);
        assert_eq!(spec.breakpoint_lines, vec![3, 7]);
    }
}
