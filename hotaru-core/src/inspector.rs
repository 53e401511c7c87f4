//! フレーム検査

use crate::errors::InspectError;
use crate::runtime::DebugRuntime;
use crate::types::{ClassId, FrameLocation, LocalVariable, ThreadId, VariableBinding};

/// 検査したフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedFrame {
    pub location: FrameLocation,
    /// デバッグ対象クラスのフレームか（偽なら束縛は常に空）
    pub in_debug_class: bool,
    pub bindings: Vec<VariableBinding>,
}

/// フレームインスペクタ
///
/// デバッグ対象クラスに属するフレームだけを検査し、ランタイムやライブラリの
/// フレームは空の結果として扱います。
#[derive(Debug, Clone)]
pub struct FrameInspector {
    debug_class: ClassId,
}

impl FrameInspector {
    pub fn new(debug_class: impl Into<ClassId>) -> Self {
        Self {
            debug_class: debug_class.into(),
        }
    }

    /// 停止中スレッドのフレームのローカル変数を読み取る
    ///
    /// 検査できるのは最上位フレーム（`frame_index == 0`）だけです。
    /// ターゲットが停止している間は何度呼んでも同じ結果を返します。
    pub fn inspect<R: DebugRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        thread: ThreadId,
        frame_index: usize,
    ) -> Result<Vec<VariableBinding>, InspectError> {
        self.inspect_frame(runtime, thread, frame_index)
            .map(|frame| frame.bindings)
    }

    /// フレーム位置と変数束縛をまとめて取得する
    pub fn inspect_frame<R: DebugRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        thread: ThreadId,
        frame_index: usize,
    ) -> Result<InspectedFrame, InspectError> {
        if frame_index != 0 {
            return Err(InspectError::NoSuchFrame { index: frame_index });
        }

        let frame = runtime.read_top_frame(thread)?;

        if frame.location.class.as_deref() != Some(self.debug_class.as_str()) {
            tracing::debug!(thread, location = %frame.location, "frame outside debug class");
            return Ok(InspectedFrame {
                location: frame.location,
                in_debug_class: false,
                bindings: Vec::new(),
            });
        }

        let locals = frame.locals.ok_or_else(|| InspectError::NoDebugInfo {
            location: frame.location.to_string(),
        })?;

        Ok(InspectedFrame {
            location: frame.location,
            in_debug_class: true,
            bindings: locals.iter().map(render).collect(),
        })
    }
}

/// ローカル変数を表示用の束縛に変換する
fn render(local: &LocalVariable) -> VariableBinding {
    VariableBinding {
        name: local.name.clone(),
        value: local.value.to_string(),
        type_name: local.type_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedRuntime;
    use crate::types::{TopFrame, Value};

    fn frame(class: Option<&str>, locals: Option<Vec<LocalVariable>>) -> TopFrame {
        TopFrame {
            location: FrameLocation {
                class: class.map(str::to_string),
                line: Some(10),
                function: Some("main".to_string()),
            },
            locals,
        }
    }

    #[test]
    fn test_inspect_renders_bindings() {
        let mut runtime = ScriptedRuntime::new().with_frame(
            1,
            frame(
                Some("Main"),
                Some(vec![
                    LocalVariable::new("x", "int", Value::Int(5)),
                    LocalVariable::new("y", "java.lang.String", Value::Str("a".to_string())),
                ]),
            ),
        );
        let inspector = FrameInspector::new("Main");

        let bindings = inspector.inspect(&mut runtime, 1, 0).unwrap();
        assert_eq!(
            bindings,
            vec![
                VariableBinding {
                    name: "x".to_string(),
                    value: "5".to_string(),
                    type_name: "int".to_string(),
                },
                VariableBinding {
                    name: "y".to_string(),
                    value: "\"a\"".to_string(),
                    type_name: "java.lang.String".to_string(),
                },
            ]
        );

        // 停止中は何度読んでも同じ
        assert_eq!(inspector.inspect(&mut runtime, 1, 0).unwrap(), bindings);
    }

    #[test]
    fn test_frame_outside_debug_class_is_empty() {
        let mut runtime = ScriptedRuntime::new().with_frame(
            1,
            frame(
                Some("java.lang.Thread"),
                Some(vec![LocalVariable::new("t", "long", Value::Int(1))]),
            ),
        );
        let inspector = FrameInspector::new("Main");

        assert!(inspector.inspect(&mut runtime, 1, 0).unwrap().is_empty());
    }

    #[test]
    fn test_missing_locals_is_reported() {
        let mut runtime = ScriptedRuntime::new().with_frame(1, frame(Some("Main"), None));
        let inspector = FrameInspector::new("Main");

        let err = inspector.inspect(&mut runtime, 1, 0).unwrap_err();
        assert!(matches!(err, InspectError::NoDebugInfo { .. }));
        assert_eq!(
            err.to_string(),
            "local variable information is not available at Main:10 (main)"
        );
    }

    #[test]
    fn test_only_top_frame() {
        let mut runtime = ScriptedRuntime::new();
        let inspector = FrameInspector::new("Main");

        let err = inspector.inspect(&mut runtime, 1, 2).unwrap_err();
        assert!(matches!(err, InspectError::NoSuchFrame { index: 2 }));
        assert!(runtime.frames_read().is_empty());
    }
}
