//! 台本ランタイムを使ったセッション全体のテスト

use hotaru_core::scripted::Call;
use hotaru_core::{
    BreakpointTable, ClassInfo, CodeLocation, DebugEvent, FrameInspector, FrameLocation,
    LineEntry, LocalVariable, LoopState, ResolveError, ScriptedRuntime, Session, SessionConfig,
    SymbolResolver, TargetSpec, TopFrame, Value, VariableBinding,
};

/// 行 3, 4, 6 にコードがあり、行 5 は空行のクラス
fn main_class() -> ClassInfo {
    ClassInfo::new(
        "Main",
        Some(vec![
            LineEntry { line: 3, address: 0x30 },
            LineEntry { line: 4, address: 0x40 },
            LineEntry { line: 6, address: 0x60 },
            LineEntry { line: 4, address: 0x48 },
        ]),
    )
}

fn hit(thread: i32, line: u32, address: u64) -> DebugEvent {
    DebugEvent::BreakpointHit {
        thread,
        location: CodeLocation {
            class: "Main".to_string(),
            line,
            address,
        },
    }
}

fn frame(line: u32, locals: Vec<LocalVariable>) -> TopFrame {
    TopFrame {
        location: FrameLocation {
            class: Some("Main".to_string()),
            line: Some(line),
            function: Some("main".to_string()),
        },
        locals: Some(locals),
    }
}

fn session(runtime: ScriptedRuntime, lines: &[u32]) -> (Session<ScriptedRuntime>, TargetSpec) {
    let spec = TargetSpec::new("Main", "Main").with_breakpoint_lines(lines.iter().copied());
    let session = Session::new(runtime, SessionConfig::from_spec(&spec));
    (session, spec)
}

#[test]
fn test_every_resolvable_line_gets_an_enabled_breakpoint() {
    let runtime = ScriptedRuntime::new().with_batch(vec![DebugEvent::ClassLoaded(main_class())]);
    let (mut session, spec) = session(runtime, &[3, 4, 6]);

    session.launch(&spec).unwrap();
    session.run(std::io::sink());

    assert_eq!(session.breakpoints().len(), 3);
    assert_eq!(session.breakpoints().enabled_count(), 3);
    assert!(session.breakpoints().all().all(|bp| bp.enabled));
    assert_eq!(session.runtime().enabled_breakpoints(), 3);
}

#[test]
fn test_resolve_and_install_are_idempotent() {
    let mut resolver = SymbolResolver::new();
    resolver.on_class_loaded(&main_class());

    let first = resolver.resolve("Main", 4).unwrap();
    let second = resolver.resolve("Main", 4).unwrap();
    assert_eq!(first, second);
    // 行 4 は二つのアドレスを持ち、小さい方が選ばれる
    assert_eq!(first.address, 0x40);

    let mut table = BreakpointTable::new();
    let id = table.install(first);
    assert_eq!(table.install(second), id);
    assert_eq!(table.len(), 1);
}

#[test]
fn test_hits_in_one_batch_are_inspected_in_order_then_resumed_once() {
    let runtime = ScriptedRuntime::new()
        .with_frame(1, frame(3, vec![LocalVariable::new("a", "int", Value::Int(1))]))
        .with_frame(2, frame(4, vec![LocalVariable::new("b", "int", Value::Int(2))]))
        .with_batch(vec![
            DebugEvent::ClassLoaded(main_class()),
            hit(1, 3, 0x30),
            hit(2, 4, 0x40),
        ]);
    let (mut session, spec) = session(runtime, &[3, 4]);

    session.launch(&spec).unwrap();
    let mut out = Vec::new();
    let summary = session.run(&mut out);

    let runtime = session.runtime();
    assert_eq!(runtime.frames_read(), vec![1, 2]);
    assert_eq!(runtime.resume_count(), 1);

    // 再開はバッチ内の全ての検査の後
    let calls = runtime.calls();
    let resume_at = calls.iter().position(|c| *c == Call::Resume).unwrap();
    let last_read = calls
        .iter()
        .rposition(|c| matches!(c, Call::ReadTopFrame(_)))
        .unwrap();
    assert!(last_read < resume_at);

    assert_eq!(summary.breakpoint_hits, 2);
    assert_eq!(summary.batches, 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Variables at Main:3 (main) >\na = 1\n\
         Variables at Main:4 (main) >\nb = 2\n\
         Target disconnected\n"
    );
}

#[test]
fn test_inspector_renders_locals_and_skips_foreign_frames() {
    let mut runtime = ScriptedRuntime::new()
        .with_frame(
            1,
            frame(
                3,
                vec![
                    LocalVariable::new("x", "int", Value::Int(5)),
                    LocalVariable::new("y", "java.lang.String", Value::Str("a".to_string())),
                ],
            ),
        )
        .with_frame(
            2,
            TopFrame {
                location: FrameLocation {
                    class: Some("java.util.ArrayList".to_string()),
                    line: Some(120),
                    function: Some("add".to_string()),
                },
                locals: Some(vec![LocalVariable::new("e", "Object", Value::Null)]),
            },
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

    assert_eq!(inspector.inspect(&mut runtime, 2, 0).unwrap(), Vec::new());
}

#[test]
fn test_disconnect_drains_buffered_events_and_terminates() {
    let runtime = ScriptedRuntime::new()
        .with_batch(vec![
            DebugEvent::Other("before".to_string()),
            DebugEvent::Disconnected,
            DebugEvent::Other("buffered".to_string()),
        ])
        .with_batch(vec![DebugEvent::Other("never".to_string())]);
    let (mut session, spec) = session(runtime, &[]);

    session.launch(&spec).unwrap();
    let mut out = Vec::new();
    let summary = session.run(&mut out);

    assert_eq!(summary.final_state, LoopState::Terminated);
    assert_eq!(summary.batches, 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "before\nTarget disconnected\nbuffered\n"
    );
    assert_eq!(session.runtime().resume_count(), 0);
    assert_eq!(session.runtime().remaining_steps(), 1);
    assert_eq!(session.runtime().dispose_count(), 1);
}

#[test]
fn test_disconnected_receive_terminates_without_error() {
    let (mut session, spec) = session(ScriptedRuntime::new(), &[3]);

    session.launch(&spec).unwrap();
    let summary = session.run(std::io::sink());

    assert_eq!(summary.final_state, LoopState::Terminated);
    assert_eq!(summary.batches, 0);
    assert_eq!(session.runtime().receive_count(), 1);
}

#[test]
fn test_line_without_code_is_skipped() {
    let runtime = ScriptedRuntime::new().with_batch(vec![DebugEvent::ClassLoaded(main_class())]);
    let (mut session, spec) = session(runtime, &[3, 5]);

    session.launch(&spec).unwrap();
    session.run(std::io::sink());

    assert_eq!(
        session.resolver().resolve("Main", 5),
        Err(ResolveError::NoSuchLine {
            class: "Main".to_string(),
            line: 5
        })
    );
    assert_eq!(session.breakpoints().len(), 1);
    let lines: Vec<_> = session
        .runtime()
        .created_breakpoints()
        .iter()
        .map(|location| location.line)
        .collect();
    assert_eq!(lines, vec![3]);
}

#[test]
fn test_missing_line_table_installs_nothing() {
    let runtime = ScriptedRuntime::new()
        .with_batch(vec![DebugEvent::ClassLoaded(ClassInfo::new("Main", None))]);
    let (mut session, spec) = session(runtime, &[3]);

    session.launch(&spec).unwrap();
    let summary = session.run(std::io::sink());

    assert!(session.breakpoints().is_empty());
    assert_eq!(summary.final_state, LoopState::Terminated);
}

#[test]
fn test_launch_failure_reports_partial_output() {
    let runtime = ScriptedRuntime::new().with_launch_failure(
        "could not find main class",
        b"",
        b"Error: Could not find or load main class Main\n",
    );
    let (mut session, spec) = session(runtime, &[3]);

    let err = session.launch(&spec).unwrap_err();
    assert_eq!(err.to_string(), "failed to launch Main: could not find main class");
    assert_eq!(
        err.partial_stderr,
        b"Error: Could not find or load main class Main\n"
    );
    assert!(!session.processes().is_launched());
}

#[test]
fn test_output_is_drained_once_after_run() {
    let runtime = ScriptedRuntime::new()
        .with_output(b"total = 27\n", b"")
        .with_batch(vec![DebugEvent::ProcessExited(0)]);
    let (mut session, spec) = session(runtime, &[]);

    session.launch(&spec).unwrap();
    let summary = session.run(std::io::sink());
    assert_eq!(summary.exit_code, Some(0));
    assert_eq!(session.processes().exit_code(), Some(0));

    let mut out = Vec::new();
    let mut err = Vec::new();
    session.drain_output(&mut out, &mut err).unwrap();
    assert_eq!(out, b"total = 27\n");
    assert!(err.is_empty());

    let mut again = Vec::new();
    assert_eq!(session.drain_output(&mut again, &mut err).unwrap(), 0);
}

#[test]
fn test_cancel_handle_stops_before_next_receive() {
    let runtime = ScriptedRuntime::new()
        .with_timeout()
        .with_batch(vec![DebugEvent::Other("never".to_string())]);
    let (mut session, spec) = session(runtime, &[]);
    session.launch(&spec).unwrap();

    session.cancel_handle().cancel();
    let summary = session.run(std::io::sink());

    assert_eq!(summary.final_state, LoopState::Terminated);
    assert_eq!(session.runtime().receive_count(), 0);
    assert_eq!(session.runtime().remaining_steps(), 2);
}
