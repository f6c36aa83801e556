use esp32_compiler::ast::CompareOp;
use esp32_compiler::{compile, Emulator, Expr, Program, Stmt};
use esp32_core::{Machine, NullSink, PeripheralEvent};

/// `int x = value; if (x OP 5) { screen_clear(); } while (1) { delay(1); }`
fn body_runs(op: CompareOp, value: i64) -> bool {
    let program = Program::new(vec![
        Stmt::VarDecl {
            name: "x".into(),
            value,
        },
        Stmt::If {
            left: "x".into(),
            op,
            right: 5,
            body: vec![Stmt::ScreenClear],
        },
        Stmt::While {
            body: vec![Stmt::Delay { cycles: 1 }],
        },
    ]);
    let output = compile(Some(&program)).unwrap();
    assert!(output.diagnostics.is_empty());

    let mut machine = Machine::default();
    machine.load_firmware(&output.firmware).unwrap();
    machine.start();
    let mut events = Vec::new();
    machine.run_for(32, &mut events).unwrap();
    events.contains(&PeripheralEvent::ClearScreen)
}

#[test]
fn greater_than() {
    assert!(body_runs(CompareOp::Gt, 6));
    assert!(!body_runs(CompareOp::Gt, 5));
    assert!(!body_runs(CompareOp::Gt, 4));
}

#[test]
fn less_than() {
    assert!(body_runs(CompareOp::Lt, 4));
    assert!(!body_runs(CompareOp::Lt, 5));
    assert!(!body_runs(CompareOp::Lt, 6));
}

#[test]
fn equal() {
    assert!(body_runs(CompareOp::Eq, 5));
    assert!(!body_runs(CompareOp::Eq, 4));
    assert!(!body_runs(CompareOp::Eq, 6));
}

#[test]
fn not_equal() {
    assert!(body_runs(CompareOp::Ne, 4));
    assert!(body_runs(CompareOp::Ne, 6));
    assert!(!body_runs(CompareOp::Ne, 5));
}

/// ```text
/// int x = outer; int y = inner;
/// if (x > 5) { if (y < 3) { screen_clear(); } screen_pixel(1, 2); }
/// while (1) { delay(1); }
/// ```
fn nested_events(outer: i64, inner: i64) -> Vec<PeripheralEvent> {
    let program = Program::new(vec![
        Stmt::VarDecl {
            name: "x".into(),
            value: outer,
        },
        Stmt::VarDecl {
            name: "y".into(),
            value: inner,
        },
        Stmt::If {
            left: "x".into(),
            op: CompareOp::Gt,
            right: 5,
            body: vec![
                Stmt::If {
                    left: "y".into(),
                    op: CompareOp::Lt,
                    right: 3,
                    body: vec![Stmt::ScreenClear],
                },
                Stmt::ScreenPixel {
                    x: Expr::Integer(1),
                    y: Expr::Integer(2),
                },
            ],
        },
        Stmt::While {
            body: vec![Stmt::Delay { cycles: 1 }],
        },
    ]);
    let output = compile(Some(&program)).unwrap();
    assert!(output.diagnostics.is_empty());

    let mut machine = Machine::default();
    machine.load_firmware(&output.firmware).unwrap();
    machine.start();
    let mut events = Vec::new();
    machine.run_for(40, &mut events).unwrap();
    assert!(machine.is_running());
    events
}

#[test]
fn nested_if_runs_each_body_only_when_its_condition_holds() {
    let pixel = PeripheralEvent::DrawPixel { x: 1, y: 2 };
    assert_eq!(
        nested_events(9, 0),
        vec![PeripheralEvent::ClearScreen, pixel]
    );
    // Inner skip lands on the rest of the outer body, not past it.
    assert_eq!(nested_events(9, 7), vec![pixel]);
    assert!(nested_events(2, 0).is_empty());
    assert!(nested_events(2, 7).is_empty());
}

#[test]
fn bouncing_ball_reverses_at_the_edge() {
    let mut emu = Emulator::default();
    let report = emu.compile_code(include_str!("../demos/bounce.json"));
    assert!(report.success, "{:?}", report.error);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert!(emu.load_compiled(&mut NullSink).unwrap());
    emu.start();

    let mut xs = Vec::new();
    for _ in 0..40 {
        let mut events = Vec::new();
        emu.tick(&mut events).unwrap();
        xs.extend(events.iter().filter_map(|event| match event {
            PeripheralEvent::DrawPixel { x, .. } => Some(*x),
            _ => None,
        }));
    }
    let max = xs.iter().copied().max().unwrap();
    assert!(max <= 201, "ball escaped to x={max}");
    assert!(xs.windows(2).any(|w| w[1] < w[0]), "ball never turned back");
}
