use esp32_compiler::ast::{AssignOp, BinaryOp, CompareOp};
use esp32_compiler::{compile, compile_json, CompileError, Diagnostic, Expr, Program, Stmt};
use esp32_core::{disassemble, Instruction, Machine, NullSink, Opcode};
use proptest::prelude::*;

#[test]
fn counting_loop_fixups() {
    let output = compile_json(
        r#"[
            {"type": "VarDecl", "name": "x", "value": 0},
            {"type": "While", "body": [
                {"type": "ScreenPixel", "x": "x", "y": 0},
                {"type": "Assignment", "name": "x", "op": "+=", "value": 1}
            ]}
        ]"#,
    )
    .unwrap();

    let listing = disassemble(&output.firmware);
    assert!(listing.error.is_none());
    assert_eq!(
        listing.entries,
        vec![
            (0, Instruction::LoadImm { reg: 5, value: 0 }),
            (4, Instruction::Jump { target: 7 }),
            (7, Instruction::LoadImm { reg: 2, value: 0 }),
            (11, Instruction::DrawPixel { x_reg: 5, y_reg: 2 }),
            (15, Instruction::Jump { target: 7 }),
        ]
    );
    // `x += 1` has a literal right-hand side, which lowers to nothing.
    assert!(matches!(
        &output.diagnostics[..],
        [Diagnostic::UnsupportedConstruct { statement: "Assignment", .. }]
    ));

    let mut machine = Machine::default();
    machine.load_firmware(&output.firmware).unwrap();
    machine.start();
    let mut events = Vec::new();
    machine.run_for(20, &mut events).unwrap();
    assert!(machine.is_running());
    assert!(machine.pc_offset() < output.firmware.len());
    assert_eq!(events.len(), 6);
}

#[test]
fn missing_and_malformed_ast_fail() {
    assert!(matches!(compile(None), Err(CompileError::MissingAst)));
    assert!(matches!(
        compile_json("[{\"type\": \"If\"}]"),
        Err(CompileError::ParseFailure(_))
    ));
}

#[test]
fn derived_coordinates_are_recomputed_only_after_assignment() {
    let output = compile_json(
        r#"[
            {"type": "VarDecl", "name": "x", "value": 10},
            {"type": "VarDecl", "name": "y", "value": 50},
            {"type": "VarDecl", "name": "dx", "value": 1},
            {"type": "While", "body": [
                {"type": "ScreenPixel",
                 "x": {"type": "BinaryExpr", "left": "x", "op": "+", "right": 10}, "y": "y"},
                {"type": "ScreenPixel",
                 "x": {"type": "BinaryExpr", "left": "x", "op": "+", "right": 10}, "y": "y"},
                {"type": "Assignment", "name": "x", "op": "+=", "value": "dx"},
                {"type": "ScreenPixel",
                 "x": {"type": "BinaryExpr", "left": "x", "op": "+", "right": 10}, "y": "y"}
            ]}
        ]"#,
    )
    .unwrap();
    assert!(output.diagnostics.is_empty());

    let listing = disassemble(&output.firmware);
    let recomputes = listing
        .instructions()
        .filter(|i| **i == Instruction::LoadImm { reg: 0, value: 10 })
        .count();
    assert_eq!(recomputes, 2);

    let mut machine = Machine::default();
    machine.load_firmware(&output.firmware).unwrap();
    machine.start();
    let mut events = Vec::new();
    // Declarations, setup jump, one loop pass and the back jump.
    machine.run_for(3 + 1 + 12 + 1, &mut events).unwrap();
    assert_eq!(
        events,
        vec![
            esp32_core::PeripheralEvent::DrawPixel { x: 20, y: 50 },
            esp32_core::PeripheralEvent::DrawPixel { x: 20, y: 50 },
            esp32_core::PeripheralEvent::DrawPixel { x: 21, y: 50 },
        ]
    );
}

#[test]
fn negation_bounces_direction() {
    let output = compile_json(
        r#"[
            {"type": "VarDecl", "name": "dx", "value": 3},
            {"type": "Assignment", "name": "dx", "op": "=",
             "value": {"type": "UnaryExpr", "op": "-", "expr": "dx"}}
        ]"#,
    )
    .unwrap();
    let mut machine = Machine::default();
    machine.load_firmware(&output.firmware).unwrap();
    machine.start();
    machine.run_for(5, &mut NullSink).unwrap();
    assert_eq!(machine.registers().get(7), 253);
}

#[test]
fn long_prelude_wraps_loop_targets() {
    let text = "a".repeat(130);
    let program = Program::new(vec![
        Stmt::ScreenPrint { value: text },
        Stmt::While {
            body: vec![Stmt::ScreenClear],
        },
    ]);
    let output = compile(Some(&program)).unwrap();
    // Each character is an `LDI R0, c` followed by `SCR R0`.
    let prelude = 130 * (Opcode::LoadImm.encoded_len() + Opcode::ScreenPrint.encoded_len());
    assert_eq!(prelude, 910);
    assert_eq!(
        output.diagnostics,
        vec![
            Diagnostic::AddressOverflow {
                at: prelude,
                target: prelude + 3
            },
            Diagnostic::AddressOverflow {
                at: prelude + 5,
                target: prelude + 3
            },
        ]
    );
    assert_eq!(
        output.firmware[prelude + 2],
        ((prelude + 3) & 0xFF) as u8
    );
}

fn arb_stmt() -> impl Strategy<Value = Stmt> {
    let var = prop_oneof![Just("x"), Just("y"), Just("dx")].prop_map(str::to_string);
    let leaf = prop_oneof![
        (var.clone(), any::<u8>()).prop_map(|(name, value)| Stmt::VarDecl {
            name,
            value: value as i64
        }),
        (var.clone(), var.clone()).prop_map(|(name, source)| Stmt::Assignment {
            name,
            op: AssignOp::AddAssign,
            value: Expr::Identifier(source),
        }),
        (var.clone(), any::<u8>(), prop::bool::ANY).prop_map(|(base, right, add)| {
            Stmt::ScreenPixel {
                x: Expr::Binary {
                    left: base,
                    op: if add { BinaryOp::Add } else { BinaryOp::Sub },
                    right: right as i64,
                },
                y: Expr::Integer(0),
            }
        }),
        Just(Stmt::ScreenClear),
        (0i64..4).prop_map(|cycles| Stmt::Delay { cycles }),
    ];
    leaf.prop_recursive(2, 12, 4, move |inner| {
        let ops = prop_oneof![
            Just(CompareOp::Gt),
            Just(CompareOp::Lt),
            Just(CompareOp::Eq),
            Just(CompareOp::Ne),
        ];
        prop_oneof![
            (ops, any::<u8>(), prop::collection::vec(inner.clone(), 0..3)).prop_map(
                |(op, right, body)| Stmt::If {
                    left: "x".into(),
                    op,
                    right: right as i64,
                    body,
                }
            ),
            prop::collection::vec(inner, 0..3).prop_map(|body| Stmt::While { body }),
        ]
    })
}

proptest! {
    #[test]
    fn jumps_land_on_instruction_boundaries(
        statements in prop::collection::vec(arb_stmt(), 0..4),
    ) {
        let output = compile(Some(&Program::new(statements))).unwrap();
        prop_assume!(output.firmware.len() <= 255);
        prop_assert!(output.diagnostics.is_empty());

        let listing = disassemble(&output.firmware);
        prop_assert!(listing.error.is_none());
        let mut boundaries: Vec<usize> = listing.entries.iter().map(|(at, _)| *at).collect();
        boundaries.push(output.firmware.len());
        for instr in listing.instructions() {
            if let Some(target) = instr.jump_target() {
                prop_assert!(boundaries.contains(&(target as usize)));
            }
        }
    }
}
