//! Lowers a [`Program`] into firmware for `esp32_core`.
//!
//! Variables live in fixed registers (`x`→R5, `y`→R6, `dx`→R7). R0–R4 are
//! scratch: R0 stages literals, R1/R2 hold derived pixel coordinates, R3
//! stages the right-hand side of comparisons and R4 stages cursor moves.
//!
//! Jump targets are one byte wide. Forward branches are emitted with a
//! placeholder target and patched once the destination is known; targets
//! that do not fit in a byte wrap and are reported as
//! [`Diagnostic::AddressOverflow`].

use serde::Serialize;
use tracing::{debug, warn};

use esp32_core::isa::HEADER_LEN;
use esp32_core::{Instruction, Opcode};

use crate::ast::{parse_program, AssignOp, BinaryOp, CompareOp, Expr, Program, Stmt, UnaryOp};
use crate::{CompileError, Result};

pub const LITERAL_SCRATCH: u8 = 0;
pub const PIXEL_X_SCRATCH: u8 = 1;
pub const PIXEL_Y_SCRATCH: u8 = 2;
pub const COMPARE_SCRATCH: u8 = 3;
pub const CURSOR_SCRATCH: u8 = 4;

/// The closed set of program variables and their home registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Var {
    X,
    Y,
    Dx,
}

impl Var {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Var::X),
            "y" => Some(Var::Y),
            "dx" => Some(Var::Dx),
            _ => None,
        }
    }

    pub fn register(self) -> u8 {
        match self {
            Var::X => 5,
            Var::Y => 6,
            Var::Dx => 7,
        }
    }
}

/// Non-fatal findings. Compilation still produces firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The statement emitted nothing.
    UnsupportedConstruct {
        statement: &'static str,
        detail: String,
    },
    /// The jump at `at` wanted `target`, which was truncated to one byte.
    AddressOverflow { at: usize, target: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileOutput {
    pub firmware: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Always,
    Eq,
    Neq,
    Gt,
    Lt,
}

impl Branch {
    fn to(self, target: u8) -> Instruction {
        match self {
            Branch::Always => Instruction::Jump { target },
            Branch::Eq => Instruction::JumpEq { target },
            Branch::Neq => Instruction::JumpNeq { target },
            Branch::Gt => Instruction::JumpGt { target },
            Branch::Lt => Instruction::JumpLt { target },
        }
    }
}

/// Branches that skip an `if` body: the negation of its comparison.
fn skip_branches(op: CompareOp) -> &'static [Branch] {
    match op {
        CompareOp::Gt => &[Branch::Lt, Branch::Eq],
        CompareOp::Lt => &[Branch::Gt, Branch::Eq],
        CompareOp::Eq => &[Branch::Neq],
        CompareOp::Ne => &[Branch::Eq],
    }
}

/// Placeholder target bytes still waiting for their destination.
#[derive(Debug, Default)]
struct Fixup {
    placeholders: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn scratch(self) -> u8 {
        match self {
            Axis::X => PIXEL_X_SCRATCH,
            Axis::Y => PIXEL_Y_SCRATCH,
        }
    }

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

/// `base ± literal`, as held in a pixel scratch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Derived {
    base: Var,
    op: BinaryOp,
    literal: u8,
}

/// Which derived value each pixel scratch register currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DerivedTable {
    slots: [Option<Derived>; 2],
}

impl DerivedTable {
    fn holds(&self, axis: Axis, value: Derived) -> bool {
        self.slots[axis.index()] == Some(value)
    }

    fn set(&mut self, axis: Axis, value: Option<Derived>) {
        self.slots[axis.index()] = value;
    }

    fn invalidate_base(&mut self, var: Var) {
        for slot in &mut self.slots {
            if matches!(slot, Some(d) if d.base == var) {
                *slot = None;
            }
        }
    }

    fn clear(&mut self) {
        self.slots = [None; 2];
    }

    /// Keep only entries that `other` agrees on.
    fn intersect(&mut self, other: &DerivedTable) {
        for (slot, theirs) in self.slots.iter_mut().zip(other.slots.iter()) {
            if slot != theirs {
                *slot = None;
            }
        }
    }
}

enum PixelOperand {
    Register(u8),
    Literal(u8),
    Derived(Derived),
}

fn byte(value: i64) -> u8 {
    (value & 0xFF) as u8
}

pub struct CodeGenerator {
    code: Vec<u8>,
    pending: Vec<Fixup>,
    setup_skipped: bool,
    derived: DerivedTable,
    diagnostics: Vec<Diagnostic>,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            pending: Vec::new(),
            setup_skipped: false,
            derived: DerivedTable::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Next emission offset; always the number of bytes emitted so far.
    pub fn address(&self) -> usize {
        self.code.len()
    }

    pub fn generate(mut self, program: &Program) -> CompileOutput {
        self.statements(&program.statements);
        debug!(
            bytes = self.code.len(),
            diagnostics = self.diagnostics.len(),
            "program lowered"
        );
        CompileOutput {
            firmware: self.code,
            diagnostics: self.diagnostics,
        }
    }

    fn statements(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, value } => {
                if let Some(var) = self.variable(stmt, name) {
                    self.load_var(var, byte(*value));
                }
            }
            Stmt::Assignment { name, op, value } => self.assignment(stmt, name, *op, value),
            Stmt::If {
                left,
                op,
                right,
                body,
            } => self.if_block(stmt, left, *op, *right, body),
            Stmt::While { body } => self.while_loop(body),
            Stmt::ScreenPixel { x, y } => self.screen_pixel(stmt, x, y),
            Stmt::ScreenPrint { value } => {
                for ch in value.chars() {
                    self.emit(Instruction::LoadImm {
                        reg: LITERAL_SCRATCH,
                        value: (ch as u32 & 0xFF) as u8,
                    });
                    self.emit(Instruction::ScreenPrint {
                        reg: LITERAL_SCRATCH,
                    });
                }
            }
            Stmt::ScreenClear => self.emit(Instruction::ScreenClear),
            Stmt::ScreenMove { x, y } => self.screen_move(stmt, x, *y),
            Stmt::Delay { cycles } => self.emit(Instruction::Delay {
                cycles: (*cycles & 0xFFFF) as u16,
            }),
        }
    }

    fn assignment(&mut self, stmt: &Stmt, name: &str, op: AssignOp, value: &Expr) {
        let Some(var) = self.variable(stmt, name) else {
            return;
        };
        match (op, value) {
            (AssignOp::Set, Expr::Integer(literal)) => self.load_var(var, byte(*literal)),
            (AssignOp::Set, Expr::Unary { op: UnaryOp::Neg, expr }) => {
                let Expr::Identifier(source) = expr.as_ref() else {
                    return self.unsupported(stmt, format!("{name} = {}", value.describe()));
                };
                let Some(source) = self.variable(stmt, source) else {
                    return;
                };
                // R0 = 0 - source, then var = 0 + R0.
                self.emit(Instruction::LoadImm {
                    reg: LITERAL_SCRATCH,
                    value: 0,
                });
                self.emit(Instruction::Sub {
                    dst: LITERAL_SCRATCH,
                    src: source.register(),
                });
                self.emit(Instruction::LoadImm {
                    reg: var.register(),
                    value: 0,
                });
                self.emit(Instruction::Add {
                    dst: var.register(),
                    src: LITERAL_SCRATCH,
                });
                self.derived.invalidate_base(var);
            }
            (AssignOp::AddAssign, Expr::Identifier(source)) => {
                let Some(source) = self.variable(stmt, source) else {
                    return;
                };
                self.emit(Instruction::Add {
                    dst: var.register(),
                    src: source.register(),
                });
                self.derived.invalidate_base(var);
            }
            _ => {
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::AddAssign => "+=",
                    AssignOp::SubAssign => "-=",
                };
                self.unsupported(stmt, format!("{name} {op} {}", value.describe()));
            }
        }
    }

    fn if_block(&mut self, stmt: &Stmt, left: &str, op: CompareOp, right: i64, body: &[Stmt]) {
        let Some(var) = self.variable(stmt, left) else {
            return;
        };
        self.emit(Instruction::LoadImm {
            reg: COMPARE_SCRATCH,
            value: byte(right),
        });
        self.emit(Instruction::Compare {
            lhs: var.register(),
            rhs: COMPARE_SCRATCH,
        });
        let placeholders = skip_branches(op)
            .iter()
            .map(|branch| self.emit_placeholder(*branch))
            .collect();
        self.pending.push(Fixup { placeholders });

        let before = self.derived.clone();
        self.statements(body);
        let end = self.address();
        if let Some(fixup) = self.pending.pop() {
            for placeholder in fixup.placeholders {
                self.patch(placeholder, end);
            }
        }
        // The body may be skipped at run time, so only values that were
        // already valid before it and untouched inside it survive.
        self.derived.intersect(&before);
    }

    fn while_loop(&mut self, body: &[Stmt]) {
        if !self.setup_skipped {
            let next = self.address() + Opcode::Jump.encoded_len();
            self.emit_jump(Branch::Always, next);
            self.setup_skipped = true;
        }
        let loop_start = self.address();
        let depth = self.pending.len();
        self.derived.clear();
        self.statements(body);
        self.emit_jump(Branch::Always, loop_start);
        let exit = self.address();
        while self.pending.len() > depth {
            if let Some(fixup) = self.pending.pop() {
                for placeholder in fixup.placeholders {
                    self.patch(placeholder, exit);
                }
            }
        }
        debug!(loop_start, exit, "loop lowered");
    }

    fn screen_pixel(&mut self, stmt: &Stmt, x: &Expr, y: &Expr) {
        let Some(x_operand) = self.pixel_operand(stmt, x) else {
            return;
        };
        let Some(y_operand) = self.pixel_operand(stmt, y) else {
            return;
        };
        let x_reg = self.materialize(Axis::X, x_operand);
        let y_reg = self.materialize(Axis::Y, y_operand);
        self.emit(Instruction::DrawPixel { x_reg, y_reg });
    }

    fn pixel_operand(&mut self, stmt: &Stmt, expr: &Expr) -> Option<PixelOperand> {
        match expr {
            Expr::Identifier(name) => {
                let var = self.variable(stmt, name)?;
                Some(PixelOperand::Register(var.register()))
            }
            Expr::Integer(value) => Some(PixelOperand::Literal(byte(*value))),
            Expr::Binary { left, op, right } => {
                let base = self.variable(stmt, left)?;
                Some(PixelOperand::Derived(Derived {
                    base,
                    op: *op,
                    literal: byte(*right),
                }))
            }
            Expr::Unary { .. } => {
                self.unsupported(stmt, format!("pixel coordinate {}", expr.describe()));
                None
            }
        }
    }

    fn materialize(&mut self, axis: Axis, operand: PixelOperand) -> u8 {
        let slot = axis.scratch();
        match operand {
            PixelOperand::Register(reg) => reg,
            PixelOperand::Literal(value) => {
                self.emit(Instruction::LoadImm { reg: slot, value });
                self.derived.set(axis, None);
                slot
            }
            PixelOperand::Derived(value) => {
                if self.derived.holds(axis, value) {
                    return slot;
                }
                self.emit(Instruction::LoadImm {
                    reg: slot,
                    value: 0,
                });
                self.emit(Instruction::Add {
                    dst: slot,
                    src: value.base.register(),
                });
                self.emit(Instruction::LoadImm {
                    reg: LITERAL_SCRATCH,
                    value: value.literal,
                });
                self.emit(match value.op {
                    BinaryOp::Add => Instruction::Add {
                        dst: slot,
                        src: LITERAL_SCRATCH,
                    },
                    BinaryOp::Sub => Instruction::Sub {
                        dst: slot,
                        src: LITERAL_SCRATCH,
                    },
                });
                self.derived.set(axis, Some(value));
                slot
            }
        }
    }

    fn screen_move(&mut self, stmt: &Stmt, x: &Expr, y: i64) {
        let x_reg = match x {
            Expr::Identifier(name) => match self.variable(stmt, name) {
                Some(var) => var.register(),
                None => return,
            },
            Expr::Integer(value) => {
                self.emit(Instruction::LoadImm {
                    reg: CURSOR_SCRATCH,
                    value: byte(*value),
                });
                CURSOR_SCRATCH
            }
            other => {
                return self.unsupported(stmt, format!("cursor x {}", other.describe()));
            }
        };
        self.emit(Instruction::MoveX { reg: x_reg });
        self.emit(Instruction::LoadImm {
            reg: CURSOR_SCRATCH,
            value: byte(y),
        });
        self.emit(Instruction::MoveY {
            reg: CURSOR_SCRATCH,
        });
    }

    fn load_var(&mut self, var: Var, value: u8) {
        self.emit(Instruction::LoadImm {
            reg: var.register(),
            value,
        });
        self.derived.invalidate_base(var);
    }

    fn variable(&mut self, stmt: &Stmt, name: &str) -> Option<Var> {
        let var = Var::from_name(name);
        if var.is_none() {
            self.unsupported(stmt, format!("unknown variable `{name}`"));
        }
        var
    }

    fn emit(&mut self, instr: Instruction) {
        instr.encode_into(&mut self.code);
    }

    fn emit_jump(&mut self, branch: Branch, target: usize) {
        let at = self.address();
        let target = self.target_byte(at, target);
        self.emit(branch.to(target));
    }

    /// Emit `branch` with a zero target; returns the offset of the target byte.
    fn emit_placeholder(&mut self, branch: Branch) -> usize {
        let placeholder = self.address() + HEADER_LEN;
        self.emit(branch.to(0));
        placeholder
    }

    fn patch(&mut self, placeholder: usize, target: usize) {
        let value = self.target_byte(placeholder - HEADER_LEN, target);
        self.code[placeholder] = value;
    }

    fn target_byte(&mut self, at: usize, target: usize) -> u8 {
        if target > u8::MAX as usize {
            warn!(at, target, "jump target does not fit in one byte");
            self.diagnostics
                .push(Diagnostic::AddressOverflow { at, target });
        }
        (target & 0xFF) as u8
    }

    fn unsupported(&mut self, stmt: &Stmt, detail: String) {
        warn!(statement = stmt.kind(), %detail, "construct emits nothing");
        self.diagnostics.push(Diagnostic::UnsupportedConstruct {
            statement: stmt.kind(),
            detail,
        });
    }
}

/// Compile an already-parsed program. `None` means the parser produced nothing.
pub fn compile(program: Option<&Program>) -> Result<CompileOutput> {
    let program = program.ok_or(CompileError::MissingAst)?;
    Ok(CodeGenerator::new().generate(program))
}

pub fn compile_json(json: &str) -> Result<CompileOutput> {
    let program = parse_program(json)?;
    compile(Some(&program))
}

/// Flat, serialisable outcome of a compile request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<Result<CompileOutput>> for CompileReport {
    fn from(result: Result<CompileOutput>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                firmware: Some(output.firmware),
                error: None,
                diagnostics: output.diagnostics,
            },
            Err(err) => Self {
                success: false,
                firmware: None,
                error: Some(err.to_string()),
                diagnostics: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(statements: Vec<Stmt>) -> CompileOutput {
        CodeGenerator::new().generate(&Program::new(statements))
    }

    #[test]
    fn var_decl_loads_home_register() {
        let out = lower(vec![Stmt::VarDecl {
            name: "dx".into(),
            value: 258,
        }]);
        assert_eq!(out.firmware, vec![0x01, 0x02, 7, 2]);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn unknown_variable_emits_nothing() {
        let out = lower(vec![Stmt::VarDecl {
            name: "z".into(),
            value: 1,
        }]);
        assert!(out.firmware.is_empty());
        assert_eq!(
            out.diagnostics,
            vec![Diagnostic::UnsupportedConstruct {
                statement: "VarDecl",
                detail: "unknown variable `z`".into()
            }]
        );
    }

    #[test]
    fn sub_assign_is_reported_not_emitted() {
        let out = lower(vec![Stmt::Assignment {
            name: "x".into(),
            op: AssignOp::SubAssign,
            value: Expr::ident("dx"),
        }]);
        assert!(out.firmware.is_empty());
        assert!(matches!(
            &out.diagnostics[..],
            [Diagnostic::UnsupportedConstruct { statement: "Assignment", detail }] if detail == "x -= dx"
        ));
    }

    #[test]
    fn greater_than_skips_on_less_or_equal() {
        let out = lower(vec![Stmt::If {
            left: "x".into(),
            op: CompareOp::Gt,
            right: 100,
            body: vec![Stmt::ScreenClear],
        }]);
        assert_eq!(
            out.firmware,
            vec![
                0x01, 0x02, 3, 100, // LDI R3, 100
                0x13, 0x02, 5, 3, // CMP R5, R3
                0x1F, 0x01, 16, // JL past body
                0x14, 0x01, 16, // JEQ past body
                0x1A, 0x00, // CLS
            ]
        );
    }

    #[test]
    fn equality_uses_a_single_skip() {
        let out = lower(vec![Stmt::If {
            left: "y".into(),
            op: CompareOp::Eq,
            right: 0,
            body: vec![],
        }]);
        assert_eq!(&out.firmware[8..], &[0x15, 0x01, 11]);
    }

    #[test]
    fn first_loop_skips_setup_slot_once() {
        let out = lower(vec![
            Stmt::While { body: vec![] },
            Stmt::While { body: vec![] },
        ]);
        assert_eq!(
            out.firmware,
            vec![
                0x04, 0x01, 3, // skip setup slot
                0x04, 0x01, 3, // first loop back edge
                0x04, 0x01, 6, // second loop back edge
            ]
        );
    }

    #[test]
    fn derived_value_is_cached_until_base_changes() {
        let pixel = Stmt::ScreenPixel {
            x: Expr::Binary {
                left: "x".into(),
                op: BinaryOp::Add,
                right: 10,
            },
            y: Expr::ident("y"),
        };
        let out = lower(vec![
            pixel.clone(),
            pixel.clone(),
            Stmt::Assignment {
                name: "x".into(),
                op: AssignOp::AddAssign,
                value: Expr::ident("dx"),
            },
            pixel,
        ]);
        // 4 + 1, then 1, then 1, then 4 + 1 instructions of 4 bytes each.
        assert_eq!(out.firmware.len(), (5 + 1 + 1 + 5) * 4);
        let listing = esp32_core::disassemble(&out.firmware);
        assert!(listing.error.is_none());
        assert_eq!(
            listing.entries[4].1,
            Instruction::DrawPixel { x_reg: 1, y_reg: 6 }
        );
        assert_eq!(
            listing.entries[5].1,
            Instruction::DrawPixel { x_reg: 1, y_reg: 6 }
        );
    }

    #[test]
    fn different_literal_is_not_served_from_cache() {
        let pixel = |right| Stmt::ScreenPixel {
            x: Expr::Binary {
                left: "x".into(),
                op: BinaryOp::Add,
                right,
            },
            y: Expr::Integer(0),
        };
        let out = lower(vec![pixel(10), pixel(20)]);
        // Each: 4 derived + 1 literal load + 1 draw.
        assert_eq!(out.firmware.len(), 2 * 6 * 4);
    }

    #[test]
    fn value_derived_inside_if_is_not_trusted_afterwards() {
        let pixel = Stmt::ScreenPixel {
            x: Expr::ident("x"),
            y: Expr::Binary {
                left: "y".into(),
                op: BinaryOp::Sub,
                right: 1,
            },
        };
        let out = lower(vec![
            Stmt::If {
                left: "x".into(),
                op: CompareOp::Lt,
                right: 5,
                body: vec![pixel.clone()],
            },
            pixel,
        ]);
        let recomputed = esp32_core::disassemble(&out.firmware)
            .instructions()
            .filter(|i| matches!(i, Instruction::Sub { dst: 2, src: 0 }))
            .count();
        assert_eq!(recomputed, 2);
    }

    #[test]
    fn wrapped_targets_are_reported() {
        let body = vec![Stmt::ScreenClear; 130];
        let out = lower(vec![Stmt::If {
            left: "x".into(),
            op: CompareOp::Ne,
            right: 1,
            body,
        }]);
        let end = out.firmware.len();
        assert_eq!(end, 8 + 3 + 260);
        assert_eq!(out.firmware[10], (end & 0xFF) as u8);
        assert_eq!(
            out.diagnostics,
            vec![Diagnostic::AddressOverflow { at: 8, target: end }]
        );
    }

    #[test]
    fn missing_ast_fails_the_report() {
        let report = CompileReport::from(compile(None));
        assert!(!report.success);
        assert!(report.firmware.is_none());
        assert_eq!(report.error.as_deref(), Some("no AST to compile"));
    }
}
