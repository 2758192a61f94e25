use serde::{Deserialize, Serialize};
use std::fmt;

// ── Opcodes ──────────────────────────────────────────────────────────
//
// Stack machine, one opcode per instruction with up to two i32 operands.
// The byte value of each variant is its position in the table below.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Op {
    Enter = 0,
    Leave = 1,
    Const = 2,      // push consts[a]
    Load = 3,       // push locals[a]
    Store = 4,      // locals[a] = pop
    Pop = 5,
    Dup = 6,
    Add = 7,
    Sub = 8,
    Mul = 9,
    Div = 10,
    Mod = 11,
    Not = 12,
    Eq = 13,
    Ne = 14,
    Lt = 15,
    Le = 16,
    Gt = 17,
    Ge = 18,
    Jmp = 19,        // pc += a
    JmpIfFalse = 20, // if !truthy(pop) { pc += a }
    Call = 21,       // call funcs[a] with b args
    Ret = 22,
    Print = 23,
}

impl Op {
    pub const ALL: [Op; 24] = [
        Op::Enter, Op::Leave,
        Op::Const, Op::Load, Op::Store, Op::Pop, Op::Dup,
        Op::Add, Op::Sub, Op::Mul, Op::Div, Op::Mod,
        Op::Not,
        Op::Eq, Op::Ne, Op::Lt, Op::Le, Op::Gt, Op::Ge,
        Op::Jmp, Op::JmpIfFalse,
        Op::Call, Op::Ret,
        Op::Print,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Op::Enter => "ENTER",
            Op::Leave => "LEAVE",
            Op::Const => "CONST",
            Op::Load => "LOAD",
            Op::Store => "STORE",
            Op::Pop => "POP",
            Op::Dup => "DUP",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Not => "NOT",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::Jmp => "JMP",
            Op::JmpIfFalse => "JMP_IF_FALSE",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::Print => "PRINT",
        }
    }

    /// Number of operands the textual form carries for this opcode.
    pub const fn operand_count(self) -> usize {
        match self {
            Op::Const | Op::Load | Op::Store | Op::Jmp | Op::JmpIfFalse => 1,
            Op::Call => 2,
            _ => 0,
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| op.name() == s)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raised when a byte does not name any opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown opcode: {0}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Op {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Op::ALL.get(byte as usize).copied().ok_or(UnknownOpcode(byte))
    }
}

// ── Instruction ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Op,
    #[serde(default)]
    pub a: i32,
    #[serde(default)]
    pub b: i32,
}

impl Instr {
    pub const fn new(op: Op) -> Self {
        Instr { op, a: 0, b: 0 }
    }

    pub const fn with_a(op: Op, a: i32) -> Self {
        Instr { op, a, b: 0 }
    }

    pub const fn with_ab(op: Op, a: i32, b: i32) -> Self {
        Instr { op, a, b }
    }

    /// Decode a raw `(opcode byte, a, b)` triple.
    pub fn decode(byte: u8, a: i32, b: i32) -> Result<Self, UnknownOpcode> {
        Ok(Instr { op: Op::try_from(byte)?, a, b })
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op.operand_count() {
            0 => write!(f, "{}", self.op),
            1 => write!(f, "{} {}", self.op, self.a),
            _ => write!(f, "{} {} {}", self.op, self.a, self.b),
        }
    }
}

// ── Function / Module ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    pub nlocals: usize,
    pub code: Vec<Instr>,
}

impl Function {
    pub fn new(name: impl Into<String>, arity: usize, nlocals: usize, code: Vec<Instr>) -> Self {
        Function { name: name.into(), arity, nlocals, code }
    }
}

/// A loaded program. Read-only once handed to the VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub consts: Vec<i64>,
    pub funcs: Vec<Function>,
}

impl Module {
    pub fn new(consts: Vec<i64>, funcs: Vec<Function>) -> Self {
        Module { consts, funcs }
    }

    /// Index of the first function called `name`.
    pub fn find_function_by_name(&self, name: &str) -> Option<usize> {
        self.funcs.iter().position(|f| f.name == name)
    }

    /// Index of the first function matching both `name` and `arity`.
    pub fn find_function(&self, name: &str, arity: usize) -> Option<usize> {
        self.funcs.iter().position(|f| f.name == name && f.arity == arity)
    }
}

/// Writes the textual `.sbc` form accepted by [`crate::loader::parse`].
impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; Seed Bytecode (textual)")?;
        writeln!(f, ".consts {}", self.consts.len())?;
        for (i, c) in self.consts.iter().enumerate() {
            writeln!(f, "  {i}: {c}")?;
        }
        writeln!(f, ".funcs {}", self.funcs.len())?;
        for (i, func) in self.funcs.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, ".func {i} {} arity={} locals={}", func.name, func.arity, func.nlocals)?;
            for (pc, inst) in func.code.iter().enumerate() {
                writeln!(f, "{pc:4}  {inst}")?;
            }
            writeln!(f, ".end")?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
