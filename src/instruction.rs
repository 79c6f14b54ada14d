use crate::value::{format_double, Value};
use std::fmt::{self, Display, Formatter};

/// Target written into a forward jump before its destination is known.
pub const UNRESOLVED: usize = usize::MAX;

/// The VM instruction set. Operands travel inside the variant; everything
/// else comes from the current frame's operand stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // literals and variables
    Push(Value),
    Pop,
    Load(usize),
    Store(usize),

    // operations
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    CmpLt,
    CmpLe,
    CmpEq,
    CmpNe,

    // branching, absolute targets
    Jmp(usize),
    Jmpf(usize),

    // functions
    Call(String),
    Ret,

    // built-ins
    Write,
    Read,
    Len,
    Getc,
    ToInt,
    ToDbl,
    ToStr,

    // heap
    AllocS,
    SetF(String),
    GetF(String),
    AllocA,
    SetI,
    GetI,

    // lists
    AllocL,
    Append,
    PopL,
    Clear,
    Max,
    Min,

    // special
    Dup,
    Nop,
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Push(_) => "PUSH",
            Instruction::Pop => "POP",
            Instruction::Load(_) => "LOAD",
            Instruction::Store(_) => "STORE",
            Instruction::Add => "ADD",
            Instruction::Sub => "SUB",
            Instruction::Mul => "MUL",
            Instruction::Div => "DIV",
            Instruction::And => "AND",
            Instruction::Or => "OR",
            Instruction::Not => "NOT",
            Instruction::CmpLt => "CMPLT",
            Instruction::CmpLe => "CMPLE",
            Instruction::CmpEq => "CMPEQ",
            Instruction::CmpNe => "CMPNE",
            Instruction::Jmp(_) => "JMP",
            Instruction::Jmpf(_) => "JMPF",
            Instruction::Call(_) => "CALL",
            Instruction::Ret => "RET",
            Instruction::Write => "WRITE",
            Instruction::Read => "READ",
            Instruction::Len => "LEN",
            Instruction::Getc => "GETC",
            Instruction::ToInt => "TOINT",
            Instruction::ToDbl => "TODBL",
            Instruction::ToStr => "TOSTR",
            Instruction::AllocS => "ALLOCS",
            Instruction::SetF(_) => "SETF",
            Instruction::GetF(_) => "GETF",
            Instruction::AllocA => "ALLOCA",
            Instruction::SetI => "SETI",
            Instruction::GetI => "GETI",
            Instruction::AllocL => "ALLOCL",
            Instruction::Append => "APP",
            Instruction::PopL => "POPL",
            Instruction::Clear => "CLEAR",
            Instruction::Max => "MAX",
            Instruction::Min => "MIN",
            Instruction::Dup => "DUP",
            Instruction::Nop => "NOP",
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Instruction::Jmp(_) | Instruction::Jmpf(_))
    }

    /// Jump target, `None` for non-jumps.
    pub fn target(&self) -> Option<usize> {
        match self {
            Instruction::Jmp(target) | Instruction::Jmpf(target) => Some(*target),
            _ => None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Instruction::Push(Value::String(s)) => write!(f, "PUSH {:?}", s),
            Instruction::Push(Value::Double(v)) => write!(f, "PUSH {}", format_double(*v)),
            Instruction::Push(value) => write!(f, "PUSH {}", value),
            Instruction::Load(slot) | Instruction::Store(slot) => {
                write!(f, "{} {}", self.mnemonic(), slot)
            }
            Instruction::Jmp(target) | Instruction::Jmpf(target) => {
                if *target == UNRESOLVED {
                    write!(f, "{} ?", self.mnemonic())
                } else {
                    write!(f, "{} {}", self.mnemonic(), target)
                }
            }
            Instruction::Call(name) | Instruction::SetF(name) | Instruction::GetF(name) => {
                write!(f, "{} {}", self.mnemonic(), name)
            }
            _ => write!(f, "{}", self.mnemonic()),
        }
    }
}
