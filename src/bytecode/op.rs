use std::fmt;
use std::rc::Rc;

use serde::Serialize;

/// Symbolic jump target, unique across a whole program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelId(pub usize);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// How a `Fetch` resolves its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Access {
    /// Read a variable through the environment chain.
    Variable,
    /// Pop an object and read one of its properties.
    Property,
    /// Read a variable that is about to be called with `argc` arguments.
    /// Host natives are invoked here instead of by the following `Call`.
    CallVariable(u8),
    /// Pop an object and read a method that is about to be called.
    CallProperty(u8),
}

impl Access {
    pub fn is_property(self) -> bool {
        matches!(self, Access::Property | Access::CallProperty(_))
    }

    pub fn call_argc(self) -> Option<u8> {
        match self {
            Access::CallVariable(argc) | Access::CallProperty(argc) => Some(argc),
            _ => None,
        }
    }
}

// =============================================================================
// OP - Bytecode instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Op {
    /// Placeholder emitted where a statement produces no code.
    Nop,

    /// Jump target. Does nothing when executed.
    Label(LabelId),

    // literals
    Const(usize),

    // stack ops
    Pop,
    Dup,
    /// Copy the value `n` entries below the top onto the top.
    Pick(usize),

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // logic
    Not,

    // ==========================================================================
    // Control flow
    // ==========================================================================
    Jmp(LabelId),

    /// Pop a value, jump if it is falsy.
    JmpFalse(LabelId),

    /// Pop a value, jump if it is truthy.
    JmpTrue(LabelId),

    // ==========================================================================
    // Scopes and variables
    // ==========================================================================
    EnterScope,
    LeaveScope,
    Declare(Rc<str>),

    /// Assign the value on top of the stack and leave it there. Property
    /// stores pop the value, then the target object, and push the value back.
    Store {
        name: Rc<str>,
        property: bool,
    },

    Fetch {
        name: Rc<str>,
        access: Access,
    },

    // ==========================================================================
    // Calls
    // ==========================================================================
    /// `( receiver? argN .. arg1 callee -- result )`. `bound` means a receiver
    /// sits under the arguments.
    Call {
        argc: u8,
        bound: bool,
    },
    Return,

    // ==========================================================================
    // Loops
    // ==========================================================================
    LoopStart,
    LoopEnd,

    /// Unwind to the innermost loop marker, then jump to the label if any.
    LoopExit(Option<LabelId>),

    // ==========================================================================
    // Exceptions
    // ==========================================================================
    /// Push a try-region marker that resumes at the label on a throw.
    Try(LabelId),
    PopTry,

    /// Throw the value on top of the stack.
    Throw,

    // objects
    CreateObject(Rc<str>),

    /// `( itemN .. item1 -- array )`
    MakeArray(usize),

    Debugger,
    Halt,
}

impl Op {
    /// Label referenced by a jump-like instruction.
    pub fn jump_target(&self) -> Option<LabelId> {
        match self {
            Op::Jmp(label) | Op::JmpFalse(label) | Op::JmpTrue(label) | Op::Try(label) => {
                Some(*label)
            }
            Op::LoopExit(target) => *target,
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Label(_) => "LABEL",
            Op::Const(_) => "CONST",
            Op::Pop => "POP",
            Op::Dup => "DUP",
            Op::Pick(_) => "PICK",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Neg => "NEG",
            Op::Eq => "EQ",
            Op::NotEq => "NEQ",
            Op::Lt => "LT",
            Op::LtEq => "LTE",
            Op::Gt => "GT",
            Op::GtEq => "GTE",
            Op::Not => "NOT",
            Op::Jmp(_) => "JMP",
            Op::JmpFalse(_) => "JMP_FALSE",
            Op::JmpTrue(_) => "JMP_TRUE",
            Op::EnterScope => "ENTER_SCOPE",
            Op::LeaveScope => "LEAVE_SCOPE",
            Op::Declare(_) => "DECLARE",
            Op::Store { .. } => "STORE",
            Op::Fetch { .. } => "FETCH",
            Op::Call { .. } => "CALL",
            Op::Return => "RETURN",
            Op::LoopStart => "LOOP_START",
            Op::LoopEnd => "LOOP_END",
            Op::LoopExit(_) => "LOOP_EXIT",
            Op::Try(_) => "TRY",
            Op::PopTry => "POP_TRY",
            Op::Throw => "THROW",
            Op::CreateObject(_) => "CREATE_OBJECT",
            Op::MakeArray(_) => "MAKE_ARRAY",
            Op::Debugger => "DEBUGGER",
            Op::Halt => "HALT",
        }
    }
}
