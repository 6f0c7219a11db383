pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod jump_table;
pub mod op;
pub mod verify;

pub use compile::Compiler;
pub use compile_error::CompileError;
pub use ir::{ClassEntry, CodeSection, ConstantPool, FunctionEntry, Instruction, Program};
pub use jump_table::{JumpTable, Target};
pub use op::{Access, LabelId, Op};
pub use verify::{VerifyError, verify};
