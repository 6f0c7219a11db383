use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::bytecode::Op;
use crate::frontend::token::Token;
use crate::lang::ast::TokenRange;
use crate::lang::value::Value;

/// One VM instruction plus its debug mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub op: Op,

    /// Tokens of the construct that produced this instruction.
    pub range: Option<TokenRange>,

    /// First instruction of a statement; single-stepping pauses here.
    pub statement_start: bool,
}

impl Instruction {
    pub fn new(op: Op, range: Option<TokenRange>) -> Self {
        Self {
            op,
            range,
            statement_start: false,
        }
    }
}

/// A single compiled instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSection {
    pub name: String,
    pub code: Vec<Instruction>,
}

impl CodeSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Callable metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionEntry {
    pub name: String,
    pub section: usize,
    pub params: Vec<String>,
}

impl FunctionEntry {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A compiled class: its methods by short name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassEntry {
    pub name: String,
    /// `(method name, function index)` in declaration order.
    pub methods: Vec<(String, usize)>,
}

/// Literal values, deduplicated by value equality.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    values: Vec<Value>,
}

impl ConstantPool {
    /// Returns the index of `value`, adding it if not yet present.
    pub fn intern(&mut self, value: Value) -> usize {
        if let Some(index) = self.values.iter().position(|v| *v == value) {
            return index;
        }
        self.values.push(value);
        self.values.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

/// A compiled program.
///
/// Convention: `sections[0]` is always `main`.
#[derive(Debug, Clone)]
pub struct Program {
    pub constants: ConstantPool,
    pub sections: Vec<CodeSection>,
    pub functions: Vec<FunctionEntry>,
    pub classes: Vec<ClassEntry>,

    /// Tokens and text the program was compiled from, for source mapping.
    pub tokens: Vec<Token>,
    pub source: String,

    function_index: FxHashMap<String, usize>,
}

impl Program {
    pub(crate) fn new(
        constants: ConstantPool,
        sections: Vec<CodeSection>,
        functions: Vec<FunctionEntry>,
        classes: Vec<ClassEntry>,
        tokens: Vec<Token>,
        source: String,
    ) -> Self {
        let function_index = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            constants,
            sections,
            functions,
            classes,
            tokens,
            source,
            function_index,
        }
    }

    /// Function table index for `name`.
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.function_index.get(name).copied()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.function_index(name).and_then(|i| self.functions.get(i))
    }

    pub fn class(&self, name: &str) -> Option<&ClassEntry> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn instruction(&self, section: usize, pc: usize) -> Option<&Instruction> {
        self.sections.get(section).and_then(|s| s.code.get(pc))
    }

    /// Source text covered by a token range.
    pub fn source_for(&self, range: TokenRange) -> Option<&str> {
        let first = self.tokens.get(range.start)?;
        let last = self.tokens.get(range.end)?;
        self.source.get(first.start..last.end.max(first.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_dedups_by_value() {
        let mut pool = ConstantPool::default();
        let a = pool.intern(Value::Number(1.0));
        let b = pool.intern(Value::string("x"));
        let c = pool.intern(Value::Number(1.0));
        let d = pool.intern(Value::string(String::from("x")));
        assert_eq!((a, b, c, d), (0, 1, 0, 1));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_kinds_are_not_merged() {
        let mut pool = ConstantPool::default();
        let one = pool.intern(Value::Number(1.0));
        let text = pool.intern(Value::string("1"));
        let truth = pool.intern(Value::Bool(true));
        assert_eq!((one, text, truth), (0, 1, 2));
    }
}
