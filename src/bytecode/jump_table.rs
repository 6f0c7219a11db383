use rustc_hash::FxHashMap;

use crate::bytecode::{LabelId, Op, Program, verify::VerifyError};

/// Resolved position of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub section: usize,
    pub pc: usize,
}

/// Label → absolute instruction index, built once per program.
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    targets: FxHashMap<LabelId, Target>,
}

impl JumpTable {
    pub fn build(program: &Program) -> Result<JumpTable, VerifyError> {
        let mut targets = FxHashMap::default();
        for (section, code) in program.sections.iter().enumerate() {
            for (pc, instruction) in code.code.iter().enumerate() {
                if let Op::Label(label) = instruction.op {
                    let previous = targets.insert(label, Target { section, pc });
                    if previous.is_some() {
                        return Err(VerifyError::DuplicateLabel { label });
                    }
                }
            }
        }
        Ok(JumpTable { targets })
    }

    pub fn resolve(&self, label: LabelId) -> Option<Target> {
        self.targets.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeSection, ConstantPool, Instruction};

    fn program_from_sections(sections: Vec<Vec<Op>>) -> Program {
        let sections = sections
            .into_iter()
            .enumerate()
            .map(|(i, ops)| CodeSection {
                name: format!("s{}", i),
                code: ops.into_iter().map(|op| Instruction::new(op, None)).collect(),
            })
            .collect();
        Program::new(
            ConstantPool::default(),
            sections,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            String::new(),
        )
    }

    #[test]
    fn test_resolves_labels_per_section() {
        let program = program_from_sections(vec![
            vec![Op::Nop, Op::Label(LabelId(0)), Op::Halt],
            vec![Op::Label(LabelId(1)), Op::Return],
        ]);
        let table = JumpTable::build(&program).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.resolve(LabelId(0)),
            Some(Target { section: 0, pc: 1 })
        );
        assert_eq!(
            table.resolve(LabelId(1)),
            Some(Target { section: 1, pc: 0 })
        );
        assert_eq!(table.resolve(LabelId(7)), None);
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let program =
            program_from_sections(vec![vec![Op::Label(LabelId(0)), Op::Label(LabelId(0))]]);
        assert!(matches!(
            JumpTable::build(&program),
            Err(VerifyError::DuplicateLabel { .. })
        ));
    }
}
