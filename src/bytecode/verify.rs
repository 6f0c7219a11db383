//! Static checks run on a program before the VM accepts it.
//!
//! Every jump must resolve to a label in its own section, every constant
//! reference must be in range, every section must end in a terminator, and
//! the value-stack height must agree wherever control flow joins. Markers
//! (call sites, loop markers, try regions) are not counted as values.

use crate::bytecode::{Access, JumpTable, LabelId, Op, Program};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("verify error: label {label} is defined more than once")]
    DuplicateLabel { label: LabelId },

    #[error("verify error: section '{section}' pc {pc}: label {label} is not defined")]
    UndefinedLabel {
        section: String,
        pc: usize,
        label: LabelId,
    },

    #[error("verify error: section '{section}' pc {pc}: label {label} belongs to another section")]
    ForeignLabel {
        section: String,
        pc: usize,
        label: LabelId,
    },

    #[error("verify error: section '{section}' pc {pc}: constant #{index} out of range")]
    BadConstant {
        section: String,
        pc: usize,
        index: usize,
    },

    #[error("verify error: section '{section}' does not end in RETURN or HALT")]
    Unterminated { section: String },

    #[error("verify error: section '{section}' pc {pc}: stack underflow")]
    Underflow { section: String, pc: usize },

    #[error(
        "verify error: section '{section}' pc {pc}: stack height {found} does not match {expected}"
    )]
    HeightMismatch {
        section: String,
        pc: usize,
        expected: i32,
        found: i32,
    },
}

/// Value-stack effect of an op as (pops, pushes).
fn effect(op: &Op) -> (i32, i32) {
    match op {
        Op::Nop | Op::Label(_) => (0, 0),
        Op::Const(_) => (0, 1),
        Op::Pop => (1, 0),
        Op::Dup => (1, 2),
        Op::Pick(n) => (*n as i32 + 1, *n as i32 + 2),

        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => (2, 1),
        Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq => (2, 1),
        Op::Neg | Op::Not => (1, 1),

        Op::Jmp(_) => (0, 0),
        Op::JmpFalse(_) | Op::JmpTrue(_) => (1, 0),

        Op::EnterScope | Op::LeaveScope | Op::Declare(_) => (0, 0),
        Op::Store { property: false, .. } => (1, 1),
        Op::Store { property: true, .. } => (2, 1),

        // A native call in FETCH leaves a result the following CALL keeps,
        // so the pair nets out the same as an ordinary call.
        Op::Fetch { access, .. } => match access {
            Access::Variable | Access::CallVariable(_) => (0, 1),
            Access::Property | Access::CallProperty(_) => (1, 1),
        },
        Op::Call { argc, bound } => (*argc as i32 + 1 + i32::from(*bound), 1),
        Op::Return => (1, 0),

        Op::LoopStart | Op::LoopEnd | Op::LoopExit(_) => (0, 0),
        Op::Try(_) | Op::PopTry => (0, 0),
        Op::Throw => (1, 0),

        Op::CreateObject(_) => (0, 1),
        Op::MakeArray(n) => (*n as i32, 1),
        Op::Debugger => (0, 0),
        Op::Halt => (0, 0),
    }
}

fn is_terminator(op: &Op) -> bool {
    matches!(
        op,
        Op::Jmp(_) | Op::Return | Op::Throw | Op::Halt | Op::LoopExit(Some(_))
    )
}

/// Checks the whole program.
pub fn verify(program: &Program) -> Result<(), VerifyError> {
    let table = JumpTable::build(program)?;
    for index in 0..program.sections.len() {
        verify_section(program, &table, index)?;
    }
    Ok(())
}

fn verify_section(program: &Program, table: &JumpTable, index: usize) -> Result<(), VerifyError> {
    let section = &program.sections[index];
    let name = || section.name.clone();

    match section.code.last().map(|i| &i.op) {
        Some(Op::Return | Op::Halt | Op::Throw | Op::Jmp(_)) => {}
        _ => return Err(VerifyError::Unterminated { section: name() }),
    }

    // Jump validity and constant references.
    for (pc, instruction) in section.code.iter().enumerate() {
        if let Op::Const(i) = instruction.op {
            if program.constants.get(i).is_none() {
                return Err(VerifyError::BadConstant {
                    section: name(),
                    pc,
                    index: i,
                });
            }
        }
        if let Some(label) = instruction.op.jump_target() {
            match table.resolve(label) {
                None => {
                    return Err(VerifyError::UndefinedLabel {
                        section: name(),
                        pc,
                        label,
                    });
                }
                Some(target) if target.section != index => {
                    return Err(VerifyError::ForeignLabel {
                        section: name(),
                        pc,
                        label,
                    });
                }
                Some(_) => {}
            }
        }
    }

    propagate_heights(program, table, index).map(|_| ())
}

/// Height of the value stack before each instruction of `section`, or `None`
/// for instructions the analysis never reaches.
pub fn stack_heights(program: &Program, section: usize) -> Result<Vec<Option<i32>>, VerifyError> {
    let table = JumpTable::build(program)?;
    propagate_heights(program, &table, section)
}

// Heights are propagated along every edge. LOOP_EXIT discards values down to
// its loop marker, so its edge is not followed.
fn propagate_heights(
    program: &Program,
    table: &JumpTable,
    index: usize,
) -> Result<Vec<Option<i32>>, VerifyError> {
    let section = &program.sections[index];
    let name = || section.name.clone();
    let mut heights: Vec<Option<i32>> = vec![None; section.code.len()];
    let mut work = vec![(0usize, 0i32)];

    while let Some((pc, height)) = work.pop() {
        let Some(instruction) = section.code.get(pc) else {
            continue;
        };
        match heights[pc] {
            Some(expected) if expected != height => {
                return Err(VerifyError::HeightMismatch {
                    section: name(),
                    pc,
                    expected,
                    found: height,
                });
            }
            Some(_) => continue,
            None => heights[pc] = Some(height),
        }

        let (pops, pushes) = effect(&instruction.op);
        if height < pops {
            return Err(VerifyError::Underflow { section: name(), pc });
        }
        let after = height - pops + pushes;

        let target_pc = |label: LabelId| table.resolve(label).map(|t| t.pc);
        match &instruction.op {
            Op::Jmp(label) | Op::JmpFalse(label) | Op::JmpTrue(label) => {
                if let Some(target) = target_pc(*label) {
                    work.push((target, after));
                }
            }
            // The handler starts with the thrown value pushed.
            Op::Try(label) => {
                if let Some(target) = target_pc(*label) {
                    work.push((target, after + 1));
                }
            }
            _ => {}
        }
        if !is_terminator(&instruction.op) {
            work.push((pc + 1, after));
        }
    }

    Ok(heights)
}
