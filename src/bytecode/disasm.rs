use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::bytecode::{Access, CodeSection, Instruction, JumpTable, Op, Program};
use crate::lang::value::Value;

/// Human-readable listing of every section of a program.
pub fn decompile(program: &Program) -> String {
    let table = JumpTable::build(program).unwrap_or_default();
    let mut output = String::new();

    for (index, section) in program.sections.iter().enumerate() {
        write_section(&mut output, program, &table, index, section);
    }

    if !program.functions.is_empty() {
        let _ = writeln!(output, "── functions ──");
        for (index, function) in program.functions.iter().enumerate() {
            let _ = writeln!(
                output,
                "  #{:<3} {:<24} section {:<3} ({})",
                index,
                function.name,
                function.section,
                function.params.join(", ")
            );
        }
    }

    output
}

fn write_section(
    output: &mut String,
    program: &Program,
    table: &JumpTable,
    index: usize,
    section: &CodeSection,
) {
    let _ = writeln!(output, "════════════════════════════════════════");
    let _ = writeln!(output, " {} [{}]", section.name, index);
    let _ = writeln!(output, " {} instructions", section.len());
    let _ = writeln!(output, "════════════════════════════════════════");

    let jump_targets = collect_jump_targets(section);
    for (pc, instruction) in section.code.iter().enumerate() {
        if jump_targets.contains(&pc) {
            let _ = writeln!(output, "      ┌──────────────────────────────────");
        }
        let marker = if jump_targets.contains(&pc) { '►' } else { ' ' };
        let step = if instruction.statement_start { '*' } else { ' ' };
        let text = format_instruction(program, table, instruction);
        let source = instruction
            .range
            .filter(|_| instruction.statement_start)
            .and_then(|range| program.source_for(range))
            .map(|s| format!("  ; {}", first_line(s)))
            .unwrap_or_default();
        let _ = writeln!(output, "{:04} {}{} {}{}", pc, marker, step, text, source);
    }
    let _ = writeln!(output);
}

fn collect_jump_targets(section: &CodeSection) -> HashSet<usize> {
    section
        .code
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i.op, Op::Label(_)))
        .map(|(pc, _)| pc)
        .collect()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// One instruction, mnemonic first, resolving constants and labels.
pub fn format_instruction(program: &Program, table: &JumpTable, instruction: &Instruction) -> String {
    let mnemonic = instruction.op.mnemonic();
    let target = |label: crate::bytecode::LabelId| match table.resolve(label) {
        Some(t) => format!("{} (→ {:04})", label, t.pc),
        None => format!("{} (unresolved)", label),
    };

    let operands = match &instruction.op {
        Op::Label(label) => format!("{}:", label),
        Op::Const(index) => match program.constants.get(*index) {
            Some(value) => format!("#{} {}", index, format_value(value)),
            None => format!("#{} <invalid>", index),
        },
        Op::Pick(n) => n.to_string(),
        Op::Jmp(label) | Op::JmpFalse(label) | Op::JmpTrue(label) | Op::Try(label) => {
            target(*label)
        }
        Op::LoopExit(Some(label)) => target(*label),
        Op::Declare(name) | Op::CreateObject(name) => format!("\"{}\"", name),
        Op::Store { name, property } => {
            if *property {
                format!(".\"{}\"", name)
            } else {
                format!("\"{}\"", name)
            }
        }
        Op::Fetch { name, access } => match access {
            Access::Variable => format!("\"{}\"", name),
            Access::Property => format!(".\"{}\"", name),
            Access::CallVariable(argc) => format!("\"{}\" argc={}", name, argc),
            Access::CallProperty(argc) => format!(".\"{}\" argc={}", name, argc),
        },
        Op::Call { argc, bound } => {
            if *bound {
                format!("argc={} bound", argc)
            } else {
                format!("argc={}", argc)
            }
        }
        Op::MakeArray(n) => n.to_string(),
        _ => String::new(),
    };

    if operands.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{:<13} {}", mnemonic, operands)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

/// Count of each mnemonic across the program, for logging.
pub fn op_counts(program: &Program) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for section in &program.sections {
        for instruction in &section.code {
            *counts.entry(instruction.op.mnemonic()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::{lexer::tokenize, parser::Parser};

    fn compile(source: &str) -> Program {
        let tokens = tokenize(source).expect("lexing should succeed");
        let statements = Parser::new(tokens.clone())
            .parse()
            .expect("parsing should succeed");
        Compiler::new()
            .compile(&statements, tokens, source)
            .expect("compilation should succeed")
    }

    #[test]
    fn test_listing_shows_sections_and_source() {
        let listing = decompile(&compile("function f(x) { return x; } var a = f(\"hi\");"));
        assert!(listing.contains(" main [0]"));
        assert!(listing.contains(" f [1]"));
        assert!(listing.contains("CONST         #0 \"hi\""));
        assert!(listing.contains("; var a = f(\"hi\");"));
        assert!(listing.contains("FETCH         \"f\" argc=1"));
        assert!(listing.contains("── functions ──"));
    }

    #[test]
    fn test_jumps_show_resolved_targets() {
        let listing = decompile(&compile("var a = 1; if (a) { a = 2; }"));
        assert!(listing.contains("JMP_FALSE     L0 (→ "));
        assert!(listing.contains('►'));
    }

    #[test]
    fn test_op_counts() {
        let counts = op_counts(&compile("var a = 1; var b = 2;"));
        assert_eq!(counts.get("DECLARE"), Some(&2));
        assert_eq!(counts.get("HALT"), Some(&1));
    }
}
