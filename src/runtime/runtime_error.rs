use crate::bytecode::VerifyError;
use crate::lang::value::HostValue;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// A script `throw` that no try region caught.
    #[error("runtime error: uncaught exception: {message}{}", call_stack_suffix(.call_stack))]
    Uncaught {
        message: String,
        value: HostValue,
        call_stack: Vec<String>,
    },

    #[error("runtime error: execution cycle limit exceeded ({limit})")]
    TooManyCycles { limit: usize },

    #[error("runtime error: stack overflow (more than {limit} entries)")]
    StackOverflow { limit: usize },

    /// The host used the API out of order.
    #[error("runtime error: {0}")]
    InvalidState(String),

    #[error("runtime error: unknown function '{0}'")]
    UnknownFunction(String),

    /// The VM found a stack shape or program it cannot have produced.
    #[error("internal VM error in section {section} at pc {pc}: {message}")]
    Internal {
        message: String,
        section: usize,
        pc: usize,
    },

    #[error("internal VM error: {0}")]
    Verify(#[from] VerifyError),
}

fn call_stack_suffix(call_stack: &[String]) -> String {
    let mut out = String::new();
    if !call_stack.is_empty() {
        out.push_str("\n  call stack:");
        for (i, frame) in call_stack.iter().enumerate() {
            out.push_str(&format!("\n    {}: {}", i, frame));
        }
    }
    out
}

impl RuntimeError {
    /// True for VM defects, as opposed to failures of the script itself.
    pub fn is_internal(&self) -> bool {
        matches!(self, RuntimeError::Internal { .. } | RuntimeError::Verify(_))
    }

    /// True when the script threw a value nobody caught.
    pub fn is_script_error(&self) -> bool {
        matches!(self, RuntimeError::Uncaught { .. })
    }

    /// The thrown value of an uncaught exception.
    pub fn thrown(&self) -> Option<&HostValue> {
        match self {
            RuntimeError::Uncaught { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncaught_display_with_call_stack() {
        let err = RuntimeError::Uncaught {
            message: "boom".into(),
            value: HostValue::from("boom"),
            call_stack: vec!["inner".into(), "main".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("uncaught exception: boom"));
        assert!(msg.contains("0: inner"));
        assert!(msg.contains("1: main"));
        assert!(err.is_script_error());
        assert!(!err.is_internal());
        assert_eq!(err.thrown(), Some(&HostValue::from("boom")));
    }

    #[test]
    fn test_internal_is_distinguished() {
        let err = RuntimeError::Internal {
            message: "RETURN without a call site".into(),
            section: 0,
            pc: 3,
        };
        assert!(err.is_internal());
        assert!(!err.is_script_error());
        assert!(err.to_string().contains("pc 3"));
    }
}
