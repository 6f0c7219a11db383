#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Left side of `=` is not a variable, member or index expression.
    #[error("compile error: invalid assignment target '{target}'{}", hint_suffix(.hint))]
    InvalidAssignmentTarget {
        target: String,
        hint: Option<String>,
    },

    /// A construct that is valid but appeared in an invalid position.
    #[error("compile error: '{construct}' {reason}{}", hint_suffix(.hint))]
    InvalidPosition {
        construct: &'static str,
        reason: String,
        hint: Option<String>,
    },

    #[error("compile error: {what} '{name}' has {count}, the limit is {limit}")]
    LimitExceeded {
        what: &'static str,
        name: String,
        count: usize,
        limit: usize,
    },

    /// Internal compiler error (shouldn't happen in normal use)
    #[error("compile error: internal error: {0}")]
    Internal(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

impl CompileError {
    pub fn invalid_assignment(target: impl Into<String>) -> Self {
        CompileError::InvalidAssignmentTarget {
            target: target.into(),
            hint: Some("only variables, properties and indexed elements can be assigned".into()),
        }
    }

    pub fn outside_loop(keyword: &'static str) -> Self {
        CompileError::InvalidPosition {
            construct: keyword,
            reason: "cannot appear outside a loop".to_string(),
            hint: Some("a function body starts a new context; loops outside it do not count".into()),
        }
    }

    pub fn return_outside_function() -> Self {
        CompileError::InvalidPosition {
            construct: "return",
            reason: "cannot appear outside a function".to_string(),
            hint: None,
        }
    }

    pub fn too_many_parameters(name: &str, count: usize) -> Self {
        CompileError::LimitExceeded {
            what: "function",
            name: name.to_string(),
            count,
            limit: super::compile::MAX_PARAMETERS,
        }
    }

    pub fn too_many_arguments(callee: &str, count: usize) -> Self {
        CompileError::LimitExceeded {
            what: "call to",
            name: callee.to_string(),
            count,
            limit: super::compile::MAX_ARGUMENTS,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_assignment_display() {
        let msg = CompileError::invalid_assignment("1 + 2").to_string();
        assert!(msg.contains("invalid assignment target '1 + 2'"));
        assert!(msg.contains("hint"));
    }

    #[test]
    fn test_outside_loop_display() {
        let msg = CompileError::outside_loop("break").to_string();
        assert!(msg.contains("'break' cannot appear outside a loop"));
    }

    #[test]
    fn test_return_outside_function_has_no_hint() {
        let msg = CompileError::return_outside_function().to_string();
        assert!(msg.contains("return"));
        assert!(!msg.contains("hint"));
    }

    #[test]
    fn test_limit_display() {
        let msg = CompileError::too_many_parameters("f", 200).to_string();
        assert!(msg.contains("function 'f' has 200"));
        assert!(msg.contains("127"));
    }

    #[test]
    fn test_internal_error_display() {
        let msg = CompileError::internal("something went wrong").to_string();
        assert!(msg.contains("internal"));
        assert!(msg.contains("something went wrong"));
    }
}
