use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::lang::env::Env;
use crate::lang::native::NativeObject;

/// Runtime value of the scripting language.
///
/// Values are the only data that ordinary opcodes see on the VM stack;
/// control markers live beside them in `StackEntry`.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),

    /// Descriptor of a compiled function: index into the function table.
    Function(usize),

    /// A host-registered function referenced as a value.
    NativeFunction(Rc<str>),

    /// A script object; its state is the object environment.
    Object(Env),

    /// A host-implemented object with native property accessors.
    Native(Rc<dyn NativeObject>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::NativeFunction(_) => "function",
            Value::Object(_) => "object",
            Value::Native(native) => native.type_name(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion used by arithmetic other than `+`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) | Value::Null => 0.0,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// `+` adds numbers and otherwise concatenates textual forms.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => Value::string(format!("{}{}", self, other)),
        }
    }

    /// Ordering for `< <= > >=`: strings compare lexically, everything else numerically.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }
}

/// Kind-aware equality: numbers by magnitude, strings by content, objects and
/// natives by identity, functions by table index.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::NativeFunction(a), Value::NativeFunction(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(index) => write!(f, "<function #{}>", index),
            Value::NativeFunction(name) => write!(f, "<native {}>", name),
            Value::Object(_) => write!(f, "[object]"),
            Value::Native(native) => write!(f, "{}", native.display()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(env) => write!(f, "{:?}", env),
            other => write!(f, "{}", other),
        }
    }
}

/// Formats a number without a trailing `.0` for integral values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Value representation on the host side of the interop boundary.
///
/// Host values are plain data: they own no VM state and can be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    /// A script function, by its function-table name.
    Function(String),
}

impl HostValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "undefined"),
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Number(n) => write!(f, "{}", format_number(*n)),
            HostValue::String(s) => write!(f, "{}", s),
            HostValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            HostValue::Object(_) => write!(f, "[object]"),
            HostValue::Function(name) => write!(f, "<function {}>", name),
        }
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_numbers_and_strings() {
        assert_eq!(Value::Number(2.0).add(&Value::Number(3.0)), Value::Number(5.0));
        assert_eq!(
            Value::string("a").add(&Value::Number(1.0)),
            Value::string("a1")
        );
        assert_eq!(
            Value::Number(1.5).add(&Value::Bool(true)),
            Value::string("1.5true")
        );
    }

    #[test]
    fn test_equality_is_kind_aware() {
        assert_eq!(Value::Number(3.0), Value::Number(3.0));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_eq!(Value::string("ab"), Value::string(String::from("ab")));
        assert_ne!(Value::Undefined, Value::Null);
    }

    #[test]
    fn test_object_equality_is_identity() {
        let global = Env::global();
        let a = Value::Object(Env::object(&global));
        let b = Value::Object(Env::object(&global));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::Function(0).is_truthy());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(30.0), "30");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_compare() {
        use std::cmp::Ordering;
        assert_eq!(
            Value::Number(1.0).compare(&Value::Number(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::string("b").compare(&Value::string("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Undefined.compare(&Value::Number(1.0)), None);
    }

    #[test]
    fn test_host_value_serde() {
        let value = HostValue::Array(vec![HostValue::from(1), HostValue::from("x")]);
        let json = serde_json::to_string(&value).unwrap();
        let back: HostValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
