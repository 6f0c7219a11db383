//! Host-implemented objects.
//!
//! A native object exposes its state to scripts only through property
//! accessors and methods. Indexing (`a[i]`, `a[i] = v`) reaches natives as the
//! methods `@IndexerGet` and `@IndexerSet`.

use std::cell::{Cell, RefCell};

use crate::lang::value::{HostValue, Value};

pub const INDEXER_GET: &str = "@IndexerGet";
pub const INDEXER_SET: &str = "@IndexerSet";

/// How far past the end an indexed store may grow an array.
pub const MAX_INDEX_GAP: usize = 1 << 16;

pub trait NativeObject {
    fn type_name(&self) -> &'static str;

    /// Textual form used by `+` concatenation and `print`.
    fn display(&self) -> String;

    fn get_property(&self, name: &str) -> Option<Value>;

    /// Returns `false` when the property cannot be written.
    fn set_property(&self, name: &str, value: Value) -> bool;

    /// Invokes a method. `None` means the object has no such method; an `Err`
    /// carries a value to be thrown into the script.
    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, Value>>;

    /// Converts to a host value, using `convert` for nested script values.
    fn to_host(&self, convert: &mut dyn FnMut(&Value) -> HostValue) -> HostValue;
}

/// Growable array backing `[a, b, c]` literals.
#[derive(Debug, Default)]
pub struct Array {
    items: RefCell<Vec<Value>>,
    /// Set while the array is being rendered; a nested visit renders empty.
    rendering: Cell<bool>,
}

impl Array {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
            rendering: Cell::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    pub fn items(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    /// Joins the textual forms of the items. An array reached again while it
    /// is being rendered contributes an empty string.
    fn render(&self, separator: &str) -> String {
        if self.rendering.replace(true) {
            return String::new();
        }
        let text = self
            .items
            .borrow()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(separator);
        self.rendering.set(false);
        text
    }

    fn store(&self, index: usize, value: Value) -> Result<Value, Value> {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            if index - items.len() > MAX_INDEX_GAP {
                return Err(Value::string(format!(
                    "RangeError: array index {} is too far past the end (length {})",
                    index,
                    items.len()
                )));
            }
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value.clone();
        Ok(value)
    }
}

fn array_index(value: Option<&Value>) -> Result<usize, Value> {
    match value {
        Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        Some(other) => Err(Value::string(format!(
            "RangeError: invalid array index {}",
            other
        ))),
        None => Err(Value::string("RangeError: missing array index")),
    }
}

impl NativeObject for Array {
    fn type_name(&self) -> &'static str {
        "array"
    }

    fn display(&self) -> String {
        self.render(",")
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        match name {
            "length" => Some(Value::Number(self.len() as f64)),
            _ => None,
        }
    }

    fn set_property(&self, _name: &str, _value: Value) -> bool {
        false
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value, Value>> {
        let result = match name {
            INDEXER_GET => array_index(args.first())
                .map(|i| self.get(i).unwrap_or(Value::Undefined)),
            INDEXER_SET => array_index(args.first()).and_then(|i| {
                self.store(i, args.get(1).cloned().unwrap_or(Value::Undefined))
            }),
            "push" => {
                let mut items = self.items.borrow_mut();
                items.extend(args.iter().cloned());
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(self.items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "join" => {
                let separator = match args.first() {
                    Some(Value::Undefined) | None => ",".to_string(),
                    Some(other) => other.to_string(),
                };
                Ok(Value::string(self.render(&separator)))
            }
            _ => return None,
        };
        Some(result)
    }

    fn to_host(&self, convert: &mut dyn FnMut(&Value) -> HostValue) -> HostValue {
        HostValue::Array(self.items.borrow().iter().map(|v| convert(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn numbers(values: &[f64]) -> Array {
        Array::new(values.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn test_length_and_indexing() {
        let array = numbers(&[1.0, 2.0, 3.0]);
        assert_eq!(array.get_property("length"), Some(Value::Number(3.0)));
        let got = array.call_method(INDEXER_GET, &[Value::Number(1.0)]);
        assert_eq!(got, Some(Ok(Value::Number(2.0))));
        let missing = array.call_method(INDEXER_GET, &[Value::Number(9.0)]);
        assert_eq!(missing, Some(Ok(Value::Undefined)));
    }

    #[test]
    fn test_indexer_set_grows() {
        let array = numbers(&[]);
        let set = array.call_method(INDEXER_SET, &[Value::Number(2.0), Value::string("x")]);
        assert_eq!(set, Some(Ok(Value::string("x"))));
        assert_eq!(array.len(), 3);
        assert_eq!(array.get(0), Some(Value::Undefined));
    }

    #[test]
    fn test_indexer_set_far_past_end_is_thrown() {
        let array = numbers(&[1.0]);
        let result = array.call_method(INDEXER_SET, &[Value::Number(1e12), Value::Number(1.0)]);
        match result {
            Some(Err(Value::String(message))) => assert!(message.starts_with("RangeError:")),
            other => panic!("expected a RangeError, got {:?}", other),
        }
        assert_eq!(array.len(), 1);

        let edge = (1 + MAX_INDEX_GAP) as f64;
        let result = array.call_method(INDEXER_SET, &[Value::Number(edge), Value::Null]);
        assert_eq!(result, Some(Ok(Value::Null)));
        assert_eq!(array.len(), MAX_INDEX_GAP + 2);
    }

    #[test]
    fn test_self_containing_array_renders_cycle_empty() {
        let array = Rc::new(numbers(&[1.0]));
        let value = Value::Native(array.clone());
        array.call_method("push", &[value.clone(), Value::Number(2.0)]);
        assert_eq!(array.display(), "1,,2");
        assert_eq!(value.to_string(), "1,,2");
        assert_eq!(
            array.call_method("join", &[Value::string("-")]),
            Some(Ok(Value::string("1--2")))
        );
        // rendering again after a cycle still shows the items
        assert_eq!(array.display(), "1,,2");
        array.call_method("pop", &[]);
        array.call_method("pop", &[]);
    }

    #[test]
    fn test_invalid_index_is_thrown() {
        let array = numbers(&[1.0]);
        let result = array.call_method(INDEXER_GET, &[Value::Number(-1.0)]);
        assert!(matches!(result, Some(Err(Value::String(_)))));
    }

    #[test]
    fn test_push_pop_join() {
        let array = numbers(&[1.0]);
        let pushed = array.call_method("push", &[Value::Number(2.0), Value::Number(3.0)]);
        assert_eq!(pushed, Some(Ok(Value::Number(3.0))));
        assert_eq!(array.call_method("pop", &[]), Some(Ok(Value::Number(3.0))));
        assert_eq!(
            array.call_method("join", &[Value::string("-")]),
            Some(Ok(Value::string("1-2")))
        );
        assert_eq!(array.display(), "1,2");
        assert!(array.call_method("nope", &[]).is_none());
    }

    #[test]
    fn test_to_host() {
        let array = numbers(&[1.0, 2.0]);
        let host = array.to_host(&mut |v| HostValue::Number(v.to_number()));
        assert_eq!(host, HostValue::Array(vec![1.into(), 2.into()]));
    }
}
