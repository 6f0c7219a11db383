//! Conversions across the host boundary.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::bytecode::Program;
use crate::lang::env::Env;
use crate::lang::native::Array;
use crate::lang::value::{HostValue, Value};

/// Objects nested deeper than this convert to `undefined`, which also cuts
/// reference cycles.
pub const MAX_DEPTH: usize = 32;

pub fn to_host(value: &Value, program: &Program) -> HostValue {
    to_host_at(value, program, 0)
}

fn to_host_at(value: &Value, program: &Program, depth: usize) -> HostValue {
    if depth > MAX_DEPTH {
        return HostValue::Undefined;
    }
    match value {
        Value::Undefined => HostValue::Undefined,
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::Number(*n),
        Value::String(s) => HostValue::String(s.to_string()),
        Value::Function(index) => HostValue::Function(
            program
                .functions
                .get(*index)
                .map(|f| f.name.clone())
                .unwrap_or_default(),
        ),
        Value::NativeFunction(name) => HostValue::Function(name.to_string()),
        Value::Object(env) => {
            let fields: BTreeMap<String, HostValue> = env
                .own_bindings()
                .into_iter()
                .map(|(name, v)| (name.to_string(), to_host_at(&v, program, depth + 1)))
                .collect();
            HostValue::Object(fields)
        }
        Value::Native(native) => native.to_host(&mut |v| to_host_at(v, program, depth + 1)),
    }
}

/// Converts a host value. Host objects become fresh object environments
/// chained to `global`; functions are looked up by name in the program and
/// otherwise refer to host natives.
pub fn from_host(value: &HostValue, program: &Program, global: &Env) -> Value {
    match value {
        HostValue::Undefined => Value::Undefined,
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Number(n) => Value::Number(*n),
        HostValue::String(s) => Value::string(s.as_str()),
        HostValue::Array(items) => {
            let items = items
                .iter()
                .map(|item| from_host(item, program, global))
                .collect();
            Value::Native(Rc::new(Array::new(items)))
        }
        HostValue::Object(fields) => {
            let object = Env::object(global);
            for (name, field) in fields {
                object.define(name.as_str(), from_host(field, program, global));
            }
            Value::Object(object)
        }
        HostValue::Function(name) => match program.function_index(name) {
            Some(index) => Value::Function(index),
            None => Value::NativeFunction(name.as_str().into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::{lexer::tokenize, parser::Parser};

    fn program(source: &str) -> Program {
        let tokens = tokenize(source).expect("lexing should succeed");
        let statements = Parser::new(tokens.clone())
            .parse()
            .expect("parsing should succeed");
        Compiler::new()
            .compile(&statements, tokens, source)
            .expect("compilation should succeed")
    }

    #[test]
    fn test_object_round_trip() {
        let program = program("function f() {}");
        let global = Env::global();
        let host = HostValue::Object(BTreeMap::from([
            ("n".to_string(), HostValue::from(1)),
            ("list".to_string(), HostValue::from(vec![HostValue::from("a")])),
            ("f".to_string(), HostValue::Function("f".into())),
        ]));
        let value = from_host(&host, &program, &global);
        assert!(matches!(value, Value::Object(_)));
        assert_eq!(to_host(&value, &program), host);
    }

    #[test]
    fn test_unknown_function_is_native_reference() {
        let program = program("");
        let value = from_host(&HostValue::Function("log".into()), &program, &Env::global());
        assert_eq!(value, Value::NativeFunction("log".into()));
    }

    #[test]
    fn test_self_referential_object_terminates() {
        let program = program("");
        let global = Env::global();
        let object = Env::object(&global);
        object.define("me", Value::Object(object.clone()));
        let host = to_host(&Value::Object(object.clone()), &program);
        let mut depth = 0;
        let mut current = &host;
        while let HostValue::Object(fields) = current {
            depth += 1;
            current = &fields["me"];
        }
        assert_eq!(depth, MAX_DEPTH + 1);
        assert_eq!(*current, HostValue::Undefined);
        // break the cycle so the test does not leak
        object.define("me", Value::Null);
    }
}
