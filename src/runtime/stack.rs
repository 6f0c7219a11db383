use crate::lang::env::Env;
use crate::lang::value::Value;

/// Caller state saved by a call and restored by `RETURN`.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub section: usize,
    pub pc: usize,
    pub env: Env,
    /// Function-table index of the callee, for call-stack reports.
    pub function: usize,
    /// The call was made by the host; its `RETURN` hands control back.
    pub from_host: bool,
}

/// Where to resume when a value is thrown inside a protected region.
#[derive(Debug, Clone)]
pub struct TryRegion {
    pub section: usize,
    pub handler_pc: usize,
    pub env: Env,
}

/// One slot of the VM stack: an operand or a control marker.
#[derive(Debug, Clone)]
pub enum StackEntry {
    Value(Value),
    CallSite(CallSite),
    TryRegion(TryRegion),
    /// Entry point of a loop; holds the environment active at loop entry.
    LoopMarker(Env),
    /// The preceding `FETCH` already performed the native call.
    NativeResult,
}

impl StackEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            StackEntry::Value(_) => "value",
            StackEntry::CallSite(_) => "call site",
            StackEntry::TryRegion(_) => "try region",
            StackEntry::LoopMarker(_) => "loop marker",
            StackEntry::NativeResult => "native result",
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            StackEntry::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for StackEntry {
    fn from(value: Value) -> Self {
        StackEntry::Value(value)
    }
}
