use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bytecode::{
    Access, Instruction, JumpTable, LabelId, Op, Program, disasm::decompile, verify,
};
use crate::lang::ast::TokenRange;
use crate::lang::env::Env;
use crate::lang::native::{Array, INDEXER_GET, INDEXER_SET};
use crate::lang::value::{HostValue, Value};
use crate::runtime::convert::{from_host, to_host};
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::stack::{CallSite, StackEntry, TryRegion};

/// A host function callable from scripts. An `Err` is thrown into the script.
pub type NativeFn = Rc<dyn Fn(&[HostValue]) -> Result<HostValue, HostValue>>;

type DebugPrint = Box<dyn FnMut(&str)>;

/// Natives every VM provides unless the host registers its own.
const BUILTINS: &[&str] = &["print"];

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Instructions allowed per host entry (`run`, `step` or `call`).
    pub max_cycles: Option<usize>,
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_cycles: None,
            max_stack_depth: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Paused,
    Running,
    SingleStep,
    Done,
}

/// Stack-based virtual machine executing one compiled program.
pub struct Vm {
    program: Program,
    jump_table: JumpTable,

    section: usize,
    pc: usize,
    env: Env,
    global: Env,
    mode: RunMode,
    stack: Vec<StackEntry>,

    natives: FxHashMap<Rc<str>, NativeFn>,
    debug_print: Option<DebugPrint>,

    // Safety limits
    config: VmConfig,
    cycles: usize,

    executed_since_pause: usize,
    host_calls: usize,
    host_returned: bool,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("section", &self.section)
            .field("pc", &self.pc)
            .field("mode", &self.mode)
            .field("stack_depth", &self.stack.len())
            .finish()
    }
}

fn type_error(message: impl fmt::Display) -> Value {
    Value::string(format!("TypeError: {}", message))
}

impl Vm {
    /// Scans, parses and compiles `source`, returning a VM ready to run.
    pub fn compile(source: &str) -> Result<Vm, crate::Error> {
        let program = crate::compile_source(source)?;
        Ok(Vm::new(program)?)
    }

    pub fn new(program: Program) -> Result<Vm, RuntimeError> {
        Self::with_config(program, VmConfig::default())
    }

    /// Verifies `program` and prepares a VM paused before its first
    /// instruction.
    pub fn with_config(program: Program, config: VmConfig) -> Result<Vm, RuntimeError> {
        verify(&program)?;
        let jump_table = JumpTable::build(&program)?;
        let global = Env::global();
        Ok(Vm {
            program,
            jump_table,
            section: 0,
            pc: 0,
            env: global.clone(),
            global,
            mode: RunMode::Paused,
            stack: Vec::new(),
            natives: FxHashMap::default(),
            debug_print: None,
            config,
            cycles: 0,
            executed_since_pause: 0,
            host_calls: 0,
            host_returned: false,
        })
    }

    // =========================================================================
    // Host API
    // =========================================================================

    /// Runs until the program finishes or reaches a `debugger` statement.
    pub fn run(&mut self) -> Result<RunMode, RuntimeError> {
        self.resume(RunMode::Running)
    }

    /// Runs until just before the next statement.
    pub fn step(&mut self) -> Result<RunMode, RuntimeError> {
        self.resume(RunMode::SingleStep)
    }

    fn resume(&mut self, mode: RunMode) -> Result<RunMode, RuntimeError> {
        if self.mode == RunMode::Done {
            return Ok(RunMode::Done);
        }
        self.mode = mode;
        self.cycles = 0;
        match self.execute() {
            Ok(()) => Ok(self.mode),
            Err(err) => {
                self.mode = RunMode::Done;
                self.stack.clear();
                self.env = self.global.clone();
                Err(err)
            }
        }
    }

    /// Calls a script function by name. The program must have finished.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue, RuntimeError> {
        if self.mode != RunMode::Done {
            return Err(RuntimeError::InvalidState(format!(
                "cannot call '{}' while the program is {:?}",
                name, self.mode
            )));
        }
        let index = self
            .program
            .function_index(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
        let args: Vec<Value> = args
            .iter()
            .map(|a| from_host(a, &self.program, &self.global))
            .collect();

        tracing::debug!(function = name, argc = args.len(), "host call");

        let base = self.stack.len();
        let saved = (self.section, self.pc, self.env.clone());
        self.enter_function(index, args, None, true)?;
        self.mode = RunMode::Running;
        self.cycles = 0;
        self.host_calls += 1;
        self.host_returned = false;

        let result = self.execute();
        self.host_calls -= 1;

        let outcome = match result {
            Ok(()) if self.host_returned => self.pop_value().map(|v| to_host(&v, &self.program)),
            Ok(()) => Err(self.internal("host call ended without returning")),
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            self.stack.truncate(base);
            (self.section, self.pc, self.env) = saved;
        }
        self.host_returned = false;
        self.mode = RunMode::Done;
        outcome
    }

    /// Makes `f` callable from scripts as `name(...)`.
    pub fn register_method<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[HostValue]) -> Result<HostValue, HostValue> + 'static,
    {
        self.natives.insert(name.into(), Rc::new(f));
    }

    /// Value of a global variable, `undefined` if it does not exist.
    pub fn global(&self, name: &str) -> HostValue {
        self.global
            .get_own(name)
            .map(|v| to_host(&v, &self.program))
            .unwrap_or(HostValue::Undefined)
    }

    /// Receives the text of `print(...)` calls.
    pub fn on_debug_print<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + 'static,
    {
        self.debug_print = Some(Box::new(callback));
    }

    pub fn decompile(&self) -> String {
        decompile(&self.program)
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The instruction that will execute next.
    pub fn pending_instruction(&self) -> Option<&Instruction> {
        if self.mode == RunMode::Done {
            return None;
        }
        self.program.instruction(self.section, self.pc)
    }

    pub fn pending_range(&self) -> Option<TokenRange> {
        self.pending_instruction().and_then(|i| i.range)
    }

    /// Source text of the pending instruction's construct.
    pub fn pending_source(&self) -> Option<&str> {
        self.pending_range()
            .and_then(|range| self.program.source_for(range))
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn internal(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::Internal {
            message: message.into(),
            section: self.section,
            pc: self.pc.saturating_sub(1),
        }
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.cycles += 1;

        if let Some(max) = self.config.max_cycles {
            if self.cycles > max {
                return Err(RuntimeError::TooManyCycles { limit: max });
            }
        }

        if self.stack.len() > self.config.max_stack_depth {
            return Err(RuntimeError::StackOverflow {
                limit: self.config.max_stack_depth,
            });
        }

        Ok(())
    }

    fn pause(&mut self) {
        self.mode = RunMode::Paused;
        self.executed_since_pause = 0;
        tracing::debug!(section = self.section, pc = self.pc, "paused");
    }

    fn execute(&mut self) -> Result<(), RuntimeError> {
        while matches!(self.mode, RunMode::Running | RunMode::SingleStep) {
            let instruction = match self.program.instruction(self.section, self.pc) {
                Some(instruction) => instruction.clone(),
                None => return Err(self.internal("program counter out of range")),
            };

            if self.mode == RunMode::SingleStep
                && instruction.statement_start
                && self.executed_since_pause > 0
            {
                self.pause();
                return Ok(());
            }

            self.check_limits()?;
            self.pc += 1;
            self.executed_since_pause += 1;

            tracing::trace!(
                section = self.section,
                pc = self.pc - 1,
                op = instruction.op.mnemonic(),
                depth = self.stack.len(),
                "dispatch"
            );
            self.dispatch(instruction.op)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, op: Op) -> Result<(), RuntimeError> {
        match op {
            Op::Nop | Op::Label(_) => {}

            Op::Const(index) => {
                let value = self
                    .program
                    .constants
                    .get(index)
                    .cloned()
                    .ok_or_else(|| self.internal(format!("constant #{} out of range", index)))?;
                self.push(value);
            }

            // Stack operations
            Op::Pop => {
                self.pop_value()?;
            }
            Op::Dup => {
                let value = self.peek_value()?.clone();
                self.push(value);
            }
            Op::Pick(n) => {
                let value = self
                    .stack
                    .len()
                    .checked_sub(n + 1)
                    .and_then(|i| self.stack[i].as_value())
                    .cloned()
                    .ok_or_else(|| self.internal(format!("PICK {} found no value", n)))?;
                self.push(value);
            }

            // Arithmetic and comparison
            op @ (Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Eq
            | Op::NotEq
            | Op::Lt
            | Op::LtEq
            | Op::Gt
            | Op::GtEq) => self.binary(&op)?,
            Op::Neg => {
                let value = self.pop_value()?;
                self.push(Value::Number(-value.to_number()));
            }
            Op::Not => {
                let value = self.pop_value()?;
                self.push(Value::Bool(!value.is_truthy()));
            }

            // Control flow
            Op::Jmp(label) => self.jump(label)?,
            Op::JmpFalse(label) => {
                if !self.pop_value()?.is_truthy() {
                    self.jump(label)?;
                }
            }
            Op::JmpTrue(label) => {
                if self.pop_value()?.is_truthy() {
                    self.jump(label)?;
                }
            }

            // Scopes and variables
            Op::EnterScope => self.env = self.env.child(),
            Op::LeaveScope => {
                self.env = self
                    .env
                    .parent()
                    .ok_or_else(|| self.internal("LEAVE_SCOPE at the global scope"))?;
            }
            Op::Declare(name) => self.env.declare(name),
            Op::Store {
                name,
                property: false,
            } => {
                let value = self.peek_value()?.clone();
                // Assigning an undeclared name creates a global.
                if !self.env.assign(&name, value.clone()) {
                    self.global.define(name, value);
                }
            }
            Op::Store {
                name,
                property: true,
            } => {
                let value = self.pop_value()?;
                let target = self.pop_value()?;
                if let Err(thrown) = self.set_property(&target, &name, value.clone()) {
                    return self.throw_value(thrown);
                }
                self.push(value);
            }
            Op::Fetch { name, access } => self.fetch(&name, access)?,

            // Calls
            Op::Call { argc, bound } => self.call_value(argc as usize, bound)?,
            Op::Return => self.return_from_call()?,

            // Loops
            Op::LoopStart => self.stack.push(StackEntry::LoopMarker(self.env.clone())),
            Op::LoopEnd => match self.pop_entry()? {
                StackEntry::LoopMarker(_) => {}
                other => {
                    return Err(self.internal(format!("LOOP_END found a {}", other.kind())));
                }
            },
            Op::LoopExit(target) => self.loop_exit(target)?,

            // Exceptions
            Op::Try(label) => {
                let target = self
                    .jump_table
                    .resolve(label)
                    .ok_or_else(|| self.internal(format!("unresolved label {}", label)))?;
                self.stack.push(StackEntry::TryRegion(TryRegion {
                    section: target.section,
                    handler_pc: target.pc,
                    env: self.env.clone(),
                }));
            }
            Op::PopTry => match self.pop_entry()? {
                StackEntry::TryRegion(_) => {}
                other => {
                    return Err(self.internal(format!("POP_TRY found a {}", other.kind())));
                }
            },
            Op::Throw => {
                let value = self.pop_value()?;
                self.throw_value(value)?;
            }

            // Objects
            Op::CreateObject(class) => self.create_object(&class)?,
            Op::MakeArray(n) => {
                let items = self.pop_values(n)?;
                self.push(Value::Native(Rc::new(Array::new(items))));
            }

            Op::Debugger => {
                // Host calls run to completion.
                if self.host_calls == 0 {
                    self.pause();
                }
            }
            Op::Halt => {
                self.mode = RunMode::Done;
                tracing::debug!(cycles = self.cycles, "program finished");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn push(&mut self, value: Value) {
        self.stack.push(StackEntry::Value(value));
    }

    fn pop_entry(&mut self) -> Result<StackEntry, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| self.internal("stack underflow"))
    }

    fn pop_value(&mut self) -> Result<Value, RuntimeError> {
        match self.pop_entry()? {
            StackEntry::Value(value) => Ok(value),
            other => Err(self.internal(format!("expected a value, found a {}", other.kind()))),
        }
    }

    /// Pops `count` values; the first popped comes first.
    fn pop_values(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        (0..count).map(|_| self.pop_value()).collect()
    }

    fn peek_value(&self) -> Result<&Value, RuntimeError> {
        match self.stack.last() {
            Some(StackEntry::Value(value)) => Ok(value),
            Some(other) => Err(self.internal(format!("expected a value, found a {}", other.kind()))),
            None => Err(self.internal("stack underflow")),
        }
    }

    fn jump(&mut self, label: LabelId) -> Result<(), RuntimeError> {
        let target = self
            .jump_table
            .resolve(label)
            .ok_or_else(|| self.internal(format!("unresolved label {}", label)))?;
        self.section = target.section;
        self.pc = target.pc;
        Ok(())
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn binary(&mut self, op: &Op) -> Result<(), RuntimeError> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let result = match op {
            Op::Add => a.add(&b),
            Op::Sub => Value::Number(a.to_number() - b.to_number()),
            Op::Mul => Value::Number(a.to_number() * b.to_number()),
            Op::Div => Value::Number(a.to_number() / b.to_number()),
            Op::Mod => Value::Number(a.to_number() % b.to_number()),
            Op::Eq => Value::Bool(a == b),
            Op::NotEq => Value::Bool(a != b),
            Op::Lt => Value::Bool(matches!(a.compare(&b), Some(Ordering::Less))),
            Op::LtEq => Value::Bool(matches!(
                a.compare(&b),
                Some(Ordering::Less | Ordering::Equal)
            )),
            Op::Gt => Value::Bool(matches!(a.compare(&b), Some(Ordering::Greater))),
            Op::GtEq => Value::Bool(matches!(
                a.compare(&b),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            other => {
                return Err(self.internal(format!("{} is not a binary operator", other.mnemonic())));
            }
        };
        self.push(result);
        Ok(())
    }

    // =========================================================================
    // Names and properties
    // =========================================================================

    fn has_native(&self, name: &str) -> bool {
        self.natives.contains_key(name) || BUILTINS.contains(&name)
    }

    /// Resolves a name against script bindings: `this`, the environment
    /// chain, then the function table.
    fn lookup_script(&self, name: &str) -> Option<Value> {
        if name == "this" {
            return Some(
                self.env
                    .this_object()
                    .map(Value::Object)
                    .unwrap_or(Value::Undefined),
            );
        }
        self.env
            .lookup(name)
            .or_else(|| self.program.function_index(name).map(Value::Function))
    }

    fn fetch(&mut self, name: &Rc<str>, access: Access) -> Result<(), RuntimeError> {
        match access {
            Access::Variable => {
                let value = match self.lookup_script(name) {
                    Some(value) => value,
                    None if self.has_native(name) => Value::NativeFunction(Rc::clone(name)),
                    None => Value::Undefined,
                };
                self.push(value);
            }
            Access::CallVariable(argc) => {
                if let Some(value) = self.lookup_script(name) {
                    self.push(value);
                } else if self.has_native(name) {
                    let args = self.pop_values(argc as usize)?;
                    match self.call_native(name, args) {
                        Ok(result) => self.push_native_result(result),
                        Err(thrown) => return self.throw_value(thrown),
                    }
                } else {
                    return self.throw_value(type_error(format!("{} is not a function", name)));
                }
            }
            Access::Property => {
                let target = self.pop_value()?;
                match self.get_property(&target, name) {
                    Ok(value) => self.push(value),
                    Err(thrown) => return self.throw_value(thrown),
                }
            }
            Access::CallProperty(argc) => {
                let target = self.pop_value()?;
                self.fetch_method(target, name, argc as usize)?;
            }
        }
        Ok(())
    }

    fn push_native_result(&mut self, result: Value) {
        self.push(result);
        self.stack.push(StackEntry::NativeResult);
    }

    fn get_property(&self, target: &Value, name: &str) -> Result<Value, Value> {
        match target {
            Value::Object(env) => Ok(env.get_own(name).unwrap_or(Value::Undefined)),
            Value::Native(native) => Ok(native.get_property(name).unwrap_or(Value::Undefined)),
            Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Undefined | Value::Null => Err(type_error(format!(
                "cannot read property '{}' of {}",
                name, target
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_property(&self, target: &Value, name: &Rc<str>, value: Value) -> Result<(), Value> {
        let accepted = match target {
            Value::Object(env) => {
                env.define(Rc::clone(name), value);
                true
            }
            Value::Native(native) => native.set_property(name, value),
            _ => false,
        };
        if accepted {
            Ok(())
        } else {
            Err(type_error(format!(
                "cannot set property '{}' of {}",
                name,
                target.type_name()
            )))
        }
    }

    /// Resolves `target.name` for a call with `argc` arguments. Natives and
    /// indexers run here and leave a result marked with the sentinel.
    fn fetch_method(
        &mut self,
        target: Value,
        name: &Rc<str>,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        match &target {
            Value::Object(env) => {
                if let Some(method) = env.get_own(name) {
                    self.push(method);
                    return Ok(());
                }
                let is_get = &**name == INDEXER_GET;
                if is_get || &**name == INDEXER_SET {
                    let args = self.pop_values(argc)?;
                    let key: Rc<str> = args
                        .first()
                        .map(|k| k.to_string())
                        .unwrap_or_default()
                        .into();
                    let result = if is_get {
                        env.get_own(&key).unwrap_or(Value::Undefined)
                    } else {
                        let value = args.get(1).cloned().unwrap_or(Value::Undefined);
                        env.define(key, value.clone());
                        value
                    };
                    self.push_native_result(result);
                    return Ok(());
                }
                self.throw_value(type_error(format!("{} is not a function", name)))
            }
            Value::Native(native) => {
                let args = self.pop_values(argc)?;
                match native.call_method(name, &args) {
                    Some(Ok(result)) => {
                        self.push_native_result(result);
                        Ok(())
                    }
                    Some(Err(thrown)) => self.throw_value(thrown),
                    None => self.throw_value(type_error(format!(
                        "{}.{} is not a function",
                        native.type_name(),
                        name
                    ))),
                }
            }
            Value::String(s) if &**name == INDEXER_GET => {
                let args = self.pop_values(argc)?;
                let result = match args.first() {
                    Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => s
                        .chars()
                        .nth(*n as usize)
                        .map(|c| Value::string(c.to_string()))
                        .unwrap_or(Value::Undefined),
                    _ => Value::Undefined,
                };
                self.push_native_result(result);
                Ok(())
            }
            Value::Undefined | Value::Null => self.throw_value(type_error(format!(
                "cannot read property '{}' of {}",
                name, target
            ))),
            _ => self.throw_value(type_error(format!("{} is not a function", name))),
        }
    }

    fn create_object(&mut self, class: &str) -> Result<(), RuntimeError> {
        let methods = match self.program.class(class) {
            Some(entry) => entry.methods.clone(),
            None => return self.throw_value(type_error(format!("{} is not a class", class))),
        };
        let object = Env::object(&self.global);
        for (name, index) in methods {
            object.define(name.as_str(), Value::Function(index));
        }
        self.push(Value::Object(object));
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, argc: usize, bound: bool) -> Result<(), RuntimeError> {
        let callee = match self.pop_entry()? {
            StackEntry::NativeResult => {
                if bound {
                    let result = self.pop_value()?;
                    self.pop_value()?; // receiver
                    self.push(result);
                }
                return Ok(());
            }
            StackEntry::Value(value) => value,
            other => return Err(self.internal(format!("CALL found a {}", other.kind()))),
        };

        match callee {
            Value::Function(index) => {
                let args = self.pop_values(argc)?;
                let receiver = if bound { Some(self.pop_value()?) } else { None };
                self.enter_function(index, args, receiver, false)
            }
            Value::NativeFunction(name) => {
                let args = self.pop_values(argc)?;
                if bound {
                    self.pop_value()?;
                }
                match self.call_native(&name, args) {
                    Ok(result) => {
                        self.push(result);
                        Ok(())
                    }
                    Err(thrown) => self.throw_value(thrown),
                }
            }
            other => self.throw_value(type_error(format!("{} is not a function", other))),
        }
    }

    /// Binds arguments in a fresh environment, saves the caller and jumps to
    /// the callee's first instruction. Method calls chain the environment to
    /// the receiver's object environment, plain calls to the global one.
    fn enter_function(
        &mut self,
        index: usize,
        args: Vec<Value>,
        receiver: Option<Value>,
        from_host: bool,
    ) -> Result<(), RuntimeError> {
        let parent = match receiver {
            Some(Value::Object(object)) => object,
            _ => self.global.clone(),
        };
        let call_env = parent.child();

        let section = {
            let entry = self
                .program
                .functions
                .get(index)
                .ok_or_else(|| self.internal(format!("function #{} does not exist", index)))?;
            for (i, param) in entry.params.iter().enumerate() {
                call_env.define(param.as_str(), args.get(i).cloned().unwrap_or(Value::Undefined));
            }
            entry.section
        };

        let caller_env = std::mem::replace(&mut self.env, call_env);
        self.stack.push(StackEntry::CallSite(CallSite {
            section: self.section,
            pc: self.pc,
            env: caller_env,
            function: index,
            from_host,
        }));
        self.section = section;
        self.pc = 0;
        Ok(())
    }

    /// Pops the return value and unwinds to the nearest call site.
    fn return_from_call(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop_value()?;
        loop {
            match self.stack.pop() {
                Some(StackEntry::CallSite(site)) => {
                    self.section = site.section;
                    self.pc = site.pc;
                    self.env = site.env;
                    self.push(value);
                    if site.from_host {
                        self.host_returned = true;
                        self.mode = RunMode::Paused;
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.internal("RETURN without a call site")),
            }
        }
    }

    fn call_native(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Value> {
        if let Some(native) = self.natives.get(name).cloned() {
            let host_args: Vec<HostValue> =
                args.iter().map(|a| to_host(a, &self.program)).collect();
            tracing::debug!(native = name, argc = host_args.len(), "calling host native");
            return match (*native)(&host_args) {
                Ok(result) => Ok(from_host(&result, &self.program, &self.global)),
                Err(thrown) => Err(from_host(&thrown, &self.program, &self.global)),
            };
        }

        match name {
            "print" => {
                let text = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                match self.debug_print.as_mut() {
                    Some(callback) => callback(&text),
                    None => tracing::info!(target: "cinder::print", "{}", text),
                }
                Ok(Value::Undefined)
            }
            _ => Err(type_error(format!("{} is not a function", name))),
        }
    }

    // =========================================================================
    // Loops and exceptions
    // =========================================================================

    fn loop_exit(&mut self, target: Option<LabelId>) -> Result<(), RuntimeError> {
        loop {
            match self.stack.pop() {
                Some(StackEntry::LoopMarker(env)) => {
                    self.env = env.clone();
                    self.stack.push(StackEntry::LoopMarker(env));
                    break;
                }
                Some(StackEntry::CallSite(_)) | None => {
                    return Err(self.internal("LOOP_EXIT outside a loop"));
                }
                Some(_) => {}
            }
        }
        match target {
            Some(label) => self.jump(label),
            None => Ok(()),
        }
    }

    fn section_name(&self, section: usize) -> String {
        self.program
            .sections
            .get(section)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Unwinds to the nearest try region and resumes at its handler with
    /// `value` pushed. Uncaught values end the run, or the host call that
    /// started the current script frame.
    fn throw_value(&mut self, value: Value) -> Result<(), RuntimeError> {
        let mut frames = vec![self.section_name(self.section)];
        loop {
            match self.stack.pop() {
                Some(StackEntry::TryRegion(region)) => {
                    self.section = region.section;
                    self.pc = region.handler_pc;
                    self.env = region.env;
                    self.push(value);
                    return Ok(());
                }
                Some(StackEntry::CallSite(site)) => {
                    if site.from_host {
                        self.section = site.section;
                        self.pc = site.pc;
                        self.env = site.env;
                        return Err(self.uncaught(value, frames));
                    }
                    frames.push(self.section_name(site.section));
                }
                Some(_) => {}
                None => return Err(self.uncaught(value, frames)),
            }
        }
    }

    fn uncaught(&self, value: Value, call_stack: Vec<String>) -> RuntimeError {
        tracing::debug!(value = %value, "uncaught exception");
        RuntimeError::Uncaught {
            message: value.to_string(),
            value: to_host(&value, &self.program),
            call_stack,
        }
    }
}
