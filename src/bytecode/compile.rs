use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::{
    bytecode::{
        Access, ClassEntry, CodeSection, ConstantPool, FunctionEntry, Instruction, LabelId, Op,
        Program, compile_error::CompileError,
    },
    frontend::token::Token,
    lang::{
        ast::{
            BinaryOp, ClassDecl, Expr, ExprKind, FunctionDecl, LogicalOp, Stmt, StmtKind,
            TokenRange, UnaryOp,
        },
        native::{INDEXER_GET, INDEXER_SET},
        value::Value,
    },
};

pub const MAX_PARAMETERS: usize = 127;
pub const MAX_ARGUMENTS: usize = 255;

pub const MAIN_SECTION: &str = "main";
pub const CONSTRUCTOR: &str = "constructor";

/// Function-table name of a class method.
pub fn method_name(class: &str, method: &str) -> String {
    format!("@{}.{}", class, method)
}

/// Function-table name of a function declared inside `enclosing`.
pub fn nested_name(enclosing: &str, function: &str) -> String {
    format!("{}.{}", enclosing, function)
}

/// Collects the names of functions declared by `statements`, including those
/// in nested blocks but not inside other function bodies.
fn declared_functions<'a>(statements: &'a [Stmt], names: &mut Vec<&'a str>) {
    for stmt in statements {
        match &stmt.kind {
            StmtKind::Function(decl) => names.extend(decl.name.as_deref()),
            StmtKind::Block(body) => declared_functions(body, names),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                declared_functions(std::slice::from_ref(&**then_branch), names);
                if let Some(else_branch) = else_branch {
                    declared_functions(std::slice::from_ref(&**else_branch), names);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                declared_functions(std::slice::from_ref(&**body), names);
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                declared_functions(body, names);
                if let Some(catch) = catch {
                    declared_functions(&catch.body, names);
                }
                if let Some(finally) = finally {
                    declared_functions(finally, names);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopContext {
    continue_label: LabelId,
    break_label: LabelId,
}

/// A construct that leaves a marker or a value on the stack while its body
/// runs. Jumping out of it must clean up after it.
#[derive(Debug, Clone)]
enum ExitScope {
    Loop,
    /// A try region whose `finally` block still has to run. `loops` is the
    /// loop depth outside the try.
    Protected {
        finally: Option<Rc<[Stmt]>>,
        loops: usize,
    },
    /// A `finally` block running with the thrown value on the stack.
    PendingThrow,
}

impl ExitScope {
    fn needs_cleanup(&self) -> bool {
        match self {
            ExitScope::Loop => false,
            ExitScope::Protected { finally, .. } => finally.is_some(),
            ExitScope::PendingThrow => true,
        }
    }
}

/// Holds the value of a `return` while the `finally` blocks it crosses run.
const RETURN_SLOT: &str = "@return";

/// Single-pass compiler from statements to a `Program`.
pub struct Compiler {
    constants: ConstantPool,
    sections: Vec<CodeSection>,
    functions: Vec<FunctionEntry>,
    classes: Vec<ClassEntry>,

    next_label: usize,
    loops: Vec<LoopContext>,
    exits: Vec<ExitScope>,
    current: usize,
    anon_count: usize,
    function_depth: usize,
    /// For each function being compiled, its locally declared functions
    /// mapped to their function-table names.
    nested_functions: Vec<FxHashMap<String, String>>,

    /// Range of the statement whose first instruction has not been emitted yet.
    pending_statement: Option<TokenRange>,

    tokens: Vec<Token>,
    source: String,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            constants: ConstantPool::default(),
            sections: vec![CodeSection::new(MAIN_SECTION)],
            functions: Vec::new(),
            classes: Vec::new(),
            next_label: 0,
            loops: Vec::new(),
            exits: Vec::new(),
            current: 0,
            anon_count: 0,
            function_depth: 0,
            nested_functions: Vec::new(),
            pending_statement: None,
            tokens: Vec::new(),
            source: String::new(),
        }
    }

    /// Compiles a parsed program. `tokens` and `source` are kept in the
    /// result for source mapping.
    pub fn compile(
        mut self,
        statements: &[Stmt],
        tokens: Vec<Token>,
        source: impl Into<String>,
    ) -> Result<Program, CompileError> {
        self.tokens = tokens;
        self.source = source.into();

        for stmt in statements {
            self.compile_statement(stmt)?;
        }
        let end = self.end_range();
        self.emit_plumbing(Op::Halt, end);

        tracing::debug!(
            sections = self.sections.len(),
            functions = self.functions.len(),
            constants = self.constants.len(),
            labels = self.next_label,
            "compiled program"
        );

        Ok(Program::new(
            self.constants,
            self.sections,
            self.functions,
            self.classes,
            self.tokens,
            self.source,
        ))
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    fn code(&mut self) -> &mut Vec<Instruction> {
        &mut self.sections[self.current].code
    }

    /// Emits an instruction. The first one after a statement begins is
    /// flagged and takes the statement's range.
    fn emit(&mut self, op: Op, range: TokenRange) {
        let mut instruction = Instruction::new(op, Some(range));
        if let Some(statement) = self.pending_statement.take() {
            instruction.statement_start = true;
            instruction.range = Some(statement);
        }
        self.code().push(instruction);
    }

    /// Emits control-flow plumbing, which never starts a statement.
    fn emit_plumbing(&mut self, op: Op, range: Option<TokenRange>) {
        self.code().push(Instruction::new(op, range));
    }

    fn place_label(&mut self, label: LabelId) {
        self.emit_plumbing(Op::Label(label), None);
    }

    fn emit_const(&mut self, value: Value, range: TokenRange) {
        let index = self.constants.intern(value);
        self.emit(Op::Const(index), range);
    }

    fn end_range(&self) -> Option<TokenRange> {
        self.tokens
            .len()
            .checked_sub(1)
            .map(|last| TokenRange::new(last, last))
    }

    /// Function-table name a bare `name` refers to: the function declared
    /// under that name by the innermost enclosing function, or `name` itself.
    fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.nested_functions
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    fn source_text(&self, range: TokenRange) -> String {
        let first = self.tokens.get(range.start);
        let last = self.tokens.get(range.end);
        match (first, last) {
            (Some(first), Some(last)) => self
                .source
                .get(first.start..last.end.max(first.start))
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        if !matches!(stmt.kind, StmtKind::Block(_)) {
            self.pending_statement = Some(stmt.range);
        }
        let range = stmt.range;

        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(Op::Pop, range);
            }

            StmtKind::Var { name, init } => {
                self.emit(Op::Declare(name.as_str().into()), range);
                match init {
                    Some(init) => self.compile_expr(init)?,
                    None => self.emit_const(Value::Undefined, range),
                }
                self.emit(
                    Op::Store {
                        name: name.as_str().into(),
                        property: false,
                    },
                    range,
                );
                self.emit(Op::Pop, range);
            }

            StmtKind::Block(statements) => self.compile_block(statements, Some(range))?,

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let else_label = self.new_label();
                self.compile_expr(condition)?;
                self.emit(Op::JmpFalse(else_label), condition.range);
                self.compile_statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end_label = self.new_label();
                        self.emit_plumbing(Op::Jmp(end_label), Some(range));
                        self.place_label(else_label);
                        self.compile_statement(else_branch)?;
                        self.place_label(end_label);
                    }
                    None => self.place_label(else_label),
                }
            }

            StmtKind::While { condition, body } => {
                let start = self.new_label();
                let end = self.new_label();
                self.emit(Op::LoopStart, range);
                self.place_label(start);
                self.compile_expr(condition)?;
                self.emit(Op::JmpFalse(end), condition.range);
                self.compile_loop_body(body, start, end)?;
                self.emit_plumbing(Op::Jmp(start), Some(range));
                self.place_label(end);
                self.emit_plumbing(Op::LoopEnd, Some(range));
            }

            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let start = self.new_label();
                let cont = self.new_label();
                let end = self.new_label();

                self.emit(Op::EnterScope, range);
                if let Some(init) = init {
                    self.compile_statement(init)?;
                }
                self.emit_plumbing(Op::LoopStart, Some(range));
                self.place_label(start);
                if let Some(condition) = condition {
                    self.compile_expr(condition)?;
                    self.emit(Op::JmpFalse(end), condition.range);
                }
                self.compile_loop_body(body, cont, end)?;
                self.place_label(cont);
                if let Some(update) = update {
                    self.compile_expr(update)?;
                    self.emit(Op::Pop, update.range);
                }
                self.emit_plumbing(Op::Jmp(start), Some(range));
                self.place_label(end);
                self.emit_plumbing(Op::LoopEnd, Some(range));
                self.emit_plumbing(Op::LeaveScope, Some(range));
            }

            StmtKind::Break => {
                let context = self
                    .loops
                    .last()
                    .copied()
                    .ok_or_else(|| CompileError::outside_loop("break"))?;
                self.leave_exits(self.exits_inside_loop(), range)?;
                self.emit(Op::LoopExit(Some(context.break_label)), range);
            }

            StmtKind::Continue => {
                let context = self
                    .loops
                    .last()
                    .copied()
                    .ok_or_else(|| CompileError::outside_loop("continue"))?;
                self.leave_exits(self.exits_inside_loop(), range)?;
                self.emit(Op::LoopExit(Some(context.continue_label)), range);
            }

            StmtKind::Return(value) => {
                if self.function_depth == 0 {
                    return Err(CompileError::return_outside_function());
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_const(Value::Undefined, range),
                }
                if self.exits.iter().any(ExitScope::needs_cleanup) {
                    self.emit(Op::Declare(RETURN_SLOT.into()), range);
                    self.emit(
                        Op::Store {
                            name: RETURN_SLOT.into(),
                            property: false,
                        },
                        range,
                    );
                    self.emit(Op::Pop, range);
                    self.leave_exits(self.exits.len(), range)?;
                    self.emit(
                        Op::Fetch {
                            name: RETURN_SLOT.into(),
                            access: Access::Variable,
                        },
                        range,
                    );
                }
                self.emit(Op::Return, range);
            }

            StmtKind::Throw(value) => {
                self.compile_expr(value)?;
                self.emit(Op::Throw, range);
            }

            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch.as_ref(), finally.as_deref(), range)?,

            StmtKind::Function(decl) => {
                let name = decl
                    .name
                    .clone()
                    .ok_or_else(|| CompileError::internal("function declaration without a name"))?;
                let name = self.resolve_name(&name).to_string();
                self.compile_function(name, decl)?;
            }

            StmtKind::Class(class) => self.compile_class(class)?,

            StmtKind::Debugger => self.emit(Op::Debugger, range),

            StmtKind::Empty => {}
        }

        // Statements that produced no code still get a stepping point.
        if self.pending_statement.is_some() {
            self.emit(Op::Nop, range);
        }
        Ok(())
    }

    fn compile_block(
        &mut self,
        statements: &[Stmt],
        range: Option<TokenRange>,
    ) -> Result<(), CompileError> {
        self.emit_plumbing(Op::EnterScope, range);
        for stmt in statements {
            self.compile_statement(stmt)?;
        }
        self.emit_plumbing(Op::LeaveScope, range);
        Ok(())
    }

    fn compile_loop_body(
        &mut self,
        body: &Stmt,
        continue_label: LabelId,
        break_label: LabelId,
    ) -> Result<(), CompileError> {
        self.loops.push(LoopContext {
            continue_label,
            break_label,
        });
        self.exits.push(ExitScope::Loop);
        let result = self.compile_statement(body);
        self.exits.pop();
        self.loops.pop();
        result
    }

    /// Number of exit scopes between the current point and the innermost loop.
    fn exits_inside_loop(&self) -> usize {
        self.exits
            .iter()
            .rev()
            .take_while(|exit| !matches!(exit, ExitScope::Loop))
            .count()
    }

    /// Emits the cleanup for jumping out of the innermost `count` exit
    /// scopes: each crossed `finally` block runs inline after its try region
    /// is popped. Nothing is emitted when the jump itself unwinds enough.
    fn leave_exits(&mut self, count: usize, range: TokenRange) -> Result<(), CompileError> {
        let first = self.exits.len() - count;
        if !self.exits[first..].iter().any(ExitScope::needs_cleanup) {
            return Ok(());
        }
        for depth in (first..self.exits.len()).rev() {
            match self.exits[depth].clone() {
                ExitScope::Loop => self.emit(Op::LoopEnd, range),
                ExitScope::PendingThrow => self.emit(Op::Pop, range),
                ExitScope::Protected { finally, loops } => {
                    self.emit(Op::PopTry, range);
                    if let Some(finally) = finally {
                        // The inlined copy sees only the scopes outside this try.
                        let inner_exits = self.exits.split_off(depth);
                        let inner_loops = self.loops.split_off(loops);
                        let result = self.compile_block(&finally, Some(range));
                        self.loops.extend(inner_loops);
                        self.exits.extend(inner_exits);
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    fn with_exit<T>(
        &mut self,
        exit: ExitScope,
        compile: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        self.exits.push(exit);
        let result = compile(self);
        self.exits.pop();
        result
    }

    /// Lays out try/catch/finally as one linear chunk:
    ///
    /// ```text
    ///     TRY  exception | finally_with_exception
    ///     body; POP_TRY; JMP finally
    /// exception:
    ///     ENTER_SCOPE; (DECLARE e; STORE e;) POP
    ///     TRY finally_with_exception
    ///     catch-body; POP_TRY; LEAVE_SCOPE; JMP finally
    /// finally_with_exception:
    ///     (LEAVE_SCOPE) finally-body; THROW
    /// finally:
    ///     finally-body
    /// ```
    fn compile_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&crate::lang::ast::CatchClause>,
        finally: Option<&[Stmt]>,
        range: TokenRange,
    ) -> Result<(), CompileError> {
        let exception = self.new_label();
        let finally_label = self.new_label();
        let finally_with_exception = self.new_label();

        let handler = if catch.is_some() {
            exception
        } else {
            finally_with_exception
        };
        let protected = ExitScope::Protected {
            finally: finally.map(Rc::from),
            loops: self.loops.len(),
        };

        self.emit(Op::Try(handler), range);
        self.with_exit(protected.clone(), |this| this.compile_block(body, Some(range)))?;
        self.emit_plumbing(Op::PopTry, Some(range));
        self.emit_plumbing(Op::Jmp(finally_label), Some(range));

        if let Some(catch) = catch {
            let catch_range = catch.range;
            self.place_label(exception);
            self.emit_plumbing(Op::EnterScope, Some(catch_range));
            match &catch.binding {
                Some(name) => {
                    self.emit_plumbing(Op::Declare(name.as_str().into()), Some(catch_range));
                    self.emit_plumbing(
                        Op::Store {
                            name: name.as_str().into(),
                            property: false,
                        },
                        Some(catch_range),
                    );
                    self.emit_plumbing(Op::Pop, Some(catch_range));
                }
                None => self.emit_plumbing(Op::Pop, Some(catch_range)),
            }
            self.emit_plumbing(Op::Try(finally_with_exception), Some(catch_range));
            self.with_exit(protected, |this| {
                catch
                    .body
                    .iter()
                    .try_for_each(|stmt| this.compile_statement(stmt))
            })?;
            self.emit_plumbing(Op::PopTry, Some(catch_range));
            self.emit_plumbing(Op::LeaveScope, Some(catch_range));
            self.emit_plumbing(Op::Jmp(finally_label), Some(catch_range));
        }

        // Reached only with the thrown value on top of the stack.
        self.place_label(finally_with_exception);
        if catch.is_some() {
            self.emit_plumbing(Op::LeaveScope, Some(range));
        }
        if let Some(finally) = finally {
            self.with_exit(ExitScope::PendingThrow, |this| {
                this.compile_block(finally, Some(range))
            })?;
        }
        self.emit_plumbing(Op::Throw, Some(range));

        self.place_label(finally_label);
        if let Some(finally) = finally {
            self.compile_block(finally, Some(range))?;
        }
        Ok(())
    }

    // =========================================================================
    // Functions and classes
    // =========================================================================

    /// Compiles a body into its own section and registers it under `name`.
    /// Returns the function-table index.
    fn compile_function(
        &mut self,
        name: String,
        decl: &FunctionDecl,
    ) -> Result<usize, CompileError> {
        if decl.params.len() > MAX_PARAMETERS {
            return Err(CompileError::too_many_parameters(&name, decl.params.len()));
        }
        if self.functions.iter().any(|f| f.name == name) {
            tracing::warn!(function = %name, "redefining function");
        }

        let mut declared = Vec::new();
        declared_functions(&decl.body, &mut declared);
        let scope: FxHashMap<String, String> = declared
            .into_iter()
            .map(|local| (local.to_string(), nested_name(&name, local)))
            .collect();

        let section = self.sections.len();
        self.sections.push(CodeSection::new(name.clone()));
        let index = self.functions.len();
        self.functions.push(FunctionEntry {
            name,
            section,
            params: decl.params.clone(),
        });

        let saved_section = std::mem::replace(&mut self.current, section);
        let saved_loops = std::mem::take(&mut self.loops);
        let saved_exits = std::mem::take(&mut self.exits);
        let saved_pending = self.pending_statement.take();
        self.function_depth += 1;
        self.nested_functions.push(scope);

        let result = self.compile_function_body(decl);

        self.nested_functions.pop();
        self.function_depth -= 1;
        self.pending_statement = saved_pending;
        self.exits = saved_exits;
        self.loops = saved_loops;
        self.current = saved_section;

        result.map(|_| index)
    }

    fn compile_function_body(&mut self, decl: &FunctionDecl) -> Result<(), CompileError> {
        for stmt in &decl.body {
            self.compile_statement(stmt)?;
        }

        let ends_in_return = matches!(self.code().last(), Some(i) if i.op == Op::Return);
        if !ends_in_return {
            let closing = TokenRange::new(decl.range.end, decl.range.end);
            self.emit_const(Value::Undefined, closing);
            self.emit(Op::Return, closing);
        }
        Ok(())
    }

    fn compile_class(&mut self, class: &ClassDecl) -> Result<(), CompileError> {
        let mut methods = Vec::with_capacity(class.methods.len() + 1);

        for method in &class.methods {
            let short = method
                .name
                .clone()
                .ok_or_else(|| CompileError::internal("class method without a name"))?;
            let index = self.compile_function(method_name(&class.name, &short), method)?;
            methods.push((short, index));
        }

        if !methods.iter().any(|(name, _)| name == CONSTRUCTOR) {
            let empty = FunctionDecl {
                name: Some(CONSTRUCTOR.to_string()),
                params: Vec::new(),
                body: Vec::new(),
                range: self.pending_statement.unwrap_or(TokenRange::new(0, 0)),
            };
            let index = self.compile_function(method_name(&class.name, CONSTRUCTOR), &empty)?;
            methods.push((CONSTRUCTOR.to_string(), index));
        }

        self.classes.push(ClassEntry {
            name: class.name.clone(),
            methods,
        });
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let range = expr.range;

        match &expr.kind {
            ExprKind::Number(n) => self.emit_const(Value::Number(*n), range),
            ExprKind::String(s) => self.emit_const(Value::string(s.as_str()), range),
            ExprKind::Bool(b) => self.emit_const(Value::Bool(*b), range),
            ExprKind::Null => self.emit_const(Value::Null, range),
            ExprKind::Undefined => self.emit_const(Value::Undefined, range),

            ExprKind::Variable(name) => {
                let name: Rc<str> = self.resolve_name(name).into();
                self.emit(
                    Op::Fetch {
                        name,
                        access: Access::Variable,
                    },
                    range,
                );
            }

            ExprKind::This => self.emit(
                Op::Fetch {
                    name: "this".into(),
                    access: Access::Variable,
                },
                range,
            ),

            ExprKind::Assign { target, value } => self.compile_assign(target, value, range)?,

            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let op = match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Sub => Op::Sub,
                    BinaryOp::Mul => Op::Mul,
                    BinaryOp::Div => Op::Div,
                    BinaryOp::Mod => Op::Mod,
                    BinaryOp::Eq => Op::Eq,
                    BinaryOp::NotEq => Op::NotEq,
                    BinaryOp::Lt => Op::Lt,
                    BinaryOp::LtEq => Op::LtEq,
                    BinaryOp::Gt => Op::Gt,
                    BinaryOp::GtEq => Op::GtEq,
                };
                self.emit(op, range);
            }

            ExprKind::Logical { op, left, right } => {
                // Both paths leave exactly one value.
                let short_circuit = self.new_label();
                let end = self.new_label();
                self.compile_expr(left)?;
                let (jump, literal) = match op {
                    LogicalOp::And => (Op::JmpFalse(short_circuit), false),
                    LogicalOp::Or => (Op::JmpTrue(short_circuit), true),
                };
                self.emit(jump, range);
                self.compile_expr(right)?;
                self.emit_plumbing(Op::Jmp(end), Some(range));
                self.place_label(short_circuit);
                self.emit_const(Value::Bool(literal), range);
                self.place_label(end);
            }

            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.emit(op, range);
            }

            ExprKind::Call { callee, args } => self.compile_call(callee, args, range)?,

            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                self.emit(
                    Op::Fetch {
                        name: property.as_str().into(),
                        access: Access::Property,
                    },
                    range,
                );
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit_method_call(INDEXER_GET, 1, range);
            }

            ExprKind::New { class, args } => {
                let argc = self.check_argc(class, args.len())?;
                self.emit(Op::CreateObject(class.as_str().into()), range);
                self.emit(Op::Dup, range);
                self.compile_args(args)?;
                self.emit(
                    Op::Fetch {
                        name: method_name(class, CONSTRUCTOR).into(),
                        access: Access::Variable,
                    },
                    range,
                );
                self.emit(Op::Call { argc, bound: true }, range);
                self.emit(Op::Pop, range);
            }

            ExprKind::Function(decl) => {
                let name = match &decl.name {
                    Some(name) => name.clone(),
                    None => {
                        let name = format!("$_anon_{}", self.anon_count);
                        self.anon_count += 1;
                        name
                    }
                };
                self.compile_function(name.clone(), decl)?;
                self.emit(
                    Op::Fetch {
                        name: name.into(),
                        access: Access::Variable,
                    },
                    range,
                );
            }

            ExprKind::Array(elements) => {
                for element in elements.iter().rev() {
                    self.compile_expr(element)?;
                }
                self.emit(Op::MakeArray(elements.len()), range);
            }
        }

        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        range: TokenRange,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.compile_expr(value)?;
                self.emit(
                    Op::Store {
                        name: name.as_str().into(),
                        property: false,
                    },
                    range,
                );
            }
            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                self.emit(
                    Op::Store {
                        name: property.as_str().into(),
                        property: true,
                    },
                    range,
                );
            }
            ExprKind::Index { object, index } => {
                // @IndexerSet(index, value): arguments go on in reverse.
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.emit_method_call(INDEXER_SET, 2, range);
            }
            _ => return Err(CompileError::invalid_assignment(self.source_text(target.range))),
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        range: TokenRange,
    ) -> Result<(), CompileError> {
        let callee_text = self.source_text(callee.range);
        let argc = self.check_argc(&callee_text, args.len())?;

        match &callee.kind {
            ExprKind::Member { object, property } => {
                self.compile_expr(object)?;
                self.compile_args(args)?;
                self.emit_method_call(property, argc, range);
            }
            ExprKind::Variable(name) => {
                self.compile_args(args)?;
                let name: Rc<str> = self.resolve_name(name).into();
                self.emit(
                    Op::Fetch {
                        name,
                        access: Access::CallVariable(argc),
                    },
                    range,
                );
                self.emit(Op::Call { argc, bound: false }, range);
            }
            _ => {
                self.compile_args(args)?;
                self.compile_expr(callee)?;
                self.emit(Op::Call { argc, bound: false }, range);
            }
        }
        Ok(())
    }

    /// Pushes arguments last-to-first so the first ends up nearest the top.
    fn compile_args(&mut self, args: &[Expr]) -> Result<(), CompileError> {
        for arg in args.iter().rev() {
            self.compile_expr(arg)?;
        }
        Ok(())
    }

    /// With the receiver and `argc` arguments on the stack, calls `method`
    /// on the receiver.
    fn emit_method_call(&mut self, method: &str, argc: u8, range: TokenRange) {
        self.emit(Op::Pick(argc as usize), range);
        self.emit(
            Op::Fetch {
                name: method.into(),
                access: Access::CallProperty(argc),
            },
            range,
        );
        self.emit(Op::Call { argc, bound: true }, range);
    }

    fn check_argc(&self, callee: &str, count: usize) -> Result<u8, CompileError> {
        u8::try_from(count).map_err(|_| CompileError::too_many_arguments(callee, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{lexer::tokenize, parser::Parser};

    fn compile(source: &str) -> Result<Program, CompileError> {
        let tokens = tokenize(source).expect("lexing should succeed");
        let statements = Parser::new(tokens.clone())
            .parse()
            .expect("parsing should succeed");
        Compiler::new().compile(&statements, tokens, source)
    }

    fn ops(program: &Program, section: usize) -> Vec<Op> {
        program.sections[section]
            .code
            .iter()
            .map(|i| i.op.clone())
            .collect()
    }

    fn constant(program: &Program, op: &Op) -> Value {
        match op {
            Op::Const(i) => program.constants.get(*i).cloned().expect("valid constant"),
            other => panic!("expected CONST, got {:?}", other),
        }
    }

    // =========================================================================
    // Basic compilation tests
    // =========================================================================

    #[test]
    fn test_var_declaration_shape() {
        let program = compile("var a = 1;").unwrap();
        let code = ops(&program, 0);
        assert_eq!(code[0], Op::Declare("a".into()));
        assert_eq!(constant(&program, &code[1]), Value::Number(1.0));
        assert_eq!(
            code[2],
            Op::Store {
                name: "a".into(),
                property: false
            }
        );
        assert_eq!(code[3], Op::Pop);
        assert_eq!(code[4], Op::Halt);
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let program = compile("var a = 1; var b = 1; var c = \"1\";").unwrap();
        assert_eq!(program.constants.len(), 2);
    }

    #[test]
    fn test_statement_start_flags() {
        let program = compile("var a = 1; a = a + 2;").unwrap();
        let flagged: Vec<_> = program.sections[0]
            .code
            .iter()
            .filter(|i| i.statement_start)
            .map(|i| i.range.unwrap())
            .collect();
        assert_eq!(flagged, vec![TokenRange::new(0, 4), TokenRange::new(5, 10)]);
    }

    #[test]
    fn test_empty_statement_gets_nop() {
        let program = compile(";").unwrap();
        let first = &program.sections[0].code[0];
        assert_eq!(first.op, Op::Nop);
        assert!(first.statement_start);
    }

    #[test]
    fn test_block_is_unflagged_scope() {
        let program = compile("{ var a = 1; }").unwrap();
        let code = &program.sections[0].code;
        assert_eq!(code[0].op, Op::EnterScope);
        assert!(!code[0].statement_start);
        assert!(code[1].statement_start);
        assert_eq!(code[code.len() - 2].op, Op::LeaveScope);
    }

    #[test]
    fn test_function_gets_own_section() {
        let program = compile("function f(a, b) { return a; }").unwrap();
        assert_eq!(ops(&program, 0), vec![Op::Nop, Op::Halt]);
        let entry = program.function("f").unwrap();
        assert_eq!(entry.params, vec!["a", "b"]);
        assert_eq!(program.sections[entry.section].name, "f");
        assert_eq!(ops(&program, entry.section).last(), Some(&Op::Return));
    }

    #[test]
    fn test_nested_functions_are_qualified() {
        let program = compile(
            "function a() { var r = h(); { function h() { return g; } } function g() {} return r; }
             function h() {}",
        )
        .unwrap();
        assert!(program.function("a.h").is_some());
        assert!(program.function("a.g").is_some());
        assert!(program.function("g").is_none());
        assert_eq!(program.functions.iter().filter(|f| f.name == "h").count(), 1);

        let a = program.function("a").unwrap().section;
        assert!(ops(&program, a).contains(&Op::Fetch {
            name: "a.h".into(),
            access: Access::CallVariable(0),
        }));
        let h = program.function("a.h").unwrap().section;
        assert!(ops(&program, h).contains(&Op::Fetch {
            name: "a.g".into(),
            access: Access::Variable,
        }));
    }

    #[test]
    fn test_fallthrough_body_gets_return() {
        let program = compile("function f() { var x = 1; }").unwrap();
        let section = program.function("f").unwrap().section;
        let code = ops(&program, section);
        assert_eq!(code[code.len() - 1], Op::Return);
        assert_eq!(constant(&program, &code[code.len() - 2]), Value::Undefined);
    }

    #[test]
    fn test_anonymous_functions_are_numbered() {
        let program = compile("var f = function () {}; var g = function () {};").unwrap();
        assert!(program.function("$_anon_0").is_some());
        assert!(program.function("$_anon_1").is_some());
    }

    #[test]
    fn test_class_methods_and_default_constructor() {
        let program = compile("class A { get() { return 1; } }").unwrap();
        let class = program.class("A").unwrap();
        let names: Vec<_> = class.methods.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["get", "constructor"]);
        assert!(program.function("@A.get").is_some());
        assert!(program.function("@A.constructor").is_some());
    }

    #[test]
    fn test_call_pushes_args_reversed() {
        let program = compile("f(1, 2);").unwrap();
        let code = ops(&program, 0);
        assert_eq!(constant(&program, &code[0]), Value::Number(2.0));
        assert_eq!(constant(&program, &code[1]), Value::Number(1.0));
        assert_eq!(
            code[2],
            Op::Fetch {
                name: "f".into(),
                access: Access::CallVariable(2)
            }
        );
        assert_eq!(
            code[3],
            Op::Call {
                argc: 2,
                bound: false
            }
        );
    }

    #[test]
    fn test_method_call_picks_receiver() {
        let program = compile("o.m(1);").unwrap();
        let code = ops(&program, 0);
        assert_eq!(code[2], Op::Pick(1));
        assert_eq!(
            code[3],
            Op::Fetch {
                name: "m".into(),
                access: Access::CallProperty(1)
            }
        );
        assert_eq!(code[4], Op::Call { argc: 1, bound: true });
    }

    #[test]
    fn test_index_lowers_to_indexer_calls() {
        let program = compile("a[0] = a[1];").unwrap();
        let names: Vec<_> = ops(&program, 0)
            .into_iter()
            .filter_map(|op| match op {
                Op::Fetch {
                    name,
                    access: Access::CallProperty(_),
                } => Some(name.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![INDEXER_GET, INDEXER_SET]);
    }

    #[test]
    fn test_new_expression_shape() {
        let program = compile("class P {} new P(1);").unwrap();
        let code = ops(&program, 0);
        let start = code
            .iter()
            .position(|op| matches!(op, Op::CreateObject(_)))
            .unwrap();
        assert_eq!(code[start + 1], Op::Dup);
        assert_eq!(
            code[start + 3],
            Op::Fetch {
                name: "@P.constructor".into(),
                access: Access::Variable
            }
        );
        assert_eq!(code[start + 4], Op::Call { argc: 1, bound: true });
        assert_eq!(code[start + 5], Op::Pop);
    }

    #[test]
    fn test_while_loop_shape() {
        let program = compile("while (x) { break; continue; }").unwrap();
        let code = ops(&program, 0);
        assert_eq!(code[0], Op::LoopStart);
        let (start, end) = match (&code[1], &code[3]) {
            (Op::Label(start), Op::JmpFalse(end)) => (*start, *end),
            other => panic!("unexpected {:?}", other),
        };
        assert!(code.contains(&Op::LoopExit(Some(end))));
        assert!(code.contains(&Op::LoopExit(Some(start))));
        assert!(code.contains(&Op::LoopEnd));
    }

    #[test]
    fn test_nested_loops_bind_innermost() {
        let program = compile("while (a) { while (b) { break; } break; }").unwrap();
        let code = ops(&program, 0);
        let ends: Vec<_> = code
            .iter()
            .filter_map(|op| match op {
                Op::JmpFalse(label) => Some(*label),
                _ => None,
            })
            .collect();
        let exits: Vec<_> = code
            .iter()
            .filter_map(|op| match op {
                Op::LoopExit(Some(label)) => Some(*label),
                _ => None,
            })
            .collect();
        assert_eq!(exits, vec![ends[1], ends[0]]);
    }

    #[test]
    fn test_try_catch_finally_shape() {
        let program = compile("try { f(); } catch (e) { g(); } finally { h(); }").unwrap();
        let code = ops(&program, 0);
        assert!(matches!(code[0], Op::Try(_)));
        assert_eq!(code.iter().filter(|op| matches!(op, Op::Try(_))).count(), 2);
        assert_eq!(code.iter().filter(|op| **op == Op::PopTry).count(), 2);
        assert_eq!(code.iter().filter(|op| **op == Op::Throw).count(), 1);
        // finally body is laid out on both paths
        let h_calls = code
            .iter()
            .filter(|op| matches!(op, Op::Fetch { name, .. } if &**name == "h"))
            .count();
        assert_eq!(h_calls, 2);
    }

    #[test]
    fn test_break_through_finally_inlines_it() {
        let program = compile("while (true) { try { break; } finally { h(); } }").unwrap();
        let code = ops(&program, 0);
        let exit = code
            .iter()
            .position(|op| matches!(op, Op::LoopExit(Some(_))))
            .unwrap();
        let before_exit = &code[..exit];
        assert!(before_exit.contains(&Op::PopTry));
        assert!(
            before_exit
                .iter()
                .any(|op| matches!(op, Op::Fetch { name, .. } if &**name == "h"))
        );
        // inline copy plus the thrown and normal paths
        let h_calls = code
            .iter()
            .filter(|op| matches!(op, Op::Fetch { name, .. } if &**name == "h"))
            .count();
        assert_eq!(h_calls, 3);
    }

    #[test]
    fn test_return_without_finally_is_plain() {
        let program = compile("function f() { try { return 1; } catch (e) {} }").unwrap();
        let code = ops(&program, 1);
        assert!(!code.iter().any(|op| matches!(op, Op::Declare(name) if &**name == RETURN_SLOT)));
    }

    #[test]
    fn test_logical_and_short_circuits() {
        let program = compile("a && b;").unwrap();
        let code = ops(&program, 0);
        assert!(matches!(code[1], Op::JmpFalse(_)));
        assert!(matches!(code[3], Op::Jmp(_)));
        assert_eq!(constant(&program, &code[5]), Value::Bool(false));
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_invalid_assignment_target() {
        let err = compile("1 + 2 = 3;").unwrap_err();
        assert_eq!(err, CompileError::invalid_assignment("1 + 2"));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile("break;").unwrap_err();
        assert!(err.to_string().contains("'break'"));
    }

    #[test]
    fn test_break_inside_function_inside_loop() {
        let err = compile("while (x) { function f() { continue; } }").unwrap_err();
        assert!(err.to_string().contains("'continue'"));
    }

    #[test]
    fn test_return_outside_function() {
        assert_eq!(
            compile("return 1;").unwrap_err(),
            CompileError::return_outside_function()
        );
    }

    #[test]
    fn test_too_many_parameters() {
        let params: Vec<String> = (0..128).map(|i| format!("p{}", i)).collect();
        let source = format!("function f({}) {{}}", params.join(", "));
        let err = compile(&source).unwrap_err();
        assert!(matches!(err, CompileError::LimitExceeded { count: 128, .. }));
    }

    #[test]
    fn test_too_many_arguments() {
        let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
        let source = format!("f({});", args.join(", "));
        let err = compile(&source).unwrap_err();
        assert!(matches!(err, CompileError::LimitExceeded { count: 256, .. }));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    const STATEMENTS: &[&str] = &[
        "var a = 7 * (b + 1);",
        "if (a < 3) { a = a + 1; } else { b = 2; }",
        "while (a) { if (b) { break; } continue; }",
        "function f(x) { return x && g(x, 2); }",
        "try { throw 1; } catch (e) { a = e; } finally { b = [1, 2]; }",
        "class K { m() { return this.v; } } o.v = new K();",
    ];

    #[test]
    fn test_compilation_is_deterministic() {
        for (i, first) in STATEMENTS.iter().enumerate() {
            for second in STATEMENTS.iter().skip(i) {
                let source = format!("{}\n{}\n{}", first, second, first);
                let a = compile(&source).unwrap();
                let b = compile(&source).unwrap();
                assert_eq!(a.sections, b.sections, "source: {}", source);
                assert_eq!(a.functions, b.functions, "source: {}", source);
            }
        }
    }
}
