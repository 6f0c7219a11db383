use crate::frontend::parser_error::ParserError;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::ast::{
    BinaryOp, CatchClause, ClassDecl, Expr, ExprKind, FunctionDecl, LogicalOp, Stmt, StmtKind,
    TokenRange, UnaryOp,
};

/// Recursive-descent parser.
///
/// The parser consumes the lexer's token list (which must end in `Eof`) and
/// produces the statement list of a program. Every node records the inclusive
/// token-index range it covers; statements include their trailing `;`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    /// Returns the current token without consuming it.
    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.current().map(|t| &t.kind)
    }

    fn peek_next(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(TokenKind::Eof))
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the current token if it has the given kind.
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<(), ParserError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}' {}", kind, context)))
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, ParserError> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(&format!("expected identifier {}", context))),
        }
    }

    /// Index of the most recently consumed token.
    fn last(&self) -> usize {
        self.pos.saturating_sub(1)
    }

    fn range_from(&self, start: usize) -> TokenRange {
        TokenRange::new(start, self.last().max(start))
    }

    /// Constructs a `ParserError` at the current token (or the last one when
    /// the parser has run off the end).
    fn error(&self, message: &str) -> ParserError {
        let token = self.current().or_else(|| self.tokens.last());
        match token {
            Some(token) => {
                let found = if token.is_eof() {
                    "end of input".to_string()
                } else {
                    format!("'{}'", token.lexeme)
                };
                ParserError {
                    message: format!("{}, found {}", message, found),
                    line: token.line,
                    col: token.col,
                }
            }
            None => ParserError {
                message: message.to_string(),
                line: 1,
                col: 1,
            },
        }
    }

    /// Parses a complete program.
    pub fn parse(&mut self) -> Result<Vec<Stmt>, ParserError> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        let start = self.pos;

        let kind = match self.peek() {
            Some(TokenKind::Var | TokenKind::Let | TokenKind::Const) => {
                return self.parse_var_declaration();
            }
            Some(TokenKind::Function) if matches!(self.peek_next(), Some(TokenKind::Ident(_))) => {
                self.advance();
                let decl = self.parse_function_rest(start, true)?;
                StmtKind::Function(decl)
            }
            Some(TokenKind::Class) => self.parse_class()?,
            Some(TokenKind::If) => self.parse_if()?,
            Some(TokenKind::While) => {
                self.advance();
                self.expect(&TokenKind::LParen, "after 'while'")?;
                let condition = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "after while condition")?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { condition, body }
            }
            Some(TokenKind::For) => self.parse_for()?,
            Some(TokenKind::Break) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "after 'break'")?;
                StmtKind::Break
            }
            Some(TokenKind::Continue) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "after 'continue'")?;
                StmtKind::Continue
            }
            Some(TokenKind::Return) => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::Semicolon, "after return value")?;
                StmtKind::Return(value)
            }
            Some(TokenKind::Throw) => {
                self.advance();
                let value = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon, "after thrown value")?;
                StmtKind::Throw(value)
            }
            Some(TokenKind::Try) => self.parse_try()?,
            Some(TokenKind::Debugger) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "after 'debugger'")?;
                StmtKind::Debugger
            }
            Some(TokenKind::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(TokenKind::Semicolon) => {
                self.advance();
                StmtKind::Empty
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon, "after expression")?;
                StmtKind::Expression(expr)
            }
        };

        Ok(Stmt::new(kind, self.range_from(start)))
    }

    fn parse_var_declaration(&mut self) -> Result<Stmt, ParserError> {
        let start = self.pos;
        self.advance(); // consume 'var' / 'let' / 'const'

        let name = self.expect_ident("after 'var'")?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "after variable declaration")?;

        Ok(Stmt::new(StmtKind::Var { name, init }, self.range_from(start)))
    }

    /// Parses `{ stmt* }` and returns the inner statements.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        self.expect(&TokenKind::LBrace, "to open block")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.error("expected '}' to close block"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance(); // consume '}'
        Ok(statements)
    }

    /// Parses everything after the `function` keyword (or, for class methods,
    /// starting at the method name).
    fn parse_function_rest(
        &mut self,
        start: usize,
        name_required: bool,
    ) -> Result<FunctionDecl, ParserError> {
        let name = match self.peek() {
            Some(TokenKind::Ident(_)) => Some(self.expect_ident("for function name")?),
            _ if name_required => return Err(self.error("expected function name")),
            _ => None,
        };

        self.expect(&TokenKind::LParen, "after function name")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident("for parameter name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "after parameters")?;

        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            range: self.range_from(start),
        })
    }

    fn parse_class(&mut self) -> Result<StmtKind, ParserError> {
        self.advance(); // consume 'class'
        let name = self.expect_ident("after 'class'")?;
        self.expect(&TokenKind::LBrace, "before class body")?;

        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.error("expected '}' to close class body"));
            }
            let start = self.pos;
            methods.push(self.parse_function_rest(start, true)?);
        }
        self.advance(); // consume '}'

        Ok(StmtKind::Class(ClassDecl { name, methods }))
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParserError> {
        self.advance(); // consume 'if'
        self.expect(&TokenKind::LParen, "after 'if'")?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "after if condition")?;

        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParserError> {
        self.advance(); // consume 'for'
        self.expect(&TokenKind::LParen, "after 'for'")?;

        let init = match self.peek() {
            Some(TokenKind::Semicolon) => {
                self.advance();
                None
            }
            Some(TokenKind::Var | TokenKind::Let | TokenKind::Const) => {
                Some(Box::new(self.parse_var_declaration()?))
            }
            _ => {
                let start = self.pos;
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon, "after for initializer")?;
                Some(Box::new(Stmt::new(
                    StmtKind::Expression(expr),
                    self.range_from(start),
                )))
            }
        };

        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon, "after for condition")?;

        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RParen, "after for clauses")?;

        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParserError> {
        self.advance(); // consume 'try'
        let body = self.parse_block()?;

        let catch = if self.check(&TokenKind::Catch) {
            let start = self.pos;
            self.advance();
            let binding = if self.eat(&TokenKind::LParen) {
                let name = self.expect_ident("for catch binding")?;
                self.expect(&TokenKind::RParen, "after catch binding")?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause {
                binding,
                body,
                range: self.range_from(start),
            })
        } else {
            None
        };

        let finally = if self.eat(&TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if catch.is_none() && finally.is_none() {
            return Err(self.error("expected 'catch' or 'finally' after try block"));
        }

        Ok(StmtKind::Try {
            body,
            catch,
            finally,
        })
    }

    // =========================================================================
    // Expressions (lowest to highest precedence)
    // =========================================================================

    pub fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParserError> {
        let target = self.parse_or()?;

        if self.eat(&TokenKind::Assign) {
            let value = self.parse_assignment()?;
            let range = target.range.join(value.range);
            return Ok(Expr::new(
                ExprKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                range,
            ));
        }

        Ok(target)
    }

    fn parse_or(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::LtEq) => BinaryOp::LtEq,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::GtEq) => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_factor()?;
            left = binary(op, left, right);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        let start = self.pos;
        let op = match self.peek() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            _ => return self.parse_call(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            self.range_from(start),
        ))
    }

    fn parse_call(&mut self) -> Result<Expr, ParserError> {
        let start = self.pos;
        let mut expr = self.parse_primary()?;

        loop {
            if self.eat(&TokenKind::LParen) {
                let args = self.parse_arguments()?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    self.range_from(start),
                );
            } else if self.eat(&TokenKind::Dot) {
                let property = self.expect_ident("after '.'")?;
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        property,
                    },
                    self.range_from(start),
                );
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.expect(&TokenKind::RBracket, "after index")?;
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    self.range_from(start),
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses call arguments after the opening `(`, consuming the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let start = self.pos;
        let kind = match self.peek() {
            Some(TokenKind::Number(n)) => {
                let n = *n;
                self.advance();
                ExprKind::Number(n)
            }
            Some(TokenKind::String(s)) => {
                let s = s.clone();
                self.advance();
                ExprKind::String(s)
            }
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.advance();
                ExprKind::Variable(name)
            }
            Some(TokenKind::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            Some(TokenKind::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            Some(TokenKind::Null) => {
                self.advance();
                ExprKind::Null
            }
            Some(TokenKind::Undefined) => {
                self.advance();
                ExprKind::Undefined
            }
            Some(TokenKind::This) => {
                self.advance();
                ExprKind::This
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "after expression")?;
                // Keep the parentheses in the range so source slices read naturally.
                return Ok(Expr::new(inner.kind, self.range_from(start)));
            }
            Some(TokenKind::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "after array elements")?;
                ExprKind::Array(elements)
            }
            Some(TokenKind::Function) => {
                self.advance();
                ExprKind::Function(self.parse_function_rest(start, false)?)
            }
            Some(TokenKind::New) => {
                self.advance();
                let class = self.expect_ident("after 'new'")?;
                self.expect(&TokenKind::LParen, "after class name")?;
                let args = self.parse_arguments()?;
                ExprKind::New { class, args }
            }
            _ => return Err(self.error("expected expression")),
        };

        Ok(Expr::new(kind, self.range_from(start)))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let range = left.range.join(right.range);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        range,
    )
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let range = left.range.join(right.range);
    Expr::new(
        ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        range,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;

    fn parse(source: &str) -> Vec<Stmt> {
        let tokens = tokenize(source).expect("lexing should succeed");
        Parser::new(tokens).parse().expect("parsing should succeed")
    }

    fn parse_err(source: &str) -> ParserError {
        let tokens = tokenize(source).expect("lexing should succeed");
        Parser::new(tokens)
            .parse()
            .expect_err("parsing should fail")
    }

    fn expr_of(stmt: &Stmt) -> &Expr {
        match &stmt.kind {
            StmtKind::Expression(e) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let program = parse("1 + 2 * 3;");
        match &expr_of(&program[0]).kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let program = parse("a = b = 3;");
        match &expr_of(&program[0]).kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_statement_range_includes_semicolon() {
        let program = parse("var a = 1; a = 2;");
        assert_eq!(program[0].range, TokenRange::new(0, 4));
        assert_eq!(program[1].range, TokenRange::new(5, 8));
    }

    #[test]
    fn test_call_member_and_index_chain() {
        let program = parse("a.b(1)[2];");
        match &expr_of(&program[0]).kind {
            ExprKind::Index { object, .. } => match &object.kind {
                ExprKind::Call { callee, args } => {
                    assert_eq!(args.len(), 1);
                    assert!(matches!(callee.kind, ExprKind::Member { .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_declaration() {
        let program = parse("function add(a, b) { return a + b; }");
        match &program[0].kind {
            StmtKind::Function(decl) => {
                assert_eq!(decl.name.as_deref(), Some("add"));
                assert_eq!(decl.params, vec!["a", "b"]);
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_anonymous_function_expression() {
        let program = parse("var f = function (x) { return x; };");
        match &program[0].kind {
            StmtKind::Var {
                init: Some(init), ..
            } => match &init.kind {
                ExprKind::Function(decl) => assert!(decl.name.is_none()),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_class_declaration() {
        let program = parse("class C { constructor(v) { this.v = v; } get() { return this.v; } }");
        match &program[0].kind {
            StmtKind::Class(class) => {
                assert_eq!(class.name, "C");
                let names: Vec<_> = class
                    .methods
                    .iter()
                    .map(|m| m.name.clone().unwrap_or_default())
                    .collect();
                assert_eq!(names, vec!["constructor", "get"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let program = parse("try { f(); } catch (e) { g(e); } finally { h(); }");
        match &program[0].kind {
            StmtKind::Try {
                body,
                catch: Some(catch),
                finally: Some(finally),
            } => {
                assert_eq!(body.len(), 1);
                assert_eq!(catch.binding.as_deref(), Some("e"));
                assert_eq!(finally.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_loop() {
        let program = parse("for (var i = 0; i < 3; i = i + 1) { x = i; }");
        match &program[0].kind {
            StmtKind::For {
                init: Some(init),
                condition: Some(_),
                update: Some(_),
                ..
            } => assert!(matches!(init.kind, StmtKind::Var { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_expression() {
        let program = parse("new Point(1, 2);");
        assert!(matches!(
            &expr_of(&program[0]).kind,
            ExprKind::New { class, args } if class == "Point" && args.len() == 2
        ));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_err("var a = 1");
        assert!(err.message.contains("expected ';'"));
        assert!(err.message.contains("end of input"));
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_err("var = 3;");
        assert_eq!((err.line, err.col), (1, 5));
        assert!(err.message.contains("expected identifier"));
    }

    #[test]
    fn test_try_without_handler() {
        let err = parse_err("try { }");
        assert!(err.message.contains("'catch' or 'finally'"));
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_err("{ var a = 1;");
        assert!(err.message.contains("expected '}'"));
    }
}
