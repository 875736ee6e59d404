use std::sync::Arc;

use super::ast::{
    BinOp, CmpOp, ExceptHandler, Expr, FStringPart, FunctionDef, Param, Program, Stmt, StmtKind,
    Target, UnaryOp,
};
use super::lexer::{Tok, Token, tokenize};
use super::{ErrorKind, ProgramError, Result};

const KEYWORDS: &[&str] = &[
    "and", "as", "break", "continue", "def", "del", "elif", "else", "except", "finally", "for",
    "from", "global", "if", "import", "in", "is", "lambda", "not", "or", "pass", "raise",
    "return", "try", "while",
];

// Real Python keywords the teaching subset does not implement.
const UNSUPPORTED: &[&str] = &[
    "class", "with", "yield", "assert", "nonlocal", "async", "await",
];

/// Recursion bound for expressions that nest without brackets
/// (`not not ...`, `- - ...`, chained conditionals, lambdas).
pub const MAX_EXPR_DEPTH: usize = 1000;

/// Parse program text into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
    }
    Ok(Program::new(body, source))
}

/// Parse a standalone expression (used for f-string replacement fields).
pub fn parse_expression(source: &str, line: usize) -> Result<Expr> {
    let mut tokens = tokenize(source.trim()).map_err(|err| relocate(err, line))?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.expr_list()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.invalid());
    }
    Ok(expr)
}

fn relocate(mut err: ProgramError, line: usize) -> ProgramError {
    err.line = Some(line);
    err
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    fn_depth: usize,
    loop_depth: usize,
    expr_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            index: 0,
            fn_depth: 0,
            loop_depth: 0,
            expr_depth: 0,
        }
    }

    /// Run `parse` one expression level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.expr_depth >= MAX_EXPR_DEPTH {
            return Err(self.error("expression is too deeply nested"));
        }
        self.expr_depth += 1;
        let result = parse(self);
        self.expr_depth -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.index)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.index + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn previous_line(&self) -> usize {
        self.index
            .checked_sub(1)
            .and_then(|idx| self.tokens.get(idx))
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(found) if *found == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(name) if name == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.invalid()),
        }
    }

    fn error(&self, message: impl Into<String>) -> ProgramError {
        ProgramError::syntax(message, self.line())
    }

    fn invalid(&self) -> ProgramError {
        if let Tok::Name(name) = self.peek() {
            if UNSUPPORTED.contains(&name.as_str()) {
                return self.error(format!("'{}' is not supported", name));
            }
        }
        if self.at(&Tok::Indent) {
            return ProgramError::new(ErrorKind::IndentationError, "unexpected indent")
                .at_line(self.line());
        }
        self.error("invalid syntax")
    }

    // ---- statements -------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(name) => match name.as_str() {
                "if" => Some(self.if_statement()?),
                "while" => Some(self.while_statement()?),
                "for" => Some(self.for_statement()?),
                "def" => Some(self.function_def()?),
                "try" => Some(self.try_statement()?),
                _ => None,
            },
            Tok::Indent => return Err(self.invalid()),
            _ => None,
        };
        match kind {
            Some(kind) => Ok(vec![Stmt { kind, line }]),
            None => self.simple_line(),
        }
    }

    /// One physical line of `;`-separated simple statements.
    fn simple_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            stmts.push(Stmt { kind, line });
            if !self.eat_op(";") {
                break;
            }
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return Err(self.invalid());
        }
        Ok(stmts)
    }

    fn small_statement(&mut self) -> Result<StmtKind> {
        if let Tok::Name(name) = self.peek().clone() {
            match name.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(StmtKind::Pass);
                }
                "break" => {
                    if self.loop_depth == 0 {
                        return Err(self.error("'break' outside loop"));
                    }
                    self.advance();
                    return Ok(StmtKind::Break);
                }
                "continue" => {
                    if self.loop_depth == 0 {
                        return Err(self.error("'continue' not properly in loop"));
                    }
                    self.advance();
                    return Ok(StmtKind::Continue);
                }
                "return" => {
                    if self.fn_depth == 0 {
                        return Err(self.error("'return' outside function"));
                    }
                    self.advance();
                    if self.at_line_end() {
                        return Ok(StmtKind::Return(None));
                    }
                    return Ok(StmtKind::Return(Some(self.expr_list()?)));
                }
                "raise" => {
                    self.advance();
                    if self.at_line_end() {
                        return Ok(StmtKind::Raise(None));
                    }
                    return Ok(StmtKind::Raise(Some(self.expr()?)));
                }
                "del" => {
                    self.advance();
                    let line = self.line();
                    let targets = match self.expr_list()? {
                        Expr::Tuple(items) => items,
                        single => vec![single],
                    };
                    let targets = targets
                        .into_iter()
                        .map(|item| match item {
                            Expr::Name(_) | Expr::Subscript { .. } => to_target(item, line),
                            _ => Err(ProgramError::syntax("cannot delete expression", line)),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(StmtKind::Delete(targets));
                }
                "global" => {
                    self.advance();
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    return Ok(StmtKind::Global(names));
                }
                "import" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    // `import a as b, c`: only the first module is reported.
                    while !self.at_line_end() {
                        self.advance();
                    }
                    return Ok(StmtKind::Import(module));
                }
                "from" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    self.expect_kw("import")?;
                    while !self.at_line_end() {
                        self.advance();
                    }
                    return Ok(StmtKind::Import(module));
                }
                _ => {}
            }
        }

        let first = self.expr_list()?;
        if self.at_op("=") {
            let mut targets = vec![to_target(first, self.line())?];
            loop {
                self.expect_op("=")?;
                let value = self.expr_list()?;
                if self.at_op("=") {
                    targets.push(to_target(value, self.line())?);
                } else {
                    return Ok(StmtKind::Assign { targets, value });
                }
            }
        }

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            let line = self.line();
            self.advance();
            let target = match to_target(first, line)? {
                Target::Tuple(_) => {
                    return Err(ProgramError::syntax(
                        "illegal expression for augmented assignment",
                        line,
                    ));
                }
                target => target,
            };
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op(";"))
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    /// `:` followed by either an indented block or a same-line suite.
    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.at(&Tok::Newline) {
            return self.simple_line();
        }
        self.advance();
        if !self.eat(&Tok::Indent) {
            return Err(
                ProgramError::new(ErrorKind::IndentationError, "expected an indented block")
                    .at_line(self.line()),
            );
        }
        let mut body = Vec::new();
        while !self.at(&Tok::Dedent) && !self.at(&Tok::Eof) {
            body.extend(self.statement()?);
        }
        self.eat(&Tok::Dedent);
        Ok(body)
    }

    fn loop_block(&mut self) -> Result<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn if_statement(&mut self) -> Result<StmtKind> {
        self.expect_kw("if")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_kw("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn while_statement(&mut self) -> Result<StmtKind> {
        self.expect_kw("while")?;
        let cond = self.expr()?;
        let body = self.loop_block()?;
        Ok(StmtKind::While { cond, body })
    }

    fn for_statement(&mut self) -> Result<StmtKind> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.expr_list()?;
        let body = self.loop_block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn function_def(&mut self) -> Result<StmtKind> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expr()?;
        }

        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.fn_depth += 1;
        let body = self.block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;

        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    /// Comma-separated parameters with optional defaults, up to `close`.
    fn params(&mut self, close: &str) -> Result<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(close) {
            let param = self.expect_name()?;
            if params.iter().any(|p| p.name == param) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    param
                )));
            }
            let default = if self.eat_op("=") {
                Some(self.expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_statement(&mut self) -> Result<StmtKind> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let mut classes = Vec::new();
            let mut binding = None;
            if !self.at_op(":") {
                if self.eat_op("(") {
                    while !self.at_op(")") {
                        classes.push(self.expect_name()?);
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    classes.push(self.expect_name()?);
                }
                if self.eat_kw("as") {
                    binding = Some(self.expect_name()?);
                }
            }
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                classes,
                binding,
                body: handler_body,
            });
        }
        let finally = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }

    /// Loop/comprehension targets: postfix expressions separated by commas.
    fn target_list(&mut self) -> Result<Target> {
        let line = self.line();
        let first = self.postfix()?;
        if !self.at_op(",") {
            return to_target(first, line);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_kw("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        to_target(Expr::Tuple(items), line)
    }

    // ---- expressions ------------------------------------------------------

    /// Expression, or a bare tuple when commas follow.
    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.ends_expr_list() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn ends_expr_list(&self) -> bool {
        match self.peek() {
            Tok::Newline | Tok::Eof => true,
            Tok::Op(op) => matches!(
                *op,
                "=" | ")" | "]" | "}" | ";" | ":" | "+=" | "-=" | "*=" | "/=" | "//=" | "%="
                    | "**="
            ),
            _ => false,
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr> {
        if self.at_kw("lambda") {
            return self.lambda();
        }
        let value = self.or_test()?;
        if self.at_kw("if") {
            self.advance();
            let cond = self.or_test()?;
            self.expect_kw("else")?;
            let otherwise = self.expr()?;
            return Ok(Expr::IfExp {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn lambda(&mut self) -> Result<Expr> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let params = self.params(":")?;
        self.expect_op(":")?;
        let body = self.expr()?;
        Ok(Expr::Lambda(Arc::new(FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(body)),
                line,
            }],
        })))
    }

    fn or_test(&mut self) -> Result<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                and: false,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                and: true,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_kw("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().clone() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(name) if name == "in" => CmpOp::In,
                Tok::Name(name) if name == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(next) if next == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(name)
                    if name == "not" && matches!(self.peek_at(1), Tok::Name(next) if next == "in") =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.nested(Self::factor)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(name) => name,
                    _ => return Err(self.invalid()),
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    name,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, func: Expr) -> Result<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            let is_keyword = matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_at(1), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expr()?;
                if self.at_kw("for") {
                    args.push(self.comprehension(arg)?);
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> Result<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            Some(self.expr()?)
        };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.invalid());
        }
        let upper = if self.at_op("]") || self.at_op(":") {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    /// `element for target in iter [if cond]...` (the element is already parsed).
    fn comprehension(&mut self, element: Expr) -> Result<Expr> {
        let (target, iter, cond) = self.comp_clause()?;
        Ok(Expr::ListComp {
            element: Box::new(element),
            target,
            iter: Box::new(iter),
            cond: cond.map(Box::new),
        })
    }

    /// `for target in iter [if cond]...` shared by list and dict comprehensions.
    fn comp_clause(&mut self) -> Result<(Target, Expr, Option<Expr>)> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.or_test()?;
        let mut cond: Option<Expr> = None;
        while self.eat_kw("if") {
            let next = self.or_test()?;
            cond = Some(match cond {
                Some(prev) => Expr::BoolOp {
                    and: true,
                    left: Box::new(prev),
                    right: Box::new(next),
                },
                None => next,
            });
        }
        if self.at_kw("for") {
            return Err(self.error("nested comprehensions are not supported"));
        }
        Ok((target, iter, cond))
    }

    fn atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(value) => {
                self.advance();
                Ok(Expr::Int(value))
            }
            Tok::Float(value) => {
                self.advance();
                Ok(Expr::Float(value))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(line),
            Tok::Name(name) => match name.as_str() {
                "True" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "None" => {
                    self.advance();
                    Ok(Expr::None)
                }
                _ if KEYWORDS.contains(&name.as_str()) || UNSUPPORTED.contains(&name.as_str()) => {
                    Err(self.invalid())
                }
                _ => {
                    self.advance();
                    Ok(Expr::Name(name))
                }
            },
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_kw("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op(")")?;
                    return Ok(comp);
                }
                if !self.at_op(",") {
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.advance();
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_kw("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op("]")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.advance();
                let mut entries = Vec::new();
                while !self.at_op("}") {
                    let key = self.expr()?;
                    if !self.eat_op(":") {
                        return Err(self.error("set literals are not supported"));
                    }
                    let value = self.expr()?;
                    if entries.is_empty() && self.at_kw("for") {
                        let (target, iter, cond) = self.comp_clause()?;
                        self.expect_op("}")?;
                        return Ok(Expr::DictComp {
                            key: Box::new(key),
                            value: Box::new(value),
                            target,
                            iter: Box::new(iter),
                            cond: cond.map(Box::new),
                        });
                    }
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
            Tok::Eof | Tok::Newline => Err(ProgramError::syntax(
                "unexpected end of input",
                self.previous_line(),
            )),
            _ => Err(self.invalid()),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole an f-string.
    fn strings(&mut self, line: usize) -> Result<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                Tok::FStr(body) => {
                    self.advance();
                    formatted = true;
                    for part in parse_fstring(&body, line)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            other => parts.push(other),
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text = match parts.pop() {
            Some(FStringPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(Expr::Str(text))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn to_target(expr: Expr, line: usize) -> Result<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Subscript { value, index } => Ok(Target::Subscript { value, index }),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|item| to_target(item, line))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Call { .. } => Err(ProgramError::syntax("cannot assign to function call", line)),
        Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => {
            Err(ProgramError::syntax("cannot assign to literal", line))
        }
        _ => Err(ProgramError::syntax("cannot assign to expression", line)),
    }
}

/// Split an f-string body into literal text and replacement fields.
fn parse_fstring(body: &str, line: usize) -> Result<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' {
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }

            let start = i + 1;
            let mut j = start;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let mut spec_at: Option<usize> = None;
            let mut conversion_at: Option<usize> = None;
            loop {
                let Some(&c) = chars.get(j) else {
                    return Err(ProgramError::syntax("f-string: expecting '}'", line));
                };
                if let Some(q) = quote {
                    if c == q {
                        quote = None;
                    }
                } else if spec_at.is_none() {
                    match c {
                        '\'' | '"' => quote = Some(c),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        '}' if depth == 0 => break,
                        '}' => depth -= 1,
                        ':' if depth == 0 => spec_at = Some(j),
                        '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => {
                            conversion_at = Some(j)
                        }
                        _ => {}
                    }
                } else if c == '}' {
                    break;
                }
                j += 1;
            }

            let expr_end = conversion_at.or(spec_at).unwrap_or(j);
            let source: String = chars[start..expr_end].iter().collect();
            if source.trim().is_empty() {
                return Err(ProgramError::syntax(
                    "f-string: empty expression not allowed",
                    line,
                ));
            }
            let repr = conversion_at.is_some_and(|k| chars.get(k + 1) == Some(&'r'));
            let spec = spec_at.map(|k| chars[k + 1..j].iter().collect::<String>());

            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(FStringPart::Expr {
                expr: parse_expression(&source, line)?,
                spec,
                repr,
            });
            i = j + 1;
        } else if ch == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(ProgramError::syntax(
                "f-string: single '}' is not allowed",
                line,
            ));
        } else {
            literal.push(ch);
            i += 1;
        }
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).expect("parse")
    }

    #[test]
    fn parses_simple_program() {
        let program = parse("print('Hello, Python!')\n");
        assert_eq!(program.body.len(), 1);
        assert!(matches!(program.body[0].kind, StmtKind::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_blocks_and_lines() {
        let src = "x = 1\nif x > 0:\n    print('pos')\nelif x < 0:\n    print('neg')\nelse:\n    pass\n";
        let program = parse(src);
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[1].line, 2);
        match &program.body[1].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
                assert_eq!(branches[1].1[0].line, 5);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn parses_tuple_unpacking_in_for() {
        let program = parse("for k, v in d.items():\n    print(k)\n");
        match &program.body[0].kind {
            StmtKind::For { target, .. } => {
                assert_eq!(
                    *target,
                    Target::Tuple(vec![Target::Name("k".into()), Target::Name("v".into())])
                );
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn parses_fstring_fields() {
        let program = parse("print(f\"{name}'s avg: {avg:.1f} {{x}}\")\n");
        let StmtKind::Expr(Expr::Call { args, .. }) = &program.body[0].kind else {
            panic!("expected call");
        };
        let Expr::FString(parts) = &args[0] else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(
            parts[3],
            FStringPart::Literal(" {x}".into())
        );
        assert!(matches!(
            &parts[2],
            FStringPart::Expr { spec: Some(spec), .. } if spec == ".1f"
        ));
    }

    #[test]
    fn parses_generator_argument_as_comprehension() {
        let program = parse("total = sum(x * 2 for x in nums if x > 1)\n");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Call { args, .. } = value else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::ListComp { cond: Some(_), .. }));
    }

    #[test]
    fn rejects_return_outside_function() {
        let err = parse_program("return 5\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert!(err.message.contains("outside function"));
    }

    #[test]
    fn rejects_break_in_function_nested_in_loop() {
        let err = parse_program("while True:\n    def f():\n        break\n").unwrap_err();
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn reports_missing_block() {
        let err = parse_program("if True:\nprint(1)\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndentationError);
    }

    #[test]
    fn parses_lambda_as_returning_function() {
        let program = parse("square = lambda x, n=2: x ** n\n");
        let StmtKind::Assign { value: Expr::Lambda(def), .. } = &program.body[0].kind else {
            panic!("expected lambda assignment");
        };
        assert_eq!(def.name, "<lambda>");
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(Expr::Binary { .. }))));
    }

    #[test]
    fn parses_dict_comprehension_and_slice_step() {
        let program = parse("d = {w: len(w) for w in words if w}\nr = s[::-1]\n");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Assign { value: Expr::DictComp { cond: Some(_), .. }, .. }
        ));
        let StmtKind::Assign { value: Expr::Subscript { index, .. }, .. } = &program.body[1].kind else {
            panic!("expected subscript");
        };
        assert!(matches!(
            index.as_ref(),
            Expr::Slice { lower: None, upper: None, step: Some(_) }
        ));
    }

    #[test]
    fn parses_del_targets() {
        let program = parse("del a, b[0]\n");
        let StmtKind::Delete(targets) = &program.body[0].kind else {
            panic!("expected del");
        };
        assert_eq!(targets.len(), 2);
        assert!(parse_program("del f()\n").is_err());
    }

    #[test]
    fn unbracketed_nesting_is_bounded() {
        let source = format!("x = {}1\n", "not ".repeat(MAX_EXPR_DEPTH + 1));
        let err = crate::interpreter::eval_thread()
            .spawn(move || parse_program(&source))
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.message, "expression is too deeply nested");
    }

    #[test]
    fn reports_unsupported_keywords() {
        let err = parse_program("class Dog:\n    pass\n").unwrap_err();
        assert_eq!(err.to_string(), "SyntaxError: 'class' is not supported on line 1");
    }

    #[test]
    fn reports_invalid_syntax_with_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.line, Some(2));
    }
}
