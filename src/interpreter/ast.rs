use std::sync::Arc;

/// Parsed program: the top-level statement list plus the original text.
#[derive(Debug, Clone)]
pub struct Program {
    /// Top-level statements in source order.
    pub body: Vec<Stmt>,
    /// Original source text, retained for error reporting and debugging.
    pub source: String,
}

impl Program {
    /// Construct a program from its statements and source text.
    pub fn new(body: Vec<Stmt>, source: impl Into<String>) -> Self {
        Self {
            body,
            source: source.into(),
        }
    }
}

/// A statement annotated with the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement payload.
    pub kind: StmtKind,
    /// 1-based line number.
    pub line: usize,
}

/// Statement forms.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Bare expression (usually a call).
    Expr(Expr),
    /// `target = value` (chained targets are assigned left to right).
    Assign {
        /// Assignment targets.
        targets: Vec<Target>,
        /// Right-hand side.
        value: Expr,
    },
    /// `target op= value`.
    AugAssign {
        /// Assignment target.
        target: Target,
        /// Arithmetic operator.
        op: BinOp,
        /// Right-hand side.
        value: Expr,
    },
    /// `if` / `elif` chain with optional `else`.
    If {
        /// Condition/body pairs in order.
        branches: Vec<(Expr, Vec<Stmt>)>,
        /// `else` body (may be empty).
        orelse: Vec<Stmt>,
    },
    /// `while cond:`.
    While {
        /// Loop condition.
        cond: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `for target in iter:`.
    For {
        /// Loop variable(s).
        target: Target,
        /// Iterable expression.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `def name(params):`.
    FunctionDef(Arc<FunctionDef>),
    /// `return [value]`.
    Return(Option<Expr>),
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `pass`.
    Pass,
    /// `global a, b`.
    Global(Vec<String>),
    /// `del a, b[i]`.
    Delete(Vec<Target>),
    /// `import x` / `from x import y`.
    Import(String),
    /// `raise [exc]`.
    Raise(Option<Expr>),
    /// `try:` with handlers and optional `finally`.
    Try {
        /// Protected body.
        body: Vec<Stmt>,
        /// `except` clauses in order.
        handlers: Vec<ExceptHandler>,
        /// `finally` body (may be empty).
        finally: Vec<Stmt>,
    },
}

/// A user-defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Positional parameters.
    pub params: Vec<Param>,
    /// Function body.
    pub body: Vec<Stmt>,
}

/// Function parameter with optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Default value expression, evaluated at definition time.
    pub default: Option<Expr>,
}

/// One `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Class names matched by the clause; empty means bare `except:`.
    pub classes: Vec<String>,
    /// Name bound with `as`.
    pub binding: Option<String>,
    /// Handler body.
    pub body: Vec<Stmt>,
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Plain variable.
    Name(String),
    /// `value[index]`.
    Subscript {
        /// Container expression.
        value: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Tuple unpacking: `a, b = ...`.
    Tuple(Vec<Target>),
}

/// Expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal (adjacent literals already concatenated).
    Str(String),
    /// `True` / `False`.
    Bool(bool),
    /// `None`.
    None,
    /// f-string.
    FString(Vec<FStringPart>),
    /// Identifier.
    Name(String),
    /// `[a, b]`.
    List(Vec<Expr>),
    /// `(a, b)` or bare `a, b`.
    Tuple(Vec<Expr>),
    /// `{k: v}`.
    Dict(Vec<(Expr, Expr)>),
    /// `[element for target in iter if cond]`.
    ListComp {
        /// Produced element.
        element: Box<Expr>,
        /// Loop variable(s).
        target: Target,
        /// Iterable.
        iter: Box<Expr>,
        /// Optional filter.
        cond: Option<Box<Expr>>,
    },
    /// `{key: value for target in iter if cond}`.
    DictComp {
        /// Produced key.
        key: Box<Expr>,
        /// Produced value.
        value: Box<Expr>,
        /// Loop variable(s).
        target: Target,
        /// Iterable.
        iter: Box<Expr>,
        /// Optional filter.
        cond: Option<Box<Expr>>,
    },
    /// `lambda params: body`, desugared to a function returning `body`.
    Lambda(Arc<FunctionDef>),
    /// Prefix operator.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Arithmetic operator.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Possibly chained comparison: `a < b <= c`.
    Compare {
        /// First operand.
        left: Box<Expr>,
        /// Remaining operators and operands.
        rest: Vec<(CmpOp, Expr)>,
    },
    /// `and` / `or`.
    BoolOp {
        /// `true` for `and`, `false` for `or`.
        and: bool,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `then if cond else otherwise`.
    IfExp {
        /// Condition.
        cond: Box<Expr>,
        /// Value when true.
        then: Box<Expr>,
        /// Value when false.
        otherwise: Box<Expr>,
    },
    /// Function or method call.
    Call {
        /// Callee.
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments.
        kwargs: Vec<(String, Expr)>,
    },
    /// `value.name`.
    Attribute {
        /// Receiver.
        value: Box<Expr>,
        /// Attribute name.
        name: String,
    },
    /// `value[index]`.
    Subscript {
        /// Container.
        value: Box<Expr>,
        /// Index.
        index: Box<Expr>,
    },
    /// `lower:upper:step` inside a subscript.
    Slice {
        /// Start bound.
        lower: Option<Box<Expr>>,
        /// End bound.
        upper: Option<Box<Expr>>,
        /// Stride.
        step: Option<Box<Expr>>,
    },
}

/// Piece of an f-string.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    /// Literal text.
    Literal(String),
    /// `{expr}` or `{expr:spec}`.
    Expr {
        /// Interpolated expression.
        expr: Expr,
        /// Optional format spec.
        spec: Option<String>,
        /// `!r` conversion requested.
        repr: bool,
    },
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`.
    Neg,
    /// `+x`.
    Pos,
    /// `not x`.
    Not,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`.
    Add,
    /// `-`.
    Sub,
    /// `*`.
    Mul,
    /// `/`.
    Div,
    /// `//`.
    FloorDiv,
    /// `%`.
    Mod,
    /// `**`.
    Pow,
}

impl BinOp {
    /// Operator spelling used in error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`.
    Eq,
    /// `!=`.
    NotEq,
    /// `<`.
    Lt,
    /// `<=`.
    LtE,
    /// `>`.
    Gt,
    /// `>=`.
    GtE,
    /// `in`.
    In,
    /// `not in`.
    NotIn,
    /// `is`.
    Is,
    /// `is not`.
    IsNot,
}

impl CmpOp {
    /// Operator spelling used in error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}
