//! Embedded interpreter for the teaching subset of Python.
//!
//! Learner programs are lexed (with indentation tracking), parsed into an
//! AST and executed by a tree-walking evaluator. The interpreter never
//! touches the process stdout: everything a program prints goes through a
//! host-supplied [`PrintWriter`], which is how the execution pipeline
//! captures output per run.

/// Abstract syntax tree definitions.
pub mod ast;
/// Builtin functions, exception constructors and methods.
pub mod builtins;
/// Tree-walking evaluator.
pub mod eval;
/// Indentation-aware tokenizer.
pub mod lexer;
/// Recursive-descent parser producing [`ast::Program`].
pub mod parser;
/// Runtime values.
pub mod value;

pub use ast::{Expr, Program, Stmt, StmtKind};
pub use eval::{Evaluator, EvaluatorLimits};
pub use parser::parse_program;
pub use value::Value;

use std::fmt;

/// Convenience result alias for interpreter operations.
pub type Result<T> = std::result::Result<T, ProgramError>;

/// Sink for everything a program prints.
pub trait PrintWriter {
    /// Append a chunk of program output.
    fn write_str(&mut self, text: &str);
}

impl PrintWriter for String {
    fn write_str(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// Exception classes known to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Base class for every catchable error.
    Exception,
    /// Invalid program text.
    SyntaxError,
    /// Inconsistent indentation.
    IndentationError,
    /// Unknown identifier.
    NameError,
    /// Operation applied to a value of the wrong type.
    TypeError,
    /// Right type, wrong value.
    ValueError,
    /// Division or modulo by zero.
    ZeroDivisionError,
    /// Sequence index out of range.
    IndexError,
    /// Missing mapping key.
    KeyError,
    /// Missing attribute or method.
    AttributeError,
    /// Call depth exceeded.
    RecursionError,
    /// Generic runtime failure.
    RuntimeError,
    /// `import` of a module that is not bundled.
    ModuleNotFoundError,
    /// Integer arithmetic overflowed.
    OverflowError,
    /// `input()` with no stdin attached.
    EOFError,
    /// Step budget exhausted. Cannot be caught by `except`.
    TimeoutError,
}

impl ErrorKind {
    /// Every exception class that programs can name.
    pub const ALL: [ErrorKind; 16] = [
        ErrorKind::Exception,
        ErrorKind::SyntaxError,
        ErrorKind::IndentationError,
        ErrorKind::NameError,
        ErrorKind::TypeError,
        ErrorKind::ValueError,
        ErrorKind::ZeroDivisionError,
        ErrorKind::IndexError,
        ErrorKind::KeyError,
        ErrorKind::AttributeError,
        ErrorKind::RecursionError,
        ErrorKind::RuntimeError,
        ErrorKind::ModuleNotFoundError,
        ErrorKind::OverflowError,
        ErrorKind::EOFError,
        ErrorKind::TimeoutError,
    ];

    /// Python-visible class name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::IndentationError => "IndentationError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::ModuleNotFoundError => "ModuleNotFoundError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::EOFError => "EOFError",
            ErrorKind::TimeoutError => "TimeoutError",
        }
    }

    /// Look up a concrete class by name.
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// Whether an `except <name>` clause catches this kind.
    pub fn is_caught_by(self, name: &str) -> bool {
        if self == ErrorKind::TimeoutError {
            return false;
        }
        if name == "Exception" || name == self.as_str() {
            return true;
        }
        match name {
            "ArithmeticError" => matches!(
                self,
                ErrorKind::ZeroDivisionError | ErrorKind::OverflowError
            ),
            "LookupError" => matches!(self, ErrorKind::IndexError | ErrorKind::KeyError),
            "ImportError" => self == ErrorKind::ModuleNotFoundError,
            _ => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault raised while parsing or running a program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramError {
    /// Exception class.
    pub kind: ErrorKind,
    /// Human-readable detail (may be empty).
    pub message: String,
    /// 1-based source line, when known.
    pub line: Option<usize>,
}

impl ProgramError {
    /// Create an error without line information.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// Shorthand for a `SyntaxError` at a known line.
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(ErrorKind::SyntaxError, message).at_line(line)
    }

    /// Shorthand for a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Shorthand for a `ValueError`.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    /// Attach a line number unless one is already set (innermost wins).
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " on line {}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProgramError {}

/// Stack reserved for the thread that parses and evaluates a program.
///
/// Deep recursion in learner code turns into deep recursion in the
/// evaluator, so [`eval::DEFAULT_MAX_CALL_DEPTH`] calls and
/// [`lexer::MAX_BRACKET_DEPTH`] brackets need far more than a default
/// thread stack.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Builder for a thread able to run a program to its limits.
pub fn eval_thread() -> std::thread::Builder {
    std::thread::Builder::new()
        .name("pyground-eval".into())
        .stack_size(EVAL_STACK_SIZE)
}

/// Parse and run `source` to completion, collecting printed output.
///
/// Blocks the caller while the program runs on an [`eval_thread`]; the
/// execution pipeline streams output from that thread instead.
pub fn run_to_string(source: &str, limits: EvaluatorLimits) -> Result<String> {
    std::thread::scope(|scope| {
        let worker = eval_thread()
            .spawn_scoped(scope, || -> Result<String> {
                let program = parse_program(source)?;
                let mut output = String::new();
                let mut evaluator = Evaluator::new(limits);
                for stmt in &program.body {
                    evaluator.exec_top_level(stmt, &mut output)?;
                }
                Ok(output)
            })
            .map_err(|err| {
                ProgramError::new(
                    ErrorKind::RuntimeError,
                    format!("cannot start interpreter thread: {}", err),
                )
            })?;
        worker.join().unwrap_or_else(|_| {
            Err(ProgramError::new(ErrorKind::RuntimeError, "interpreter thread panicked"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_kind_message_and_line() {
        let err = ProgramError::new(ErrorKind::NameError, "name 'x' is not defined").at_line(3);
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined on line 3");
    }

    #[test]
    fn renders_bare_kind_when_message_empty() {
        let err = ProgramError::new(ErrorKind::ValueError, "").at_line(1);
        assert_eq!(err.to_string(), "ValueError on line 1");
    }

    #[test]
    fn innermost_line_wins() {
        let err = ProgramError::type_error("bad").at_line(5).at_line(2);
        assert_eq!(err.line, Some(5));
    }

    #[test]
    fn runs_deep_nesting_on_eval_thread() {
        let source = format!("x = {}1{}\nprint(x)", "(".repeat(200), ")".repeat(200));
        assert_eq!(run_to_string(&source, EvaluatorLimits::default()).unwrap(), "1\n");
    }

    #[test]
    fn timeout_is_never_caught() {
        assert!(!ErrorKind::TimeoutError.is_caught_by("Exception"));
        assert!(ErrorKind::KeyError.is_caught_by("LookupError"));
        assert!(ErrorKind::ZeroDivisionError.is_caught_by("Exception"));
        assert!(!ErrorKind::ValueError.is_caught_by("KeyError"));
    }
}
