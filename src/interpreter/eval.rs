use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use super::ast::{BinOp, CmpOp, Expr, FStringPart, FunctionDef, Stmt, StmtKind, Target, UnaryOp};
use super::builtins;
use super::value::{Dict, Function, Value, key_error, range_len};
use super::{ErrorKind, PrintWriter, ProgramError, Result};

/// Default bound on nested user-function calls.
///
/// Matches CPython's recursion limit; the evaluator needs the stack of
/// [`EVAL_STACK_SIZE`](super::EVAL_STACK_SIZE) to reach it.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Resource bounds applied to a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorLimits {
    /// Maximum statements plus loop iterations; `None` means unbounded.
    pub step_limit: Option<u64>,
    /// Maximum nested user-function calls before `RecursionError`.
    pub max_call_depth: usize,
}

impl Default for EvaluatorLimits {
    fn default() -> Self {
        Self {
            step_limit: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl EvaluatorLimits {
    /// Limits with a step budget.
    pub fn with_step_limit(mut self, steps: u64) -> Self {
        self.step_limit = Some(steps);
        self
    }
}

/// Control-flow outcome of executing a statement.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Debug, Default)]
struct Frame {
    locals: HashMap<String, Value>,
    globals: HashSet<String>,
}

/// What a comprehension builds from each item.
#[derive(Debug, Clone, Copy)]
enum Element<'a> {
    Item(&'a Expr),
    Entry(&'a Expr, &'a Expr),
}

/// Lazy iteration over a value.
pub(crate) enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let live = if *step > 0 { *next < *stop } else { *next > *stop };
                if !live {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
        }
    }
}

/// Tree-walking evaluator holding one run's namespace.
///
/// A new evaluator is created per run so nothing a program defines survives
/// into the next one.
#[derive(Debug)]
pub struct Evaluator {
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    handling: Vec<ProgramError>,
    limits: EvaluatorLimits,
    steps: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl Evaluator {
    /// Fresh evaluator with an empty global namespace.
    pub fn new(limits: EvaluatorLimits) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            handling: Vec::new(),
            limits,
            steps: 0,
            cancel: None,
        }
    }

    /// Stop with a `TimeoutError` at the next step once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Steps consumed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Look up a global binding.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Execute one top-level statement.
    pub fn exec_top_level(&mut self, stmt: &Stmt, out: &mut dyn PrintWriter) -> Result<()> {
        self.exec_stmt(stmt, out).map(|_| ())
    }

    pub(crate) fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(ProgramError::new(ErrorKind::TimeoutError, "execution cancelled"));
        }
        match self.limits.step_limit {
            Some(limit) if self.steps > limit => Err(ProgramError::new(
                ErrorKind::TimeoutError,
                format!("execution exceeded {} steps", limit),
            )),
            _ => Ok(()),
        }
    }

    fn exec_block(&mut self, body: &[Stmt], out: &mut dyn PrintWriter) -> Result<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, out: &mut dyn PrintWriter) -> Result<Flow> {
        self.tick().map_err(|err| err.at_line(stmt.line))?;
        self.exec_kind(&stmt.kind, out)
            .map_err(|err| err.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind, out: &mut dyn PrintWriter) -> Result<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, out)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, out)?;
                for target in targets {
                    self.assign(target, value.clone(), out)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, out)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, out)?.truthy() {
                        return self.exec_block(body, out);
                    }
                }
                return self.exec_block(orelse, out);
            }
            StmtKind::While { cond, body } => loop {
                if !self.eval(cond, out)?.truthy() {
                    break;
                }
                match self.exec_block(body, out)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
                self.tick()?;
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, out)?;
                for item in iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, out)?;
                    match self.exec_block(body, out)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, out)?;
                self.store(&def.name, function);
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, out)?;
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, out)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    for name in names {
                        frame.locals.remove(name);
                        frame.globals.insert(name.clone());
                    }
                }
            }
            StmtKind::Import(module) => {
                return Err(ProgramError::new(
                    ErrorKind::ModuleNotFoundError,
                    format!("No module named '{}'", module),
                ));
            }
            StmtKind::Raise(expr) => return Err(self.raise(expr.as_ref(), out)?),
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.exec_block(body, out) {
                    Err(err) if err.kind != ErrorKind::TimeoutError => {
                        let handler = handlers.iter().find(|handler| {
                            handler.classes.is_empty()
                                || handler.classes.iter().any(|name| err.kind.is_caught_by(name))
                        });
                        match handler {
                            Some(handler) => {
                                if let Some(binding) = &handler.binding {
                                    let exc = Value::Exception {
                                        kind: err.kind,
                                        message: err.message.clone(),
                                    };
                                    self.store(binding, exc);
                                }
                                self.handling.push(err);
                                let result = self.exec_block(&handler.body, out);
                                self.handling.pop();
                                result
                            }
                            None => Err(err),
                        }
                    }
                    other => other,
                };
                if !finally.is_empty() {
                    if let Err(err) = &outcome {
                        if err.kind == ErrorKind::TimeoutError {
                            return outcome;
                        }
                    }
                    match self.exec_block(finally, out)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
        }
        Ok(Flow::Normal)
    }

    fn raise(&mut self, expr: Option<&Expr>, out: &mut dyn PrintWriter) -> Result<ProgramError> {
        let Some(expr) = expr else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                ProgramError::new(ErrorKind::RuntimeError, "No active exception to reraise")
            }));
        };
        match self.eval(expr, out)? {
            Value::ExceptionClass(kind) => Ok(ProgramError::new(kind, "")),
            Value::Exception { kind, message } => Ok(ProgramError::new(kind, message)),
            _ => Err(ProgramError::type_error(
                "exceptions must derive from BaseException",
            )),
        }
    }

    /// Function value with its defaults evaluated now.
    fn make_function(&mut self, def: &Arc<FunctionDef>, out: &mut dyn PrintWriter) -> Result<Value> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, out)?);
            }
        }
        Ok(Value::Function(Arc::new(Function {
            def: Arc::clone(def),
            defaults,
        })))
    }

    fn delete(&mut self, target: &Target, out: &mut dyn PrintWriter) -> Result<()> {
        match target {
            Target::Name(name) => {
                if self.current_binding(name).is_none() {
                    return Err(ProgramError::new(
                        ErrorKind::NameError,
                        format!("name '{}' is not defined", name),
                    ));
                }
                self.unbind(name);
            }
            Target::Subscript { value, index } => {
                let container = self.eval(value, out)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.eval_bounds(lower, upper, step, out)?;
                    return del_slice(&container, bounds);
                }
                let index = self.eval(index, out)?;
                del_item(&container, &index)?;
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target, out)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        out: &mut dyn PrintWriter,
    ) -> Result<()> {
        match target {
            Target::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value, out)?;
                if let (BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra = self.collect(&rhs)?;
                    items.lock().extend(extra);
                    return Ok(());
                }
                let updated = binary_op(op, &current, &rhs)?;
                self.store(name, updated);
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container, out)?;
                let index = self.eval(index, out)?;
                let current = get_item(&container, &index)?;
                let rhs = self.eval(value, out)?;
                let updated = binary_op(op, &current, &rhs)?;
                set_item(&container, index, updated)?;
            }
            Target::Tuple(_) => {
                return Err(ProgramError::new(
                    ErrorKind::SyntaxError,
                    "illegal expression for augmented assignment",
                ));
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Target, value: Value, out: &mut dyn PrintWriter) -> Result<()> {
        match target {
            Target::Name(name) => self.store(name, value),
            Target::Subscript { value: container, index } => {
                let container = self.eval(container, out)?;
                let index = self.eval(index, out)?;
                set_item(&container, index, value)?;
            }
            Target::Tuple(targets) => {
                let items = self.collect(&value)?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(ProgramError::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, out)?;
                }
            }
        }
        Ok(())
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.get(name) {
                return Some(value.clone());
            }
        }
        self.globals
            .get(name)
            .cloned()
            .or_else(|| builtins::lookup(name))
    }

    fn load(&self, name: &str) -> Result<Value> {
        self.lookup(name).ok_or_else(|| {
            ProgramError::new(
                ErrorKind::NameError,
                format!("name '{}' is not defined", name),
            )
        })
    }

    /// Materialize an iterable, charging one step per item.
    pub(crate) fn collect(&mut self, value: &Value) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        for item in iterate(value)? {
            if self.limits.step_limit.is_some() || self.cancel.is_some() {
                self.tick()?;
            }
            items.push(item);
        }
        Ok(items)
    }

    fn eval(&mut self, expr: &Expr, out: &mut dyn PrintWriter) -> Result<Value> {
        match expr {
            Expr::Int(num) => Ok(Value::Int(*num)),
            Expr::Float(num) => Ok(Value::Float(*num)),
            Expr::Str(text) => Ok(Value::Str(text.clone())),
            Expr::Bool(flag) => Ok(Value::Bool(*flag)),
            Expr::None => Ok(Value::None),
            Expr::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(literal) => text.push_str(literal),
                        FStringPart::Expr { expr, spec, repr } => {
                            let value = self.eval(expr, out)?;
                            let rendered = if *repr { Value::Str(value.repr()) } else { value };
                            match spec {
                                Some(spec) => {
                                    text.push_str(&builtins::apply_format_spec(&rendered, spec)?)
                                }
                                None => text.push_str(&rendered.to_str()),
                            }
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            Expr::Name(name) => self.load(name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items, out)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items, out)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, out)?;
                    let value = self.eval(value, out)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp {
                element,
                target,
                iter,
                cond,
            } => self.comprehension(Element::Item(element), target, iter, cond.as_deref(), out),
            Expr::DictComp {
                key,
                value,
                target,
                iter,
                cond,
            } => self.comprehension(Element::Entry(key, value), target, iter, cond.as_deref(), out),
            Expr::Lambda(def) => self.make_function(def, out),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, out)?;
                unary_op(*op, &value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, out)?;
                let right = self.eval(right, out)?;
                binary_op(*op, &left, &right)
            }
            Expr::Compare { left, rest } => {
                let mut left = self.eval(left, out)?;
                for (op, right) in rest {
                    let right = self.eval(right, out)?;
                    if !compare_op(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::BoolOp { and, left, right } => {
                let left = self.eval(left, out)?;
                if left.truthy() == *and {
                    self.eval(right, out)
                } else {
                    Ok(left)
                }
            }
            Expr::IfExp {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, out)?.truthy() {
                    self.eval(then, out)
                } else {
                    self.eval(otherwise, out)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = match func.as_ref() {
                    Expr::Attribute { value, name } => Value::Method {
                        receiver: Box::new(self.eval(value, out)?),
                        name: name.clone(),
                    },
                    other => self.eval(other, out)?,
                };
                let args = self.eval_all(args, out)?;
                let mut kw = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    kw.push((name.clone(), self.eval(value, out)?));
                }
                self.call_value(&callee, args, kw, out)
            }
            Expr::Attribute { value, name } => {
                let receiver = self.eval(value, out)?;
                if builtins::has_method(&receiver, name) {
                    Ok(Value::Method {
                        receiver: Box::new(receiver),
                        name: name.clone(),
                    })
                } else {
                    Err(builtins::no_attribute(&receiver, name))
                }
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, out)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.eval_bounds(lower, upper, step, out)?;
                    return slice(&container, bounds);
                }
                let index = self.eval(index, out)?;
                get_item(&container, &index)
            }
            Expr::Slice { .. } => Err(ProgramError::new(ErrorKind::SyntaxError, "invalid syntax")),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], out: &mut dyn PrintWriter) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, out)).collect()
    }

    fn eval_bound(&mut self, bound: Option<&Expr>, out: &mut dyn PrintWriter) -> Result<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr, out)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                ProgramError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    }

    fn eval_bounds(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        out: &mut dyn PrintWriter,
    ) -> Result<SliceBounds> {
        Ok(SliceBounds {
            lower: self.eval_bound(lower.as_deref(), out)?,
            upper: self.eval_bound(upper.as_deref(), out)?,
            step: self.eval_bound(step.as_deref(), out)?,
        })
    }

    fn comprehension(
        &mut self,
        element: Element<'_>,
        target: &Target,
        iter: &Expr,
        cond: Option<&Expr>,
        out: &mut dyn PrintWriter,
    ) -> Result<Value> {
        let iterable = self.eval(iter, out)?;
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.current_binding(&name);
                (name, previous)
            })
            .collect();

        let result = self.produce(element, target, &iterable, cond, out);

        // Comprehension variables do not leak into the enclosing scope.
        for (name, previous) in saved {
            match previous {
                Some(value) => self.store(&name, value),
                None => self.unbind(&name),
            }
        }
        result
    }

    fn produce(
        &mut self,
        element: Element<'_>,
        target: &Target,
        iterable: &Value,
        cond: Option<&Expr>,
        out: &mut dyn PrintWriter,
    ) -> Result<Value> {
        let mut items = Vec::new();
        let mut entries = Dict::new();
        for item in iterate(iterable)? {
            self.tick()?;
            self.assign(target, item, out)?;
            if let Some(cond) = cond {
                if !self.eval(cond, out)?.truthy() {
                    continue;
                }
            }
            match element {
                Element::Item(expr) => items.push(self.eval(expr, out)?),
                Element::Entry(key, value) => {
                    let key = self.eval(key, out)?;
                    let value = self.eval(value, out)?;
                    entries.insert(key, value)?;
                }
            }
        }
        Ok(match element {
            Element::Item(_) => Value::list(items),
            Element::Entry(..) => Value::dict(entries),
        })
    }

    fn current_binding(&self, name: &str) -> Option<Value> {
        match self.frames.last() {
            Some(frame) if !frame.globals.contains(name) => frame.locals.get(name).cloned(),
            _ => self.globals.get(name).cloned(),
        }
    }

    fn unbind(&mut self, name: &str) {
        match self.frames.last_mut() {
            Some(frame) if !frame.globals.contains(name) => {
                frame.locals.remove(name);
            }
            _ => {
                self.globals.remove(name);
            }
        }
    }

    /// Call any callable value.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        out: &mut dyn PrintWriter,
    ) -> Result<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs, out),
            Value::Builtin(name) | Value::Type(name) => {
                builtins::call_builtin(self, name, args, kwargs, out)
            }
            Value::Method { receiver, name } => {
                builtins::call_method(self, receiver, name, args, kwargs, out)
            }
            Value::ExceptionClass(kind) => {
                if !kwargs.is_empty() {
                    return Err(ProgramError::type_error(format!(
                        "{}() takes no keyword arguments",
                        kind
                    )));
                }
                let message = match args.as_slice() {
                    [] => String::new(),
                    [single] => single.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception {
                    kind: *kind,
                    message,
                })
            }
            other => Err(ProgramError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Arc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        out: &mut dyn PrintWriter,
    ) -> Result<Value> {
        let def = &function.def;
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(ProgramError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let params = &def.params;
        if args.len() > params.len() {
            return Err(ProgramError::type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (name, value) in kwargs {
            let Some(idx) = params.iter().position(|param| param.name == name) else {
                return Err(ProgramError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            };
            if slots[idx].is_some() {
                return Err(ProgramError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            slots[idx] = Some(value);
        }

        let first_default = params.len() - function.defaults.len();
        let mut frame = Frame::default();
        let mut missing = Vec::new();
        for (idx, (param, slot)) in params.iter().zip(slots).enumerate() {
            let value = match slot {
                Some(value) => value,
                None if idx >= first_default => function.defaults[idx - first_default].clone(),
                None => {
                    missing.push(format!("'{}'", param.name));
                    continue;
                }
            };
            frame.locals.insert(param.name.clone(), value);
        }
        if !missing.is_empty() {
            return Err(ProgramError::type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                def.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                join_names(&missing)
            )));
        }

        trace!(function = %def.name, depth = self.frames.len() + 1, "call");
        self.frames.push(frame);
        let result = self.exec_block(&def.body, out);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Name(name) => names.push(name.clone()),
        Target::Tuple(targets) => targets.iter().for_each(|t| target_names(t, names)),
        Target::Subscript { .. } => {}
    }
}

/// Iterate a value lazily (ranges) or over a snapshot (containers).
pub(crate) fn iterate(value: &Value) -> Result<ValueIter> {
    let items = match value {
        Value::Range { start, stop, step } => {
            return Ok(ValueIter::Range {
                next: *start,
                stop: *stop,
                step: *step,
            });
        }
        Value::List(items) => items.lock().clone(),
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Str(text) => text.chars().map(|ch| Value::Str(ch.to_string())).collect(),
        Value::Dict(dict) => dict.lock().keys(),
        other => {
            return Err(ProgramError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(ValueIter::Items(items.into_iter()))
}

fn overflow() -> ProgramError {
    ProgramError::new(ErrorKind::OverflowError, "integer result too large")
}

fn unsupported(op: &str, left: &Value, right: &Value) -> ProgramError {
    ProgramError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn unary_op(op: UnaryOp, value: &Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Float(num)) => Ok(Value::Float(-num)),
        (UnaryOp::Pos, Value::Float(num)) => Ok(Value::Float(*num)),
        (op, value) => match value.as_int() {
            Some(num) if op == UnaryOp::Neg => num.checked_neg().map(Value::Int).ok_or_else(overflow),
            Some(num) => Ok(Value::Int(num)),
            None => Err(ProgramError::type_error(format!(
                "bad operand type for unary {}: '{}'",
                if op == UnaryOp::Neg { "-" } else { "+" },
                value.type_name()
            ))),
        },
    }
}

/// Largest sequence a single repetition or padding may build.
pub(crate) const MAX_REPEAT_LEN: usize = 10_000_000;

fn repeat<T: Clone>(items: &[T], count: i64) -> Result<Vec<T>> {
    let count = usize::try_from(count).unwrap_or(0);
    if items.len().saturating_mul(count) > MAX_REPEAT_LEN {
        return Err(ProgramError::new(
            ErrorKind::OverflowError,
            "repeated sequence is too long",
        ));
    }
    Ok(std::iter::repeat_n(items, count).flatten().cloned().collect())
}

/// Apply an arithmetic operator with Python semantics.
pub(crate) fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_op(op, a, b);
    }
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return float_op(op, a, b);
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::Str(_), other) => Err(ProgramError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.lock().clone();
            items.extend(b.lock().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::List(_), other) => Err(ProgramError::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        ))),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Str(text), count) | (BinOp::Mul, count, Value::Str(text))
            if count.as_int().is_some() =>
        {
            let chars: Vec<char> = text.chars().collect();
            let repeated = repeat(chars.as_slice(), count.as_int().unwrap_or(0))?;
            Ok(Value::Str(repeated.into_iter().collect()))
        }
        (BinOp::Mul, Value::List(items), count) | (BinOp::Mul, count, Value::List(items))
            if count.as_int().is_some() =>
        {
            let snapshot = items.lock().clone();
            Ok(Value::list(repeat(snapshot.as_slice(), count.as_int().unwrap_or(0))?))
        }
        (BinOp::Mul, Value::Tuple(items), count) | (BinOp::Mul, count, Value::Tuple(items))
            if count.as_int().is_some() =>
        {
            Ok(Value::tuple(repeat(items.as_slice(), count.as_int().unwrap_or(0))?))
        }
        (BinOp::Mod, Value::Str(_), _) => Err(ProgramError::type_error(
            "printf-style formatting is not supported; use f-strings or str.format",
        )),
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(ProgramError::new(ErrorKind::ZeroDivisionError, "division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ProgramError::new(
                    ErrorKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ProgramError::new(
                    ErrorKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let rem = a.checked_rem(b).unwrap_or(0);
            if rem != 0 && ((rem < 0) != (b < 0)) {
                rem + b
            } else {
                rem
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f64, b as f64);
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value> {
    let zero_div = |message: &str| -> Result<Value> {
        Err(ProgramError::new(ErrorKind::ZeroDivisionError, message))
    };
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return zero_div("division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return zero_div("float floor division by zero");
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return zero_div("float modulo");
            }
            let rem = a % b;
            if rem != 0.0 && ((rem < 0.0) != (b < 0.0)) {
                rem + b
            } else {
                rem
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return zero_div("0.0 cannot be raised to a negative power");
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ProgramError::new(
                    ErrorKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            result
        }
    };
    Ok(Value::Float(value))
}

fn compare_op(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    use std::cmp::Ordering;
    Ok(match op {
        CmpOp::Eq => left.py_eq(right)?,
        CmpOp::NotEq => !left.py_eq(right)?,
        CmpOp::Lt => left.compare(right, op.symbol())? == Ordering::Less,
        CmpOp::LtE => left.compare(right, op.symbol())? != Ordering::Greater,
        CmpOp::Gt => left.compare(right, op.symbol())? == Ordering::Greater,
        CmpOp::GtE => left.compare(right, op.symbol())? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => left.py_is(right),
        CmpOp::IsNot => !left.py_is(right),
    })
}

/// Python `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_str())),
            other => Err(ProgramError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            let snapshot = items.lock().clone();
            any_equal(&snapshot, item)
        }
        Value::Tuple(items) => any_equal(items, item),
        Value::Dict(dict) => dict.lock().contains(item),
        Value::Range { start, stop, step } => Ok(match item.as_int() {
            Some(num) => {
                let inside = if *step > 0 {
                    num >= *start && num < *stop
                } else {
                    num <= *start && num > *stop
                };
                inside && (num as i128 - *start as i128) % *step as i128 == 0
            }
            None => false,
        }),
        other => Err(ProgramError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> Result<bool> {
    for candidate in items {
        if candidate.py_eq(item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn index_of(container: &Value, index: &Value) -> Result<i64> {
    index.as_int().ok_or_else(|| {
        ProgramError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            index.type_name()
        ))
    })
}

fn out_of_range(container: &str) -> ProgramError {
    ProgramError::new(ErrorKind::IndexError, format!("{} index out of range", container))
}

/// `container[index]`.
pub(crate) fn get_item(container: &Value, index: &Value) -> Result<Value> {
    match container {
        Value::List(items) => {
            let idx = index_of(container, index)?;
            let items = items.lock();
            normalize_index(idx, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("list"))
        }
        Value::Tuple(items) => {
            let idx = index_of(container, index)?;
            normalize_index(idx, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("tuple"))
        }
        Value::Str(text) => {
            let idx = index_of(container, index)?;
            let chars: Vec<char> = text.chars().collect();
            normalize_index(idx, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| out_of_range("string"))
        }
        Value::Range { start, stop, step } => {
            let idx = index_of(container, index)? as i128;
            let len = range_len(*start, *stop, *step);
            let resolved = if idx < 0 { idx + len } else { idx };
            if !(0..len).contains(&resolved) {
                return Err(out_of_range("range object"));
            }
            let value = *start as i128 + resolved * *step as i128;
            i64::try_from(value).map(Value::Int).map_err(|_| overflow())
        }
        Value::Dict(dict) => dict.lock().get(index)?.ok_or_else(|| key_error(index)),
        other => Err(ProgramError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`.
pub(crate) fn set_item(container: &Value, index: Value, value: Value) -> Result<()> {
    match container {
        Value::List(items) => {
            let idx = index_of(container, &index)?;
            let mut items = items.lock();
            let len = items.len();
            let slot = normalize_index(idx, len)
                .ok_or_else(|| out_of_range("list assignment"))?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.lock().insert(index, value),
        other => Err(ProgramError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Evaluated `lower:upper:step`, each possibly omitted.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SliceBounds {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceBounds {
    /// First position, stride and item count over a sequence of `len` items.
    fn adjust(&self, len: i128) -> Result<(i128, i128, i128)> {
        let step = i128::from(self.step.unwrap_or(1));
        if step == 0 {
            return Err(ProgramError::value_error("slice step cannot be zero"));
        }
        let clamp = |bound: Option<i64>, default: i128| -> i128 {
            let Some(bound) = bound else {
                return default;
            };
            let bound = i128::from(bound);
            if bound < 0 {
                (bound + len).max(if step < 0 { -1 } else { 0 })
            } else if bound >= len {
                if step < 0 { len - 1 } else { len }
            } else {
                bound
            }
        };
        let (start, stop) = if step > 0 {
            (clamp(self.lower, 0), clamp(self.upper, len))
        } else {
            (clamp(self.lower, len - 1), clamp(self.upper, -1))
        };
        let count = if step > 0 && stop > start {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / -step + 1
        } else {
            0
        };
        Ok((start, step, count))
    }

    /// Positions selected from a sequence of `len` items, in slice order.
    pub(crate) fn indices(&self, len: usize) -> Result<Vec<usize>> {
        let (start, step, count) = self.adjust(len as i128)?;
        Ok((0..count).map(|n| (start + n * step) as usize).collect())
    }
}

fn pick<T: Clone>(items: &[T], bounds: SliceBounds) -> Result<Vec<T>> {
    Ok(bounds
        .indices(items.len())?
        .into_iter()
        .map(|idx| items[idx].clone())
        .collect())
}

fn slice(container: &Value, bounds: SliceBounds) -> Result<Value> {
    match container {
        Value::List(items) => Ok(Value::list(pick(items.lock().as_slice(), bounds)?)),
        Value::Tuple(items) => Ok(Value::tuple(pick(items.as_slice(), bounds)?)),
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            Ok(Value::Str(pick(chars.as_slice(), bounds)?.into_iter().collect()))
        }
        Value::Range { start, stop, step } => {
            let (first, stride, count) = bounds.adjust(range_len(*start, *stop, *step))?;
            if count == 0 {
                return Ok(Value::Range { start: 0, stop: 0, step: 1 });
            }
            let new_start = i128::from(*start) + first * i128::from(*step);
            let new_step = i128::from(*step) * stride;
            let new_stop = (new_start + count * new_step).clamp(i64::MIN.into(), i64::MAX.into());
            let narrow = |value: i128| i64::try_from(value).map_err(|_| overflow());
            Ok(Value::Range {
                start: narrow(new_start)?,
                stop: narrow(new_stop)?,
                step: narrow(new_step)?,
            })
        }
        other => Err(ProgramError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `del container[index]`.
fn del_item(container: &Value, index: &Value) -> Result<()> {
    match container {
        Value::List(items) => {
            let idx = index_of(container, index)?;
            let mut items = items.lock();
            let slot = normalize_index(idx, items.len())
                .ok_or_else(|| out_of_range("list assignment"))?;
            items.remove(slot);
            Ok(())
        }
        Value::Dict(dict) => match dict.lock().remove(index)? {
            Some(_) => Ok(()),
            None => Err(key_error(index)),
        },
        other => Err(ProgramError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// `del container[lower:upper:step]`.
fn del_slice(container: &Value, bounds: SliceBounds) -> Result<()> {
    let Value::List(items) = container else {
        return Err(ProgramError::type_error(format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        )));
    };
    let mut items = items.lock();
    let mut picked = bounds.indices(items.len())?;
    picked.sort_unstable();
    for idx in picked.into_iter().rev() {
        items.remove(idx);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::run_to_string;

    fn run(source: &str) -> String {
        run_to_string(source, EvaluatorLimits::default()).expect("program should run")
    }

    fn fail(source: &str) -> String {
        run_to_string(source, EvaluatorLimits::default())
            .expect_err("program should fail")
            .to_string()
    }

    #[test]
    fn floor_division_and_modulo_follow_python_signs() {
        assert_eq!(run("print(-7 // 2, -7 % 2, 7 % -2, 7.5 // 2)"), "-4 1 -1 3.0\n");
    }

    #[test]
    fn integer_overflow_raises() {
        assert_eq!(
            fail("x = 9223372036854775807\nx + 1"),
            "OverflowError: integer result too large on line 2"
        );
    }

    #[test]
    fn functions_take_defaults_and_keywords() {
        let out = run("def greet(name, greeting='Hello'):\n    return greeting + ', ' + name\nprint(greet('Ada'))\nprint(greet('Bob', greeting='Hi'))\n");
        assert_eq!(out, "Hello, Ada\nHi, Bob\n");
    }

    #[test]
    fn missing_arguments_are_reported() {
        assert_eq!(
            fail("def f(a, b):\n    pass\nf(1)\n"),
            "TypeError: f() missing 1 required positional argument: 'b' on line 3"
        );
    }

    #[test]
    fn try_except_binds_and_finally_runs() {
        let out = run("try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    print('caught', e)\nfinally:\n    print('done')\n");
        assert_eq!(out, "caught division by zero\ndone\n");
    }

    #[test]
    fn step_limit_is_not_catchable() {
        let limits = EvaluatorLimits::default().with_step_limit(100);
        let err = run_to_string("try:\n    while True:\n        pass\nexcept Exception:\n    print('no')\n", limits)
            .expect_err("loop must time out");
        assert_eq!(err.kind, ErrorKind::TimeoutError);
        assert_eq!(err.message, "execution exceeded 100 steps");
    }

    #[test]
    fn recursion_is_bounded() {
        let limits = EvaluatorLimits {
            step_limit: None,
            max_call_depth: 10,
        };
        let err = run_to_string("def f(n):\n    return f(n + 1)\nf(0)\n", limits)
            .expect_err("recursion must stop");
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn comprehension_variable_does_not_leak() {
        assert_eq!(
            fail("squares = [i * i for i in range(3)]\nprint(i)\n"),
            "NameError: name 'i' is not defined on line 2"
        );
    }

    #[test]
    fn global_statement_rebinds_module_name() {
        let out = run("count = 0\ndef bump():\n    global count\n    count += 1\nbump()\nbump()\nprint(count)\n");
        assert_eq!(out, "2\n");
    }

    #[test]
    fn lists_share_references() {
        let out = run("a = [1]\nb = a\nb.append(2)\na += [3]\nprint(a, b is a)\n");
        assert_eq!(out, "[1, 2, 3] True\n");
    }

    #[test]
    fn slicing_clamps_bounds() {
        assert_eq!(run("print('python'[1:3], 'python'[-2:], [1, 2, 3][5:])\n"), "yt on []\n");
    }

    #[test]
    fn slices_take_steps() {
        assert_eq!(
            run("s = 'python'\nprint(s[::-1], s[::2], s[4:1:-1], [1, 2, 3, 4][-1:-4:-2])\n"),
            "nohtyp pto oht [4, 2]\n"
        );
        assert_eq!(run("print(list(range(10)[1::3]), range(10)[::-1][0])\n"), "[1, 4, 7] 9\n");
        assert_eq!(run("print(len(range(10 ** 12)[::2]), range(10 ** 12)[::-3][1])\n"), "500000000000 999999999996\n");
        assert_eq!(
            fail("print([1, 2][::0])\n"),
            "ValueError: slice step cannot be zero on line 1"
        );
    }

    #[test]
    fn lambdas_and_dict_comprehensions() {
        let out = run("pairs = [('b', 2), ('a', 1)]\nprint(sorted(pairs, key=lambda p: p[1]))\nadd = lambda a, b=10: a + b\nprint(add(1), add(1, 2))\nprint({k: v * v for k, v in pairs if v > 1})\n");
        assert_eq!(out, "[('a', 1), ('b', 2)]\n11 3\n{'b': 4}\n");
    }

    #[test]
    fn del_removes_names_items_and_keys() {
        let out = run("a = [0, 1, 2, 3, 4]\ndel a[0]\ndel a[::2]\nd = {'x': 1, 'y': 2}\ndel d['x']\nn = 5\ndel n\nprint(a, d)\n");
        assert_eq!(out, "[2, 4] {'y': 2}\n");
        assert_eq!(fail("n = 1\ndel n\nprint(n)\n"), "NameError: name 'n' is not defined on line 3");
        assert_eq!(fail("d = {}\ndel d['k']\n"), "KeyError: 'k' on line 2");
    }

    #[test]
    fn default_recursion_limit_allows_deep_calls() {
        let out = run("def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\nprint(depth(900))\n");
        assert_eq!(out, "900\n");
        let err = run_to_string("def f(n):\n    return f(n + 1)\nf(0)\n", EvaluatorLimits::default())
            .expect_err("unbounded recursion must stop");
        assert_eq!(err.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn cancel_flag_stops_tight_loops() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut evaluator = Evaluator::new(EvaluatorLimits::default()).with_cancel(flag);
        let program = crate::interpreter::parse_program("while True:\n    pass\n").unwrap();
        let mut out = String::new();
        let err = evaluator
            .exec_top_level(&program.body[0], &mut out)
            .expect_err("cancelled run must stop");
        assert_eq!(err.kind, ErrorKind::TimeoutError);
        assert_eq!(err.message, "execution cancelled");
    }

    #[test]
    fn repetition_clones_values() {
        assert_eq!(run("print([[0]] * 2, ('a',) * 3, 'ab' * 2, [1] * -1)\n"), "[[0], [0]] ('a', 'a', 'a') abab []\n");
    }

    #[test]
    fn large_ranges_iterate_lazily() {
        let out = run("for i in range(10 ** 12):\n    if i == 3:\n        break\nprint(i)\n");
        assert_eq!(out, "3\n");
    }
}
