pub mod builtins;
pub mod error;
pub mod heap;
pub mod modules;
pub mod operators;
pub mod scope;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::ast::*;
use crate::config::Config;

pub use builtins::CapturedOutput;
pub use error::{EngineFault, RuntimeError};
use heap::{Escape, Heap, RefId};
use modules::{FileLoader, ModuleLoader};
use scope::{Activation, ScopeId, Scopes};
pub use value::Value;
use value::StructValue;

#[derive(Debug)]
pub struct FunctionProto {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct StructProto {
    pub name: String,
    pub properties: Vec<String>,
}

pub struct Interpreter {
    pub(crate) heap: Heap,
    scopes: Scopes,
    global: ScopeId,
    functions: HashMap<String, Rc<FunctionProto>>,
    structs: HashMap<String, Rc<StructProto>>,
    config: Config,
    loader: Box<dyn ModuleLoader>,
    imported: HashSet<PathBuf>,
    module_dirs: Vec<PathBuf>,
    pub(crate) exit_requested: bool,
    call_depth: usize,
    pub(crate) output: Box<dyn Write>,
    /// `None` reads from the process stdin, sharing its buffer with the host.
    pub(crate) input: Option<Box<dyn BufRead>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut scopes = Scopes::new();
        let global = scopes.create(None);
        Self {
            heap: Heap::new(),
            scopes,
            global,
            functions: HashMap::new(),
            structs: HashMap::new(),
            config,
            loader: Box::new(FileLoader),
            imported: HashSet::new(),
            module_dirs: Vec::new(),
            exit_requested: false,
            call_depth: 0,
            output: Box::new(io::stdout()),
            input: None,
        }
    }

    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn with_input(mut self, input: impl BufRead + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Set once `stop()` or `abort()` has run.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Reference cells currently alive, temporaries included.
    pub fn live_references(&self) -> usize {
        self.heap.live()
    }

    /// Scopes not yet destroyed, the global scope included.
    pub fn live_scopes(&self) -> usize {
        self.scopes.live()
    }

    /// Names bound in the global scope, in declaration order.
    pub fn global_names(&self) -> Vec<String> {
        self.scopes.names(self.global).unwrap_or_default()
    }

    /// Render a global variable the way `print` would.
    pub fn render_global(&self, name: &str) -> Result<String, RuntimeError> {
        let id = self.scopes.lookup(self.global, name)?;
        value::render(&self.heap, self.heap.value(id)?)
    }

    // ── Entry points ────────────────────────────────────────────────────

    /// Execute a top-level program against the persistent global scope.
    pub fn run_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        let mut act = Activation::new(self.global);
        let result = self.exec_block(&mut act, &program.statements);
        if let Some(ret) = act.return_value.take() {
            let _ = self.heap.discard(ret);
        }
        let _ = self.output.flush();
        result
    }

    pub fn run_source(&mut self, source: &str, filename: &str) -> Result<(), crate::Error> {
        let program = crate::parse_source(source, filename)?;
        self.run_program(&program)?;
        Ok(())
    }

    // ── Statement execution ─────────────────────────────────────────────

    fn exec_block(&mut self, act: &mut Activation, stmts: &[Stmt]) -> Result<(), RuntimeError> {
        for stmt in stmts {
            if self.exit_requested || act.interrupted() {
                break;
            }
            self.exec_statement(act, stmt)?;
        }
        Ok(())
    }

    fn exec_statement(&mut self, act: &mut Activation, stmt: &Stmt) -> Result<(), RuntimeError> {
        match stmt {
            Stmt::Assign {
                target,
                value,
                global,
                ..
            } => self.exec_assign(act.scope, target, value, *global),

            Stmt::Return { value, .. } => {
                let ret = match value {
                    Some(expr) => self.eval_expr(act.scope, expr, false)?,
                    None => self.heap.alloc_root(Value::Null),
                };
                if let Some(previous) = act.return_value.replace(ret) {
                    self.heap.discard(previous)?;
                }
                act.finished = true;
                Ok(())
            }

            Stmt::Break { .. } => {
                if act.loop_depth == 0 {
                    return Err(RuntimeError::UnexpectedBreak);
                }
                act.break_requested = true;
                Ok(())
            }

            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                for branch in branches {
                    if self.eval_condition(act.scope, &branch.condition)? {
                        return self.exec_block(act, &branch.body);
                    }
                }
                match else_body {
                    Some(body) => self.exec_block(act, body),
                    None => Ok(()),
                }
            }

            Stmt::While {
                condition, body, ..
            } => {
                act.loop_depth += 1;
                let result = self.run_while(act, condition, body);
                act.loop_depth -= 1;
                result
            }

            Stmt::For {
                var,
                iterable,
                body,
                ..
            } => self.exec_for(act, var, iterable, body),

            Stmt::FunctionDecl {
                name, params, body, ..
            } => {
                if self.functions.contains_key(name) {
                    return Err(RuntimeError::AlreadyDefined(format!("function '{}'", name)));
                }
                check_unique(params, "parameter")?;
                self.functions.insert(
                    name.clone(),
                    Rc::new(FunctionProto {
                        name: name.clone(),
                        params: params.clone(),
                        body: body.clone(),
                    }),
                );
                Ok(())
            }

            Stmt::StructDecl {
                name, properties, ..
            } => {
                if self.structs.contains_key(name) {
                    return Err(RuntimeError::AlreadyDefined(format!("struct '{}'", name)));
                }
                check_unique(properties, "property")?;
                self.structs.insert(
                    name.clone(),
                    Rc::new(StructProto {
                        name: name.clone(),
                        properties: properties.clone(),
                    }),
                );
                Ok(())
            }

            Stmt::Import { path, .. } => self.exec_import(act, path),

            Stmt::Expr { expr, .. } => {
                let result = self.eval_expr(act.scope, expr, false)?;
                self.heap.discard(result)?;
                Ok(())
            }
        }
    }

    fn run_while(
        &mut self,
        act: &mut Activation,
        condition: &Expr,
        body: &[Stmt],
    ) -> Result<(), RuntimeError> {
        while !self.exit_requested && !act.finished {
            if !self.eval_condition(act.scope, condition)? {
                break;
            }
            self.exec_block(act, body)?;
            if act.break_requested {
                act.break_requested = false;
                break;
            }
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        act: &mut Activation,
        var: &str,
        iterable: &Expr,
        body: &[Stmt],
    ) -> Result<(), RuntimeError> {
        let scope = act.scope;
        if self.scopes.contains_local(scope, var)? {
            return Err(RuntimeError::AlreadyDefined(format!("variable '{}'", var)));
        }
        let source = self.eval_expr(scope, iterable, false)?;
        let length = self.heap.value(source)?.length();
        // The iterated storage must outlive anything the body aliases into it.
        self.heap.anchor(source, scope)?;
        if length == 0 {
            self.heap.release_if_unaliased(source, scope)?;
            return Ok(());
        }

        let first = self.heap.value(source)?.iterate(0)?;
        let cursor = self.heap.alloc_alias(first)?;
        self.heap.anchor(cursor, scope)?;
        self.scopes.declare(scope, var, cursor)?;

        act.loop_depth += 1;
        let result = self.run_for(act, source, cursor, length, body);
        act.loop_depth -= 1;

        self.scopes.remove(scope, var)?;
        self.heap.release_if_unaliased(cursor, scope)?;
        self.heap.release_if_unaliased(source, scope)?;
        result
    }

    fn run_for(
        &mut self,
        act: &mut Activation,
        source: RefId,
        cursor: RefId,
        length: usize,
        body: &[Stmt],
    ) -> Result<(), RuntimeError> {
        for index in 0..length {
            if self.exit_requested || act.finished {
                break;
            }
            let element = self.heap.value(source)?.iterate(index)?;
            self.heap.point_at(cursor, element)?;
            self.exec_block(act, body)?;
            if act.break_requested {
                act.break_requested = false;
                break;
            }
        }
        Ok(())
    }

    fn exec_import(&mut self, act: &mut Activation, request: &str) -> Result<(), RuntimeError> {
        let from = self
            .module_dirs
            .last()
            .cloned()
            .unwrap_or_else(|| self.config.module_root.clone());
        let failure = |reason: String| RuntimeError::ImportFailure {
            path: request.to_string(),
            reason,
        };

        let resolved = self.loader.resolve(request, &from).map_err(failure)?;
        if self.imported.contains(&resolved) {
            debug!(path = %resolved.display(), "module already imported");
            return Ok(());
        }
        let program = self.loader.load(&resolved).map_err(failure)?;
        self.imported.insert(resolved.clone());
        info!(path = %resolved.display(), "importing module");

        let dir = resolved.parent().map(Path::to_path_buf).unwrap_or(from);
        self.module_dirs.push(dir);
        let result = self.exec_block(act, &program.statements);
        self.module_dirs.pop();
        result
    }

    // ── Assignment ──────────────────────────────────────────────────────

    fn exec_assign(
        &mut self,
        scope: ScopeId,
        target: &LValue,
        value: &Expr,
        global: bool,
    ) -> Result<(), RuntimeError> {
        let rhs = self.eval_expr(scope, value, false)?;
        let result = self.assign(scope, target, rhs, global);
        if result.is_err() && self.heap.is_live(rhs) {
            self.heap.discard(rhs)?;
        }
        result
    }

    /// Declare on first use; otherwise copy a fresh value into the target's
    /// root, or redirect the root when the right-hand side is an alias.
    fn assign(
        &mut self,
        scope: ScopeId,
        target: &LValue,
        rhs: RefId,
        global: bool,
    ) -> Result<(), RuntimeError> {
        let home = if global { self.global } else { scope };
        if target.is_plain() && self.scopes.find(home, &target.name)?.is_none() {
            self.heap.anchor(rhs, home)?;
            self.scopes.declare(home, &target.name, rhs)?;
            return Ok(());
        }

        // Only the base name is looked up in `home`; indices still see locals.
        let base = self.scopes.lookup(home, &target.name)?;
        let lvalue = self.walk_accessors(scope, base, &target.accessors)?;
        if self.heap.is_root(rhs)? {
            let value = self.heap.take_value(rhs)?;
            let root = self.heap.resolve_root(lvalue)?;
            self.heap.set_value(root, value)?;
            self.heap.anchor_payload(root, home)?;
        } else if let Some(aliased) = self.heap.alias_target(rhs)? {
            self.heap.rebind(lvalue, aliased)?;
        }
        self.heap.discard(rhs)?;
        Ok(())
    }

    /// Walk a name and its accessors down to the reference they denote.
    fn resolve_lvalue(&mut self, scope: ScopeId, target: &LValue) -> Result<RefId, RuntimeError> {
        let base = self.scopes.lookup(scope, &target.name)?;
        self.walk_accessors(scope, base, &target.accessors)
    }

    fn walk_accessors(
        &mut self,
        scope: ScopeId,
        base: RefId,
        accessors: &[Accessor],
    ) -> Result<RefId, RuntimeError> {
        let mut current = base;
        for accessor in accessors {
            current = match accessor {
                Accessor::Property { name, .. } => match self.heap.value(current)? {
                    Value::Struct(s) => *s.props.get(name).ok_or_else(|| {
                        RuntimeError::name_error(format!(
                            "struct {} has no property '{}'",
                            s.type_name, name
                        ))
                    })?,
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "cannot read property '{}' of {}",
                            name,
                            other.type_name()
                        )))
                    }
                },
                Accessor::Index { index, .. } => {
                    // The index may overwrite the array holding `current`.
                    let position = if current == base {
                        self.eval_index(scope, index)?
                    } else {
                        let pin = self.heap.alloc_alias(current)?;
                        let position = self.eval_index(scope, index);
                        self.heap.discard(pin)?;
                        position?
                    };
                    let container = self.heap.value(current)?;
                    if !matches!(container, Value::Array(_)) {
                        return Err(RuntimeError::type_mismatch(format!(
                            "cannot index into a value of type {}",
                            container.type_name()
                        )));
                    }
                    let length = container.length();
                    if position < 0.0 || position.fract() != 0.0 || position >= length as f64 {
                        return Err(RuntimeError::IndexOutOfRange {
                            index: position,
                            length,
                        });
                    }
                    container.iterate(position as usize)?
                }
            };
        }
        Ok(current)
    }

    fn eval_index(&mut self, scope: ScopeId, index: &Expr) -> Result<f64, RuntimeError> {
        let temp = self.eval_expr(scope, index, false)?;
        let value = self.heap.value(temp)?;
        let position = value.as_number().ok_or_else(|| {
            RuntimeError::type_mismatch(format!("array index must be a number, got {}", value.type_name()))
        });
        self.heap.discard(temp)?;
        position
    }

    fn eval_condition(&mut self, scope: ScopeId, condition: &Expr) -> Result<bool, RuntimeError> {
        let temp = self.eval_expr(scope, condition, false)?;
        let value = self.heap.value(temp)?;
        let truth = value.as_number().map(|n| n != 0.0).ok_or_else(|| {
            RuntimeError::type_mismatch(format!("condition must be a number, got {}", value.type_name()))
        });
        self.heap.discard(temp)?;
        truth
    }

    // ── Expression evaluation ───────────────────────────────────────────

    /// Evaluate to a fresh, unanchored reference. Arrays (and anything when
    /// `force_ref` is set) come back as aliases of the named storage.
    fn eval_expr(&mut self, scope: ScopeId, expr: &Expr, force_ref: bool) -> Result<RefId, RuntimeError> {
        match expr {
            Expr::Literal { value, .. } => {
                let value = match value {
                    Literal::Null => Value::Null,
                    Literal::Number(n) => Value::Number(*n),
                    Literal::Char(c) => Value::Char(*c),
                    Literal::Text(text) => Value::from_text(&mut self.heap, text),
                };
                Ok(self.heap.alloc_root(value))
            }

            Expr::Identifier { target, .. } => {
                let lvalue = self.resolve_lvalue(scope, target)?;
                self.read_lvalue(lvalue, force_ref)
            }

            Expr::ReferenceOf { target, .. } => {
                let lvalue = self.resolve_lvalue(scope, target)?;
                Ok(self.heap.alloc_alias(lvalue)?)
            }

            Expr::Unary {
                op: op @ (UnaryOp::Increment | UnaryOp::Decrement),
                operand,
                postfix,
                ..
            } => {
                let Expr::Identifier { target, .. } = operand.as_ref() else {
                    return Err(RuntimeError::type_mismatch(format!(
                        "'{}' needs a variable operand",
                        op.symbol()
                    )));
                };
                let lvalue = self.resolve_lvalue(scope, target)?;
                let previous = operators::apply_step(*op, self.heap.value_mut(lvalue)?)?;
                let result = if *postfix {
                    previous
                } else {
                    self.heap.value(lvalue)?.clone()
                };
                Ok(self.heap.alloc_root(result))
            }

            Expr::Unary { op, operand, .. } => {
                let temp = self.eval_expr(scope, operand, true)?;
                let result = operators::apply_unary(*op, self.heap.value(temp)?);
                self.heap.discard(temp)?;
                Ok(self.heap.alloc_root(result?))
            }

            Expr::Binary {
                left, op, right, ..
            } => {
                let lhs = self.eval_expr(scope, left, false)?;
                let rhs = match self.eval_expr(scope, right, false) {
                    Ok(rhs) => rhs,
                    Err(e) => {
                        self.heap.discard(lhs)?;
                        return Err(e);
                    }
                };
                let result = if operators::is_concat(&self.heap, *op, lhs, rhs)? {
                    operators::concat(&mut self.heap, lhs, rhs)
                } else {
                    operators::apply_binary(&self.heap, *op, lhs, rhs)
                };
                self.heap.discard(lhs)?;
                self.heap.discard(rhs)?;
                Ok(self.heap.alloc_root(result?))
            }

            Expr::NewStruct { name, .. } => {
                let proto = self
                    .structs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::name_error(format!("struct '{}' is not defined", name)))?;
                let props = proto
                    .properties
                    .iter()
                    .map(|prop| (prop.clone(), self.heap.alloc_root(Value::Null)))
                    .collect();
                Ok(self.heap.alloc_root(Value::Struct(StructValue {
                    type_name: proto.name.clone(),
                    props,
                })))
            }

            Expr::NewArray { elements, .. } => {
                let items = self.eval_args(scope, elements)?;
                Ok(self.heap.alloc_root(Value::Array(items)))
            }

            Expr::Call { name, args, .. } => self.call(scope, name, args),
        }
    }

    /// Produce the temporary an identifier evaluates to.
    fn read_lvalue(&mut self, lvalue: RefId, force_ref: bool) -> Result<RefId, RuntimeError> {
        if force_ref {
            return Ok(self.heap.alloc_alias(lvalue)?);
        }
        match self.heap.value(lvalue)? {
            Value::Array(_) => Ok(self.heap.alloc_alias(lvalue)?),
            Value::Struct(s) => {
                let s = s.clone();
                let copy = self.detached_copy(&s)?;
                Ok(self.heap.alloc_root(Value::Struct(copy)))
            }
            scalar => {
                let scalar = scalar.clone();
                Ok(self.heap.alloc_root(scalar))
            }
        }
    }

    /// A fresh property set: compound properties keep aliasing the original
    /// storage, scalar properties are copied.
    fn detached_copy(&mut self, source: &StructValue) -> Result<StructValue, RuntimeError> {
        let mut props = indexmap::IndexMap::with_capacity(source.props.len());
        for (name, prop) in &source.props {
            let value = self.heap.value(*prop)?;
            let slot = if value.is_compound() {
                self.heap.alloc_alias(*prop)?
            } else {
                let scalar = value.clone();
                self.heap.alloc_root(scalar)
            };
            props.insert(name.clone(), slot);
        }
        Ok(StructValue {
            type_name: source.type_name.clone(),
            props,
        })
    }

    /// Evaluate call arguments or array elements left to right.
    fn eval_args(&mut self, scope: ScopeId, exprs: &[Expr]) -> Result<Vec<RefId>, RuntimeError> {
        let mut temps = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.eval_expr(scope, expr, false) {
                Ok(temp) => temps.push(temp),
                Err(e) => {
                    for temp in temps {
                        self.heap.discard(temp)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(temps)
    }

    // ── Calls ───────────────────────────────────────────────────────────

    fn call(&mut self, scope: ScopeId, name: &str, args: &[Expr]) -> Result<RefId, RuntimeError> {
        if let Some(proto) = self.functions.get(name).cloned() {
            return self.call_function(scope, &proto, args);
        }
        let Some(builtin) = builtins::lookup(name) else {
            return Err(RuntimeError::name_error(format!("function '{}' is not defined", name)));
        };
        let temps = self.eval_args(scope, args)?;
        let result = builtin(self, &temps);
        for temp in temps {
            if self.heap.is_live(temp) {
                self.heap.discard(temp)?;
            }
        }
        Ok(self.heap.alloc_root(result?))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(function = %proto.name, depth = self.call_depth))]
    fn call_function(
        &mut self,
        caller: ScopeId,
        proto: &FunctionProto,
        args: &[Expr],
    ) -> Result<RefId, RuntimeError> {
        if args.len() != proto.params.len() {
            return Err(RuntimeError::ArityMismatch {
                name: proto.name.clone(),
                expected: proto.params.len(),
                found: args.len(),
            });
        }
        if self.call_depth >= self.config.max_call_depth {
            return Err(RuntimeError::RecursionLimit(self.config.max_call_depth));
        }

        let temps = self.eval_args(caller, args)?;
        let callee = self.scopes.create(Some(self.global));
        for (param, temp) in proto.params.iter().zip(temps) {
            self.bind_parameter(callee, param, temp)?;
        }

        self.call_depth += 1;
        let mut frame = Activation::new(callee);
        let outcome = self.exec_block(&mut frame, &proto.body);
        self.call_depth -= 1;

        let ret = frame.return_value.take();
        let teardown = self.teardown(callee, caller, proto, ret);
        match outcome.and(teardown) {
            Ok(()) => match ret {
                Some(ret) => Ok(ret),
                None => Ok(self.heap.alloc_root(Value::Null)),
            },
            Err(e) => {
                if let Some(ret) = ret {
                    if self.heap.is_live(ret) {
                        self.heap.discard(ret)?;
                    }
                }
                Err(e)
            }
        }
    }

    /// Root arguments move into the callee; aliases get a callee-owned alias
    /// of the same chain.
    fn bind_parameter(&mut self, callee: ScopeId, name: &str, temp: RefId) -> Result<(), RuntimeError> {
        let bound = match self.heap.alias_target(temp)? {
            None => temp,
            Some(target) => {
                let alias = self.heap.alloc_alias(target)?;
                self.heap.discard(temp)?;
                alias
            }
        };
        self.heap.anchor(bound, callee)?;
        self.scopes.declare(callee, name, bound)
    }

    /// Repair everything that can outlive the callee, then free its storage.
    /// The callee scope is released even when repair fails.
    fn teardown(
        &mut self,
        callee: ScopeId,
        caller: ScopeId,
        proto: &FunctionProto,
        ret: Option<RefId>,
    ) -> Result<(), RuntimeError> {
        let repaired = self.repair_escapes(callee, caller, proto, ret);
        let released = self.heap.release_scope(callee);
        let destroyed = self.scopes.destroy(callee);
        trace!(scope = %callee, released, "destroyed call scope");
        repaired?;
        Ok(destroyed?)
    }

    fn repair_escapes(
        &mut self,
        callee: ScopeId,
        caller: ScopeId,
        proto: &FunctionProto,
        ret: Option<RefId>,
    ) -> Result<(), RuntimeError> {
        if let Some(ret) = ret {
            if self.heap.check_escape(ret, callee, true)? == Escape::Doomed {
                return Err(EngineFault::UnrepairableEscape.into());
            }
        }
        for param in &proto.params {
            if let Some(bound) = self.scopes.find(callee, param)? {
                // A parameter that is itself callee storage simply dies.
                self.heap.check_escape(bound, callee, true)?;
                self.heap.anchor(bound, caller)?;
            }
        }
        for bound in self.scopes.bindings(self.global)? {
            if self.heap.check_escape(bound, callee, true)? == Escape::Doomed {
                return Err(EngineFault::UnrepairableEscape.into());
            }
            self.heap.anchor(bound, self.global)?;
        }
        Ok(())
    }

    pub(crate) fn write_output(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|e| RuntimeError::Io(e.to_string()))
    }
}

fn check_unique(names: &[String], what: &str) -> Result<(), RuntimeError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(RuntimeError::AlreadyDefined(format!("{} '{}'", what, name)));
        }
    }
    Ok(())
}
