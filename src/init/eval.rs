//! Abstract evaluator
//!
//! Interprets class bodies against (environment, heap, receiver, owning
//! class). Nothing is executed: every expression yields an abstract
//! [`Value`] and the [`Effect`]s its evaluation can cause.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::ast::{Block, ClassItem, Expr, ExprKind, FieldDef, MethodDef, Param, Stmt};
use crate::common::{NodeId, Span};
use crate::config::CheckerConfig;

use super::effects::{Effect, EvalResult};
use super::env::{Binding, Env};
use super::error::AnalysisFault;
use super::heap::Heap;
use super::index::{self, ClassTable, Member, Templates};
use super::value::{Address, ClassId, Closure, Value};

type Eval = Result<EvalResult, AnalysisFault>;

/// Counters for one checker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Lazy member bodies actually evaluated
    pub lazy_evaluations: usize,
    pub cache_hits: usize,
    /// Method, local method and closure bodies entered
    pub invocations: usize,
    /// Objects allocated in the heap
    pub objects: usize,
}

/// Effects found for one class
#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub class: String,
    /// Top-level effects, deduplicated, in discovery order
    pub effects: Vec<Effect>,
    pub stats: RunStats,
}

impl ClassReport {
    pub fn is_clean(&self) -> bool {
        self.effects.is_empty()
    }

    /// Leaf violations behind all top-level effects
    pub fn root_causes(&self) -> Vec<&Effect> {
        self.effects.iter().flat_map(Effect::root_causes).collect()
    }
}

/// Evaluated argument
#[derive(Debug, Clone)]
struct Arg {
    value: Value,
    span: Span,
}

/// How a member was reached; decides dispatch and the missing-field effect
#[derive(Debug, Clone, Copy)]
enum Reach {
    /// Bare name resolved in the member scope of the class
    Bare(ClassId),
    /// `this.m` written in the class
    This(ClassId),
    /// `super.m` written in the class
    Super(ClassId),
    /// Any other receiver
    Explicit,
}

/// Result of member lookup on an object
enum Target<'a> {
    /// `is_static` when dispatch cannot be redirected by an override
    Found {
        owner: ClassId,
        member: Member<'a>,
        is_static: bool,
    },
    /// May be inherited from a class outside the program
    External,
    Missing,
}

/// What a failed promotion reports
enum Leak<'s> {
    Argument { callee: &'s str, index: usize },
    Assignment { field: &'s str },
}

impl Leak<'_> {
    fn effect(&self, span: Span) -> Effect {
        match self {
            Leak::Argument { callee, index } => Effect::LeakedArgument {
                callee: callee.to_string(),
                index: *index,
                span,
            },
            Leak::Assignment { field } => Effect::LeakedAssignment {
                field: field.to_string(),
                span,
            },
        }
    }
}

/// One checker run: owns the heap, the cache, the lazy memo table and the
/// in-progress set
pub struct InitChecker<'a> {
    table: &'a ClassTable<'a>,
    config: &'a CheckerConfig,
    heap: Heap,
    /// `(receiver, node) -> (value, epoch it was computed at)`
    cache: FxHashMap<(Value, NodeId), (Value, u64)>,
    /// Cache entries whose evaluation has not finished; their seed is served
    /// to re-entrant visits
    evaluating: FxHashSet<(Value, NodeId)>,
    /// Refinements of local `var` bindings
    local_writes: u64,
    /// Members, closures and constructors currently being evaluated
    in_progress: FxHashSet<(Value, NodeId)>,
    /// `(receiver, lazy member) -> forced result`
    lazy_memo: FxHashMap<(Value, NodeId), EvalResult>,
    root: Rc<Env<'a>>,
    templates: Templates<'a>,
    member_envs: FxHashMap<ClassId, Rc<Env<'a>>>,
    /// Environment captured by each closure, keyed `(receiver, closure node)`
    closure_envs: FxHashMap<(Value, NodeId), Rc<Env<'a>>>,
    closures: FxHashMap<NodeId, (&'a [Param], &'a Expr)>,
    stats: RunStats,
}

impl<'a> InitChecker<'a> {
    pub fn new(table: &'a ClassTable<'a>, config: &'a CheckerConfig) -> Self {
        let mut templates = Templates::default();
        let root = index::index_program(table, &mut templates);
        Self {
            table,
            config,
            heap: Heap::new(),
            cache: FxHashMap::default(),
            evaluating: FxHashSet::default(),
            local_writes: 0,
            in_progress: FxHashSet::default(),
            lazy_memo: FxHashMap::default(),
            root,
            templates,
            member_envs: FxHashMap::default(),
            closure_envs: FxHashMap::default(),
            closures: FxHashMap::default(),
            stats: RunStats::default(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            objects: self.heap.len(),
            ..self.stats
        }
    }

    /// Address standing for an arbitrary instance of `class` whose outer
    /// object is fully initialized
    pub fn root_address(&self, class: ClassId) -> Address {
        let args: Vec<Value> = self
            .table
            .get(class)
            .def
            .params
            .iter()
            .map(|p| if p.partial { Value::Cold } else { Value::Hot })
            .collect();
        Address::new(class, &args, Value::Hot)
    }

    /// Run the constructor of `class` on its root address
    pub fn check_class(&mut self, class: ClassId) -> Result<ClassReport, AnalysisFault> {
        let table = self.table;
        let name = table.get(class).name();
        tracing::debug!("checking class {}", name);

        let addr = self.root_address(class);
        self.heap.allocate(&addr);
        let args = addr.args.clone();
        let found = self.construct(&addr, class, Value::Hot, &args)?;

        let mut effects: Vec<Effect> = Vec::with_capacity(found.len());
        for effect in found {
            if !effects.contains(&effect) {
                effects.push(effect);
            }
        }
        tracing::debug!("class {}: {} effect(s)", name, effects.len());

        Ok(ClassReport {
            class: name.to_string(),
            effects,
            stats: self.stats(),
        })
    }

    // ==================== CONSTRUCTION ====================

    /// Run `class`'s part of the constructor of `addr`: parameters, then the
    /// parent constructor, then the body in order
    fn construct(
        &mut self,
        addr: &Address,
        class: ClassId,
        outer: Value,
        args: &[Value],
    ) -> Result<Vec<Effect>, AnalysisFault> {
        let table = self.table;
        let info = table.get(class);
        let this = Value::Addr(addr.clone());

        // Cyclic `extends` chains
        let key = (this.clone(), info.def.id);
        if !self.in_progress.insert(key.clone()) {
            return Ok(Vec::new());
        }
        tracing::trace!("construct {} on {}", info.name(), this);

        self.heap.set_outer(addr, class, outer);
        for (i, param) in info.def.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or(Value::Hot);
            self.heap.update_field(addr, class, &param.name, value);
        }

        let env = self.member_env(class);
        let mut effects = Vec::new();

        if let Some(parent_ref) = &info.def.parent {
            let parent_outer = match info.parent {
                Some(parent) => {
                    let outer = self.outer_for(&this, class, parent)?;
                    self.heap.set_outer(addr, parent, outer.clone());
                    outer
                }
                None => Value::Hot,
            };

            let mut parent_args = Vec::with_capacity(parent_ref.args.len());
            for arg in &parent_ref.args {
                let value = self.eval(arg, &env, &this, class)?.take_value(&mut effects);
                parent_args.push(Arg {
                    value,
                    span: arg.span,
                });
            }

            let callee = format!("new {}", parent_ref.name);
            match info.parent {
                Some(parent) => {
                    let params = &table.get(parent).def.params;
                    let bound = self.bind_args(params, &parent_args, &callee, true, &mut effects)?;
                    effects.extend(self.construct(addr, parent, parent_outer, &bound)?);
                }
                None => {
                    for (index, arg) in parent_args.iter().enumerate() {
                        let leak = Leak::Argument {
                            callee: &callee,
                            index,
                        };
                        effects.extend(self.promote(&arg.value, arg.span, &leak)?);
                    }
                }
            }
        }

        for item in &info.def.body {
            match item {
                ClassItem::Field(field) => {
                    if !field.modifiers.is_lazy {
                        effects.extend(self.init_field(addr, field, &env, &this, class)?);
                    }
                }
                ClassItem::Stmt(stmt) => self.exec_stmt(stmt, &env, &this, class, &mut effects)?,
                ClassItem::Method(_) | ClassItem::Class(_) => {}
            }
        }

        self.in_progress.remove(&key);
        Ok(effects)
    }

    fn init_field(
        &mut self,
        addr: &Address,
        field: &'a FieldDef,
        env: &Rc<Env<'a>>,
        this: &Value,
        class: ClassId,
    ) -> Result<Vec<Effect>, AnalysisFault> {
        // Abstract fields stay unassigned
        let Some(init) = &field.value else {
            return Ok(Vec::new());
        };
        let mut effects = Vec::new();
        let value = self.eval(init, env, this, class)?.take_value(&mut effects);
        let stored = if field.modifiers.partial {
            value
        } else {
            let leak = Leak::Assignment { field: &field.name };
            effects.extend(self.promote(&value, init.span, &leak)?);
            Value::Hot
        };
        self.heap.update_field(addr, class, &field.name, stored);
        Ok(effects)
    }

    /// `new C(args)`
    fn instantiate(
        &mut self,
        expr: &'a Expr,
        class_name: &str,
        args: &'a [Expr],
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
    ) -> Eval {
        let mut effects = Vec::new();
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg, env, this, klass)?.take_value(&mut effects);
            values.push(Arg {
                value,
                span: arg.span,
            });
        }

        let callee = format!("new {}", class_name);
        let class = match env.lookup(class_name) {
            Some((Binding::Class(id), _)) => id,
            Some(_) => {
                return Err(AnalysisFault::NotAClass {
                    name: class_name.to_string(),
                    span: expr.span,
                });
            }
            None => {
                // Class outside the program: arguments escape
                for (index, arg) in values.iter().enumerate() {
                    let leak = Leak::Argument {
                        callee: &callee,
                        index,
                    };
                    effects.extend(self.promote(&arg.value, arg.span, &leak)?);
                }
                return Ok(EvalResult::new(Value::Hot, effects));
            }
        };

        let table = self.table;
        let info = table.get(class);
        let bound = self.bind_args(&info.def.params, &values, &callee, true, &mut effects)?;
        let outer = self.outer_for(this, klass, class)?;

        if outer.is_hot() && bound.iter().all(Value::is_hot) && !info.is_local {
            // Checked on its own
            return Ok(EvalResult::new(Value::Hot, effects));
        }

        let addr = Address::new(class, &bound, outer);
        let object = Value::Addr(addr.clone());
        if !self.heap.allocate(&addr) {
            return Ok(EvalResult::new(object, effects));
        }
        tracing::trace!("allocated {}", object);

        // The address may have bounded the outer chain
        let outer = (*addr.outer).clone();
        let ctor_args = addr.args.clone();
        let nested = self.construct(&addr, class, outer, &ctor_args)?;
        if !nested.is_empty() {
            effects.push(Effect::Call {
                method: callee,
                span: expr.span,
                effects: nested,
            });
        }
        Ok(EvalResult::new(object, effects))
    }

    /// Outer `this` of a new `class` instance created by code of `klass`
    /// running on `this`
    fn outer_for(&self, this: &Value, klass: ClassId, class: ClassId) -> Result<Value, AnalysisFault> {
        let Some(enclosing) = self.table.get(class).enclosing else {
            return Ok(Value::Hot);
        };
        if self.enclosing_chain(klass).contains(&enclosing) {
            self.resolve_this(this, klass, enclosing)
        } else {
            // Instance of an unrelated enclosing class
            Ok(Value::Cold)
        }
    }

    fn enclosing_chain(&self, klass: ClassId) -> Vec<ClassId> {
        let mut chain = Vec::new();
        let mut current = Some(klass);
        while let Some(id) = current {
            chain.push(id);
            current = self.table.get(id).enclosing;
        }
        chain
    }

    /// Value of `target.this` seen from code of `klass` running on `this`
    fn resolve_this(&self, this: &Value, klass: ClassId, target: ClassId) -> Result<Value, AnalysisFault> {
        if klass == target {
            return Ok(this.clone());
        }
        match this {
            Value::Hot | Value::Cold => Ok(this.clone()),
            Value::Addr(addr) => {
                let outer = self.heap.outer(addr, klass).cloned();
                match (outer, self.table.get(klass).enclosing) {
                    (Some(outer), Some(enclosing)) => self.resolve_this(&outer, enclosing, target),
                    _ => Err(AnalysisFault::MissingOuter {
                        target: self.table.get(target).name().to_string(),
                        from: self.table.get(klass).name().to_string(),
                    }),
                }
            }
            Value::Choice(set) => {
                let mut joined = Value::Hot;
                for alt in set {
                    joined = joined.join(&self.resolve_this(alt, klass, target)?);
                }
                Ok(joined)
            }
            Value::Fun(_) => Err(AnalysisFault::MissingOuter {
                target: self.table.get(target).name().to_string(),
                from: self.table.get(klass).name().to_string(),
            }),
        }
    }

    /// Member scope of `class`, built on first use
    fn member_env(&mut self, class: ClassId) -> Rc<Env<'a>> {
        if let Some(env) = self.member_envs.get(&class) {
            return Rc::clone(env);
        }
        let table = self.table;
        let info = table.get(class);
        if !self.templates.contains_key(&class) && !info.is_local {
            // Registers nested templates
            if let Some(enclosing) = info.enclosing {
                self.member_env(enclosing);
            }
        }
        let declared = self
            .templates
            .get(&class)
            .cloned()
            .unwrap_or_else(|| Rc::clone(&self.root));
        let env = index::index_class(table, class, &declared, &mut self.templates);
        self.member_envs.insert(class, Rc::clone(&env));
        env
    }

    // ==================== EVALUATION ====================

    /// Any stored field, outer or local `var` changed since `epoch`
    fn epoch(&self) -> u64 {
        self.heap.epoch() + self.local_writes
    }

    /// Evaluate `expr` with memoization on `(this, expr.id)`. An entry is
    /// reused while nothing it may have read has changed; a re-entrant visit
    /// sees the seed (`Hot`, or the previous value).
    pub fn eval(&mut self, expr: &'a Expr, env: &Rc<Env<'a>>, this: &Value, klass: ClassId) -> Eval {
        let key = (this.clone(), expr.id);
        let epoch = self.epoch();
        if let Some((value, computed)) = self.cache.get(&key) {
            if *computed == epoch || self.evaluating.contains(&key) {
                self.stats.cache_hits += 1;
                return Ok(EvalResult::of(value.clone()));
            }
        }

        let seed = self
            .cache
            .get(&key)
            .map_or(Value::Hot, |(value, _)| value.clone());
        self.cache.insert(key.clone(), (seed, epoch));
        self.evaluating.insert(key.clone());
        let result = self.eval_uncached(expr, env, this, klass);
        self.evaluating.remove(&key);

        let result = result?;
        // Stamped with the starting epoch: writes made while evaluating leave
        // the entry stale
        self.cache.insert(key, (result.value.clone(), epoch));
        Ok(result)
    }

    fn eval_uncached(&mut self, expr: &'a Expr, env: &Rc<Env<'a>>, this: &Value, klass: ClassId) -> Eval {
        match &expr.kind {
            ExprKind::Literal(_) => Ok(EvalResult::hot()),

            ExprKind::Ident(name) => self.eval_ident(name, expr.span, env, this, klass),

            ExprKind::This => Ok(EvalResult::of(this.clone())),

            ExprKind::OuterThis(name) => {
                let target = self
                    .enclosing_chain(klass)
                    .into_iter()
                    .find(|id| self.table.get(*id).name() == name)
                    .ok_or_else(|| AnalysisFault::UnresolvedName {
                        name: format!("{}.this", name),
                        span: expr.span,
                    })?;
                Ok(EvalResult::of(self.resolve_this(this, klass, target)?))
            }

            ExprKind::Super => Err(AnalysisFault::BareSuper { span: expr.span }),

            ExprKind::Select { receiver, name } => {
                let mut effects = Vec::new();
                let (recv, reach) = self.eval_receiver(receiver, env, this, klass, &mut effects)?;
                let result = self.select(&recv, name, reach, expr.span)?;
                Ok(prepend(effects, result))
            }

            ExprKind::Call { callee, args } => self.eval_call(expr, callee, args, env, this, klass),

            ExprKind::New { class, args } => self.instantiate(expr, class, args, env, this, klass),

            ExprKind::Assign { target, value } => self.eval_assign(expr, target, value, env, this, klass),

            ExprKind::Binary { left, right, .. } => {
                let mut effects = Vec::new();
                self.eval(left, env, this, klass)?.take_value(&mut effects);
                self.eval(right, env, this, klass)?.take_value(&mut effects);
                Ok(EvalResult::new(Value::Hot, effects))
            }

            ExprKind::Unary { expr: operand, .. } => {
                let result = self.eval(operand, env, this, klass)?;
                Ok(EvalResult::new(Value::Hot, result.effects))
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut effects = Vec::new();
                self.eval(condition, env, this, klass)?.take_value(&mut effects);
                let then_env = Env::child(env);
                let mut value = self.eval(then_branch, &then_env, this, klass)?.take_value(&mut effects);
                if let Some(else_branch) = else_branch {
                    let else_env = Env::child(env);
                    let other = self.eval(else_branch, &else_env, this, klass)?.take_value(&mut effects);
                    value = value.join(&other);
                }
                Ok(EvalResult::new(value, effects))
            }

            ExprKind::While { condition, body } => {
                let mut effects = Vec::new();
                self.eval(condition, env, this, klass)?.take_value(&mut effects);
                let body_env = Env::child(env);
                self.eval(body, &body_env, this, klass)?.take_value(&mut effects);
                Ok(EvalResult::new(Value::Hot, effects))
            }

            ExprKind::Block(block) => self.eval_block(block, env, this, klass),

            ExprKind::Closure { params, body } => {
                self.closures.insert(expr.id, (params.as_slice(), &**body));
                self.closure_envs
                    .insert((this.clone(), expr.id), Rc::clone(env));
                Ok(EvalResult::of(Value::Fun(Closure {
                    expr: expr.id,
                    this: Box::new(this.clone()),
                    class: klass,
                })))
            }

            ExprKind::Try {
                body,
                handlers,
                finalizer,
            } => {
                let mut effects = Vec::new();
                let mut value = self.eval_block(body, env, this, klass)?.take_value(&mut effects);
                for handler in handlers {
                    let scope = Env::child(env);
                    scope.define_local(handler.param.name.as_str(), Value::Hot, false);
                    let handled = self.eval_block(&handler.body, &scope, this, klass)?.take_value(&mut effects);
                    value = value.join(&handled);
                }
                if let Some(finalizer) = finalizer {
                    self.eval_block(finalizer, env, this, klass)?.take_value(&mut effects);
                }
                Ok(EvalResult::new(value, effects))
            }

            ExprKind::Return(value) => match value {
                Some(value) => {
                    let result = self.eval(value, env, this, klass)?;
                    Ok(EvalResult::new(Value::Hot, result.effects))
                }
                None => Ok(EvalResult::hot()),
            },
        }
    }

    fn eval_block(&mut self, block: &'a Block, env: &Rc<Env<'a>>, this: &Value, klass: ClassId) -> Eval {
        let scope = Env::child(env);
        let locals = index::index_block(self.table, block, klass, &scope, &mut self.templates);
        for class in locals {
            // New declaring environment for this activation
            self.member_envs.remove(&class);
        }

        let tail = block.tail().map(|expr| expr.id);
        let mut effects = Vec::new();
        let mut value = Value::Hot;
        for stmt in &block.stmts {
            match stmt {
                Stmt::Expr { expr, .. } if Some(expr.id) == tail => {
                    value = self.eval(expr, &scope, this, klass)?.take_value(&mut effects);
                }
                _ => self.exec_stmt(stmt, &scope, this, klass, &mut effects)?,
            }
        }
        Ok(EvalResult::new(value, effects))
    }

    fn exec_stmt(
        &mut self,
        stmt: &'a Stmt,
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
        effects: &mut Vec<Effect>,
    ) -> Result<(), AnalysisFault> {
        match stmt {
            Stmt::Let {
                mutable,
                name,
                value,
                ..
            } => {
                let value = self.eval(value, env, this, klass)?.take_value(effects);
                env.define_local(name.as_str(), value, *mutable);
            }
            Stmt::Expr { expr, .. } => {
                self.eval(expr, env, this, klass)?.take_value(effects);
            }
            // Registered by indexing
            Stmt::Def(_) | Stmt::Class(_) | Stmt::Empty => {}
        }
        Ok(())
    }

    fn eval_ident(&mut self, name: &str, span: Span, env: &Rc<Env<'a>>, this: &Value, klass: ClassId) -> Eval {
        match env.lookup(name) {
            Some((Binding::Local { value, .. }, _)) => Ok(EvalResult::of(value)),
            Some((Binding::Member(scope_class), _)) => {
                let recv = self.resolve_this(this, klass, scope_class)?;
                self.select(&recv, name, Reach::Bare(scope_class), span)
            }
            Some((Binding::LocalMethod { def, owner }, scope)) => {
                let recv = self.resolve_this(this, klass, owner)?;
                self.call_local(def, owner, &scope, &recv, &[], span)
            }
            Some((Binding::Class(_), _)) => Err(AnalysisFault::ClassAsValue {
                name: name.to_string(),
                span,
            }),
            None => match self.external_scope(klass) {
                Some(scope_class) => {
                    let recv = self.resolve_this(this, klass, scope_class)?;
                    self.select(&recv, name, Reach::Bare(scope_class), span)
                }
                None => Err(AnalysisFault::UnresolvedName {
                    name: name.to_string(),
                    span,
                }),
            },
        }
    }

    /// Innermost class around `klass` that may inherit members from outside
    /// the program
    fn external_scope(&self, klass: ClassId) -> Option<ClassId> {
        self.enclosing_chain(klass)
            .into_iter()
            .find(|id| self.has_external_ancestor(*id))
    }

    fn has_external_ancestor(&self, class: ClassId) -> bool {
        self.table
            .ancestors(class)
            .last()
            .is_some_and(|id| self.table.get(*id).has_external_parent())
    }

    /// Evaluate the receiver of a select or call
    fn eval_receiver(
        &mut self,
        receiver: &'a Expr,
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
        effects: &mut Vec<Effect>,
    ) -> Result<(Value, Reach), AnalysisFault> {
        match &receiver.kind {
            ExprKind::Super => Ok((this.clone(), Reach::Super(klass))),
            ExprKind::This => Ok((this.clone(), Reach::This(klass))),
            _ => {
                let value = self.eval(receiver, env, this, klass)?.take_value(effects);
                Ok((value, Reach::Explicit))
            }
        }
    }

    fn eval_args(
        &mut self,
        args: &'a [Expr],
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
        effects: &mut Vec<Effect>,
    ) -> Result<Vec<Arg>, AnalysisFault> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg, env, this, klass)?.take_value(effects);
            values.push(Arg {
                value,
                span: arg.span,
            });
        }
        Ok(values)
    }

    fn eval_call(
        &mut self,
        expr: &'a Expr,
        callee: &'a Expr,
        args: &'a [Expr],
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
    ) -> Eval {
        let mut effects = Vec::new();
        let result = match &callee.kind {
            ExprKind::Select { receiver, name } => {
                let (recv, reach) = self.eval_receiver(receiver, env, this, klass, &mut effects)?;
                let args = self.eval_args(args, env, this, klass, &mut effects)?;
                self.call(&recv, name, reach, &args, expr.span)?
            }
            ExprKind::Ident(name) => match env.lookup(name) {
                Some((Binding::Local { value, .. }, _)) => {
                    let args = self.eval_args(args, env, this, klass, &mut effects)?;
                    self.call(&value, "apply", Reach::Explicit, &args, expr.span)?
                }
                Some((Binding::Member(scope_class), _)) => {
                    let recv = self.resolve_this(this, klass, scope_class)?;
                    let args = self.eval_args(args, env, this, klass, &mut effects)?;
                    self.call(&recv, name, Reach::Bare(scope_class), &args, expr.span)?
                }
                Some((Binding::LocalMethod { def, owner }, scope)) => {
                    let recv = self.resolve_this(this, klass, owner)?;
                    let args = self.eval_args(args, env, this, klass, &mut effects)?;
                    self.call_local(def, owner, &scope, &recv, &args, expr.span)?
                }
                Some((Binding::Class(_), _)) => {
                    return Err(AnalysisFault::ClassAsValue {
                        name: name.clone(),
                        span: callee.span,
                    });
                }
                None => match self.external_scope(klass) {
                    Some(scope_class) => {
                        let recv = self.resolve_this(this, klass, scope_class)?;
                        let args = self.eval_args(args, env, this, klass, &mut effects)?;
                        self.call(&recv, name, Reach::Bare(scope_class), &args, expr.span)?
                    }
                    None => {
                        return Err(AnalysisFault::UnresolvedName {
                            name: name.clone(),
                            span: callee.span,
                        });
                    }
                },
            },
            _ => {
                let value = self.eval(callee, env, this, klass)?.take_value(&mut effects);
                let args = self.eval_args(args, env, this, klass, &mut effects)?;
                self.call(&value, "apply", Reach::Explicit, &args, expr.span)?
            }
        };
        Ok(prepend(effects, result))
    }

    fn eval_assign(
        &mut self,
        expr: &'a Expr,
        target: &'a Expr,
        value: &'a Expr,
        env: &Rc<Env<'a>>,
        this: &Value,
        klass: ClassId,
    ) -> Eval {
        let mut effects = Vec::new();
        match &target.kind {
            ExprKind::Ident(name) => match env.lookup(name) {
                Some((Binding::Local { .. }, scope)) => {
                    let rhs = self.eval(value, env, this, klass)?.take_value(&mut effects);
                    if scope.assign_local(name, &rhs) == Some(true) {
                        self.local_writes += 1;
                    }
                }
                Some((Binding::Member(scope_class), _)) => {
                    let recv = self.resolve_this(this, klass, scope_class)?;
                    let rhs = self.eval(value, env, this, klass)?.take_value(&mut effects);
                    effects.extend(self.assign_field(&recv, name, &rhs, value.span)?);
                }
                Some(_) => return Err(AnalysisFault::InvalidAssignTarget { span: target.span }),
                None => {
                    return Err(AnalysisFault::UnresolvedName {
                        name: name.clone(),
                        span: target.span,
                    });
                }
            },
            ExprKind::Select { receiver, name } => {
                let (recv, _) = self.eval_receiver(receiver, env, this, klass, &mut effects)?;
                let rhs = self.eval(value, env, this, klass)?.take_value(&mut effects);
                effects.extend(self.assign_field(&recv, name, &rhs, value.span)?);
            }
            _ => return Err(AnalysisFault::InvalidAssignTarget { span: expr.span }),
        }
        Ok(EvalResult::new(Value::Hot, effects))
    }

    /// Store `value` into `recv.field`
    fn assign_field(&mut self, recv: &Value, field: &str, value: &Value, span: Span) -> Result<Vec<Effect>, AnalysisFault> {
        let leak = Leak::Assignment { field };
        match recv {
            Value::Addr(addr) => {
                let found = self.table.lookup_member(addr.class, field);
                let owner = found.map_or(addr.class, |(owner, _)| owner);
                if found.is_some_and(|(_, member)| member.is_partial()) {
                    self.heap.update_field(addr, owner, field, value.clone());
                    Ok(Vec::new())
                } else {
                    let effects = self.promote(value, span, &leak)?;
                    self.heap.update_field(addr, owner, field, Value::Hot);
                    Ok(effects)
                }
            }
            Value::Choice(set) => {
                let mut effects = Vec::new();
                for alt in set {
                    effects.extend(self.assign_field(alt, field, value, span)?);
                }
                Ok(effects)
            }
            Value::Hot | Value::Cold => self.promote(value, span, &leak),
            Value::Fun(_) => Err(AnalysisFault::ClosureSelect {
                member: field.to_string(),
                span,
            }),
        }
    }

    // ==================== SELECT / CALL ====================

    fn select(&mut self, recv: &Value, name: &str, reach: Reach, span: Span) -> Eval {
        match recv {
            Value::Hot => Ok(EvalResult::hot()),
            Value::Cold => Ok(EvalResult::with_effect(
                Value::Hot,
                Effect::AccessCold {
                    field: name.to_string(),
                    span,
                },
            )),
            Value::Addr(addr) => self.select_addr(addr, name, reach, span),
            Value::Fun(_) if name == "apply" => Ok(EvalResult::of(recv.clone())),
            Value::Fun(_) => Err(AnalysisFault::ClosureSelect {
                member: name.to_string(),
                span,
            }),
            Value::Choice(set) => {
                let mut result = EvalResult::of(Value::Hot);
                for alt in set {
                    result = result.join(self.select(alt, name, reach, span)?);
                }
                Ok(result)
            }
        }
    }

    fn select_addr(&mut self, addr: &Address, name: &str, reach: Reach, span: Span) -> Eval {
        let this = Value::Addr(addr.clone());
        match self.dispatch(addr.class, name, reach) {
            Target::Found {
                owner,
                member: Member::Method(def),
                is_static,
            } => self.call_method(&this, addr.class, owner, def, is_static, &[], span),
            Target::Found {
                owner,
                member: Member::Lazy(field),
                ..
            } => self.force(&this, owner, field, span),
            Target::Found { owner, .. } => match self.heap.field(addr, owner, name) {
                Some(value) => Ok(EvalResult::of(value.clone())),
                None => {
                    let field = name.to_string();
                    let effect = match reach {
                        Reach::Bare(_) => Effect::UninitializedAccess { field, span },
                        _ => Effect::NotYetAssignedField { field, span },
                    };
                    Ok(EvalResult::with_effect(Value::Hot, effect))
                }
            },
            Target::External => self.unknown_target(name, &[], span),
            Target::Missing => Err(AnalysisFault::UnresolvedName {
                name: name.to_string(),
                span,
            }),
        }
    }

    fn call(&mut self, recv: &Value, name: &str, reach: Reach, args: &[Arg], span: Span) -> Eval {
        match recv {
            Value::Hot => {
                let effects = self.promote_args(args, name)?;
                Ok(EvalResult::new(Value::Hot, effects))
            }
            Value::Cold => {
                let mut effects = self.promote_args(args, name)?;
                effects.push(Effect::CallCold {
                    method: name.to_string(),
                    span,
                });
                Ok(EvalResult::new(Value::Hot, effects))
            }
            Value::Addr(addr) => self.call_addr(addr, name, reach, args, span),
            Value::Fun(closure) if name == "apply" => self.apply(closure, args, span),
            Value::Fun(_) => Err(AnalysisFault::ClosureSelect {
                member: name.to_string(),
                span,
            }),
            Value::Choice(set) => {
                let mut result = EvalResult::of(Value::Hot);
                for alt in set {
                    result = result.join(self.call(alt, name, reach, args, span)?);
                }
                Ok(result)
            }
        }
    }

    fn call_addr(&mut self, addr: &Address, name: &str, reach: Reach, args: &[Arg], span: Span) -> Eval {
        let this = Value::Addr(addr.clone());
        match self.dispatch(addr.class, name, reach) {
            Target::Found {
                owner,
                member: Member::Method(def),
                is_static,
            } => self.call_method(&this, addr.class, owner, def, is_static, args, span),
            Target::Found {
                owner,
                member: Member::Lazy(field),
                ..
            } => {
                let forced = self.force(&this, owner, field, span)?;
                let result = self.call(&forced.value, "apply", Reach::Explicit, args, span)?;
                Ok(prepend(forced.effects, result))
            }
            Target::Found { .. } => {
                let selected = self.select_addr(addr, name, reach, span)?;
                let result = self.call(&selected.value, "apply", Reach::Explicit, args, span)?;
                Ok(prepend(selected.effects, result))
            }
            Target::External => self.unknown_target(name, args, span),
            Target::Missing => Err(AnalysisFault::UnresolvedName {
                name: name.to_string(),
                span,
            }),
        }
    }

    /// Resolve `name` on an object of class `dynamic`
    fn dispatch(&self, dynamic: ClassId, name: &str, reach: Reach) -> Target<'a> {
        let table = self.table;
        match reach {
            Reach::Super(from) => {
                let Some(parent) = table.get(from).parent else {
                    return Target::External;
                };
                match table.lookup_member(parent, name) {
                    Some((owner, member)) => Target::Found {
                        owner,
                        member,
                        is_static: true,
                    },
                    None if self.has_external_ancestor(parent) => Target::External,
                    None => Target::Missing,
                }
            }
            Reach::Bare(scope) | Reach::This(scope) => {
                let fixed = table
                    .lookup_member(scope, name)
                    .filter(|(_, member)| member.modifiers().is_effectively_final());
                match fixed {
                    Some((owner, member)) => Target::Found {
                        owner,
                        member,
                        is_static: true,
                    },
                    None => self.dispatch(dynamic, name, Reach::Explicit),
                }
            }
            Reach::Explicit => match table.lookup_member(dynamic, name) {
                Some((owner, member)) => Target::Found {
                    owner,
                    member,
                    is_static: false,
                },
                None if self.has_external_ancestor(dynamic) => Target::External,
                None => Target::Missing,
            },
        }
    }

    /// Call a method found by dispatch on an object under construction
    #[allow(clippy::too_many_arguments)]
    fn call_method(
        &mut self,
        this: &Value,
        dynamic: ClassId,
        owner: ClassId,
        def: &'a MethodDef,
        is_static: bool,
        args: &[Arg],
        span: Span,
    ) -> Eval {
        let Some(body) = &def.body else {
            return self.unknown_target(&def.name, args, span);
        };

        let table = self.table;
        let mut effects = Vec::new();
        let overridable = !is_static
            && !def.modifiers.is_effectively_final()
            && !def.modifiers.init_safe
            && !table.get(owner).is_final()
            && !table.get(dynamic).is_final();
        if overridable && self.config.report_override_risk {
            effects.push(Effect::OverrideRisk {
                method: def.name.clone(),
                class: table.get(owner).name().to_string(),
                span,
            });
        }

        let bound = self.bind_args(&def.params, args, &def.name, false, &mut effects)?;
        let env = self.member_env(owner);
        let result = self.invoke(this, owner, def, body, &env, &bound)?;
        if !result.effects.is_empty() {
            effects.push(Effect::Call {
                method: def.name.clone(),
                span,
                effects: result.effects,
            });
        }
        Ok(EvalResult::new(result.value, effects))
    }

    /// Call a method defined in a block
    fn call_local(
        &mut self,
        def: &'a MethodDef,
        owner: ClassId,
        scope: &Rc<Env<'a>>,
        this: &Value,
        args: &[Arg],
        span: Span,
    ) -> Eval {
        let mut effects = Vec::new();
        let bound = self.bind_args(&def.params, args, &def.name, false, &mut effects)?;
        let Some(body) = &def.body else {
            return Ok(EvalResult::new(Value::Hot, effects));
        };
        let result = self.invoke(this, owner, def, body, scope, &bound)?;
        if !result.effects.is_empty() {
            effects.push(Effect::Call {
                method: def.name.clone(),
                span,
                effects: result.effects,
            });
        }
        Ok(EvalResult::new(result.value, effects))
    }

    /// Evaluate a method body in a fresh scope over `env`; re-entry on the
    /// same receiver yields `Hot`
    fn invoke(
        &mut self,
        this: &Value,
        owner: ClassId,
        def: &'a MethodDef,
        body: &'a Expr,
        env: &Rc<Env<'a>>,
        bound: &[Value],
    ) -> Eval {
        let key = (this.clone(), def.id);
        if !self.in_progress.insert(key.clone()) {
            return Ok(EvalResult::hot());
        }
        self.stats.invocations += 1;
        tracing::trace!("enter {}.{} on {}", self.table.get(owner).name(), def.name, this);

        let scope = Env::child(env);
        for (param, value) in def.params.iter().zip(bound) {
            scope.define_local(param.name.as_str(), value.clone(), false);
        }
        let result = self.eval(body, &scope, this, owner);
        self.in_progress.remove(&key);
        result
    }

    fn apply(&mut self, closure: &Closure, args: &[Arg], span: Span) -> Eval {
        let Some((params, body)) = self.closures.get(&closure.expr).copied() else {
            return Err(AnalysisFault::UnresolvedName {
                name: "<closure>".to_string(),
                span,
            });
        };
        let mut effects = Vec::new();
        let bound = self.bind_args(params, args, "apply", false, &mut effects)?;

        let this = (*closure.this).clone();
        let key = (this.clone(), body.id);
        if !self.in_progress.insert(key.clone()) {
            return Ok(EvalResult::new(Value::Hot, effects));
        }
        self.stats.invocations += 1;

        let captured = self
            .closure_envs
            .get(&(this.clone(), closure.expr))
            .cloned()
            .unwrap_or_else(|| Rc::clone(&self.root));
        let scope = Env::child(&captured);
        for (param, value) in params.iter().zip(&bound) {
            scope.define_local(param.name.as_str(), value.clone(), false);
        }
        let result = self.eval(body, &scope, &this, closure.class);
        self.in_progress.remove(&key);

        let result = result?;
        if !result.effects.is_empty() {
            effects.push(Effect::Closure {
                span,
                effects: result.effects,
            });
        }
        Ok(EvalResult::new(result.value, effects))
    }

    /// Force a lazy member; the body runs once per receiver
    fn force(&mut self, this: &Value, owner: ClassId, field: &'a FieldDef, span: Span) -> Eval {
        let key = (this.clone(), field.id);
        if let Some(memo) = self.lazy_memo.get(&key) {
            return Ok(memo.clone());
        }
        if !self.in_progress.insert(key.clone()) {
            return Ok(EvalResult::hot());
        }
        self.stats.lazy_evaluations += 1;
        tracing::trace!("force {} on {}", field.name, this);

        let env = self.member_env(owner);
        let result = match &field.value {
            Some(init) => self.eval(init, &env, this, owner),
            None => Ok(EvalResult::hot()),
        };
        self.in_progress.remove(&key);

        let result = result?;
        let forced = if result.effects.is_empty() {
            EvalResult::of(result.value)
        } else {
            EvalResult::with_effect(
                result.value,
                Effect::Force {
                    member: field.name.clone(),
                    span,
                    effects: result.effects,
                },
            )
        };
        self.lazy_memo.insert(key, forced.clone());
        Ok(forced)
    }

    /// Call whose body cannot be analyzed; the arguments escape
    fn unknown_target(&mut self, name: &str, args: &[Arg], span: Span) -> Eval {
        let mut effects = self.promote_args(args, name)?;
        if self.config.report_unknown_calls {
            effects.push(Effect::UnknownCallTarget {
                method: name.to_string(),
                span,
            });
        }
        Ok(EvalResult::new(Value::Hot, effects))
    }

    // ==================== PROMOTION ====================

    /// Values bound to `params`. Arguments to non-partial parameters must
    /// promote and are bound `Hot`; partial ones are bound widened when
    /// `widen_partial`, `Cold` otherwise.
    fn bind_args(
        &mut self,
        params: &[Param],
        args: &[Arg],
        callee: &str,
        widen_partial: bool,
        effects: &mut Vec<Effect>,
    ) -> Result<Vec<Value>, AnalysisFault> {
        let mut bound = Vec::with_capacity(params.len());
        for (index, arg) in args.iter().enumerate() {
            let partial = params.get(index).is_some_and(|p| p.partial);
            if partial {
                bound.push(if widen_partial {
                    arg.value.widen()
                } else {
                    Value::Cold
                });
            } else {
                let leak = Leak::Argument { callee, index };
                effects.extend(self.promote(&arg.value, arg.span, &leak)?);
                bound.push(Value::Hot);
            }
        }
        // Missing arguments
        for param in params.iter().skip(args.len()) {
            bound.push(if param.partial { Value::Cold } else { Value::Hot });
        }
        bound.truncate(params.len());
        Ok(bound)
    }

    fn promote_args(&mut self, args: &[Arg], callee: &str) -> Result<Vec<Effect>, AnalysisFault> {
        let mut effects = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            let leak = Leak::Argument { callee, index };
            effects.extend(self.promote(&arg.value, arg.span, &leak)?);
        }
        Ok(effects)
    }

    /// Effects of treating `value` as fully initialized
    fn promote(&mut self, value: &Value, span: Span, leak: &Leak<'_>) -> Result<Vec<Effect>, AnalysisFault> {
        match value {
            Value::Hot => Ok(Vec::new()),
            Value::Cold | Value::Addr(_) => Ok(vec![leak.effect(span)]),
            Value::Fun(closure) if !closure.this.is_hot() => Ok(vec![Effect::EscapingClosure { span }]),
            Value::Fun(closure) => {
                let key = (Value::Hot, closure.expr);
                if !self.in_progress.insert(key.clone()) {
                    return Ok(Vec::new());
                }
                let arity = self.closures.get(&closure.expr).map_or(0, |(params, _)| params.len());
                let args = vec![
                    Arg {
                        value: Value::Hot,
                        span,
                    };
                    arity
                ];
                let applied = self.apply(closure, &args, span);
                let promoted = applied.and_then(|result| {
                    let mut effects = result.effects;
                    effects.extend(self.promote(&result.value, span, leak)?);
                    Ok(effects)
                });
                self.in_progress.remove(&key);
                promoted
            }
            Value::Choice(set) => {
                let mut effects = Vec::new();
                for alt in set {
                    effects.extend(self.promote(alt, span, leak)?);
                }
                Ok(effects)
            }
        }
    }
}

/// Put `effects` in front of `result`'s own effects
fn prepend(mut effects: Vec<Effect>, result: EvalResult) -> EvalResult {
    effects.extend(result.effects);
    EvalResult::new(result.value, effects)
}
