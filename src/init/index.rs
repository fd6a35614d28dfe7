//! Class table and the indexing pass
//!
//! [`ClassTable::build`] runs once per program: it gives every class
//! (top-level, nested, or local to a block) an id, records its enclosing
//! class and member table, and resolves its parent lexically.
//!
//! The `index_*` functions run while evaluating: they pre-register the
//! members, local methods and class templates of a body in an environment
//! before the body is interpreted, so forward and mutually recursive
//! references resolve.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::ast::{
    Block, ClassDef, ClassItem, Expr, ExprKind, FieldDef, MethodDef, Modifiers, Param, Program,
    Stmt,
};
use crate::common::NodeId;

use super::env::{Binding, Env};
use super::value::ClassId;

/// Declaring environment of each class template
pub type Templates<'a> = FxHashMap<ClassId, Rc<Env<'a>>>;

/// A member of a class
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    /// Constructor parameter, stored as a field
    Param(&'a Param),
    Field(&'a FieldDef),
    Lazy(&'a FieldDef),
    Method(&'a MethodDef),
}

impl<'a> Member<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Member::Param(p) => &p.name,
            Member::Field(f) | Member::Lazy(f) => &f.name,
            Member::Method(m) => &m.name,
        }
    }

    pub fn node(&self) -> NodeId {
        match self {
            Member::Param(p) => p.id,
            Member::Field(f) | Member::Lazy(f) => f.id,
            Member::Method(m) => m.id,
        }
    }

    /// Declared as not guaranteed to hold a fully initialized value
    pub fn is_partial(&self) -> bool {
        match self {
            Member::Param(p) => p.partial,
            Member::Field(f) | Member::Lazy(f) => f.modifiers.partial,
            Member::Method(m) => m.modifiers.partial,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match self {
            Member::Param(p) => Modifiers {
                partial: p.partial,
                ..Modifiers::default()
            },
            Member::Field(f) | Member::Lazy(f) => f.modifiers,
            Member::Method(m) => m.modifiers,
        }
    }
}

/// Everything the checker needs to know about one class
#[derive(Debug)]
pub struct ClassInfo<'a> {
    pub id: ClassId,
    pub def: &'a ClassDef,
    /// Parent class, when it is defined in the analyzed program
    pub parent: Option<ClassId>,
    /// Lexically enclosing class
    pub enclosing: Option<ClassId>,
    /// Declared inside a block rather than a class body or the top level
    pub is_local: bool,
    pub members: IndexMap<&'a str, Member<'a>>,
}

impl<'a> ClassInfo<'a> {
    pub fn name(&self) -> &'a str {
        &self.def.name
    }

    pub fn is_final(&self) -> bool {
        self.def.modifiers.is_final
    }

    /// `extends` names a class outside the analyzed program
    pub fn has_external_parent(&self) -> bool {
        self.def.parent.is_some() && self.parent.is_none()
    }
}

/// All classes of a program
#[derive(Debug, Default)]
pub struct ClassTable<'a> {
    classes: Vec<ClassInfo<'a>>,
    by_node: FxHashMap<NodeId, ClassId>,
    top_level: Vec<ClassId>,
}

impl<'a> ClassTable<'a> {
    pub fn build(program: &'a Program) -> Self {
        let mut builder = TableBuilder {
            table: ClassTable::default(),
            scopes: Vec::new(),
        };
        let defs: Vec<&'a ClassDef> = program.classes.iter().collect();
        let ids = builder.enter_scope(&defs, None, false);
        builder.table.top_level = ids.clone();
        for id in ids {
            builder.visit_class(id);
        }
        builder.leave_scope();
        tracing::debug!("class table: {} classes", builder.table.classes.len());
        builder.table
    }

    pub fn get(&self, id: ClassId) -> &ClassInfo<'a> {
        &self.classes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo<'a>> {
        self.classes.iter()
    }

    pub fn top_level(&self) -> &[ClassId] {
        &self.top_level
    }

    /// Id of the class defined by `def`
    pub fn id_of(&self, def: &ClassDef) -> Option<ClassId> {
        self.by_node.get(&def.id).copied()
    }

    /// First class named `name`, in declaration order
    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.classes.iter().find(|c| c.name() == name).map(|c| c.id)
    }

    /// `start` followed by its in-program ancestors
    pub fn ancestors(&self, start: ClassId) -> Vec<ClassId> {
        let mut chain = vec![start];
        let mut current = self.get(start).parent;
        while let Some(id) = current {
            // Cyclic `extends` chains are cut at the first repeat
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.get(id).parent;
        }
        chain
    }

    /// Find `name` starting at `start` and walking up the parents
    pub fn lookup_member(&self, start: ClassId, name: &str) -> Option<(ClassId, Member<'a>)> {
        self.ancestors(start).into_iter().find_map(|id| {
            self.get(id)
                .members
                .get(name)
                .map(|member| (id, *member))
        })
    }

    fn alloc(&mut self, def: &'a ClassDef, enclosing: Option<ClassId>, is_local: bool) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let mut members = IndexMap::new();
        for param in &def.params {
            members.entry(param.name.as_str()).or_insert(Member::Param(param));
        }
        for item in &def.body {
            let member = match item {
                ClassItem::Field(f) if f.modifiers.is_lazy => Member::Lazy(f),
                ClassItem::Field(f) => Member::Field(f),
                ClassItem::Method(m) => Member::Method(m),
                ClassItem::Class(_) | ClassItem::Stmt(_) => continue,
            };
            members.entry(member.name()).or_insert(member);
        }
        self.classes.push(ClassInfo {
            id,
            def,
            parent: None,
            enclosing,
            is_local,
            members,
        });
        self.by_node.insert(def.id, id);
        id
    }
}

/// Walks the program with a stack of lexical class scopes
struct TableBuilder<'a> {
    table: ClassTable<'a>,
    scopes: Vec<FxHashMap<&'a str, ClassId>>,
}

impl<'a> TableBuilder<'a> {
    /// Register sibling classes, then resolve their parents with all
    /// siblings visible
    fn enter_scope(
        &mut self,
        defs: &[&'a ClassDef],
        enclosing: Option<ClassId>,
        is_local: bool,
    ) -> Vec<ClassId> {
        let mut scope = FxHashMap::default();
        let mut ids = Vec::with_capacity(defs.len());
        for def in defs {
            let id = self.table.alloc(def, enclosing, is_local);
            scope.insert(def.name.as_str(), id);
            ids.push(id);
        }
        self.scopes.push(scope);

        for &id in &ids {
            let parent = self.table.classes[id.index()]
                .def
                .parent
                .as_ref()
                .and_then(|p| self.resolve(&p.name));
            self.table.classes[id.index()].parent = parent;
        }
        ids
    }

    fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    fn resolve(&self, name: &str) -> Option<ClassId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn visit_class(&mut self, id: ClassId) {
        let def = self.table.classes[id.index()].def;
        let nested: Vec<&'a ClassDef> = def.nested_classes().collect();
        let nested_ids = self.enter_scope(&nested, Some(id), false);

        if let Some(parent) = &def.parent {
            for arg in &parent.args {
                self.visit_expr(arg, id);
            }
        }
        for item in &def.body {
            match item {
                ClassItem::Field(f) => {
                    if let Some(value) = &f.value {
                        self.visit_expr(value, id);
                    }
                }
                ClassItem::Method(m) => {
                    if let Some(body) = &m.body {
                        self.visit_expr(body, id);
                    }
                }
                ClassItem::Stmt(stmt) => self.visit_stmt(stmt, id),
                ClassItem::Class(_) => {}
            }
        }
        for nested_id in nested_ids {
            self.visit_class(nested_id);
        }

        self.leave_scope();
    }

    fn visit_block(&mut self, block: &'a Block, enclosing: ClassId) {
        let locals: Vec<&'a ClassDef> = block
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Class(c) => Some(c),
                _ => None,
            })
            .collect();
        let ids = self.enter_scope(&locals, Some(enclosing), true);
        for stmt in &block.stmts {
            self.visit_stmt(stmt, enclosing);
        }
        for id in ids {
            self.visit_class(id);
        }
        self.leave_scope();
    }

    fn visit_stmt(&mut self, stmt: &'a Stmt, enclosing: ClassId) {
        match stmt {
            Stmt::Let { value, .. } => self.visit_expr(value, enclosing),
            Stmt::Def(m) => {
                if let Some(body) = &m.body {
                    self.visit_expr(body, enclosing);
                }
            }
            Stmt::Expr { expr, .. } => self.visit_expr(expr, enclosing),
            // Local classes are registered by the enclosing block
            Stmt::Class(_) | Stmt::Empty => {}
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr, enclosing: ClassId) {
        match &expr.kind {
            ExprKind::Literal(_)
            | ExprKind::Ident(_)
            | ExprKind::This
            | ExprKind::OuterThis(_)
            | ExprKind::Super => {}
            ExprKind::Select { receiver, .. } => self.visit_expr(receiver, enclosing),
            ExprKind::Call { callee, args } => {
                self.visit_expr(callee, enclosing);
                for arg in args {
                    self.visit_expr(arg, enclosing);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.visit_expr(arg, enclosing);
                }
            }
            ExprKind::Assign { target, value } => {
                self.visit_expr(target, enclosing);
                self.visit_expr(value, enclosing);
            }
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(left, enclosing);
                self.visit_expr(right, enclosing);
            }
            ExprKind::Unary { expr, .. } => self.visit_expr(expr, enclosing),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit_expr(condition, enclosing);
                self.visit_expr(then_branch, enclosing);
                if let Some(else_branch) = else_branch {
                    self.visit_expr(else_branch, enclosing);
                }
            }
            ExprKind::While { condition, body } => {
                self.visit_expr(condition, enclosing);
                self.visit_expr(body, enclosing);
            }
            ExprKind::Block(block) => self.visit_block(block, enclosing),
            ExprKind::Closure { body, .. } => self.visit_expr(body, enclosing),
            ExprKind::Try {
                body,
                handlers,
                finalizer,
            } => {
                self.visit_block(body, enclosing);
                for handler in handlers {
                    self.visit_block(&handler.body, enclosing);
                }
                if let Some(finalizer) = finalizer {
                    self.visit_block(finalizer, enclosing);
                }
            }
            ExprKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value, enclosing);
                }
            }
        }
    }
}

/// Root environment binding every top-level class
pub fn index_program<'a>(table: &ClassTable<'a>, templates: &mut Templates<'a>) -> Rc<Env<'a>> {
    let root = Env::root();
    for &id in table.top_level() {
        root.define(table.get(id).name(), Binding::Class(id));
        templates.insert(id, Rc::clone(&root));
    }
    root
}

/// Scope of `class`'s members over its declaring environment. Nested class
/// templates are recorded with the new scope as their declaring environment.
pub fn index_class<'a>(
    table: &ClassTable<'a>,
    class: ClassId,
    declared: &Rc<Env<'a>>,
    templates: &mut Templates<'a>,
) -> Rc<Env<'a>> {
    let info = table.get(class);
    let env = Env::child(declared);

    // Inherited members resolve through this class's `this` as well
    for ancestor in table.ancestors(class) {
        for name in table.get(ancestor).members.keys() {
            if !env.is_bound_here(name) {
                env.define(*name, Binding::Member(class));
            }
        }
    }
    for nested in info.def.nested_classes() {
        if let Some(id) = table.id_of(nested) {
            env.define(nested.name.as_str(), Binding::Class(id));
            templates.insert(id, Rc::clone(&env));
        }
    }
    env
}

/// Register the local methods and local classes of `block`, which is part of
/// `owner`'s code, in `env`
pub fn index_block<'a>(
    table: &ClassTable<'a>,
    block: &'a Block,
    owner: ClassId,
    env: &Rc<Env<'a>>,
    templates: &mut Templates<'a>,
) -> Vec<ClassId> {
    let mut classes = Vec::new();
    for stmt in &block.stmts {
        match stmt {
            Stmt::Def(m) => env.define(m.name.as_str(), Binding::LocalMethod { def: m, owner }),
            Stmt::Class(c) => {
                if let Some(id) = table.id_of(c) {
                    env.define(c.name.as_str(), Binding::Class(id));
                    templates.insert(id, Rc::clone(env));
                    classes.push(id);
                }
            }
            _ => {}
        }
    }
    classes
}
