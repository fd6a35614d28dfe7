//! Abstract Syntax Tree for the class language
//!
//! This module defines the trees produced by the parser and consumed by the
//! initialization checker. Host-supplied member flags (part of the
//! initialization contract, declared partial, non-overridable) are carried in
//! [`Modifiers`].

use crate::common::{NodeId, Span};
use serde::{Deserialize, Serialize};

/// Top-level program: a list of classes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<ClassDef>,
}

/// Modifiers shared by classes and members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub is_final: bool,
    pub is_private: bool,
    pub is_override: bool,
    pub is_abstract: bool,
    pub is_lazy: bool,
    /// Safe to call while the receiver is under construction (`@init`)
    pub init_safe: bool,
    /// Not guaranteed to hold a fully initialized value (`@partial`)
    pub partial: bool,
}

impl Modifiers {
    /// Dispatch always resolves to this definition
    pub fn is_effectively_final(&self) -> bool {
        self.is_final || self.is_private
    }
}

// ==================== CLASSES ====================

/// Class definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub id: NodeId,
    pub modifiers: Modifiers,
    pub name: String,
    pub params: Vec<Param>,
    pub parent: Option<ParentRef>,
    pub body: Vec<ClassItem>,
    pub span: Span,
}

impl ClassDef {
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.body.iter().filter_map(|item| match item {
            ClassItem::Field(f) => Some(f),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.body.iter().filter_map(|item| match item {
            ClassItem::Method(m) => Some(m),
            _ => None,
        })
    }

    pub fn nested_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.body.iter().filter_map(|item| match item {
            ClassItem::Class(c) => Some(c),
            _ => None,
        })
    }
}

/// `extends Parent(args)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentRef {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// Constructor, method or closure parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub id: NodeId,
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub partial: bool,
    pub span: Span,
}

/// Item in a class body, in source order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClassItem {
    Field(FieldDef),
    Method(MethodDef),
    Class(ClassDef),
    /// Statement executed as part of the constructor
    Stmt(Stmt),
}

/// `val`/`var`/`lazy val` member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: NodeId,
    pub modifiers: Modifiers,
    pub mutable: bool,
    pub name: String,
    pub ty: Option<TypeExpr>,
    /// `None` for abstract fields
    pub value: Option<Expr>,
    pub span: Span,
}

/// `def` member or local definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub id: NodeId,
    pub modifiers: Modifiers,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    /// `None` for abstract methods
    pub body: Option<Expr>,
    pub span: Span,
}

// ==================== TYPES ====================

/// Type annotation; carried for display only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeExpr {
    pub name: String,
    pub args: Vec<TypeExpr>,
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

// ==================== EXPRESSIONS ====================

/// Expression node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

/// Expression kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal value
    Literal(Literal),
    /// Local, parameter, member or class name
    Ident(String),
    /// `this`
    This,
    /// `Outer.this`
    OuterThis(String),
    /// `super`; only valid as the receiver of a select or call
    Super,
    /// `receiver.name`
    Select { receiver: Box<Expr>, name: String },
    /// `callee(args)`
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `new Class(args)`
    New { class: String, args: Vec<Expr> },
    /// `target = value`
    Assign { target: Box<Expr>, value: Box<Expr> },
    /// Binary operation
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// `if (cond) a else b`
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    /// `while (cond) body`
    While { condition: Box<Expr>, body: Box<Expr> },
    /// `{ stmts }`
    Block(Block),
    /// `|params| body`
    Closure { params: Vec<Param>, body: Box<Expr> },
    /// `try { } catch (e) { } finally { }`
    Try {
        body: Block,
        handlers: Vec<CatchClause>,
        finalizer: Option<Block>,
    },
    /// `return value`
    Return(Option<Box<Expr>>),
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    String(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// `catch (param) body`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub param: Param,
    pub body: Block,
}

// ==================== STATEMENTS ====================

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// Local `val`/`var` binding
    Let {
        id: NodeId,
        mutable: bool,
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
        span: Span,
    },
    /// Local method
    Def(MethodDef),
    /// Local class
    Class(ClassDef),
    /// Expression statement
    Expr { expr: Expr, has_semi: bool },
    /// Empty statement (;)
    Empty,
}

/// Block of statements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// Trailing expression whose value the block evaluates to
    pub fn tail(&self) -> Option<&Expr> {
        match self.stmts.last() {
            Some(Stmt::Expr {
                expr,
                has_semi: false,
            }) => Some(expr),
            _ => None,
        }
    }
}
