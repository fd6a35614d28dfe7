//! Internal analysis faults
//!
//! A fault means the checker met a tree it cannot classify. It aborts the
//! check of the current class and is reported apart from user-facing effects.

use miette::Diagnostic;
use thiserror::Error;

use crate::common::Span;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum AnalysisFault {
    #[error("cannot resolve `{name}` at {span}")]
    #[diagnostic(code(init::fault::unresolved_name))]
    UnresolvedName { name: String, span: Span },

    #[error("`{member}` selected on a closure at {span}; only `apply` is valid")]
    #[diagnostic(code(init::fault::closure_select))]
    ClosureSelect { member: String, span: Span },

    #[error("`super` used outside of a member access at {span}")]
    #[diagnostic(code(init::fault::bare_super))]
    BareSuper { span: Span },

    #[error("class `{name}` used as a value at {span}")]
    #[diagnostic(code(init::fault::class_as_value))]
    ClassAsValue { name: String, span: Span },

    #[error("`{name}` is not a class at {span}")]
    #[diagnostic(code(init::fault::not_a_class))]
    NotAClass { name: String, span: Span },

    #[error("no outer instance of `{target}` is visible from `{from}`")]
    #[diagnostic(code(init::fault::missing_outer))]
    MissingOuter { target: String, from: String },

    #[error("invalid assignment target at {span}")]
    #[diagnostic(code(init::fault::bad_assign_target))]
    InvalidAssignTarget { span: Span },
}
