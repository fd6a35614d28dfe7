//! Diagnostic reporting with source locations
//!
//! This module provides rich error messages with source locations using miette.
//! Front-end failures are errors; initialization effects are rendered as
//! warnings that point at the triggering site and at each root cause.

use crate::common::Span;
use crate::init::{AnalysisFault, ClassReport, Effect};
use miette::{Diagnostic, LabeledSpan, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// Source file for error reporting
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: Arc<str>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Arc::from(content.into()),
        }
    }

    pub fn to_named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.clone(), self.content.to_string())
    }
}

/// Convert our Span to miette's SourceSpan
impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.len())
    }
}

/// Checker diagnostic
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CompileError {
    // === Lex Errors ===
    #[error("Invalid token `{text}`")]
    #[diagnostic(code(lex::invalid_token))]
    InvalidToken {
        text: String,
        #[label("not a valid token")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    // === Initialization Effects ===
    #[error("in class `{class}`: {message}")]
    #[diagnostic(code(init::violation), severity(Warning))]
    InitViolation {
        class: String,
        message: String,
        #[label("{primary}")]
        span: SourceSpan,
        primary: String,
        #[label(collection)]
        causes: Vec<LabeledSpan>,
        #[help]
        help: Option<String>,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("check of class `{class}` aborted: {message}")]
    #[diagnostic(
        code(init::aborted),
        help("the class uses a construct the checker cannot classify")
    )]
    AnalysisAborted {
        class: String,
        message: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: NamedSource<String>,
    },
}

impl CompileError {
    /// Diagnostic for one top-level effect found in `class`
    pub fn from_effect(class: &str, effect: &Effect, source: &SourceFile) -> Self {
        let roots = effect.root_causes();
        let causes = if effect.is_composite() {
            roots
                .iter()
                .map(|root| LabeledSpan::new_with_span(Some(root.to_string()), root.span()))
                .collect()
        } else {
            Vec::new()
        };
        let help = roots.first().map(|root| format!("[{}] {}", root.code(), advice(root)));

        CompileError::InitViolation {
            class: class.to_string(),
            message: summary(effect),
            span: effect.span().into(),
            primary: primary_label(effect).to_string(),
            causes,
            help,
            src: source.to_named_source(),
        }
    }

    pub fn from_fault(class: &str, fault: &AnalysisFault, source: &SourceFile) -> Self {
        CompileError::AnalysisAborted {
            class: class.to_string(),
            message: fault.to_string(),
            span: fault_span(fault).map(SourceSpan::from),
            src: source.to_named_source(),
        }
    }
}

fn summary(effect: &Effect) -> String {
    match effect {
        Effect::Call { method, .. } => {
            format!("calling `{}` during initialization is unsafe", method)
        }
        Effect::Force { member, .. } => {
            format!("forcing lazy `{}` during initialization is unsafe", member)
        }
        Effect::Closure { .. } => "running a closure during initialization is unsafe".to_string(),
        leaf => leaf.to_string(),
    }
}

fn primary_label(effect: &Effect) -> &'static str {
    match effect {
        Effect::Call { .. } | Effect::Force { .. } | Effect::Closure { .. } => "reached from here",
        Effect::UninitializedAccess { .. } | Effect::NotYetAssignedField { .. } => "read here",
        Effect::AccessCold { .. } | Effect::CallCold { .. } => "receiver may be uninitialized",
        Effect::UnknownCallTarget { .. } => "cannot analyze this call",
        Effect::OverrideRisk { .. } => "may dispatch to an override",
        Effect::LeakedArgument { .. } | Effect::LeakedAssignment { .. } => "not fully initialized",
        Effect::EscapingClosure { .. } => "closure escapes here",
    }
}

fn advice(effect: &Effect) -> &'static str {
    match effect {
        Effect::UninitializedAccess { .. } | Effect::NotYetAssignedField { .. } => {
            "move the field's initializer before its first use"
        }
        Effect::AccessCold { .. } | Effect::CallCold { .. } => {
            "avoid using a partially initialized object until its construction completes"
        }
        Effect::UnknownCallTarget { .. } => "call a method whose body is defined in the program",
        Effect::OverrideRisk { .. } => "mark the method `final` or `private`, or annotate it `@init`",
        Effect::LeakedArgument { .. } => "mark the parameter `@partial` or pass a fully initialized value",
        Effect::LeakedAssignment { .. } => "mark the field `@partial` or assign a fully initialized value",
        Effect::EscapingClosure { .. } => "do not let closures over `this` escape during initialization",
        Effect::Call { .. } | Effect::Force { .. } | Effect::Closure { .. } => {
            "see the causes reported below"
        }
    }
}

fn fault_span(fault: &AnalysisFault) -> Option<Span> {
    match fault {
        AnalysisFault::UnresolvedName { span, .. }
        | AnalysisFault::ClosureSelect { span, .. }
        | AnalysisFault::BareSuper { span }
        | AnalysisFault::ClassAsValue { span, .. }
        | AnalysisFault::NotAClass { span, .. }
        | AnalysisFault::InvalidAssignTarget { span } => Some(*span),
        AnalysisFault::MissingOuter { .. } => None,
    }
}

/// Error reporter that collects diagnostics
pub struct Reporter {
    source: SourceFile,
    errors: Vec<CompileError>,
    warnings: Vec<CompileError>,
}

impl Reporter {
    pub fn new(source: SourceFile) -> Self {
        Self {
            source,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn warning(&mut self, warning: CompileError) {
        self.warnings.push(warning);
    }

    /// Record every effect of `report` as a warning
    pub fn class_report(&mut self, report: &ClassReport) {
        for effect in &report.effects {
            let warning = CompileError::from_effect(&report.class, effect, &self.source);
            self.warnings.push(warning);
        }
    }

    pub fn fault(&mut self, class: &str, fault: &AnalysisFault) {
        let error = CompileError::from_fault(class, fault, &self.source);
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Get the source file
    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// Print all diagnostics
    pub fn emit_all(&self) {
        for warning in &self.warnings {
            eprintln!("{:?}", miette::Report::new(warning.clone()));
        }
        for error in &self.errors {
            eprintln!("{:?}", miette::Report::new(error.clone()));
        }
    }

    /// Get warnings by reference
    pub fn warnings(&self) -> &[CompileError] {
        &self.warnings
    }

    /// Get errors by reference
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }
}
