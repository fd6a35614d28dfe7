//! Initialization safety checking
//!
//! Proves for every constructible class that no code path reads a field
//! before it is assigned, and that no partially constructed object escapes
//! into a context that treats it as fully initialized.
//!
//! # Overview
//!
//! ```text
//! Program → ClassTable → InitChecker (one per class) → ClassReport
//! ```
//!
//! Each class is checked on its own run: a fresh [`InitChecker`] interprets
//! the class's constructor abstractly against an [`Address`] standing for an
//! arbitrary instance. Effects found in members reached through calls,
//! lazy forces and closure applications are reported as composite effects
//! that keep the path to the root cause.

pub mod effects;
pub mod env;
pub mod error;
pub mod eval;
pub mod heap;
pub mod index;
pub mod value;

pub use effects::{Effect, EvalResult};
pub use error::AnalysisFault;
pub use eval::{ClassReport, InitChecker, RunStats};
pub use heap::{Heap, ObjectRecord};
pub use index::{ClassInfo, ClassTable, Member};
pub use value::{Address, ClassId, Closure, Value};

use serde::Serialize;

use crate::ast::Program;
use crate::config::CheckerConfig;

/// A class whose check was aborted
#[derive(Debug, Clone)]
pub struct ClassFault {
    pub class: String,
    pub fault: AnalysisFault,
}

/// Outcome of checking every class of a program
#[derive(Debug, Clone, Default)]
pub struct ProgramReport {
    pub reports: Vec<ClassReport>,
    pub faults: Vec<ClassFault>,
}

impl ProgramReport {
    /// No effects and no faults
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty() && self.reports.iter().all(ClassReport::is_clean)
    }

    pub fn effect_count(&self) -> usize {
        self.reports.iter().map(|r| r.effects.len()).sum()
    }

    pub fn report(&self, class: &str) -> Option<&ClassReport> {
        self.reports.iter().find(|r| r.class == class)
    }

    pub fn fault(&self, class: &str) -> Option<&AnalysisFault> {
        self.faults.iter().find(|f| f.class == class).map(|f| &f.fault)
    }

    /// JSON view used by the CLI
    pub fn to_json(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct FaultView<'r> {
            class: &'r str,
            message: String,
        }

        let faults: Vec<FaultView<'_>> = self
            .faults
            .iter()
            .map(|f| FaultView {
                class: &f.class,
                message: f.fault.to_string(),
            })
            .collect();
        serde_json::json!({
            "reports": self.reports,
            "faults": faults,
        })
    }
}

/// Check every top-level and nested class selected by `config`. Block-local
/// classes are only checked where they are instantiated.
pub fn check_program(program: &Program, config: &CheckerConfig) -> ProgramReport {
    let table = ClassTable::build(program);
    let mut report = ProgramReport::default();

    for info in table.classes() {
        if info.is_local || !config.selects(info.name()) {
            continue;
        }
        let mut checker = InitChecker::new(&table, config);
        match checker.check_class(info.id) {
            Ok(class_report) => report.reports.push(class_report),
            Err(fault) => {
                tracing::warn!("check of `{}` aborted: {}", info.name(), fault);
                report.faults.push(ClassFault {
                    class: info.name().to_string(),
                    fault,
                });
            }
        }
    }

    tracing::info!(
        "checked {} class(es): {} effect(s), {} fault(s)",
        report.reports.len() + report.faults.len(),
        report.effect_count(),
        report.faults.len()
    );
    report
}
