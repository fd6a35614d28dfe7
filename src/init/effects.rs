//! Safety effects and evaluation results
//!
//! Every violation is an [`Effect`] carrying the span that triggered it.
//! Composite effects (`Call`, `Force`, `Closure`) wrap the effects produced
//! inside the called member, forced lazy member or applied closure, so a
//! report can be traced from the triggering site down to the root cause.

use std::fmt;

use serde::Serialize;

use crate::common::Span;

use super::value::Value;

/// A safety violation found during evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Field read through a bare name before its initializer ran
    UninitializedAccess { field: String, span: Span },
    /// Field read through an explicit receiver whose record lacks it
    NotYetAssignedField { field: String, span: Span },
    /// Field read on a receiver of unknown initialization status
    AccessCold { field: String, span: Span },
    /// Method called on a receiver of unknown initialization status
    CallCold { method: String, span: Span },
    /// Dispatch found no analyzable body
    UnknownCallTarget { method: String, span: Span },
    /// Dispatch target may be replaced by an unchecked override
    OverrideRisk {
        method: String,
        class: String,
        span: Span,
    },
    /// Partially initialized value passed where a full one is required
    LeakedArgument {
        callee: String,
        index: usize,
        span: Span,
    },
    /// Partially initialized value stored into a non-partial field
    LeakedAssignment { field: String, span: Span },
    /// Closure over a partially initialized receiver escapes
    EscapingClosure { span: Span },
    /// Effects produced inside a called method or constructor
    Call {
        method: String,
        span: Span,
        effects: Vec<Effect>,
    },
    /// Effects produced while forcing a lazy member
    Force {
        member: String,
        span: Span,
        effects: Vec<Effect>,
    },
    /// Effects produced when a closure body runs
    Closure { span: Span, effects: Vec<Effect> },
}

impl Effect {
    pub fn span(&self) -> Span {
        match self {
            Effect::UninitializedAccess { span, .. }
            | Effect::NotYetAssignedField { span, .. }
            | Effect::AccessCold { span, .. }
            | Effect::CallCold { span, .. }
            | Effect::UnknownCallTarget { span, .. }
            | Effect::OverrideRisk { span, .. }
            | Effect::LeakedArgument { span, .. }
            | Effect::LeakedAssignment { span, .. }
            | Effect::EscapingClosure { span }
            | Effect::Call { span, .. }
            | Effect::Force { span, .. }
            | Effect::Closure { span, .. } => *span,
        }
    }

    /// Stable classification used by hosts to pick a diagnostic code
    pub fn code(&self) -> &'static str {
        match self {
            Effect::UninitializedAccess { .. } => "init::uninitialized_access",
            Effect::NotYetAssignedField { .. } => "init::not_yet_assigned",
            Effect::AccessCold { .. } => "init::cold_access",
            Effect::CallCold { .. } => "init::cold_call",
            Effect::UnknownCallTarget { .. } => "init::unknown_call_target",
            Effect::OverrideRisk { .. } => "init::override_risk",
            Effect::LeakedArgument { .. } => "init::leaked_argument",
            Effect::LeakedAssignment { .. } => "init::leaked_assignment",
            Effect::EscapingClosure { .. } => "init::escaping_closure",
            Effect::Call { .. } => "init::call",
            Effect::Force { .. } => "init::force",
            Effect::Closure { .. } => "init::closure",
        }
    }

    /// Effects wrapped by a composite effect
    pub fn nested(&self) -> &[Effect] {
        match self {
            Effect::Call { effects, .. }
            | Effect::Force { effects, .. }
            | Effect::Closure { effects, .. } => effects,
            _ => &[],
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Effect::Call { .. } | Effect::Force { .. } | Effect::Closure { .. }
        )
    }

    /// Leaf violations reachable from this effect, depth first
    pub fn root_causes(&self) -> Vec<&Effect> {
        let mut out = Vec::new();
        self.collect_roots(&mut out);
        out
    }

    fn collect_roots<'e>(&'e self, out: &mut Vec<&'e Effect>) {
        if self.is_composite() {
            for effect in self.nested() {
                effect.collect_roots(out);
            }
        } else {
            out.push(self);
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::UninitializedAccess { field, .. } => {
                write!(f, "field `{}` is accessed before it is initialized", field)
            }
            Effect::NotYetAssignedField { field, .. } => write!(
                f,
                "field `{}` is read from an object on which it has not been assigned yet",
                field
            ),
            Effect::AccessCold { field, .. } => write!(
                f,
                "field `{}` is read from an object of unknown initialization state",
                field
            ),
            Effect::CallCold { method, .. } => write!(
                f,
                "method `{}` is called on an object of unknown initialization state",
                method
            ),
            Effect::UnknownCallTarget { method, .. } => write!(
                f,
                "call to `{}` cannot be analyzed during initialization",
                method
            ),
            Effect::OverrideRisk { method, class, .. } => write!(
                f,
                "overridable method `{}.{}` is called during initialization",
                class, method
            ),
            Effect::LeakedArgument { callee, index, .. } => write!(
                f,
                "argument {} of `{}` is not fully initialized",
                index + 1,
                callee
            ),
            Effect::LeakedAssignment { field, .. } => write!(
                f,
                "a value that is not fully initialized is assigned to field `{}`",
                field
            ),
            Effect::EscapingClosure { .. } => write!(
                f,
                "closure capturing a partially initialized object escapes"
            ),
            Effect::Call { method, .. } => write!(f, "calling `{}` causes:", method),
            Effect::Force { member, .. } => write!(f, "forcing lazy `{}` causes:", member),
            Effect::Closure { .. } => write!(f, "running this closure causes:"),
        }
    }
}

/// Value of an evaluation together with the effects it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    pub value: Value,
    pub effects: Vec<Effect>,
}

impl EvalResult {
    pub fn new(value: Value, effects: Vec<Effect>) -> Self {
        Self { value, effects }
    }

    /// `Hot` with no effects
    pub fn hot() -> Self {
        Self::of(Value::Hot)
    }

    /// `value` with no effects
    pub fn of(value: Value) -> Self {
        Self {
            value,
            effects: Vec::new(),
        }
    }

    pub fn with_effect(value: Value, effect: Effect) -> Self {
        Self {
            value,
            effects: vec![effect],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.effects.is_empty()
    }

    /// Join values and concatenate effects
    pub fn join(mut self, other: EvalResult) -> EvalResult {
        self.value = self.value.join(&other.value);
        self.effects.extend(other.effects);
        self
    }

    /// Move the effects out, keeping the value
    pub fn take_value(self, effects: &mut Vec<Effect>) -> Value {
        effects.extend(self.effects);
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_causes_flatten_composites() {
        let leaf = Effect::UninitializedAccess {
            field: "y".to_string(),
            span: Span::new(10, 11),
        };
        let chain = Effect::Call {
            method: "f".to_string(),
            span: Span::new(1, 4),
            effects: vec![Effect::Force {
                member: "l".to_string(),
                span: Span::new(5, 6),
                effects: vec![leaf.clone()],
            }],
        };
        assert_eq!(chain.root_causes(), vec![&leaf]);
        assert_eq!(chain.span(), Span::new(1, 4));
        assert_eq!(chain.code(), "init::call");
    }

    #[test]
    fn test_join_results() {
        let a = EvalResult::with_effect(
            Value::Hot,
            Effect::EscapingClosure {
                span: Span::dummy(),
            },
        );
        let b = EvalResult::of(Value::Cold);
        let joined = a.join(b);
        assert_eq!(joined.value, Value::Cold);
        assert_eq!(joined.effects.len(), 1);
    }
}
