//! Criterion executors
//!
//! A criterion compares the live value under test, obtained from the current
//! target, with the applet's declared value. The runtime handles inversion,
//! reference resolution and fingerprinting around it.

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

use super::Applet;
use crate::error::ApplyError;
use crate::runtime::TaskContext;

/// Inputs handed to a criterion
pub struct CriterionInput<'a> {
    /// The applet being evaluated
    pub applet: &'a Applet,
    /// Current target object, if the enclosing flow selected one
    pub target: Option<&'a Value>,
    /// Declared value, literal or resolved through a reference
    pub expected: Option<&'a Value>,
    /// Batch-level context
    pub context: &'a TaskContext,
}

impl<'a> CriterionInput<'a> {
    /// Current target or [`ApplyError::TargetUnavailable`]
    pub fn require_target(&self) -> Result<&'a Value, ApplyError> {
        self.target
            .ok_or_else(|| ApplyError::TargetUnavailable(self.applet.display_name()))
    }

    /// Declared value or an [`ApplyError::InvalidArgument`] for slot 0
    pub fn require_expected(&self) -> Result<&'a Value, ApplyError> {
        self.expected.ok_or_else(|| ApplyError::InvalidArgument {
            slot: 0,
            reason: "no declared value".to_string(),
        })
    }
}

/// Outcome of a criterion check before inversion
#[derive(Debug, Clone, PartialEq)]
pub struct Checked {
    pub matched: bool,
    /// The live value that was compared; published on success
    pub actual: Value,
}

/// Condition executor plugged into criterion applets
pub trait Criterion: Send + Sync {
    fn check(&self, input: &CriterionInput<'_>) -> Result<Checked, ApplyError>;
}

type Selector = dyn Fn(&Value) -> Option<Value> + Send + Sync;
type Matcher = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// Criterion built from a value selector and a matcher
///
/// `select` extracts the live value from the target; `matcher` receives
/// `(actual, expected)`.
pub struct FnCriterion {
    select: Box<Selector>,
    matcher: Box<Matcher>,
}

impl FnCriterion {
    /// Criterion comparing `select(target)` with the declared value
    pub fn new<S, M>(select: S, matcher: M) -> Self
    where
        S: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
        M: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            select: Box::new(select),
            matcher: Box::new(matcher),
        }
    }

    /// Compare one field of the target object
    pub fn field<M>(field: &'static str, matcher: M) -> Self
    where
        M: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self::new(move |target| target.get(field).cloned(), matcher)
    }
}

impl Criterion for FnCriterion {
    fn check(&self, input: &CriterionInput<'_>) -> Result<Checked, ApplyError> {
        let target = input.require_target()?;
        let expected = input.require_expected()?;
        let actual = (self.select)(target).unwrap_or(Value::Null);
        let matched = !actual.is_null() && (self.matcher)(&actual, expected);
        Ok(Checked { matched, actual })
    }
}

/// Criterion over a boolean property of the target; takes no declared value
pub struct PropertyCriterion {
    property: Box<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl PropertyCriterion {
    /// Criterion true when `property(target)` holds
    pub fn new<P>(property: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            property: Box::new(property),
        }
    }
}

impl Criterion for PropertyCriterion {
    fn check(&self, input: &CriterionInput<'_>) -> Result<Checked, ApplyError> {
        let target = input.require_target()?;
        let matched = (self.property)(target);
        Ok(Checked {
            matched,
            actual: Value::Bool(matched),
        })
    }
}

/// Compiled patterns of one applet id, keyed by pattern text
type CompiledPatterns = DashMap<String, Result<Regex, String>>;

/// Criterion matching a string field of the target against a regex
///
/// The declared value is the pattern. Applets sharing an id share one
/// pattern table through the task context, so a pattern is compiled once
/// per batch however many applets use it.
pub struct PatternCriterion {
    field: &'static str,
}

impl PatternCriterion {
    /// Match the target's `field`
    pub fn new(field: &'static str) -> Self {
        Self { field }
    }
}

impl Criterion for PatternCriterion {
    fn check(&self, input: &CriterionInput<'_>) -> Result<Checked, ApplyError> {
        let target = input.require_target()?;
        let pattern = input
            .require_expected()?
            .as_str()
            .ok_or_else(|| ApplyError::InvalidArgument {
                slot: 0,
                reason: "pattern must be a string".to_string(),
            })?;
        let patterns = input
            .context
            .get_or_put_argument(input.applet.id(), CompiledPatterns::new)
            .map_err(|err| ApplyError::InvalidArgument {
                slot: 0,
                reason: err.to_string(),
            })?;
        let regex = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).map_err(|err| err.to_string()))
            .clone()
            .map_err(|reason| ApplyError::InvalidArgument { slot: 0, reason })?;

        let actual = target.get(self.field).cloned().unwrap_or(Value::Null);
        let matched = actual.as_str().map_or(false, |text| regex.is_match(text));
        Ok(Checked { matched, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applet::{AppletId, Flow};
    use crate::runtime::TaskContext;
    use crate::task::{Task, TaskMetadata};
    use serde_json::json;
    use std::sync::Arc;
    use tasker_core::{Context, Event, EventBatch};

    fn context() -> TaskContext {
        let task = Task::new(TaskMetadata::new("criteria"), Applet::flow(Flow::root(vec![]))).unwrap();
        let batch = EventBatch::single(Event::new("component_changed", Context::new()));
        TaskContext::new(Arc::new(task), &batch)
    }

    fn check(
        criterion: &dyn Criterion,
        applet: &Applet,
        target: Option<&Value>,
        ctx: &TaskContext,
    ) -> Result<Checked, ApplyError> {
        let input = CriterionInput {
            applet,
            target,
            expected: applet.value(),
            context: ctx,
        };
        criterion.check(&input)
    }

    #[test]
    fn test_field_criterion() {
        let ctx = context();
        let criterion = FnCriterion::field("package", |actual, expected| actual == expected);
        let applet = Applet::criterion(AppletId::new(0x10, 1), FnCriterion::field("x", |_, _| true))
            .with_value(json!("com.example"));

        let hit = check(&criterion, &applet, Some(&json!({"package": "com.example"})), &ctx).unwrap();
        assert!(hit.matched);
        assert_eq!(hit.actual, json!("com.example"));

        // A missing field never matches
        let miss = check(&criterion, &applet, Some(&json!({})), &ctx).unwrap();
        assert!(!miss.matched);
        assert!(miss.actual.is_null());

        assert!(matches!(
            check(&criterion, &applet, None, &ctx),
            Err(ApplyError::TargetUnavailable(_))
        ));
    }

    #[test]
    fn test_property_criterion_ignores_value() {
        let ctx = context();
        let criterion = PropertyCriterion::new(|target| target["enabled"] == json!(true));
        let applet = Applet::criterion(AppletId::new(0x13, 2), PropertyCriterion::new(|_| true));

        let checked = check(&criterion, &applet, Some(&json!({"enabled": true})), &ctx).unwrap();
        assert_eq!(checked, Checked { matched: true, actual: json!(true) });
    }

    #[test]
    fn test_pattern_criterion_shares_compiled_pattern() {
        let ctx = context();
        let criterion = PatternCriterion::new("package");
        let applet = Applet::criterion(AppletId::new(0x10, 3), PatternCriterion::new("package"))
            .with_value(json!(r"^com\.example\."));

        let target = json!({"package": "com.example.app"});
        assert!(check(&criterion, &applet, Some(&target), &ctx).unwrap().matched);

        let other = json!({"package": "org.example.app"});
        assert!(!check(&criterion, &applet, Some(&other), &ctx).unwrap().matched);
    }

    #[test]
    fn test_same_id_keeps_patterns_apart() {
        let ctx = context();
        let id = AppletId::new(0x10, 3);
        let starts_with_a = Applet::criterion(id, PatternCriterion::new("package"))
            .with_value(json!(r"^com\.a"));
        let starts_with_b = Applet::criterion(id, PatternCriterion::new("package"))
            .with_value(json!(r"^com\.b"));
        let criterion = PatternCriterion::new("package");
        let target = json!({"package": "com.b.app"});

        assert!(!check(&criterion, &starts_with_a, Some(&target), &ctx).unwrap().matched);
        assert!(check(&criterion, &starts_with_b, Some(&target), &ctx).unwrap().matched);
        // Cached entries are still honoured on the second pass
        assert!(!check(&criterion, &starts_with_a, Some(&target), &ctx).unwrap().matched);
    }

    #[test]
    fn test_invalid_pattern_is_an_argument_error() {
        let ctx = context();
        let criterion = PatternCriterion::new("package");
        let applet = Applet::criterion(AppletId::new(0x10, 4), PatternCriterion::new("package"))
            .with_value(json!("("));

        let err = check(&criterion, &applet, Some(&json!({"package": "x"})), &ctx).unwrap_err();
        assert!(matches!(err, ApplyError::InvalidArgument { slot: 0, .. }));

        let numeric = Applet::criterion(AppletId::new(0x10, 5), PatternCriterion::new("package"))
            .with_value(json!(42));
        let err = check(&criterion, &numeric, Some(&json!({"package": "x"})), &ctx).unwrap_err();
        assert!(matches!(err, ApplyError::InvalidArgument { slot: 0, .. }));
    }
}
