use std::cmp::Ordering;

use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EvaluationContext, FlagValue};

/// A targeting rule attached to a flag. Rules are evaluated in ascending
/// `priority` order and the first matching rule decides the outcome.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_value: Option<FlagValue>,
    /// Percentage of the bucketed population this rule applies to. Absent
    /// means the rule applies unconditionally once its conditions match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<u8>,
}

fn default_enabled() -> bool {
    true
}

/// A single predicate over one context attribute.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: Op,
    pub value: FlagValue,
}

/// Condition operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    SemverEq,
    SemverGt,
    SemverLt,
    InSegment,
    NotInSegment,
    /// Unrecognized operator names deserialize to this rather than failing.
    /// The matcher skips such conditions instead of failing the rule.
    #[serde(other)]
    Unknown,
}

impl Op {
    /// Segment membership cannot be decided from a context alone; these
    /// operators are resolved by the evaluation engine, which has storage
    /// access. Anywhere else they evaluate to false.
    pub(crate) fn is_segment_op(&self) -> bool {
        matches!(self, Op::InSegment | Op::NotInSegment)
    }

    fn matches(&self, actual: &FlagValue, expected: &FlagValue) -> bool {
        match self {
            Op::Eq => actual.loose_eq(expected),
            Op::Ne => !actual.loose_eq(expected),
            Op::Gt => numeric_op(actual, expected, |l, r| l > r),
            Op::Gte => numeric_op(actual, expected, |l, r| l >= r),
            Op::Lt => numeric_op(actual, expected, |l, r| l < r),
            Op::Lte => numeric_op(actual, expected, |l, r| l <= r),
            Op::In => list_contains(expected, actual),
            Op::NotIn => !list_contains(expected, actual),
            Op::Contains => string_op(actual, expected, |l, r| l.contains(r)),
            Op::NotContains => !string_op(actual, expected, |l, r| l.contains(r)),
            Op::StartsWith => string_op(actual, expected, |l, r| l.starts_with(r)),
            Op::EndsWith => string_op(actual, expected, |l, r| l.ends_with(r)),
            Op::Matches => regex_match(actual, expected),
            Op::SemverEq => version_op(actual, expected, Ordering::is_eq),
            Op::SemverGt => version_op(actual, expected, Ordering::is_gt),
            Op::SemverLt => version_op(actual, expected, Ordering::is_lt),
            Op::InSegment | Op::NotInSegment | Op::Unknown => false,
        }
    }
}

impl Condition {
    /// Evaluates this condition against a context attribute, with no storage
    /// access. Segment operators always evaluate to false here.
    pub fn matches(&self, context: &EvaluationContext) -> bool {
        match context.get(&self.attribute) {
            Some(actual) => self.operator.matches(&actual, &self.value),
            // Absence implies "does not contain"; every other operator fails.
            None => self.operator == Op::NotContains,
        }
    }
}

/// AND over a condition list, skipping conditions with unrecognized
/// operators. An empty list matches.
pub(crate) fn conditions_match(conditions: &[Condition], context: &EvaluationContext) -> bool {
    conditions
        .iter()
        .filter(|c| c.operator != Op::Unknown)
        .all(|c| c.matches(context))
}

fn string_op(actual: &FlagValue, expected: &FlagValue, f: fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn numeric_op(actual: &FlagValue, expected: &FlagValue, f: fn(f64, f64) -> bool) -> bool {
    match (actual.as_float(), expected.as_float()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn list_contains(candidates: &FlagValue, actual: &FlagValue) -> bool {
    match candidates {
        FlagValue::Json(serde_json::Value::Array(items)) => items
            .iter()
            .any(|item| FlagValue::from(item.clone()).loose_eq(actual)),
        _ => false,
    }
}

fn regex_match(actual: &FlagValue, pattern: &FlagValue) -> bool {
    let (Some(actual), Some(pattern)) = (actual.as_str(), pattern.as_str()) else {
        return false;
    };
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(actual),
        Err(e) => {
            warn!("invalid regex pattern {:?}: {}", pattern, e);
            false
        }
    }
}

/// Compares dotted version strings component-wise as integers, padding the
/// shorter with zeros ("1.2" equals "1.2.0"; four or more components are
/// legal). Non-numeric or empty components make the condition false.
fn version_op(actual: &FlagValue, expected: &FlagValue, f: fn(Ordering) -> bool) -> bool {
    match (
        actual.as_str().and_then(parse_version),
        expected.as_str().and_then(parse_version),
    ) {
        (Some(l), Some(r)) => f(compare_components(&l, &r)),
        _ => false,
    }
}

fn parse_version(s: &str) -> Option<Vec<u64>> {
    s.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

fn compare_components(l: &[u64], r: &[u64]) -> Ordering {
    let len = l.len().max(r.len());
    for i in 0..len {
        let a = l.get(i).copied().unwrap_or(0);
        let b = r.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
