use std::collections::HashMap;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::flag::{EntityType, Flag, FlagType, Variant};
use crate::hash::bucket;
use crate::rule::{Op, Rule};
use crate::segment::{self, Segment};
use crate::store::Storage;
use crate::{EvaluationContext, FlagValue};

/// Reason describes which stage of the evaluation algorithm produced the
/// result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The flag's static default was served with no targeting involved.
    Static,
    /// A targeting rule matched the context.
    TargetingMatch,
    /// A weighted variant was selected.
    Split,
    /// An operator override for this entity forced the outcome.
    Override,
    /// The flag is inactive or archived.
    Disabled,
    /// The flag was not found; the caller's default was served.
    Default,
    /// Evaluation failed; the caller's default was served.
    Error,
}

/// The outcome of evaluating one flag against one context.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EvaluationResult {
    pub value: FlagValue,
    /// The matched rule's name or the selected variant's key, when targeting
    /// or a split decided the outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub reason: Reason,
}

impl EvaluationResult {
    fn of(value: FlagValue, reason: Reason) -> Self {
        EvaluationResult {
            value,
            variant: None,
            reason,
        }
    }
}

/// Evaluates a flag against a context.
///
/// Resolution order: disabled check, entity overrides, targeting rules in
/// priority order, weighted variants, static default. Storage failures
/// propagate; the matching edge cases themselves never raise.
pub async fn evaluate(
    storage: &dyn Storage,
    flag: &Flag,
    context: &EvaluationContext,
) -> Result<EvaluationResult, Error> {
    if !flag.is_active() {
        return Ok(EvaluationResult::of(flag.static_value(), Reason::Disabled));
    }

    if let Some(ov) = find_override(storage, flag, context).await? {
        let value = match flag.flag_type {
            FlagType::Boolean => FlagValue::Bool(ov.enabled),
            _ => ov.value.unwrap_or(FlagValue::Bool(ov.enabled)),
        };
        return Ok(EvaluationResult::of(value, Reason::Override));
    }

    if let Some(rule) = find_matching_rule(storage, flag, context).await? {
        let value = rule
            .serve_value
            .clone()
            .unwrap_or(FlagValue::Bool(rule.serve_enabled.unwrap_or(true)));
        return Ok(EvaluationResult {
            value,
            variant: Some(rule.name.clone()),
            reason: Reason::TargetingMatch,
        });
    }

    if let Some(variant) = select_variant(flag, context.targeting_key.as_deref()) {
        return Ok(EvaluationResult {
            value: variant.value_for(flag.flag_type),
            variant: Some(variant.key.clone()),
            reason: Reason::Split,
        });
    }

    Ok(EvaluationResult::of(flag.static_value(), Reason::Static))
}

/// Builds the override candidate list in fixed priority order and returns
/// the first live override. The targeting key is only consulted as its own
/// entity when it differs from every id already queried.
async fn find_override(
    storage: &dyn Storage,
    flag: &Flag,
    context: &EvaluationContext,
) -> Result<Option<crate::flag::Override>, Error> {
    let mut candidates: Vec<(EntityType, &str)> = Vec::with_capacity(4);
    if let Some(id) = context.user_id.as_deref() {
        candidates.push((EntityType::User, id));
    }
    if let Some(id) = context.organization_id.as_deref() {
        candidates.push((EntityType::Organization, id));
    }
    if let Some(id) = context.tenant_id.as_deref() {
        candidates.push((EntityType::Tenant, id));
    }
    if let Some(key) = context.targeting_key.as_deref() {
        if candidates.iter().all(|(_, id)| *id != key) {
            candidates.push((EntityType::TargetingKey, key));
        }
    }

    let now = Utc::now();
    for (entity_type, entity_id) in candidates {
        if let Some(ov) = storage.get_override(flag.id, entity_type, entity_id).await? {
            // Storage already filters expiry; re-check so a stale backend
            // cannot resurrect an expired override.
            if !ov.is_expired(now) {
                return Ok(Some(ov));
            }
        }
    }
    Ok(None)
}

/// Walks enabled rules in ascending priority order (stable on ties) and
/// returns the first whose conditions and rollout gate both pass.
async fn find_matching_rule<'a>(
    storage: &dyn Storage,
    flag: &'a Flag,
    context: &EvaluationContext,
) -> Result<Option<&'a Rule>, Error> {
    let mut rules: Vec<&Rule> = flag.rules.iter().filter(|r| r.enabled).collect();
    rules.sort_by_key(|r| r.priority);

    // Segments referenced more than once within one evaluation are fetched
    // once.
    let mut segment_cache: HashMap<Uuid, Segment> = HashMap::new();

    'rules: for rule in rules {
        for condition in &rule.conditions {
            let matched = match condition.operator {
                Op::Unknown => continue,
                Op::InSegment => {
                    resolve_segment_membership(storage, condition, context, &mut segment_cache)
                        .await?
                }
                Op::NotInSegment => {
                    !resolve_segment_membership(storage, condition, context, &mut segment_cache)
                        .await?
                }
                _ => condition.matches(context),
            };
            if !matched {
                continue 'rules;
            }
        }

        let in_rollout = match rule.rollout_percentage {
            // No rollout configured means the rule applies to everyone,
            // targeting key or not.
            None => true,
            Some(percentage) => {
                rollout_bucket(&flag.key, context.targeting_key.as_deref(), percentage)
            }
        };
        if in_rollout {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

/// A condition value under `in_segment`/`not_in_segment` names the segment
/// by id or, failing a UUID parse, by unique name. An unresolvable reference
/// is treated as non-membership.
async fn resolve_segment_membership(
    storage: &dyn Storage,
    condition: &crate::rule::Condition,
    context: &EvaluationContext,
    cache: &mut HashMap<Uuid, Segment>,
) -> Result<bool, Error> {
    debug_assert!(condition.operator.is_segment_op());
    let Some(reference) = condition.value.as_str() else {
        warn!("segment condition value is not a string: {:?}", condition.value);
        return Ok(false);
    };
    let segment_id = match reference.parse::<Uuid>() {
        Ok(id) => id,
        Err(_) => match storage.get_segment_by_name(reference).await? {
            Some(segment) => {
                let id = segment.id;
                cache.insert(id, segment);
                id
            }
            None => return Ok(false),
        },
    };
    segment::is_in_segment(segment_id, context, storage, Some(cache)).await
}

/// Percentage rollout gate: a context with no targeting key is never in a
/// rollout; otherwise membership follows its stable bucket in `0..100`.
pub(crate) fn rollout_bucket(
    flag_key: &str,
    targeting_key: Option<&str>,
    percentage: u8,
) -> bool {
    match targeting_key {
        None | Some("") => false,
        Some(key) => bucket(flag_key, key) < percentage as u32,
    }
}

/// Deterministic weighted variant selection. The bucket walks variants in
/// their defined order against cumulative weights; buckets beyond the
/// accumulated sum fall to the last variant.
pub(crate) fn select_variant<'a>(flag: &'a Flag, targeting_key: Option<&str>) -> Option<&'a Variant> {
    if flag.variants.is_empty() {
        return None;
    }
    let bucket = bucket(&flag.key, targeting_key.unwrap_or(""));
    let mut cumulative = 0_u32;
    for variant in &flag.variants {
        cumulative += variant.weight;
        if bucket < cumulative {
            return Some(variant);
        }
    }
    flag.variants.last()
}
