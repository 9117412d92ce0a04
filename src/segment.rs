use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::rule::{conditions_match, Condition};
use crate::store::Storage;
use crate::EvaluationContext;

/// A named, reusable group of contexts, usable inside flag rule conditions.
/// Segments may nest: membership requires the segment's own conditions to
/// match AND membership in the parent segment, if one is set.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// AND semantics; empty means every context matches at this level.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_segment_id: Option<Uuid>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Decides whether `context` belongs to the segment identified by
/// `segment_id`, walking the parent chain.
///
/// A missing or disabled segment is simply not matched. A parent chain that
/// loops back on itself is a data corruption problem and raises
/// [Error::CircularSegmentReference] with the full visited chain rather than
/// looping forever.
///
/// `cache` is an optional per-call memo of segments already fetched; it is
/// consulted before storage and populated on every fetch, so a rule that
/// references the same segment tree repeatedly hits storage once per
/// segment.
pub async fn is_in_segment(
    segment_id: Uuid,
    context: &EvaluationContext,
    storage: &dyn Storage,
    cache: Option<&mut HashMap<Uuid, Segment>>,
) -> Result<bool, Error> {
    membership(segment_id, context, storage, cache, Vec::new()).await
}

fn membership<'a>(
    segment_id: Uuid,
    context: &'a EvaluationContext,
    storage: &'a dyn Storage,
    cache: Option<&'a mut HashMap<Uuid, Segment>>,
    visited: Vec<Uuid>,
) -> Pin<Box<dyn Future<Output = Result<bool, Error>> + Send + 'a>> {
    Box::pin(async move {
        if visited.contains(&segment_id) {
            return Err(Error::CircularSegmentReference {
                segment_id,
                chain: visited,
            });
        }

        let mut cache = cache;
        let segment = match cache.as_mut().and_then(|c| c.get(&segment_id).cloned()) {
            Some(segment) => segment,
            None => match storage.get_segment(segment_id).await? {
                Some(segment) => {
                    if let Some(c) = cache.as_mut() {
                        c.insert(segment_id, segment.clone());
                    }
                    segment
                }
                None => return Ok(false),
            },
        };

        if !segment.enabled {
            return Ok(false);
        }
        if !conditions_match(&segment.conditions, context) {
            return Ok(false);
        }

        match segment.parent_segment_id {
            None => Ok(true),
            Some(parent_id) => {
                let mut chain = visited;
                chain.push(segment_id);
                membership(
                    parent_id,
                    context,
                    storage,
                    cache.as_mut().map(|c| &mut **c),
                    chain,
                )
                .await
            }
        }
    })
}
