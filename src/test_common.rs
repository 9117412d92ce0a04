#![cfg(test)]

use uuid::Uuid;

use crate::flag::{EntityType, Flag, FlagStatus, FlagType, Override, Variant};
use crate::rule::{Condition, Op, Rule};
use crate::segment::Segment;
use crate::FlagValue;

pub fn basic_flag(key: &str) -> Flag {
    Flag {
        id: Uuid::new_v4(),
        key: key.to_string(),
        name: key.to_string(),
        flag_type: FlagType::Boolean,
        status: FlagStatus::Active,
        default_enabled: false,
        default_value: None,
        rules: vec![],
        variants: vec![],
    }
}

pub fn basic_rule(name: &str, priority: i32, conditions: Vec<Condition>) -> Rule {
    Rule {
        id: Uuid::new_v4(),
        name: name.to_string(),
        priority,
        enabled: true,
        conditions,
        serve_enabled: None,
        serve_value: None,
        rollout_percentage: None,
    }
}

pub fn condition(attribute: &str, operator: Op, value: impl Into<FlagValue>) -> Condition {
    Condition {
        attribute: attribute.to_string(),
        operator,
        value: value.into(),
    }
}

pub fn basic_variant(key: &str, value: serde_json::Value, weight: u32) -> Variant {
    Variant {
        id: Uuid::new_v4(),
        key: key.to_string(),
        name: key.to_string(),
        value: value.into(),
        weight,
    }
}

pub fn basic_override(
    flag_id: Uuid,
    entity_type: EntityType,
    entity_id: &str,
    enabled: bool,
) -> Override {
    Override {
        id: Uuid::new_v4(),
        flag_id,
        entity_type,
        entity_id: entity_id.to_string(),
        enabled,
        value: None,
        expires_at: None,
    }
}

pub fn basic_segment(name: &str) -> Segment {
    Segment {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        conditions: vec![],
        parent_segment_id: None,
        enabled: true,
    }
}
