use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::Rule;
use crate::FlagValue;

/// The declared value type of a flag. Typed accessors on the client validate
/// requests against this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Active,
    Inactive,
    Archived,
}

/// A feature flag definition: identity, lifecycle status, default outcome,
/// targeting rules, and weighted variants for A/B splits. Overrides are
/// stored separately, keyed by flag id and entity.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Flag {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    #[serde(default = "default_flag_type")]
    pub flag_type: FlagType,
    #[serde(default = "default_status")]
    pub status: FlagStatus,
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<FlagValue>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

fn default_flag_type() -> FlagType {
    FlagType::Boolean
}

fn default_status() -> FlagStatus {
    FlagStatus::Active
}

impl Flag {
    /// Whether evaluation should proceed at all. Inactive and archived flags
    /// short-circuit to the static default.
    pub fn is_active(&self) -> bool {
        self.status == FlagStatus::Active
    }

    /// The flag's static default: `default_enabled` for boolean flags,
    /// `default_value` for the rest (falling back to the boolean default if
    /// no typed default was configured).
    pub fn static_value(&self) -> FlagValue {
        match self.flag_type {
            FlagType::Boolean => FlagValue::Bool(self.default_enabled),
            _ => self
                .default_value
                .clone()
                .unwrap_or(FlagValue::Bool(self.default_enabled)),
        }
    }
}

/// One arm of a weighted split. Weights are percentages; the walk over
/// cumulative weights clamps to the final variant, so lists that do not sum
/// to exactly 100 still select deterministically.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Variant {
    pub id: Uuid,
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub value: FlagValue,
    pub weight: u32,
}

impl Variant {
    /// The value this variant serves for a flag of the given type. Boolean
    /// flags store their outcome as `{"enabled": bool}` inside the variant
    /// value; a missing or malformed field reads as false.
    pub fn value_for(&self, flag_type: FlagType) -> FlagValue {
        match flag_type {
            FlagType::Boolean => {
                let enabled = self
                    .value
                    .as_json()
                    .get("enabled")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                FlagValue::Bool(enabled)
            }
            _ => self.value.clone(),
        }
    }
}

/// The entity scopes an override can pin, in the order the engine consults
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Organization,
    Tenant,
    TargetingKey,
}

/// A forced outcome for one specific entity, bypassing rules and rollout.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Override {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FlagValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Override {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::basic_flag;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn static_value_tracks_flag_type() {
        let mut flag = basic_flag("f");
        flag.default_enabled = true;
        assert_eq!(flag.static_value(), FlagValue::Bool(true));

        flag.flag_type = FlagType::String;
        flag.default_value = Some("blue".into());
        assert_eq!(flag.static_value(), FlagValue::Str("blue".into()));

        flag.default_value = None;
        assert_eq!(flag.static_value(), FlagValue::Bool(true));
    }

    #[test]
    fn boolean_variant_value_reads_enabled_field() {
        let variant = Variant {
            id: Uuid::new_v4(),
            key: "on".into(),
            name: String::new(),
            value: FlagValue::Json(json!({"enabled": true})),
            weight: 100,
        };
        assert_eq!(variant.value_for(FlagType::Boolean), FlagValue::Bool(true));
        assert_eq!(
            variant.value_for(FlagType::Json),
            FlagValue::Json(json!({"enabled": true}))
        );

        let bare = Variant {
            value: FlagValue::Json(json!({})),
            ..variant
        };
        assert_eq!(bare.value_for(FlagType::Boolean), FlagValue::Bool(false));
    }

    #[test]
    fn override_expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let mut ov = Override {
            id: Uuid::new_v4(),
            flag_id: Uuid::new_v4(),
            entity_type: EntityType::User,
            entity_id: "user-1".into(),
            enabled: true,
            value: None,
            expires_at: None,
        };
        assert!(!ov.is_expired(now));

        ov.expires_at = Some(now - Duration::hours(1));
        assert!(ov.is_expired(now));

        ov.expires_at = Some(now + Duration::hours(1));
        assert!(!ov.is_expired(now));
    }

    #[test]
    fn deserializes_with_defaults() {
        let flag: Flag = serde_json::from_value(json!({
            "id": "4cc77795-2a80-4c1d-b1e6-7d4e5e7c3d61",
            "key": "new-checkout",
            "name": "New checkout"
        }))
        .unwrap();
        assert_eq!(flag.flag_type, FlagType::Boolean);
        assert_eq!(flag.status, FlagStatus::Active);
        assert!(!flag.default_enabled);
        assert!(flag.rules.is_empty());
        assert!(flag.variants.is_empty());
    }
}
