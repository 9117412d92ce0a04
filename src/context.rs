use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::FlagValue;

/// An EvaluationContext carries the request-scoped facts a flag evaluation
/// can target on: who is asking (targeting key, user, organization, tenant)
/// and arbitrary custom attributes.
///
/// Contexts are immutable once built. Use [ContextBuilder] to construct one,
/// or the `with_*` methods to derive a modified copy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EvaluationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targeting_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, FlagValue>,
}

impl EvaluationContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Resolves an attribute by name. Reserved field names take precedence
    /// over entries in the custom attribute map, but an unset reserved field
    /// falls through to a same-named custom attribute.
    pub fn get(&self, name: &str) -> Option<FlagValue> {
        let reserved = match name {
            "targeting_key" => &self.targeting_key,
            "user_id" => &self.user_id,
            "organization_id" => &self.organization_id,
            "tenant_id" => &self.tenant_id,
            "environment" => &self.environment,
            "app_version" => &self.app_version,
            "country" => &self.country,
            _ => &None,
        };
        reserved
            .as_deref()
            .map(FlagValue::from)
            .or_else(|| self.attributes.get(name).cloned())
    }

    /// Merges `other` into this context, producing a new one. Fields set on
    /// `other` win; unset (None) fields never erase this context's values.
    /// Attribute maps are unioned with `other`'s entries taking precedence.
    pub fn merge(&self, other: &EvaluationContext) -> EvaluationContext {
        let mut attributes = self.attributes.clone();
        attributes.extend(other.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        EvaluationContext {
            targeting_key: other.targeting_key.clone().or_else(|| self.targeting_key.clone()),
            user_id: other.user_id.clone().or_else(|| self.user_id.clone()),
            organization_id: other
                .organization_id
                .clone()
                .or_else(|| self.organization_id.clone()),
            tenant_id: other.tenant_id.clone().or_else(|| self.tenant_id.clone()),
            environment: other.environment.clone().or_else(|| self.environment.clone()),
            app_version: other.app_version.clone().or_else(|| self.app_version.clone()),
            country: other.country.clone().or_else(|| self.country.clone()),
            attributes,
        }
    }

    pub fn with_targeting_key(&self, targeting_key: impl Into<String>) -> EvaluationContext {
        let mut ctx = self.clone();
        ctx.targeting_key = Some(targeting_key.into());
        ctx
    }

    pub fn with_environment(&self, environment: impl Into<String>) -> EvaluationContext {
        let mut ctx = self.clone();
        ctx.environment = Some(environment.into());
        ctx
    }

    pub fn with_attribute(
        &self,
        name: impl Into<String>,
        value: impl Into<FlagValue>,
    ) -> EvaluationContext {
        let mut ctx = self.clone();
        ctx.attributes.insert(name.into(), value.into());
        ctx
    }
}

/// Builder for [EvaluationContext].
#[derive(Clone, Debug, Default)]
pub struct ContextBuilder {
    context: EvaluationContext,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targeting_key(mut self, key: impl Into<String>) -> Self {
        self.context.targeting_key = Some(key.into());
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.context.user_id = Some(id.into());
        self
    }

    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.context.organization_id = Some(id.into());
        self
    }

    pub fn tenant_id(mut self, id: impl Into<String>) -> Self {
        self.context.tenant_id = Some(id.into());
        self
    }

    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.context.environment = Some(env.into());
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.context.app_version = Some(version.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.context.country = Some(country.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.context.attributes.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> EvaluationContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn get_resolves_reserved_fields_before_attributes() {
        let context = ContextBuilder::new()
            .targeting_key("key-1")
            .user_id("user-1")
            .attribute("user_id", "shadowed")
            .attribute("plan", "pro")
            .build();

        assert_eq!(context.get("user_id"), Some("user-1".into()));
        assert_eq!(context.get("targeting_key"), Some("key-1".into()));
        assert_eq!(context.get("plan"), Some("pro".into()));
        assert_eq!(context.get("missing"), None);
    }

    #[test]
    fn unset_reserved_field_falls_through_to_attributes() {
        let context = ContextBuilder::new()
            .targeting_key("key-1")
            .attribute("country", "US")
            .build();

        assert_eq!(context.get("country"), Some("US".into()));
        assert_eq!(context.get("environment"), None);
    }

    #[test]
    fn merge_prefers_other_but_keeps_unset_fields() {
        let base = ContextBuilder::new()
            .targeting_key("base")
            .environment("production")
            .attribute("plan", "free")
            .attribute("region", "eu")
            .build();
        let call = ContextBuilder::new()
            .targeting_key("call")
            .attribute("plan", "pro")
            .build();

        let merged = base.merge(&call);
        assert_eq!(merged.targeting_key.as_deref(), Some("call"));
        assert_eq!(merged.environment.as_deref(), Some("production"));
        assert_eq!(
            merged.attributes,
            hashmap! {
                "plan".to_string() => "pro".into(),
                "region".to_string() => "eu".into(),
            }
        );
    }

    #[test]
    fn with_methods_do_not_mutate_the_original() {
        let original = ContextBuilder::new().targeting_key("a").build();
        let derived = original.with_targeting_key("b").with_attribute("k", 1_i64);

        assert_eq!(original.targeting_key.as_deref(), Some("a"));
        assert!(original.attributes.is_empty());
        assert_eq!(derived.targeting_key.as_deref(), Some("b"));
        assert_eq!(derived.get("k"), Some(FlagValue::Int(1)));
    }
}
