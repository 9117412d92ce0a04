use log::warn;
use serde::{Deserialize, Serialize};

/// Converting float to int has undefined behaviour for huge floats. Refuse to
/// convert floats with magnitude greater than 2**53 - 1, after which 64-bit
/// floats no longer retain integer precision.
const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// FlagValue is the dynamic value carried by flags, variants, overrides, rule
/// conditions and context attributes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    // Int before Float: untagged deserialization tries variants in order,
    // and a JSON integer must land on the Int tag.
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_owned())
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Float(f)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> FlagValue {
        FlagValue::Int(i)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.into()
                } else if let Some(f) = n.as_f64() {
                    f.into()
                } else {
                    warn!("unrepresentable number {}, converting to string", n);
                    FlagValue::Json(format!("{}", n).into())
                }
            }
            Value::String(s) => s.into(),
            Value::Null | Value::Object(_) | Value::Array(_) => FlagValue::Json(v),
        }
    }
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            FlagValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Float(f) if f.abs() <= FLOAT_TO_INT_MAX => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Value::from(*b),
            FlagValue::Str(s) => Value::from(s.as_str()),
            FlagValue::Float(f) => Value::from(*f),
            FlagValue::Int(i) => Value::from(*i),
            FlagValue::Json(v) => v.clone(),
        }
    }

    /// Equality used by the `eq`/`ne`/`in`/`not_in` operators: numbers compare
    /// numerically regardless of the Int/Float tag, everything else compares
    /// structurally.
    pub(crate) fn loose_eq(&self, other: &FlagValue) -> bool {
        match (self.as_float(), other.as_float()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn float_to_int_bounds() {
        let test_cases = vec![
            (1.99, Some(1)),
            (9007199254740991.0, Some(9007199254740991)),
            (9007199254740992.0, None),
            (-1.99, Some(-1)),
            (-9007199254740992.0, None),
        ];
        for (have, expect) in test_cases {
            assert_eq!(FlagValue::Float(have).as_int(), expect);
        }
    }

    #[test]
    fn converts_json_values_by_shape() {
        assert_eq!(FlagValue::from(json!(true)), FlagValue::Bool(true));
        assert_eq!(FlagValue::from(json!(3)), FlagValue::Int(3));
        assert_eq!(FlagValue::from(json!(2.5)), FlagValue::Float(2.5));
        assert_eq!(FlagValue::from(json!("x")), FlagValue::Str("x".into()));
        assert_eq!(
            FlagValue::from(json!({"a": 1})),
            FlagValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn deserializes_integers_as_int() {
        let int: FlagValue = serde_json::from_str("7").unwrap();
        assert_eq!(int, FlagValue::Int(7));
        let float: FlagValue = serde_json::from_str("7.5").unwrap();
        assert_eq!(float, FlagValue::Float(7.5));
    }

    #[test]
    fn loose_equality_bridges_numeric_tags() {
        assert!(FlagValue::Int(1).loose_eq(&FlagValue::Float(1.0)));
        assert!(!FlagValue::Int(1).loose_eq(&FlagValue::Float(1.5)));
        assert!(FlagValue::Str("a".into()).loose_eq(&"a".into()));
        assert!(!FlagValue::Str("1".into()).loose_eq(&FlagValue::Int(1)));
    }
}
