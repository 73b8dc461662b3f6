use std::{collections::BTreeMap, fmt};

/// A weakly-typed, tree-shaped value.
///
/// Session variables, feeder cells and parsed response bodies all share this
/// representation, so field lookups and template rendering never depend on a
/// particular parser's types.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Kept as parsed, so 64-bit integers survive a round trip exactly.
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Parse a JSON document into a [`Value`] tree.
    pub fn parse_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<serde_json::Value>(text).map(Value::from)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Equality used by field checks.
    ///
    /// Values are equal when structurally equal, when both are numbers of the
    /// same magnitude (`1` matches `1.0`), or when one side is a string whose
    /// text equals the other side's rendered text (`"1"` matches `1`).
    pub fn loosely_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => numbers_eq(a, b),
            (Value::String(s), v) | (v, Value::String(s)) => *s == v.to_string(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value the way it is substituted into templates: strings
    /// verbatim, integral numbers without a fraction, containers as JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => match n.as_f64().filter(|_| n.is_f64()).and_then(integral) {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{n}"),
            },
            Value::String(s) => f.write_str(s),
            Value::Array(_) | Value::Object(_) => {
                write!(f, "{}", serde_json::Value::from(self.clone()))
            }
        }
    }
}

fn integral(n: f64) -> Option<i64> {
    const LIMIT: f64 = 9_007_199_254_740_992.0; // 2^53
    (n.is_finite() && n.fract() == 0.0 && n.abs() <= LIMIT).then_some(n as i64)
}

/// Integers compare exactly; anything involving a fraction compares as `f64`.
fn numbers_eq(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    let exact = |n: &serde_json::Number| {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().and_then(integral).map(i128::from))
    };
    match (exact(a), exact(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_f64() == b.as_f64(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// NaN and infinities have no JSON form and become [`Value::Null`].
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Number(n.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_json() {
        let v = Value::parse_json(r#"{"id": "42", "items": [1, 2.5, null], "ok": true}"#).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj["id"], Value::from("42"));
        assert_eq!(
            obj["items"],
            Value::Array(vec![Value::from(1_i64), Value::from(2.5), Value::Null])
        );
        assert_eq!(obj["ok"], Value::Bool(true));
    }

    #[test]
    fn renders_for_templates() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::from(42_i64).to_string(), "42");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "null");

        let v = Value::parse_json(r#"{"a": [1, "x"]}"#).unwrap();
        assert_eq!(v.to_string(), r#"{"a":[1,"x"]}"#);
    }

    #[test]
    fn loose_equality_bridges_strings_and_numbers() {
        assert!(Value::from("1").loosely_eq(&Value::from(1_i64)));
        assert!(Value::from(1_i64).loosely_eq(&Value::from("1")));
        assert!(Value::from("true").loosely_eq(&Value::Bool(true)));
        assert!(!Value::from("2").loosely_eq(&Value::from(1_i64)));
        assert!(!Value::from(1_i64).loosely_eq(&Value::Bool(true)));
        assert!(Value::from(1_i64).loosely_eq(&Value::from(1.0)));
        assert!(!Value::from(1_i64).loosely_eq(&Value::from(1.5)));
    }

    #[test]
    fn large_integers_stay_exact() {
        let v = Value::parse_json(r#"{"id": 9007199254740993, "big": 18446744073709551615}"#)
            .unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj["id"].to_string(), "9007199254740993");
        assert_eq!(obj["id"].as_i64(), Some(9_007_199_254_740_993));
        assert_eq!(obj["big"].to_string(), "18446744073709551615");
        assert!(obj["id"].loosely_eq(&Value::from("9007199254740993")));
        assert!(!obj["id"].loosely_eq(&Value::from(9_007_199_254_740_992_i64)));
        assert_eq!(
            serde_json::Value::from(obj["id"].clone()).to_string(),
            "9007199254740993"
        );
    }

    #[test]
    fn integral_floats_render_without_a_fraction() {
        assert_eq!(Value::parse_json("2.0").unwrap().to_string(), "2");
        assert_eq!(Value::from(f64::NAN), Value::Null);
    }
}
