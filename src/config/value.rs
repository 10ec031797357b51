//! Typed configuration values and the string coercion recognizer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A configuration value. OCPP transports every value as a string; the
/// declared type of the registry entry decides how incoming strings are
/// interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    Int(i32),
    Float(f64),
    Bool(bool),
    String(String),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Wire representation for `GetConfiguration`.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::String(v) => v.clone(),
        }
    }

    /// Interpret an incoming string as a value of the same type as `self`.
    ///
    /// `ChangeConfiguration` may deliver numbers and booleans as strings;
    /// the recognizer tries an integer parse, then a float parse, then
    /// keeps the string, and finally checks the result against the declared
    /// type (an int entry accepts a float only if it is integral).
    pub fn coerce(&self, raw: &str) -> Option<ConfigValue> {
        let recognized = Self::recognize(raw);
        match (self, recognized) {
            (Self::Int(_), ConfigValue::Int(v)) => Some(ConfigValue::Int(v)),
            (Self::Int(_), ConfigValue::Float(f)) if f.fract() == 0.0 => {
                i32::try_from(f as i64).ok().map(ConfigValue::Int)
            }
            (Self::Float(_), ConfigValue::Int(v)) => Some(ConfigValue::Float(v as f64)),
            (Self::Float(_), ConfigValue::Float(f)) => Some(ConfigValue::Float(f)),
            (Self::Bool(_), _) => match raw.trim() {
                "true" | "True" | "TRUE" | "1" => Some(ConfigValue::Bool(true)),
                "false" | "False" | "FALSE" | "0" => Some(ConfigValue::Bool(false)),
                _ => None,
            },
            (Self::String(_), _) => Some(ConfigValue::String(raw.to_string())),
            _ => None,
        }
    }

    /// Untyped recognizer: integer, then float, otherwise string.
    pub fn recognize(raw: &str) -> ConfigValue {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i32>() {
            return ConfigValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return ConfigValue::Float(v);
            }
        }
        ConfigValue::String(raw.to_string())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_prefers_int_then_float() {
        assert_eq!(ConfigValue::recognize("42"), ConfigValue::Int(42));
        assert_eq!(ConfigValue::recognize("-7"), ConfigValue::Int(-7));
        assert_eq!(ConfigValue::recognize("3.5"), ConfigValue::Float(3.5));
        assert_eq!(
            ConfigValue::recognize("plain"),
            ConfigValue::String("plain".into())
        );
    }

    #[test]
    fn coerce_against_declared_type() {
        let int_entry = ConfigValue::Int(0);
        assert_eq!(int_entry.coerce("900"), Some(ConfigValue::Int(900)));
        assert_eq!(int_entry.coerce("900.0"), Some(ConfigValue::Int(900)));
        assert_eq!(int_entry.coerce("x"), None);

        let bool_entry = ConfigValue::Bool(false);
        assert_eq!(bool_entry.coerce("true"), Some(ConfigValue::Bool(true)));
        assert_eq!(bool_entry.coerce("0"), Some(ConfigValue::Bool(false)));
        assert_eq!(bool_entry.coerce("yes"), None);

        let str_entry = ConfigValue::String(String::new());
        assert_eq!(
            str_entry.coerce("42"),
            Some(ConfigValue::String("42".into()))
        );
    }

    #[test]
    fn wire_string_roundtrip_for_get_configuration() {
        assert_eq!(ConfigValue::Int(300).to_wire_string(), "300");
        assert_eq!(ConfigValue::Bool(true).to_wire_string(), "true");
        assert_eq!(
            ConfigValue::String("A,B".into()).to_wire_string(),
            "A,B"
        );
    }
}
