// ── Typed FIMP payload values ──
//
// On the wire a value is the pair (`val_t`, `val`). Here it is a tagged
// variant so handlers match on the shape instead of inspecting JSON.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

/// Declared type of a payload value (`val_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValueType {
    Null,
    String,
    Int,
    Float,
    Bool,
    IntMap,
    FloatMap,
    StrMap,
    StrArray,
    Object,
}

/// A decoded payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    IntMap(BTreeMap<String, i64>),
    FloatMap(BTreeMap<String, f64>),
    StrMap(BTreeMap<String, String>),
    StrArray(Vec<String>),
    Object(serde_json::Value),
}

impl Value {
    /// Build an object value from any serializable type.
    pub fn object<T: Serialize>(value: &T) -> Result<Self, Error> {
        Ok(Self::Object(serde_json::to_value(value)?))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Bool(_) => ValueType::Bool,
            Self::IntMap(_) => ValueType::IntMap,
            Self::FloatMap(_) => ValueType::FloatMap,
            Self::StrMap(_) => ValueType::StrMap,
            Self::StrArray(_) => ValueType::StrArray,
            Self::Object(_) => ValueType::Object,
        }
    }

    // ── Typed accessors ──────────────────────────────────────────────

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(other.mismatch(ValueType::String)),
        }
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Self::Int(i) => Ok(*i),
            other => Err(other.mismatch(ValueType::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f64, Error> {
        match self {
            Self::Float(f) => Ok(*f),
            other => Err(other.mismatch(ValueType::Float)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch(ValueType::Bool)),
        }
    }

    pub fn as_int_map(&self) -> Result<&BTreeMap<String, i64>, Error> {
        match self {
            Self::IntMap(m) => Ok(m),
            other => Err(other.mismatch(ValueType::IntMap)),
        }
    }

    pub fn as_float_map(&self) -> Result<&BTreeMap<String, f64>, Error> {
        match self {
            Self::FloatMap(m) => Ok(m),
            other => Err(other.mismatch(ValueType::FloatMap)),
        }
    }

    pub fn as_str_map(&self) -> Result<&BTreeMap<String, String>, Error> {
        match self {
            Self::StrMap(m) => Ok(m),
            other => Err(other.mismatch(ValueType::StrMap)),
        }
    }

    pub fn as_str_array(&self) -> Result<&[String], Error> {
        match self {
            Self::StrArray(a) => Ok(a),
            other => Err(other.mismatch(ValueType::StrArray)),
        }
    }

    /// Decode an object value into a caller-defined type.
    pub fn as_object<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match self {
            Self::Object(v) => Ok(serde_json::from_value(v.clone())?),
            other => Err(other.mismatch(ValueType::Object)),
        }
    }

    // ── Wire conversion ──────────────────────────────────────────────

    /// Decode the (`val_t`, `val`) pair.
    pub(crate) fn from_wire(value_type: &str, raw: serde_json::Value) -> Result<Self, Error> {
        let value_type: ValueType = value_type
            .parse()
            .map_err(|_| Error::UnknownValueType(value_type.to_owned()))?;

        let invalid = |e: serde_json::Error| Error::InvalidValue {
            value_type,
            reason: e.to_string(),
        };

        let value = match value_type {
            ValueType::Null => Self::Null,
            ValueType::String => Self::String(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::Int => Self::Int(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::Float => Self::Float(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::Bool => Self::Bool(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::IntMap => Self::IntMap(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::FloatMap => Self::FloatMap(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::StrMap => Self::StrMap(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::StrArray => Self::StrArray(serde_json::from_value(raw).map_err(invalid)?),
            ValueType::Object => Self::Object(raw),
        };

        Ok(value)
    }

    /// Encode into the (`val_t`, `val`) pair.
    pub(crate) fn to_wire(&self) -> (ValueType, serde_json::Value) {
        let raw = match self {
            Self::Null => serde_json::Value::Null,
            Self::String(s) => serde_json::Value::from(s.as_str()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::IntMap(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), (*v).into())).collect(),
            ),
            Self::FloatMap(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), (*v).into())).collect(),
            ),
            Self::StrMap(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().into()))
                    .collect(),
            ),
            Self::StrArray(a) => serde_json::Value::from(a.clone()),
            Self::Object(v) => v.clone(),
        };

        (self.value_type(), raw)
    }

    fn mismatch(&self, expected: ValueType) -> Error {
        Error::UnexpectedValueType {
            expected,
            got: self.value_type(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_type_names_match_wire() {
        assert_eq!(ValueType::StrMap.to_string(), "str_map");
        assert_eq!("int_map".parse::<ValueType>().unwrap(), ValueType::IntMap);
        assert!("decimal".parse::<ValueType>().is_err());
    }

    #[test]
    fn decode_rejects_mismatched_shape() {
        let err = Value::from_wire("int", json!("twelve")).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValue {
                value_type: ValueType::Int,
                ..
            }
        ));
    }

    #[test]
    fn accessor_reports_expected_and_actual() {
        let err = Value::Int(3).as_str().unwrap_err();
        match err {
            Error::UnexpectedValueType { expected, got } => {
                assert_eq!(expected, ValueType::String);
                assert_eq!(got, ValueType::Int);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn object_decodes_into_caller_type() {
        #[derive(serde::Deserialize)]
        struct Target {
            version: String,
        }

        let value = Value::from_wire("object", json!({ "version": "1.2.0" })).unwrap();
        let target: Target = value.as_object().unwrap();
        assert_eq!(target.version, "1.2.0");
    }

    #[test]
    fn str_map_encodes_as_object() {
        let mut map = BTreeMap::new();
        map.insert("address".to_owned(), "7".to_owned());
        let (value_type, raw) = Value::StrMap(map).to_wire();
        assert_eq!(value_type, ValueType::StrMap);
        assert_eq!(raw, json!({ "address": "7" }));
    }
}
