//! Typed values for the trigger language.
//!
//! Everything the engine touches — message fields, expression results,
//! variables — is one of six kinds. Keeping the tag explicit replaces
//! the chains of runtime casts a dynamic tree walk would need: every
//! consumer matches on the variant it expects and errors otherwise.

use std::collections::BTreeMap;
use std::fmt;

/// The kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Double,
    Bool,
    String,
    List,
    Map,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Int => "int",
            Kind::Double => "double",
            Kind::Bool => "bool",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Map => "map",
        };
        f.write_str(name)
    }
}

/// A value of one of the six trigger-language kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Bool(bool),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Double(_) => Kind::Double,
            Value::Bool(_) => Kind::Bool,
            Value::String(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Map(_) => Kind::Map,
        }
    }

    /// Convert an incoming JSON tree. JSON `null` has no counterpart
    /// among the six kinds and maps to the empty string.
    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::String(String::new()),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Value::from(*d),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Convert a parsed YAML tree. Mapping keys must be strings; YAML
    /// tagged values are not part of the trigger language.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Value, String> {
        match value {
            serde_yaml::Value::Null => Ok(Value::String(String::new())),
            serde_yaml::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    Ok(Value::Double(n.as_f64().unwrap_or(0.0)))
                }
            }
            serde_yaml::Value::String(s) => Ok(Value::String(s)),
            serde_yaml::Value::Sequence(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(Value::from_yaml)
                    .collect::<Result<_, _>>()?,
            )),
            serde_yaml::Value::Mapping(mapping) => {
                let mut fields = BTreeMap::new();
                for (key, value) in mapping {
                    let key = key
                        .as_str()
                        .ok_or_else(|| "mapping key is not a string".to_string())?
                        .to_string();
                    fields.insert(key, Value::from_yaml(value)?);
                }
                Ok(Value::Map(fields))
            }
            serde_yaml::Value::Tagged(tag) => Err(format!("unsupported YAML tag '{}'", tag.tag)),
        }
    }

    /// Text form used by the template renderer and string coercion.
    /// Collections render as compact JSON.
    pub fn render(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format!("{d}"),
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => self.to_json().to_string(),
        }
    }
}

/// Build a webhook message map from listener output: a `header`
/// multimap and a JSON `body`.
pub fn webhook_message(
    header: BTreeMap<String, Vec<String>>,
    body: serde_json::Value,
) -> BTreeMap<String, Value> {
    let header_value = Value::Map(
        header
            .into_iter()
            .map(|(name, values)| {
                (
                    name,
                    Value::List(values.into_iter().map(Value::String).collect()),
                )
            })
            .collect(),
    );

    let mut message = BTreeMap::new();
    message.insert("header".to_string(), header_value);
    message.insert("body".to_string(), Value::from_json(body));
    message
}
