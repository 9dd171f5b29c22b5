//! Variable environment for one trigger evaluation.
//!
//! A `Bindings` pairs the variable values with the typed declaration
//! set the expression checker reads. Expression evaluation only reads;
//! the statement evaluator writes between expressions through
//! [`Bindings::assign`], which is the single place declaration and
//! dotted-path rules are enforced.

use std::collections::BTreeMap;

use crate::errors::EvalError;
use crate::value::{Kind, Value};

/// Per-evaluation variable environment. Created fresh for every
/// trigger and every user-function call; never shared across tasks.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    decls: BTreeMap<String, Kind>,
    vars: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare and set a top-level identifier in one step. Used for
    /// trigger inputs, function parameters, and filter element
    /// bindings; replaces any previous binding of the same name.
    pub fn bind_input(&mut self, name: &str, value: Value) {
        self.decls.insert(name.to_string(), value.kind());
        self.vars.insert(name.to_string(), value);
    }

    /// Declared kind of a top-level identifier.
    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.decls.get(name).copied()
    }

    /// Resolve a dotted path against the variables.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.vars.get(segments.next()?)?;
        for segment in segments {
            match current {
                Value::Map(fields) => current = fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Assign `value` to a dotted path.
    ///
    /// Intermediate maps are created on demand; an intermediate that
    /// exists but is not a map fails the assignment. A fresh top-level
    /// identifier is declared with the value's kind; re-assignment must
    /// keep the declared kind (an int value satisfies a double
    /// declaration and is promoted).
    pub fn assign(&mut self, path: &str, value: Value) -> Result<(), EvalError> {
        let segments: Vec<&str> = path.split('.').collect();
        let root = segments[0];
        if root.is_empty() {
            return Err(EvalError::Assign {
                name: path.to_string(),
                message: "empty variable name".into(),
            });
        }

        let value = if segments.len() == 1 {
            match self.decls.get(root) {
                None => {
                    self.decls.insert(root.to_string(), value.kind());
                    value
                }
                Some(declared) => coerce_declared(*declared, value).map_err(|message| {
                    EvalError::Assign {
                        name: path.to_string(),
                        message,
                    }
                })?,
            }
        } else {
            // A dotted root is always a map.
            match self.decls.get(root) {
                None => {
                    self.decls.insert(root.to_string(), Kind::Map);
                }
                Some(Kind::Map) => {}
                Some(other) => {
                    return Err(EvalError::Assign {
                        name: path.to_string(),
                        message: format!("'{root}' already declared as {other}, not map"),
                    })
                }
            }
            value
        };

        if segments.len() == 1 {
            self.vars.insert(root.to_string(), value);
            return Ok(());
        }

        let mut current = self
            .vars
            .entry(root.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));

        for (i, segment) in segments[1..segments.len() - 1].iter().enumerate() {
            let fields = match current {
                Value::Map(fields) => fields,
                other => {
                    return Err(EvalError::Assign {
                        name: path.to_string(),
                        message: format!(
                            "'{}' exists but is a {}, not a map",
                            segments[..=i].join("."),
                            other.kind()
                        ),
                    })
                }
            };
            current = fields
                .entry(segment.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
        }

        let last = segments[segments.len() - 1];
        match current {
            Value::Map(fields) => {
                fields.insert(last.to_string(), value);
                Ok(())
            }
            other => Err(EvalError::Assign {
                name: path.to_string(),
                message: format!(
                    "'{}' exists but is a {}, not a map",
                    segments[..segments.len() - 1].join("."),
                    other.kind()
                ),
            }),
        }
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    /// Consume the environment, keeping the final variable values.
    pub fn into_vars(self) -> BTreeMap<String, Value> {
        self.vars
    }
}

fn coerce_declared(declared: Kind, value: Value) -> Result<Value, String> {
    match (declared, &value) {
        (Kind::Double, Value::Int(i)) => Ok(Value::Double(*i as f64)),
        _ if declared == value.kind() => Ok(value),
        _ => Err(format!(
            "declared as {declared}, cannot re-assign a {}",
            value.kind()
        )),
    }
}
