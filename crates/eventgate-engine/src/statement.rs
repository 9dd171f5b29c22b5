//! Trigger statements.
//!
//! A statement is a YAML mapping discriminated by the keyword keys it
//! carries (`if`, `switch`, `default`, `body`); every other key is an
//! assignment. The discriminated form is built — and fully validated —
//! at load time, so evaluation never re-checks shape and a malformed
//! trigger program fails at startup rather than on its first message.

use serde_yaml::Value as Yaml;

/// One validated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Ordered `name: expression` assignments.
    Assign(Vec<Assignment>),
    /// Conditional execution of assignments, a block, or a switch.
    If { cond: String, then: Box<Statement> },
    Switch(Switch),
    /// Nested statement list.
    Block(Vec<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub cases: Vec<SwitchCase>,
    pub default: Option<Vec<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub cond: String,
    pub body: Box<Statement>,
}

/// Parse an ordered statement list.
pub fn parse_body(items: &[Yaml]) -> Result<Vec<Statement>, String> {
    items.iter().map(Statement::from_yaml).collect()
}

impl Statement {
    /// Build a statement from one YAML mapping, enforcing the shape
    /// rules: at most two keyword keys, and then only `if` + `body` or
    /// `if` + `switch`; no assignments beside `switch`/`body`;
    /// `default` only inside `switch`.
    pub fn from_yaml(value: &Yaml) -> Result<Statement, String> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| format!("statement is not a mapping: {}", yaml_label(value)))?;

        let mut cond: Option<String> = None;
        let mut switch: Option<&Vec<Yaml>> = None;
        let mut body: Option<&Vec<Yaml>> = None;
        let mut assignments: Vec<Assignment> = Vec::new();
        let mut keyword_count = 0usize;

        for (key, entry) in mapping {
            let key = key
                .as_str()
                .ok_or_else(|| format!("statement key is not a string: {}", yaml_label(key)))?;
            match key {
                "if" => {
                    keyword_count += 1;
                    cond = Some(scalar_to_expr(entry).ok_or_else(|| {
                        "'if' condition must be a scalar expression".to_string()
                    })?);
                }
                "switch" => {
                    keyword_count += 1;
                    switch = Some(entry.as_sequence().ok_or_else(|| {
                        "'switch' must hold a list of cases".to_string()
                    })?);
                }
                "body" => {
                    keyword_count += 1;
                    body = Some(entry.as_sequence().ok_or_else(|| {
                        "'body' must hold a list of statements".to_string()
                    })?);
                }
                "default" => {
                    return Err("'default' is only valid as a switch case".into());
                }
                name => {
                    let expr = scalar_to_expr(entry).ok_or_else(|| {
                        format!("assignment to '{name}' must be a scalar expression")
                    })?;
                    assignments.push(Assignment {
                        name: name.to_string(),
                        expr,
                    });
                }
            }
        }

        if keyword_count > 2 || (keyword_count == 2 && cond.is_none()) {
            return Err("a statement may combine at most 'if' with 'body' or 'switch'".into());
        }

        if let Some(cases) = switch {
            if !assignments.is_empty() {
                return Err("'switch' cannot carry assignments".into());
            }
            let switch = parse_switch(cases)?;
            return Ok(match cond {
                Some(cond) => Statement::If {
                    cond,
                    then: Box::new(Statement::Switch(switch)),
                },
                None => Statement::Switch(switch),
            });
        }

        if let Some(items) = body {
            if !assignments.is_empty() {
                return Err("'body' cannot carry assignments".into());
            }
            let block = Statement::Block(parse_body(items)?);
            return Ok(match cond {
                Some(cond) => Statement::If {
                    cond,
                    then: Box::new(block),
                },
                None => block,
            });
        }

        match (cond, assignments.is_empty()) {
            (Some(cond), false) => Ok(Statement::If {
                cond,
                then: Box::new(Statement::Assign(assignments)),
            }),
            (Some(_), true) => Err("'if' statement has nothing to execute".into()),
            (None, false) => Ok(Statement::Assign(assignments)),
            (None, true) => Err("statement is empty".into()),
        }
    }
}

fn parse_switch(cases: &[Yaml]) -> Result<Switch, String> {
    let mut parsed = Switch {
        cases: Vec::new(),
        default: None,
    };

    for case in cases {
        let mapping = case
            .as_mapping()
            .ok_or_else(|| format!("switch case is not a mapping: {}", yaml_label(case)))?;

        let is_default = mapping.contains_key("default");
        if is_default {
            if mapping.len() != 1 {
                return Err("'default' case cannot carry other keys".into());
            }
            if parsed.default.is_some() {
                return Err("'switch' has more than one 'default'".into());
            }
            let items = mapping
                .get("default")
                .and_then(Yaml::as_sequence)
                .ok_or_else(|| "'default' must hold a list of statements".to_string())?;
            parsed.default = Some(parse_body(items)?);
            continue;
        }

        if !mapping.contains_key("if") {
            return Err("switch case must carry 'if' or 'default'".into());
        }
        match Statement::from_yaml(case)? {
            Statement::If { cond, then } => parsed.cases.push(SwitchCase { cond, body: then }),
            _ => return Err("switch case must be a conditional".into()),
        }
    }

    Ok(parsed)
}

/// Serialize a YAML scalar to expression source form. Strings are used
/// as-is (trimmed); numbers and booleans become literals.
fn scalar_to_expr(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) => Some(s.trim().to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| format!("{f:?}"))
            }
        }
        _ => None,
    }
}

fn yaml_label(value: &Yaml) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| "<unprintable>".into())
}
