//! Built-in functions of the trigger language.
//!
//! Pure helpers (`toDomainName`, `split`, `filter`, …) compute from
//! their arguments alone; the side-effecting built-ins
//! (`applyResources`, `sendEvent`, `downloadYAML`, `jobID`,
//! `kabaneroConfig`) reach their collaborators through the engine
//! context captured in the evaluation scope. The side-effecting pair
//! used from trigger bodies reports failure as a non-empty string
//! result rather than an error, so trigger authors can branch on it.

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::errors::ExprError;
use crate::evaluator::call_function;
use crate::expr::{self, Scope};
use crate::names::{to_domain_name, to_label};
use crate::resources::apply_resources;
use crate::value::Value;

const BUILTINS: &[&str] = &[
    "toDomainName",
    "toLabel",
    "split",
    "filter",
    "call",
    "applyResources",
    "sendEvent",
    "downloadYAML",
    "jobID",
    "kabaneroConfig",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub(crate) fn call_builtin<'a>(
    name: &'a str,
    args: Vec<Value>,
    scope: &'a Scope<'a>,
) -> BoxFuture<'a, Result<Value, ExprError>> {
    Box::pin(async move {
        match name {
            "toDomainName" => {
                let s = one_string(name, &args)?;
                Ok(Value::String(to_domain_name(&s)))
            }
            "toLabel" => {
                let s = one_string(name, &args)?;
                Ok(Value::String(to_label(&s)))
            }
            "split" => {
                let [Value::String(s), Value::String(sep)] = args.as_slice() else {
                    return Err(arity(name, "two strings"));
                };
                Ok(Value::List(split(s, sep)))
            }
            "filter" => {
                let [collection, Value::String(predicate)] = args.as_slice() else {
                    return Err(arity(name, "a map or list and a predicate string"));
                };
                filter(collection, predicate, scope).await
            }
            "call" => {
                let [Value::String(function), arg] = args.as_slice() else {
                    return Err(arity(name, "a function name and one argument"));
                };
                call_function(function, arg.clone(), scope.ctx, scope.depth + 1)
                    .await
                    .map_err(|e| ExprError::Eval {
                        message: format!("call(\"{function}\"): {e}"),
                    })
            }
            "applyResources" => {
                let [Value::String(dir), Value::Map(vars)] = args.as_slice() else {
                    return Err(arity(name, "a directory and a variable map"));
                };
                match apply_resources(scope.ctx, dir, vars).await {
                    Ok(()) => Ok(Value::String(String::new())),
                    Err(e) => Ok(Value::String(e.to_string())),
                }
            }
            "sendEvent" => send_event(&args, scope).await,
            "downloadYAML" => {
                let [Value::Map(message), Value::String(file_name)] = args.as_slice() else {
                    return Err(arity(name, "a message map and a file name"));
                };
                Ok(download_yaml(message, file_name, scope).await)
            }
            "jobID" => {
                if !args.is_empty() {
                    return Err(arity(name, "no arguments"));
                }
                Ok(Value::String(scope.ctx.job_ids.next().await))
            }
            "kabaneroConfig" => {
                if !args.is_empty() {
                    return Err(arity(name, "no arguments"));
                }
                let mut config = BTreeMap::new();
                config.insert(
                    "namespace".to_string(),
                    Value::String(scope.ctx.namespace.clone()),
                );
                Ok(Value::Map(config))
            }
            other => Err(ExprError::Eval {
                message: format!("unknown function '{other}'"),
            }),
        }
    })
}

fn arity(name: &str, expected: &str) -> ExprError {
    ExprError::Eval {
        message: format!("{name}() expects {expected}"),
    }
}

fn one_string(name: &str, args: &[Value]) -> Result<String, ExprError> {
    match args {
        [Value::String(s)] => Ok(s.clone()),
        _ => Err(arity(name, "one string")),
    }
}

fn split(s: &str, sep: &str) -> Vec<Value> {
    if sep.is_empty() {
        return s
            .chars()
            .map(|c| Value::String(c.to_string()))
            .collect();
    }
    s.split(sep)
        .map(|part| Value::String(part.to_string()))
        .collect()
}

/// Evaluate `predicate` once per element in a child environment binding
/// `key`/`value` (maps) or `value` (lists); keep the elements for which
/// it holds. The child environment also sees the enclosing variables.
async fn filter(
    collection: &Value,
    predicate: &str,
    scope: &Scope<'_>,
) -> Result<Value, ExprError> {
    match collection {
        Value::Map(fields) => {
            let mut kept = BTreeMap::new();
            for (key, value) in fields {
                let mut child = scope.bindings.clone();
                child.bind_input("key", Value::String(key.clone()));
                child.bind_input("value", value.clone());
                if predicate_holds(predicate, &child, scope).await? {
                    kept.insert(key.clone(), value.clone());
                }
            }
            Ok(Value::Map(kept))
        }
        Value::List(items) => {
            let mut kept = Vec::new();
            for value in items {
                let mut child = scope.bindings.clone();
                child.bind_input("value", value.clone());
                if predicate_holds(predicate, &child, scope).await? {
                    kept.push(value.clone());
                }
            }
            Ok(Value::List(kept))
        }
        other => Err(ExprError::Eval {
            message: format!("filter() is undefined for {}", other.kind()),
        }),
    }
}

async fn predicate_holds(
    predicate: &str,
    child: &crate::bindings::Bindings,
    scope: &Scope<'_>,
) -> Result<bool, ExprError> {
    match expr::evaluate(predicate, child, scope.ctx, scope.depth).await? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Eval {
            message: format!(
                "filter predicate evaluated to {}, expected bool",
                other.kind()
            ),
        }),
    }
}

/// `sendEvent(dest, payload[, header])` — marshal the payload to JSON
/// and hand it to the destination's provider. Returns "" on success,
/// the error message otherwise.
async fn send_event(args: &[Value], scope: &Scope<'_>) -> Result<Value, ExprError> {
    let (dest, payload, header) = match args {
        [Value::String(dest), payload] => (dest, payload, None),
        [Value::String(dest), payload, Value::Map(header)] => {
            (dest, payload, Some(header))
        }
        _ => {
            return Err(arity(
                "sendEvent",
                "a destination, a payload, and an optional header map",
            ))
        }
    };

    let Some(service) = scope.ctx.messages.as_ref() else {
        return Ok(Value::String("no message service is configured".into()));
    };

    let body = match serde_json::to_vec(&payload.to_json()) {
        Ok(body) => body,
        Err(e) => return Ok(Value::String(format!("cannot marshal payload: {e}"))),
    };
    let header = header.map(header_from_value);

    match service.send(dest, &body, header.as_ref()).await {
        Ok(()) => Ok(Value::String(String::new())),
        Err(e) => {
            tracing::warn!(dest = %dest, "sendEvent failed: {e}");
            Ok(Value::String(e.to_string()))
        }
    }
}

/// Flatten a header-shaped value map into name → list of strings.
fn header_from_value(fields: &BTreeMap<String, Value>) -> eventgate_messages::Header {
    fields
        .iter()
        .map(|(name, value)| {
            let values = match value {
                Value::List(items) => items.iter().map(Value::render).collect(),
                other => vec![other.render()],
            };
            (name.clone(), values)
        })
        .collect()
}

async fn download_yaml(
    message: &BTreeMap<String, Value>,
    file_name: &str,
    scope: &Scope<'_>,
) -> Value {
    let mut result = BTreeMap::new();
    let Some(fetcher) = scope.ctx.fetcher.as_ref() else {
        result.insert("exists".to_string(), Value::Bool(false));
        result.insert(
            "error".to_string(),
            Value::String("no repository file fetcher is configured".into()),
        );
        return Value::Map(result);
    };

    match fetcher.fetch_yaml(message, file_name).await {
        Ok(fetched) => {
            result.insert("exists".to_string(), Value::Bool(fetched.exists));
            if let Some(content) = fetched.content {
                result.insert("content".to_string(), content);
            }
        }
        Err(e) => {
            result.insert("exists".to_string(), Value::Bool(false));
            result.insert("error".to_string(), Value::String(e.to_string()));
        }
    }
    Value::Map(result)
}
