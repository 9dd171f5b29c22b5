//! Expression evaluator.
//!
//! Evaluation is async because built-in calls may perform I/O
//! (`sendEvent`, `applyResources`) or recurse through user functions;
//! recursion is expressed with boxed futures. The evaluator only reads
//! the variable environment — writes happen in the statement evaluator
//! between expressions.

use futures::future::BoxFuture;

use crate::bindings::Bindings;
use crate::builtins;
use crate::context::EngineContext;
use crate::errors::ExprError;
use crate::value::{Kind, Value};

use super::parse::{BinaryOp, Expr, UnaryOp};

/// Read-only evaluation scope: environment, engine context, and the
/// current user-function call depth.
pub(crate) struct Scope<'a> {
    pub bindings: &'a Bindings,
    pub ctx: &'a EngineContext,
    pub depth: usize,
}

pub(crate) fn eval<'a>(
    expr: &'a Expr,
    scope: &'a Scope<'a>,
) -> BoxFuture<'a, Result<Value, ExprError>> {
    Box::pin(async move {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Double(d) => Ok(Value::Double(*d)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(path) => {
                scope
                    .bindings
                    .get(path)
                    .cloned()
                    .ok_or_else(|| ExprError::Eval {
                        message: format!("no value at '{path}'"),
                    })
            }
            Expr::Unary(op, operand) => {
                let value = eval(operand, scope).await?;
                apply_unary(*op, value)
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                // Short-circuit.
                if !expect_bool(eval(left, scope).await?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(eval(right, scope).await?, "&&")?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if expect_bool(eval(left, scope).await?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(eval(right, scope).await?, "||")?))
            }
            Expr::Binary(op, left, right) => {
                let left = eval(left, scope).await?;
                let right = eval(right, scope).await?;
                apply_binary(*op, left, right)
            }
            Expr::Index(receiver, index) => {
                let receiver = eval(receiver, scope).await?;
                let index = eval(index, scope).await?;
                apply_index(receiver, index)
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval(arg, scope).await?);
                }
                builtins::call_builtin(name, values, scope).await
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = eval(receiver, scope).await?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval(arg, scope).await?);
                }
                apply_method(receiver, name, values)
            }
        }
    })
}

fn expect_bool(value: Value, op: &str) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Eval {
            message: format!("operand of '{op}' is {}, expected bool", other.kind()),
        }),
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, ExprError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(|| {
            ExprError::Eval {
                message: "integer overflow in unary '-'".into(),
            }
        }),
        (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnaryOp::Not, other) => Err(ExprError::Eval {
            message: format!("operand of '!' is {}, expected bool", other.kind()),
        }),
        (UnaryOp::Neg, other) => Err(ExprError::Eval {
            message: format!("operand of unary '-' is {}, expected a number", other.kind()),
        }),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, left, right),
        BinaryOp::In => contains(left, right),
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
        // Handled in eval() for short-circuiting.
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are short-circuited"),
    }
}

/// Equality across kinds: ints and doubles compare numerically,
/// otherwise mismatched kinds are simply unequal.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(l), Value::Double(r)) => (*l as f64) == *r,
        (Value::Double(l), Value::Int(r)) => *l == (*r as f64),
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    let ordering = match (&left, &right) {
        (Value::Int(l), Value::Int(r)) => l.partial_cmp(r),
        (Value::Double(l), Value::Double(r)) => l.partial_cmp(r),
        (Value::Int(l), Value::Double(r)) => (*l as f64).partial_cmp(r),
        (Value::Double(l), Value::Int(r)) => l.partial_cmp(&(*r as f64)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => {
            return Err(ExprError::Eval {
                message: format!(
                    "cannot order {} against {}",
                    left.kind(),
                    right.kind()
                ),
            })
        }
    };
    let ordering = ordering.ok_or_else(|| ExprError::Eval {
        message: "comparison is undefined (NaN operand)".into(),
    })?;
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn contains(left: Value, right: Value) -> Result<Value, ExprError> {
    match right {
        Value::List(items) => Ok(Value::Bool(items.iter().any(|item| values_equal(item, &left)))),
        Value::Map(fields) => match left {
            Value::String(key) => Ok(Value::Bool(fields.contains_key(&key))),
            other => Err(ExprError::Eval {
                message: format!("map containment key is {}, expected string", other.kind()),
            }),
        },
        other => Err(ExprError::Eval {
            message: format!("right side of 'in' is {}, expected list or map", other.kind()),
        }),
    }
}

fn add(left: Value, right: Value) -> Result<Value, ExprError> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.checked_add(r).map(Value::Int).ok_or_else(|| {
            ExprError::Eval {
                message: "integer overflow in '+'".into(),
            }
        }),
        (Value::String(l), Value::String(r)) => Ok(Value::String(l + &r)),
        (Value::List(mut l), Value::List(r)) => {
            l.extend(r);
            Ok(Value::List(l))
        }
        (l, r) if l.kind().is_numeric() && r.kind().is_numeric() => {
            Ok(Value::Double(as_f64(&l) + as_f64(&r)))
        }
        (l, r) => Err(ExprError::Eval {
            message: format!("cannot add {} and {}", l.kind(), r.kind()),
        }),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    let symbol = match op {
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        _ => unreachable!(),
    };

    match (&left, &right) {
        (Value::Int(l), Value::Int(r)) => {
            let result = match op {
                BinaryOp::Sub => l.checked_sub(*r),
                BinaryOp::Mul => l.checked_mul(*r),
                BinaryOp::Div => l.checked_div(*r),
                BinaryOp::Rem => l.checked_rem(*r),
                _ => unreachable!(),
            };
            result.map(Value::Int).ok_or_else(|| ExprError::Eval {
                message: format!("integer '{symbol}' overflowed or divided by zero"),
            })
        }
        (l, r) if l.kind().is_numeric() && r.kind().is_numeric() => {
            if op == BinaryOp::Rem {
                return Err(ExprError::Eval {
                    message: "'%' requires integer operands".into(),
                });
            }
            let (l, r) = (as_f64(l), as_f64(r));
            let result = match op {
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                _ => unreachable!(),
            };
            Ok(Value::Double(result))
        }
        (l, r) => Err(ExprError::Eval {
            message: format!("cannot apply '{symbol}' to {} and {}", l.kind(), r.kind()),
        }),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}

fn apply_index(receiver: Value, index: Value) -> Result<Value, ExprError> {
    match (receiver, index) {
        (Value::Map(fields), Value::String(key)) => {
            fields.get(&key).cloned().ok_or_else(|| ExprError::Eval {
                message: format!("no such key '{key}'"),
            })
        }
        (Value::List(items), Value::Int(i)) => {
            let len = items.len();
            usize::try_from(i)
                .ok()
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| ExprError::Eval {
                    message: format!("index {i} out of range for list of {len}"),
                })
        }
        (receiver, index) => Err(ExprError::Eval {
            message: format!("cannot index {} with {}", receiver.kind(), index.kind()),
        }),
    }
}

fn apply_method(receiver: Value, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    if name == "size" {
        if !args.is_empty() {
            return Err(ExprError::Eval {
                message: "size() takes no arguments".into(),
            });
        }
        return match receiver {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(fields) => Ok(Value::Int(fields.len() as i64)),
            other => Err(ExprError::Eval {
                message: format!("size() is undefined for {}", other.kind()),
            }),
        };
    }

    let Value::String(receiver) = receiver else {
        return Err(ExprError::Eval {
            message: format!("method '{name}' requires a string receiver"),
        });
    };
    let [Value::String(arg)] = args.as_slice() else {
        return Err(ExprError::Eval {
            message: format!("method '{name}' takes one string argument"),
        });
    };

    let result = match name {
        "startsWith" => receiver.starts_with(arg.as_str()),
        "endsWith" => receiver.ends_with(arg.as_str()),
        "contains" => receiver.contains(arg.as_str()),
        other => {
            return Err(ExprError::Eval {
                message: format!("unknown method '{other}'"),
            })
        }
    };
    Ok(Value::Bool(result))
}

impl Kind {
    pub(crate) fn is_numeric(self) -> bool {
        matches!(self, Kind::Int | Kind::Double)
    }
}
