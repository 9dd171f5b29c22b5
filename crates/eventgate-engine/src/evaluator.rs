//! Statement evaluator.
//!
//! Walks a trigger body against a mutable variable environment.
//! Expressions themselves only read the environment; every write goes
//! through [`Bindings::assign`] between expression evaluations, so the
//! declared-identifier set the checker sees is stable while an
//! expression runs.

use futures::future::BoxFuture;

use crate::bindings::Bindings;
use crate::context::EngineContext;
use crate::errors::EvalError;
use crate::expr;
use crate::statement::{Statement, Switch};
use crate::value::Value;

/// Execute an ordered statement list. `depth` is the current
/// user-function call depth.
pub fn evaluate_block<'a>(
    statements: &'a [Statement],
    bindings: &'a mut Bindings,
    ctx: &'a EngineContext,
    depth: usize,
) -> BoxFuture<'a, Result<(), EvalError>> {
    Box::pin(async move {
        for statement in statements {
            evaluate_statement(statement, bindings, ctx, depth).await?;
        }
        Ok(())
    })
}

fn evaluate_statement<'a>(
    statement: &'a Statement,
    bindings: &'a mut Bindings,
    ctx: &'a EngineContext,
    depth: usize,
) -> BoxFuture<'a, Result<(), EvalError>> {
    Box::pin(async move {
        match statement {
            Statement::Assign(assignments) => {
                for assignment in assignments {
                    let value = expr::evaluate(&assignment.expr, bindings, ctx, depth)
                        .await
                        .map_err(|e| EvalError::Assign {
                            name: assignment.name.clone(),
                            message: e.to_string(),
                        })?;
                    tracing::trace!(name = %assignment.name, kind = %value.kind(), "assigned");
                    bindings.assign(&assignment.name, value)?;
                }
                Ok(())
            }
            Statement::If { cond, then } => {
                if condition_holds(cond, bindings, ctx, depth).await? {
                    evaluate_statement(then, bindings, ctx, depth).await?;
                }
                Ok(())
            }
            Statement::Switch(switch) => evaluate_switch(switch, bindings, ctx, depth).await,
            Statement::Block(statements) => {
                evaluate_block(statements, bindings, ctx, depth).await
            }
        }
    })
}

/// First truthy case wins; `default` runs only when no case matched.
async fn evaluate_switch(
    switch: &Switch,
    bindings: &mut Bindings,
    ctx: &EngineContext,
    depth: usize,
) -> Result<(), EvalError> {
    for case in &switch.cases {
        if condition_holds(&case.cond, bindings, ctx, depth).await? {
            return evaluate_statement(&case.body, bindings, ctx, depth).await;
        }
    }
    if let Some(default) = &switch.default {
        return evaluate_block(default, bindings, ctx, depth).await;
    }
    Ok(())
}

async fn condition_holds(
    cond: &str,
    bindings: &Bindings,
    ctx: &EngineContext,
    depth: usize,
) -> Result<bool, EvalError> {
    let value = expr::evaluate(cond, bindings, ctx, depth)
        .await
        .map_err(|e| EvalError::Condition {
            expr: cond.to_string(),
            message: e.to_string(),
        })?;
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::ConditionKind {
            expr: cond.to_string(),
            kind: other.kind().to_string(),
        }),
    }
}

/// Invoke a user-defined function: a fresh environment holding only the
/// parameter, the function body, and the `output` variable's final
/// value as the result. Re-entrant; `depth` bounds runaway recursion.
pub(crate) async fn call_function(
    name: &str,
    argument: Value,
    ctx: &EngineContext,
    depth: usize,
) -> Result<Value, EvalError> {
    if depth > ctx.max_call_depth {
        return Err(EvalError::CallDepth {
            max: ctx.max_call_depth,
        });
    }
    let function = ctx
        .program
        .function(name)
        .ok_or_else(|| EvalError::UnknownFunction {
            name: name.to_string(),
        })?;

    let mut bindings = Bindings::new();
    bindings.bind_input(&function.input, argument);
    evaluate_block(&function.body, &mut bindings, ctx, depth).await?;

    bindings
        .get(&function.output)
        .cloned()
        .ok_or_else(|| EvalError::NoOutput {
            name: function.name.clone(),
            output: function.output.clone(),
        })
}
