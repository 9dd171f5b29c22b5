//! Typed expression language: tokenize → parse → check → evaluate.

mod eval;
mod parse;
mod token;

pub use parse::Expr;
pub(crate) use eval::Scope;

use crate::bindings::Bindings;
use crate::context::EngineContext;
use crate::errors::ExprError;
use crate::value::Value;

/// Parse and statically check an expression against the declared
/// identifiers in `bindings`.
pub fn compile(source: &str, bindings: &Bindings) -> Result<Expr, ExprError> {
    let tokens = token::tokenize(source)?;
    let expr = parse::parse(&tokens)?;
    parse::check(&expr, bindings)?;
    Ok(expr)
}

/// Compile and evaluate `source` against `bindings`. `depth` is the
/// current user-function call depth, bounded by the engine context.
pub async fn evaluate(
    source: &str,
    bindings: &Bindings,
    ctx: &EngineContext,
    depth: usize,
) -> Result<Value, ExprError> {
    let expr = compile(source, bindings)?;
    let scope = Scope {
        bindings,
        ctx,
        depth,
    };
    eval::eval(&expr, &scope).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineContext;
    use crate::program::TriggerProgram;
    use crate::value::Kind;
    use std::collections::BTreeMap;

    fn ctx() -> EngineContext {
        EngineContext::builder(TriggerProgram::default()).build()
    }

    async fn eval_with(
        source: &str,
        bindings: &Bindings,
    ) -> Result<Value, ExprError> {
        evaluate(source, bindings, &ctx(), 0).await
    }

    async fn eval_str(source: &str) -> Result<Value, ExprError> {
        eval_with(source, &Bindings::new()).await
    }

    #[tokio::test]
    async fn test_arithmetic_int_stays_int() {
        assert_eq!(eval_str("1 + 2 * 3").await.unwrap(), Value::Int(7));
        assert_eq!(eval_str("7 / 2").await.unwrap(), Value::Int(3));
        assert_eq!(eval_str("7 % 2").await.unwrap(), Value::Int(1));
    }

    #[tokio::test]
    async fn test_arithmetic_mixing_produces_double() {
        assert_eq!(eval_str("1 + 0.5").await.unwrap(), Value::Double(1.5));
        assert_eq!(eval_str("3 * 0.5").await.unwrap(), Value::Double(1.5));
    }

    #[tokio::test]
    async fn test_string_concat() {
        assert_eq!(
            eval_str(r#""a" + "b""#).await.unwrap(),
            Value::String("ab".into())
        );
    }

    #[tokio::test]
    async fn test_unary() {
        assert_eq!(eval_str("!false").await.unwrap(), Value::Bool(true));
        assert_eq!(eval_str("-(3)").await.unwrap(), Value::Int(-3));
        assert_eq!(eval_str("-1.5").await.unwrap(), Value::Double(-1.5));
    }

    #[tokio::test]
    async fn test_comparisons() {
        assert_eq!(eval_str("1 < 2").await.unwrap(), Value::Bool(true));
        assert_eq!(eval_str("1.0 == 1").await.unwrap(), Value::Bool(true));
        assert_eq!(eval_str(r#""a" < "b""#).await.unwrap(), Value::Bool(true));
        assert_eq!(eval_str(r#""a" == 1"#).await.unwrap(), Value::Bool(false));
        assert_eq!(eval_str(r#""a" != 1"#).await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_logic_short_circuits() {
        // The right side would error (undeclared identifier is caught at
        // check time, so use a division by zero instead).
        assert_eq!(
            eval_str("false && 1 / 0 == 1").await.unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval_str("true || 1 / 0 == 1").await.unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_identifier_resolution() {
        let mut bindings = Bindings::new();
        bindings.assign("nested.count", Value::Int(4)).unwrap();
        assert_eq!(
            eval_with("nested.count + 1", &bindings).await.unwrap(),
            Value::Int(5)
        );
    }

    #[tokio::test]
    async fn test_indexing_map_and_list() {
        let mut bindings = Bindings::new();
        bindings
            .assign(
                "m.items",
                Value::List(vec![Value::String("first".into()), Value::String("second".into())]),
            )
            .unwrap();
        assert_eq!(
            eval_with(r#"m["items"][1]"#, &bindings).await.unwrap(),
            Value::String("second".into())
        );

        let err = eval_with(r#"m["items"][5]"#, &bindings).await.unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_containment() {
        let mut bindings = Bindings::new();
        bindings
            .assign(
                "l",
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            )
            .unwrap();
        bindings.assign("m.a", Value::Int(1)).unwrap();
        assert_eq!(eval_with("2 in l", &bindings).await.unwrap(), Value::Bool(true));
        assert_eq!(eval_with("3 in l", &bindings).await.unwrap(), Value::Bool(false));
        assert_eq!(
            eval_with(r#""a" in m"#, &bindings).await.unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_string_methods() {
        let mut bindings = Bindings::new();
        bindings
            .assign("key", Value::String("X-Github-Event".into()))
            .unwrap();
        assert_eq!(
            eval_with(r#"key.startsWith("X-Github")"#, &bindings)
                .await
                .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_with(r#"key.endsWith("Event")"#, &bindings).await.unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_with(r#"key.contains("hub")"#, &bindings).await.unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_with("key.size()", &bindings).await.unwrap(),
            Value::Int(14)
        );
    }

    #[tokio::test]
    async fn test_eval_error_not_panic() {
        assert!(eval_str("1 / 0").await.is_err());
        assert!(eval_str(r#"1 + "a""#).await.is_err());
        assert!(eval_str("!3").await.is_err());
    }

    #[tokio::test]
    async fn test_condition_kind_mismatch_is_error() {
        let err = eval_str("1 && true").await.unwrap_err();
        assert!(err.to_string().contains("expected bool"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Kind::Map.to_string(), "map");
        assert_eq!(Kind::Double.to_string(), "double");
    }

    #[tokio::test]
    async fn test_builtin_split() {
        let v = eval_str(r#"split("refs/heads/main", "/")"#).await.unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::String("refs".into()),
                Value::String("heads".into()),
                Value::String("main".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_builtin_to_domain_name() {
        let v = eval_str(r#"toDomainName("My_Repo/Name")"#).await.unwrap();
        assert_eq!(v, Value::String("my.repo.name".into()));
    }

    #[tokio::test]
    async fn test_builtin_filter_map() {
        let mut bindings = Bindings::new();
        let mut header = BTreeMap::new();
        header.insert(
            "X-Github-Event".to_string(),
            Value::List(vec![Value::String("push".into())]),
        );
        header.insert(
            "Content-Type".to_string(),
            Value::List(vec![Value::String("application/json".into())]),
        );
        header.insert(
            "X-Github-Delivery".to_string(),
            Value::List(vec![Value::String("id-1".into())]),
        );
        bindings.bind_input("header", Value::Map(header));

        let v = eval_with(r#"filter(header, "key.startsWith(\"X-Github\")")"#, &bindings)
            .await
            .unwrap();
        let Value::Map(kept) = v else { panic!("expected map") };
        assert_eq!(
            kept.keys().collect::<Vec<_>>(),
            vec!["X-Github-Delivery", "X-Github-Event"]
        );
    }

    #[tokio::test]
    async fn test_builtin_filter_list() {
        let mut bindings = Bindings::new();
        bindings
            .assign(
                "l",
                Value::List(vec![Value::Int(1), Value::Int(5), Value::Int(3)]),
            )
            .unwrap();
        let v = eval_with(r#"filter(l, "value >= 3")"#, &bindings).await.unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(5), Value::Int(3)]));
    }

    #[tokio::test]
    async fn test_builtin_kabanero_config() {
        let v = eval_str("kabaneroConfig()").await.unwrap();
        let Value::Map(config) = v else { panic!("expected map") };
        assert!(matches!(config.get("namespace"), Some(Value::String(_))));
    }
}
