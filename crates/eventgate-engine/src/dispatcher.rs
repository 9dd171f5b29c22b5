//! Message dispatch.
//!
//! `process_message` is the engine's public entry point: select every
//! trigger bound to the event source, run each one sequentially against
//! its own fresh environment, and collect the resulting variables.
//! Side effects happen during evaluation — they are built-in calls
//! inside the trigger bodies, not a post-processing step.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;

use crate::bindings::Bindings;
use crate::context::EngineContext;
use crate::errors::DispatchError;
use crate::evaluator::evaluate_block;
use crate::value::Value;

/// Evaluates incoming messages against the trigger program held by its
/// context. Cheap to clone; safe to share across listener tasks.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<EngineContext>,
}

impl Dispatcher {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Evaluate every trigger bound to `event_source` against
    /// `message`, sequentially, each with a fresh variable environment.
    /// Returns the final environments in trigger order.
    ///
    /// A panic inside one trigger's evaluation is caught here and
    /// surfaced as that message's error; other messages are unaffected.
    pub async fn process_message(
        &self,
        message: BTreeMap<String, Value>,
        event_source: &str,
    ) -> Result<Vec<BTreeMap<String, Value>>, DispatchError> {
        let triggers =
            self.ctx
                .program
                .triggers_for(event_source)
                .ok_or_else(|| DispatchError::NoTriggers {
                    event_source: event_source.to_string(),
                })?;

        tracing::debug!(
            source = %event_source,
            triggers = triggers.len(),
            "processing message"
        );

        let mut results = Vec::with_capacity(triggers.len());
        for (index, trigger) in triggers.iter().enumerate() {
            let mut bindings = Bindings::new();
            bindings.bind_input(&trigger.input, Value::Map(message.clone()));

            let outcome = std::panic::AssertUnwindSafe(evaluate_block(
                &trigger.body,
                &mut bindings,
                &self.ctx,
                0,
            ))
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(())) => results.push(bindings.into_vars()),
                Ok(Err(e)) => {
                    return Err(DispatchError::Trigger {
                        event_source: event_source.to_string(),
                        index,
                        message: e.to_string(),
                    })
                }
                Err(panic) => {
                    return Err(DispatchError::Trigger {
                        event_source: event_source.to_string(),
                        index,
                        message: format!("panicked: {}", panic_message(panic)),
                    })
                }
            }
        }
        Ok(results)
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineContext;
    use crate::program::TriggerProgram;
    use crate::template;
    use crate::value::webhook_message;
    use eventgate_messages::{EventDefinition, Service};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(program_yaml: &str) -> Dispatcher {
        let program = TriggerProgram::from_yaml_str("test.yaml", program_yaml).unwrap();
        Dispatcher::new(EngineContext::builder(program).build())
    }

    fn message(body: serde_json::Value) -> BTreeMap<String, Value> {
        webhook_message(BTreeMap::new(), body)
    }

    #[tokio::test]
    async fn test_no_triggers_for_source() {
        let d = dispatcher("eventTriggers: []\n");
        let err = d
            .process_message(message(json!({})), "github")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoTriggers { .. }));
    }

    #[tokio::test]
    async fn test_nested_variables_feed_templates() {
        // Scenario: bind nested typed variables from the message, reuse
        // one, and render it through a template.
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - nested.int64Attr: 1
      - nested.float64Attr: 1.2
      - nested.reuseInt64Attr: nested.int64Attr
      - fromMessage: message.body.stringAttr
"#,
        );

        let results = d
            .process_message(
                message(json!({"stringAttr": "string1", "intAttr": 100})),
                "default",
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let vars = &results[0];

        let Value::Map(nested) = &vars["nested"] else {
            panic!("expected nested map");
        };
        assert_eq!(nested["int64Attr"], Value::Int(1));
        assert_eq!(nested["float64Attr"], Value::Double(1.2));
        assert_eq!(nested["reuseInt64Attr"], Value::Int(1));
        assert_eq!(vars["fromMessage"], Value::String("string1".into()));

        let out = template::render("value: {{.nested.reuseInt64Attr}}", vars).unwrap();
        assert_eq!(out, "value: 1");
    }

    #[tokio::test]
    async fn test_switch_routes_on_message_attributes() {
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - attr1: message.body.attr1
      - attr2: message.body.attr2
      - switch:
          - if: attr1 == "string1" && attr2 == "string2"
            directory: '"string1string2"'
          - if: attr1 != "string1" && attr2 == "string2"
            directory: '"notstring1string2"'
          - if: attr1 == "string1" && attr2 != "string2"
            directory: '"string1notstring2"'
          - default:
              - directory: '"notstring1notstring2"'
"#,
        );

        let results = d
            .process_message(
                message(json!({"attr1": "string1", "attr2": "string2a"})),
                "default",
            )
            .await
            .unwrap();
        assert_eq!(
            results[0]["directory"],
            Value::String("string1notstring2".into())
        );
    }

    #[tokio::test]
    async fn test_recursive_function_through_call() {
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - counted: call("count", 5)
functions:
  - name: count
    input: x
    output: y
    body:
      - switch:
          - if: x <= 0
            y: 0
          - default:
              - y: call("count", x - 1) + 1
"#,
        );

        let results = d.process_message(message(json!({})), "default").await.unwrap();
        assert_eq!(results[0]["counted"], Value::Int(5));
    }

    #[tokio::test]
    async fn test_filter_headers_by_prefix() {
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - github: filter(message.header, "key.startsWith(\"X-Github\")")
"#,
        );

        let mut header = BTreeMap::new();
        header.insert("X-Github-Event".to_string(), vec!["push".to_string()]);
        header.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
        header.insert("X-Github-Delivery".to_string(), vec!["d1".to_string()]);

        let results = d
            .process_message(webhook_message(header, json!({})), "default")
            .await
            .unwrap();
        let Value::Map(github) = &results[0]["github"] else {
            panic!("expected map");
        };
        assert_eq!(
            github.keys().collect::<Vec<_>>(),
            vec!["X-Github-Delivery", "X-Github-Event"]
        );
    }

    #[tokio::test]
    async fn test_multiple_triggers_isolated_environments() {
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - x: 1
  - eventSource: default
    input: message
    body:
      - y: 2
"#,
        );

        let results = d.process_message(message(json!({})), "default").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get("x"), Some(&Value::Int(1)));
        assert_eq!(results[0].get("y"), None);
        assert_eq!(results[1].get("y"), Some(&Value::Int(2)));
        assert_eq!(results[1].get("x"), None);
    }

    #[tokio::test]
    async fn test_deterministic_evaluation() {
        let program = r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - parts: split(message.body.ref, "/")
      - branch: parts[2]
      - name: toDomainName(message.body.repo)
"#;
        let body = json!({"ref": "refs/heads/main", "repo": "Org/Repo"});

        let first = dispatcher(program)
            .process_message(message(body.clone()), "default")
            .await
            .unwrap();
        let second = dispatcher(program)
            .process_message(message(body), "default")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0]["branch"], Value::String("main".into()));
        assert_eq!(first[0]["name"], Value::String("org.repo".into()));
    }

    #[tokio::test]
    async fn test_eval_error_identifies_trigger() {
        let d = dispatcher(
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - ok: 1
  - eventSource: default
    input: message
    body:
      - bad: undeclared_thing + 1
"#,
        );

        let err = d.process_message(message(json!({})), "default").await.unwrap_err();
        let DispatchError::Trigger { index, message, .. } = err else {
            panic!("expected trigger error");
        };
        assert_eq!(index, 1);
        assert!(message.contains("undeclared identifier"));
    }

    #[tokio::test]
    async fn test_send_event_failure_recorded_in_variables() {
        // Scenario: the destination answers 500; sendEvent returns the
        // error message and a later assignment records it.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = format!(
            r#"
messageProviders:
  - name: hook0
    providerType: http
    url: {}
eventDestinations:
  - name: dest
    providerRef: hook0
"#,
            server.uri()
        );
        let definition: EventDefinition = serde_yaml::from_str(&config).unwrap();
        let service = Service::from_definition(definition).await.unwrap();

        let program = TriggerProgram::from_yaml_str(
            "test.yaml",
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - sendResult: sendEvent("dest", message.body)
      - failed: sendResult != ""
"#,
        )
        .unwrap();
        let d = Dispatcher::new(
            EngineContext::builder(program)
                .message_service(Arc::new(service))
                .build(),
        );

        let results = d
            .process_message(message(json!({"event": "x"})), "default")
            .await
            .unwrap();
        let Value::String(send_result) = &results[0]["sendResult"] else {
            panic!("expected string result");
        };
        assert!(send_result.contains("500"), "got: {send_result}");
        assert_eq!(results[0]["failed"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_job_id_builtin_produces_timestamp() {
        let d = dispatcher(
            "eventTriggers:\n  - eventSource: default\n    input: message\n    body:\n      - id: jobID()\n",
        );
        let results = d.process_message(message(json!({})), "default").await.unwrap();
        let Value::String(id) = &results[0]["id"] else {
            panic!("expected string");
        };
        assert_eq!(id.len(), 15);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_download_yaml_unconfigured_reports_error() {
        let d = dispatcher(
            "eventTriggers:\n  - eventSource: default\n    input: message\n    body:\n      - config: downloadYAML(message, \".appsody-config.yaml\")\n",
        );
        let results = d.process_message(message(json!({})), "default").await.unwrap();
        let Value::Map(config) = &results[0]["config"] else {
            panic!("expected map");
        };
        assert_eq!(config["exists"], Value::Bool(false));
        assert!(matches!(config.get("error"), Some(Value::String(_))));
    }

    #[tokio::test]
    async fn test_download_yaml_through_fetcher() {
        use crate::traits::{FetchError, FetchedFile, RepoFileFetcher};
        use async_trait::async_trait;

        struct FixedFetcher;

        #[async_trait]
        impl RepoFileFetcher for FixedFetcher {
            async fn fetch_yaml(
                &self,
                _message: &BTreeMap<String, Value>,
                file_name: &str,
            ) -> Result<FetchedFile, FetchError> {
                assert_eq!(file_name, ".appsody-config.yaml");
                let mut content = BTreeMap::new();
                content.insert("stack".to_string(), Value::String("nodejs".into()));
                Ok(FetchedFile {
                    exists: true,
                    content: Some(Value::Map(content)),
                })
            }
        }

        let program = TriggerProgram::from_yaml_str(
            "test.yaml",
            r#"
eventTriggers:
  - eventSource: default
    input: message
    body:
      - config: downloadYAML(message, ".appsody-config.yaml")
      - if: config.exists
        stack: config.content.stack
"#,
        )
        .unwrap();
        let d = Dispatcher::new(
            EngineContext::builder(program)
                .repo_file_fetcher(Arc::new(FixedFetcher))
                .build(),
        );

        let results = d.process_message(message(json!({})), "default").await.unwrap();
        assert_eq!(results[0]["stack"], Value::String("nodejs".into()));
    }

    #[tokio::test]
    async fn test_send_event_success_returns_empty_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = format!(
            "messageProviders:\n  - name: hook0\n    providerType: http\n    url: {}\neventDestinations:\n  - name: dest\n    providerRef: hook0\n",
            server.uri()
        );
        let definition: EventDefinition = serde_yaml::from_str(&config).unwrap();
        let service = Service::from_definition(definition).await.unwrap();

        let program = TriggerProgram::from_yaml_str(
            "test.yaml",
            "eventTriggers:\n  - eventSource: default\n    input: message\n    body:\n      - sendResult: sendEvent(\"dest\", message.body)\n",
        )
        .unwrap();
        let d = Dispatcher::new(
            EngineContext::builder(program)
                .message_service(Arc::new(service))
                .build(),
        );

        let results = d.process_message(message(json!({})), "default").await.unwrap();
        assert_eq!(results[0]["sendResult"], Value::String(String::new()));
    }
}
