//! Trigger program model and loader.
//!
//! A program is the merge of every `*.yaml`/`*.yml` file under the
//! extracted bundle (except `eventDefinitions.yaml`, which belongs to
//! the message service). Files are visited in sorted path order so a
//! reload of the same bundle produces an identical program.
//!
//! Resource template files inside the bundle are frequently not valid
//! YAML before rendering; files that fail to parse are skipped with a
//! warning. Files that parse but declare malformed trigger sections are
//! startup-fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value as Yaml;

use crate::errors::ProgramError;
use crate::statement::{parse_body, Statement};
use crate::value::Value;

/// Name of the message-service configuration file inside a bundle.
pub const EVENT_DEFINITIONS_FILE: &str = "eventDefinitions.yaml";

/// One trigger bound to an event source.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub event_source: String,
    /// Variable name the incoming message is bound to.
    pub input: String,
    pub body: Vec<Statement>,
}

/// A user-defined function in the trigger language.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Parameter name.
    pub input: String,
    /// Variable whose final value is the call result.
    pub output: String,
    pub body: Vec<Statement>,
}

/// The merged, validated trigger program. Read-only after load.
#[derive(Debug, Default)]
pub struct TriggerProgram {
    pub settings: Vec<BTreeMap<String, Value>>,
    pub event_triggers: BTreeMap<String, Vec<Trigger>>,
    pub functions: BTreeMap<String, Function>,
}

impl TriggerProgram {
    /// Load and merge every program file under `dir`.
    pub fn load(dir: &Path) -> Result<TriggerProgram, ProgramError> {
        let mut files = Vec::new();
        collect_yaml_files(dir, &mut files).map_err(|e| ProgramError::Io {
            message: e.to_string(),
        })?;
        files.sort();

        let mut program = TriggerProgram::default();
        for path in files {
            let text = std::fs::read_to_string(&path).map_err(|e| ProgramError::Io {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
            let label = path.display().to_string();
            let doc: Yaml = match serde_yaml::from_str(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    // Unrendered resource templates live in the same
                    // tree and rarely parse; they are not program files.
                    tracing::warn!(file = %label, "skipping unparseable YAML: {e}");
                    continue;
                }
            };
            if !doc.is_mapping() {
                tracing::debug!(file = %label, "skipping non-mapping YAML document");
                continue;
            }
            program.merge(&label, &doc)?;
        }
        Ok(program)
    }

    /// Parse a single program document. Used by tests and by callers
    /// that assemble programs inline.
    pub fn from_yaml_str(label: &str, text: &str) -> Result<TriggerProgram, ProgramError> {
        let doc: Yaml = serde_yaml::from_str(text).map_err(|e| ProgramError::Parse {
            file: label.to_string(),
            message: e.to_string(),
        })?;
        let mut program = TriggerProgram::default();
        program.merge(label, &doc)?;
        Ok(program)
    }

    /// The triggers bound to `source`, in registration order.
    pub fn triggers_for(&self, source: &str) -> Option<&[Trigger]> {
        self.event_triggers.get(source).map(Vec::as_slice)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Whether any settings entry carries `dryrun: true`.
    pub fn dryrun(&self) -> bool {
        self.settings
            .iter()
            .any(|entry| entry.get("dryrun") == Some(&Value::Bool(true)))
    }

    fn merge(&mut self, file: &str, doc: &Yaml) -> Result<(), ProgramError> {
        if let Some(settings) = doc.get("settings") {
            let items = settings.as_sequence().ok_or_else(|| ProgramError::Parse {
                file: file.to_string(),
                message: "'settings' must be a list".into(),
            })?;
            for item in items {
                let value = Value::from_yaml(item.clone()).map_err(|message| {
                    ProgramError::Parse {
                        file: file.to_string(),
                        message,
                    }
                })?;
                match value {
                    Value::Map(fields) => self.settings.push(fields),
                    _ => {
                        return Err(ProgramError::Parse {
                            file: file.to_string(),
                            message: "'settings' entries must be mappings".into(),
                        })
                    }
                }
            }
        }

        if let Some(triggers) = doc.get("eventTriggers") {
            let items = triggers.as_sequence().ok_or_else(|| ProgramError::Parse {
                file: file.to_string(),
                message: "'eventTriggers' must be a list".into(),
            })?;
            for item in items {
                let trigger = parse_trigger(file, item)?;
                self.event_triggers
                    .entry(trigger.event_source.clone())
                    .or_default()
                    .push(trigger);
            }
        }

        if let Some(functions) = doc.get("functions") {
            let items = functions.as_sequence().ok_or_else(|| ProgramError::Parse {
                file: file.to_string(),
                message: "'functions' must be a list".into(),
            })?;
            for item in items {
                let function = parse_function(file, item)?;
                if self.functions.contains_key(&function.name) {
                    return Err(ProgramError::DuplicateFunction {
                        name: function.name,
                    });
                }
                self.functions.insert(function.name.clone(), function);
            }
        }

        Ok(())
    }
}

fn required_str(file: &str, item: &Yaml, field: &str) -> Result<String, ProgramError> {
    item.get(field)
        .and_then(Yaml::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProgramError::MissingField {
            file: file.to_string(),
            field: field.to_string(),
        })
}

fn required_body(file: &str, item: &Yaml) -> Result<Vec<Statement>, ProgramError> {
    let items = item
        .get("body")
        .and_then(Yaml::as_sequence)
        .ok_or_else(|| ProgramError::MissingField {
            file: file.to_string(),
            field: "body".to_string(),
        })?;
    parse_body(items).map_err(|message| ProgramError::Statement {
        file: file.to_string(),
        message,
    })
}

fn parse_trigger(file: &str, item: &Yaml) -> Result<Trigger, ProgramError> {
    Ok(Trigger {
        event_source: required_str(file, item, "eventSource")?,
        input: required_str(file, item, "input")?,
        body: required_body(file, item)?,
    })
}

fn parse_function(file: &str, item: &Yaml) -> Result<Function, ProgramError> {
    Ok(Function {
        name: required_str(file, item, "name")?,
        input: required_str(file, item, "input")?,
        output: required_str(file, item, "output")?,
        body: required_body(file, item)?,
    })
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml_files(&path, files)?;
            continue;
        }
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let is_event_definitions = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == EVENT_DEFINITIONS_FILE);
        if is_yaml && !is_event_definitions {
            files.push(path);
        }
    }
    Ok(())
}
