//! Text template renderer for resource manifests.
//!
//! Placeholders are `{{.dotted.path}}`; the leading dot and surrounding
//! whitespace are optional. A path that resolves to nothing renders as
//! the empty string; malformed placeholders abort the render. The
//! output is plain UTF-8 text — the renderer never interprets it.

use std::collections::BTreeMap;

use crate::errors::TemplateError;
use crate::value::Value;

pub fn render(template: &str, vars: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(TemplateError::Unterminated {
                offset: offset + start,
            })?;

        let path = after_open[..end].trim();
        let path = path.strip_prefix('.').unwrap_or(path);
        if path.is_empty() {
            return Err(TemplateError::Empty {
                offset: offset + start,
            });
        }

        if let Some(value) = lookup(vars, path) {
            out.push_str(&value.render());
        }

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

fn lookup<'a>(vars: &'a BTreeMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Map(fields) => current = fields.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}
