//! Canonicalization of arbitrary strings into orchestrator-safe names.

/// Maximum length of a DNS subdomain name.
const MAX_DOMAIN_NAME: usize = 253;
/// Maximum length of a label value.
const MAX_LABEL: usize = 63;

/// Canonicalize into DNS subdomain form: lowercase, `[a-z0-9.-]` only,
/// alphanumeric first and last characters, no `..` runs, at most 253
/// characters. Empty input stays empty; the function is idempotent.
pub fn to_domain_name(name: &str) -> String {
    canonicalize(name, MAX_DOMAIN_NAME)
}

/// Same canonicalization with the 63-character label limit.
pub fn to_label(name: &str) -> String {
    canonicalize(name, MAX_LABEL)
}

fn is_valid_char(b: u8) -> bool {
    b == b'.' || b == b'-' || b.is_ascii_lowercase() || b.is_ascii_digit()
}

fn canonicalize(name: &str, max_len: usize) -> String {
    let lower = name.to_lowercase();
    let mut out = Vec::with_capacity(lower.len() + 1);

    for (i, &b) in lower.as_bytes().iter().enumerate() {
        if i == 0 && !b.is_ascii_lowercase() && !b.is_ascii_digit() {
            // First character must be alphanumeric.
            out.push(b'0');
        }
        out.push(if is_valid_char(b) { b } else { b'.' });
    }

    // Collapse runs of '.'.
    let mut collapsed = Vec::with_capacity(out.len());
    for b in out {
        if b == b'.' && collapsed.last() == Some(&b'.') {
            continue;
        }
        collapsed.push(b);
    }

    if collapsed.is_empty() {
        return String::new();
    }
    collapsed.truncate(max_len);

    let last = *collapsed.last().unwrap_or(&b'0');
    if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
        if collapsed.len() < max_len {
            collapsed.push(b'0');
        } else {
            *collapsed.last_mut().unwrap_or(&mut 0) = b'0';
        }
    }

    // Only ASCII was pushed above.
    String::from_utf8(collapsed).unwrap_or_default()
}

/// Convert a resource kind to its plural resource name.
pub fn kind_to_plural(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with("ss") {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix("cy") {
        return format!("{stem}cies");
    }
    format!("{lower}s")
}
