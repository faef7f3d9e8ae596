//! Helpers for upstream fully-qualified names.
//!
//! A fully-qualified name is a dotted path (`service.database.schema.table`).
//! Segments that themselves contain a dot are wrapped in double quotes, with an
//! embedded quote written twice.

/// Splits a fully-qualified name into segments, honouring quoted segments.
///
/// Quotes are preserved in the returned segments; use [`unquote`] to strip them.
pub fn split_fqn(fqn: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = fqn.chars().peekable();
    let mut in_quote = false;

    while let Some(ch) = chars.next() {
        if in_quote {
            current.push(ch);
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                    continue;
                }
                in_quote = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_quote = true;
                current.push(ch);
            }
            '.' => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    parts.push(current);
    parts
}

/// Number of segments in a fully-qualified name.
pub fn segment_count(fqn: &str) -> usize {
    split_fqn(fqn).len()
}

/// Removes surrounding quotes from a segment and collapses doubled quotes.
pub fn unquote(segment: &str) -> String {
    if segment.len() >= 2 && segment.starts_with('"') && segment.ends_with('"') {
        segment[1..segment.len() - 1].replace("\"\"", "\"")
    } else {
        segment.to_string()
    }
}

/// Quotes a raw name when it would otherwise be split.
pub fn quote(name: &str) -> String {
    if name.contains('.') || name.contains('"') {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// Appends a raw child name to a parent fully-qualified name.
pub fn child(parent: &str, name: &str) -> String {
    format!("{parent}.{}", quote(name))
}

/// Returns the first `depth` segments of `fqn`, or `None` if it is shallower.
pub fn ancestor(fqn: &str, depth: usize) -> Option<String> {
    let parts = split_fqn(fqn);
    if depth == 0 || parts.len() < depth {
        return None;
    }
    Some(parts[..depth].join("."))
}

/// The unquoted last segment of a fully-qualified name.
pub fn leaf_name(fqn: &str) -> String {
    split_fqn(fqn)
        .last()
        .map(|s| unquote(s))
        .unwrap_or_default()
}
