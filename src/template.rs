//! Fixed-point template resolution for configuration trees.
//!
//! Scalar values in the raw configuration may contain `{{dotted.path}}`
//! placeholders referencing other values in the same tree (numeric segments
//! index arrays). Resolution substitutes iteratively: each pass replaces
//! every placeholder whose target is already a literal, and repeats until a
//! pass changes nothing. Placeholders that never become resolvable are
//! reported as circular references; a reference to a path that does not
//! exist at all fails immediately.

use toml::Value;

use crate::error::TemplateError;

/// Upper bound on substitution passes. A legitimate reference chain resolves
/// one link per pass, so anything still unresolved after this many passes is
/// a cycle or pathological nesting.
const MAX_PASSES: usize = 100;

/// Resolve every placeholder in `tree`, returning a new tree.
///
/// The input is never mutated. Output is deterministic for a given input:
/// traversal follows the tree's own (stable) key order and in-pass lookups
/// read a snapshot taken before the pass began.
pub fn resolve(tree: &Value) -> Result<Value, TemplateError> {
    let mut current = tree.clone();

    for _ in 0..MAX_PASSES {
        let snapshot = current.clone();
        let mut changed = false;
        rewrite_node(&mut current, &snapshot, &mut changed, "")?;

        if !changed {
            return match first_pending(&current, "") {
                Some((path, location)) => {
                    Err(TemplateError::CircularReference { path, location })
                }
                None => Ok(current),
            };
        }
    }

    match first_pending(&current, "") {
        Some((path, location)) => Err(TemplateError::CircularReference { path, location }),
        None => Ok(current),
    }
}

fn child_location(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn rewrite_node(
    node: &mut Value,
    root: &Value,
    changed: &mut bool,
    location: &str,
) -> Result<(), TemplateError> {
    match node {
        Value::String(s) => {
            if s.contains("{{") {
                *s = rewrite_string(s, root, changed, location)?;
            }
            Ok(())
        }
        Value::Table(table) => {
            for (key, value) in table.iter_mut() {
                let loc = child_location(location, key);
                rewrite_node(value, root, changed, &loc)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, value) in items.iter_mut().enumerate() {
                let loc = child_location(location, &index.to_string());
                rewrite_node(value, root, changed, &loc)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Substitute placeholders in one string. Placeholders whose target still
/// contains placeholders of its own are left for a later pass.
fn rewrite_string(
    input: &str,
    root: &Value,
    changed: &mut bool,
    location: &str,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            // Unterminated marker; keep it verbatim.
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let path = after_open[..close].trim();

        match lookup(root, path) {
            None => {
                return Err(TemplateError::UnresolvedReference {
                    path: path.to_string(),
                    location: location.to_string(),
                })
            }
            Some(Value::String(target)) if has_placeholder(target) => {
                // Target not yet literal; retry next pass.
                out.push_str(&rest[open..open + 2 + close + 2]);
            }
            Some(value) => match scalar_to_string(value) {
                Some(text) => {
                    out.push_str(&text);
                    *changed = true;
                }
                None => {
                    return Err(TemplateError::NotAScalar {
                        path: path.to_string(),
                        location: location.to_string(),
                    })
                }
            },
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Whether a string holds at least one complete `{{...}}` marker. A bare
/// unterminated `{{` is literal text, not pending work.
fn has_placeholder(s: &str) -> bool {
    match s.find("{{") {
        Some(open) => s[open + 2..].contains("}}"),
        None => false,
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.split('.') {
        node = match node {
            Value::Table(table) => table.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    }
}

/// Find the first string still holding a complete placeholder, in traversal
/// order, for cycle reporting.
fn first_pending(node: &Value, location: &str) -> Option<(String, String)> {
    match node {
        Value::String(s) => {
            let open = s.find("{{")?;
            let after = &s[open + 2..];
            let close = after.find("}}")?;
            Some((after[..close].trim().to_string(), location.to_string()))
        }
        Value::Table(table) => {
            for (key, value) in table.iter() {
                let loc = child_location(location, key);
                if let Some(found) = first_pending(value, &loc) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                let loc = child_location(location, &index.to_string());
                if let Some(found) = first_pending(value, &loc) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}
