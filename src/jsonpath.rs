//! Safe traversal of nested documents by dotted paths
//!
//! Server responses are sparse: fields a caller expects are routinely absent
//! or null. This module provides tolerant lookup and mutation of
//! [`serde_json::Value`] trees by dotted paths (`"object.metadata.name"`),
//! used by the watch pre-processor, the paged list iterator, and for dynamic
//! paths read from kubeconfig auth-provider entries (`token-key`).

use serde_json::Value;

use crate::error::PathError;

type Result<T, E = PathError> = std::result::Result<T, E>;

/// Conversion into an ordered list of traversal keys
///
/// Implemented for dotted strings (where bracket segments `[k]` are
/// equivalent to `.k`) and for explicit key sequences.
pub trait IntoSegments {
    /// Produce the ordered key list for traversal
    fn into_segments(self) -> Result<Vec<String>>;
}

impl IntoSegments for &str {
    fn into_segments(self) -> Result<Vec<String>> {
        parse_dotted(self)
    }
}

impl IntoSegments for &String {
    fn into_segments(self) -> Result<Vec<String>> {
        parse_dotted(self)
    }
}

impl IntoSegments for &[&str] {
    fn into_segments(self) -> Result<Vec<String>> {
        if self.is_empty() || self.iter().any(|s| s.is_empty()) {
            return Err(PathError::BadPath(self.join(".")));
        }
        Ok(self.iter().map(|s| s.to_string()).collect())
    }
}

impl IntoSegments for Vec<String> {
    fn into_segments(self) -> Result<Vec<String>> {
        if self.is_empty() || self.iter().any(|s| s.is_empty()) {
            return Err(PathError::BadPath(self.join(".")));
        }
        Ok(self)
    }
}

fn parse_dotted(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(PathError::BadPath(path.into()));
    }
    let mut segs = Vec::new();
    let mut cur = String::new();
    let mut in_bracket = false;
    for c in path.chars() {
        match c {
            '[' if !in_bracket => {
                if !cur.is_empty() {
                    segs.push(std::mem::take(&mut cur));
                }
                in_bracket = true;
            }
            ']' if in_bracket => {
                if cur.is_empty() {
                    return Err(PathError::BadPath(path.into()));
                }
                segs.push(std::mem::take(&mut cur));
                in_bracket = false;
            }
            '.' if !in_bracket => {
                // consecutive or leading dots contribute nothing; the
                // kubeconfig form `{.credential.token}` strips to a
                // leading-dot path
                if !cur.is_empty() {
                    segs.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if in_bracket {
        return Err(PathError::BadPath(path.into()));
    }
    if !cur.is_empty() {
        segs.push(cur);
    }
    if segs.is_empty() {
        return Err(PathError::BadPath(path.into()));
    }
    Ok(segs)
}

/// Strip the kubeconfig's brace-delimited path form
///
/// Auth-provider entries carry paths as `'{.credential.access_token}'`;
/// lookups want the plain dotted form.
pub fn strip_braces(path: &str) -> &str {
    path.trim_matches(|c| c == '"' || c == '{' || c == '}')
}

fn step<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Check whether a value is present at `path`
///
/// Presence of an explicit null counts as existing.
pub fn exists<P: IntoSegments>(root: &Value, path: P) -> Result<bool> {
    let segs = path.into_segments()?;
    let mut cur = root;
    for seg in &segs {
        match step(cur, seg) {
            Some(v) => cur = v,
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Resolve the value at `path`
///
/// Fails with [`PathError::Missing`] when any prefix of the path is absent
/// or points through a non-structured value. Use [`get_or`] for the
/// tolerant form.
pub fn get<'a, P: IntoSegments>(root: &'a Value, path: P) -> Result<&'a Value> {
    let segs = path.into_segments()?;
    let mut cur = root;
    for seg in &segs {
        cur = step(cur, seg).ok_or_else(|| PathError::Missing(segs.join(".")))?;
    }
    Ok(cur)
}

/// Resolve the value at `path`, falling back to `default`
///
/// The default is returned when the path is absent, traverses a scalar, or
/// resolves to an explicit null. Only a malformed path is an error.
pub fn get_or<'a, P: IntoSegments>(
    root: &'a Value,
    path: P,
    default: &'a Value,
) -> Result<&'a Value> {
    let segs = path.into_segments()?;
    let mut cur = root;
    for seg in &segs {
        match step(cur, seg) {
            Some(v) => cur = v,
            None => return Ok(default),
        }
    }
    if cur.is_null() {
        return Ok(default);
    }
    Ok(cur)
}

/// Which container shape `set` creates for missing intermediates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Structure {
    /// Create mappings (the default)
    Object,
    /// Create ordered sequences
    Array,
}

impl Structure {
    fn empty(self) -> Value {
        match self {
            Structure::Object => Value::Object(Default::default()),
            Structure::Array => Value::Array(Default::default()),
        }
    }
}

/// Options for [`set`]
#[derive(Clone, Copy, Debug)]
pub struct SetOptions {
    /// Create missing intermediate containers (default true)
    pub create_structure: bool,
    /// Shape of created intermediates (default [`Structure::Object`])
    pub create_type: Structure,
}

impl Default for SetOptions {
    fn default() -> Self {
        SetOptions {
            create_structure: true,
            create_type: Structure::Object,
        }
    }
}

/// Write `value` at `path`, creating intermediate structure per `opts`
///
/// Descending through an existing scalar fails with
/// [`PathError::Conflict`]; writing past the end of an array pads it with
/// nulls.
pub fn set<P: IntoSegments>(
    root: &mut Value,
    path: P,
    value: Value,
    opts: &SetOptions,
) -> Result<()> {
    let segs = path.into_segments()?;
    let full = segs.join(".");
    set_inner(root, &segs, value, opts, &full)
}

fn set_inner(
    cur: &mut Value,
    segs: &[String],
    value: Value,
    opts: &SetOptions,
    full: &str,
) -> Result<()> {
    let (head, rest) = match segs.split_first() {
        Some(split) => split,
        None => return Err(PathError::BadPath(full.into())),
    };
    if rest.is_empty() {
        return place(cur, head, value, full);
    }
    let child = descend_mut(cur, head, opts, full)?;
    set_inner(child, rest, value, opts, full)
}

fn place(cur: &mut Value, key: &str, value: Value, full: &str) -> Result<()> {
    match cur {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = key
                .parse::<usize>()
                .map_err(|_| PathError::Conflict(full.into()))?;
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            items[idx] = value;
            Ok(())
        }
        _ => Err(PathError::Conflict(full.into())),
    }
}

fn descend_mut<'a>(
    cur: &'a mut Value,
    key: &str,
    opts: &SetOptions,
    full: &str,
) -> Result<&'a mut Value> {
    let child = match cur {
        Value::Object(map) => {
            if !map.contains_key(key) {
                if !opts.create_structure {
                    return Err(PathError::Missing(full.into()));
                }
                map.insert(key.to_string(), opts.create_type.empty());
            }
            map.get_mut(key).ok_or_else(|| PathError::Missing(full.into()))?
        }
        Value::Array(items) => {
            let idx = key
                .parse::<usize>()
                .map_err(|_| PathError::Conflict(full.into()))?;
            if idx >= items.len() {
                if !opts.create_structure {
                    return Err(PathError::Missing(full.into()));
                }
                items.resize(idx + 1, Value::Null);
            }
            &mut items[idx]
        }
        _ => return Err(PathError::Conflict(full.into())),
    };
    if child.is_null() && opts.create_structure {
        *child = opts.create_type.empty();
    }
    Ok(child)
}

/// Remove the value at `path` if present; absent paths are a no-op
pub fn unset<P: IntoSegments>(root: &mut Value, path: P) -> Result<()> {
    let segs = path.into_segments()?;
    let (last, prefix) = match segs.split_last() {
        Some(split) => split,
        None => return Err(PathError::BadPath(segs.join("."))),
    };
    let mut cur = root;
    for seg in prefix {
        match cur {
            Value::Object(map) => match map.get_mut(seg) {
                Some(v) => cur = v,
                None => return Ok(()),
            },
            Value::Array(items) => match seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(v) => cur = v,
                None => return Ok(()),
            },
            _ => return Ok(()),
        }
    }
    match cur {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(items) => {
            if let Some(idx) = last.parse::<usize>().ok().filter(|i| *i < items.len()) {
                items.remove(idx);
            }
        }
        _ => {}
    }
    Ok(())
}
