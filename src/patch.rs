//! Structural JSON diff and patch application.
//!
//! [`diff`] walks two documents recursively (objects by key, arrays by index)
//! and emits a minimal ordered list of RFC 6902 `add`/`remove`/`replace`
//! operations; [`apply`] applies such a list. Applying `diff(a, b)` to `a`
//! always yields `b`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("invalid JSON pointer '{0}'")]
    InvalidPointer(String),

    #[error("path '{0}' does not exist")]
    MissingPath(String),

    #[error("array index out of range at '{0}'")]
    IndexOutOfRange(String),
}

/// One patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } => path,
        }
    }

    /// True if this operation targets `pointer` or anything below it.
    #[must_use]
    pub fn touches(&self, pointer: &str) -> bool {
        let path = self.path();
        path == pointer
            || path
                .strip_prefix(pointer)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Escapes one JSON pointer reference token.
#[must_use]
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Computes the operations turning `old` into `new`.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into(old, new, "", &mut ops);
    ops
}

fn diff_into(old: &Value, new: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b, path, ops),
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_into(&a[i], &b[i], &format!("{path}/{i}"), ops);
            }
            // Remove from the tail so earlier indices stay valid.
            for i in (b.len()..a.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: format!("{path}/{i}"),
                });
            }
            for (i, item) in b.iter().enumerate().skip(a.len()) {
                ops.push(PatchOp::Add {
                    path: format!("{path}/{i}"),
                    value: item.clone(),
                });
            }
        }
        _ if old == new => {}
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}

fn diff_objects(a: &Map<String, Value>, b: &Map<String, Value>, path: &str, ops: &mut Vec<PatchOp>) {
    for (key, old_value) in a {
        let child = format!("{path}/{}", escape_token(key));
        match b.get(key) {
            Some(new_value) => diff_into(old_value, new_value, &child, ops),
            None => ops.push(PatchOp::Remove { path: child }),
        }
    }
    for (key, new_value) in b {
        if !a.contains_key(key) {
            ops.push(PatchOp::Add {
                path: format!("{path}/{}", escape_token(key)),
                value: new_value.clone(),
            });
        }
    }
}

fn split_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(path.to_string()));
    };
    Ok(rest.split('/').map(unescape_token).collect())
}

fn parse_index(token: &str, len: usize, allow_end: bool, path: &str) -> Result<usize, PatchError> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    let index: usize = token
        .parse()
        .map_err(|_| PatchError::InvalidPointer(path.to_string()))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if len == 0 && !allow_end || index > limit {
        return Err(PatchError::IndexOutOfRange(path.to_string()));
    }
    Ok(index)
}

fn parent_mut<'a>(doc: &'a mut Value, tokens: &[String], path: &str) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::MissingPath(path.to_string()))?,
            Value::Array(items) => {
                let index = parse_index(token, items.len(), false, path)?;
                &mut items[index]
            }
            _ => return Err(PatchError::MissingPath(path.to_string())),
        };
    }
    Ok(current)
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let path = op.path();
    let tokens = split_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        // Root pointer.
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(PatchError::InvalidPointer(path.to_string())),
        };
    };

    let parent = parent_mut(doc, parents, path)?;
    match (parent, op) {
        (Value::Object(map), PatchOp::Add { value, .. }) => {
            map.insert(last.clone(), value.clone());
        }
        (Value::Object(map), PatchOp::Remove { .. }) => {
            map.remove(last)
                .ok_or_else(|| PatchError::MissingPath(path.to_string()))?;
        }
        (Value::Object(map), PatchOp::Replace { value, .. }) => {
            let slot = map
                .get_mut(last)
                .ok_or_else(|| PatchError::MissingPath(path.to_string()))?;
            *slot = value.clone();
        }
        (Value::Array(items), PatchOp::Add { value, .. }) => {
            let index = parse_index(last, items.len(), true, path)?;
            items.insert(index, value.clone());
        }
        (Value::Array(items), PatchOp::Remove { .. }) => {
            let index = parse_index(last, items.len(), false, path)?;
            items.remove(index);
        }
        (Value::Array(items), PatchOp::Replace { value, .. }) => {
            let index = parse_index(last, items.len(), false, path)?;
            items[index] = value.clone();
        }
        _ => return Err(PatchError::MissingPath(path.to_string())),
    }
    Ok(())
}

/// Applies `ops` in order to a copy of `doc`.
pub fn apply(doc: &Value, ops: &[PatchOp]) -> Result<Value, PatchError> {
    let mut out = doc.clone();
    for op in ops {
        apply_one(&mut out, op)?;
    }
    Ok(out)
}
