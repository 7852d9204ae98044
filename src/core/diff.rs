/// Structural diff over JSON trees.
///
/// A diff is an ordered list of `CREATE`/`CHANGE`/`REMOVE` operations that
/// turns one value into another. [`apply`] replays it forward and
/// [`revert`] undoes it, so `revert(diff(a, b), b) == a`.
///
/// Objects are compared key by key, arrays index by index. Grown array
/// slots are created in ascending order and shrunk slots removed in
/// descending order, which keeps every operation at the end of its array
/// whichever direction the list is replayed in.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DiffError {
    #[error("diff path {0} does not resolve")]
    PathNotFound(String),
    #[error("diff operation at {0} carries no value")]
    MissingValue(String),
    #[error("cannot remove the root value")]
    RemoveRoot,
}

/// One step of a path into a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{}]", i),
            Self::Key(k) => write!(f, ".{}", k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffKind {
    Create,
    Change,
    Remove,
}

/// A single structural operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOp {
    pub path: Vec<PathSegment>,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub old_value: Option<Value>,
}

// A present field is `Some` even when it holds JSON `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl DiffOp {
    fn create(path: Vec<PathSegment>, value: Value) -> Self {
        Self {
            path,
            kind: DiffKind::Create,
            value: Some(value),
            old_value: None,
        }
    }

    fn change(path: Vec<PathSegment>, old_value: Value, value: Value) -> Self {
        Self {
            path,
            kind: DiffKind::Change,
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    fn remove(path: Vec<PathSegment>, old_value: Value) -> Self {
        Self {
            path,
            kind: DiffKind::Remove,
            value: None,
            old_value: Some(old_value),
        }
    }
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    path.iter().map(ToString::to_string).collect()
}

/// Operations turning `old` into `new`. Empty when they are equal.
pub fn diff(old: &Value, new: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    let mut path = Vec::new();
    diff_into(old, new, &mut path, &mut ops);
    ops
}

fn diff_into(old: &Value, new: &Value, path: &mut Vec<PathSegment>, ops: &mut Vec<DiffOp>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old_child) in a {
                path.push(PathSegment::Key(key.clone()));
                match b.get(key) {
                    Some(new_child) => diff_into(old_child, new_child, path, ops),
                    None => ops.push(DiffOp::remove(path.clone(), old_child.clone())),
                }
                path.pop();
            }
            for (key, new_child) in b {
                if !a.contains_key(key) {
                    path.push(PathSegment::Key(key.clone()));
                    ops.push(DiffOp::create(path.clone(), new_child.clone()));
                    path.pop();
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                path.push(PathSegment::Index(i));
                diff_into(&a[i], &b[i], path, ops);
                path.pop();
            }
            for (i, new_child) in b.iter().enumerate().skip(common) {
                path.push(PathSegment::Index(i));
                ops.push(DiffOp::create(path.clone(), new_child.clone()));
                path.pop();
            }
            for i in (common..a.len()).rev() {
                path.push(PathSegment::Index(i));
                ops.push(DiffOp::remove(path.clone(), a[i].clone()));
                path.pop();
            }
        }
        _ if old == new => {}
        _ => ops.push(DiffOp::change(path.clone(), old.clone(), new.clone())),
    }
}

/// Replay `ops` forward on `value`.
pub fn apply(value: &mut Value, ops: &[DiffOp]) -> Result<(), DiffError> {
    for op in ops {
        match op.kind {
            DiffKind::Create | DiffKind::Change => {
                let v = op
                    .value
                    .clone()
                    .ok_or_else(|| DiffError::MissingValue(render_path(&op.path)))?;
                set_at(value, &op.path, v)?;
            }
            DiffKind::Remove => remove_at(value, &op.path)?,
        }
    }
    Ok(())
}

/// Undo `ops` on `value`, walking them back to front.
pub fn revert(value: &mut Value, ops: &[DiffOp]) -> Result<(), DiffError> {
    for op in ops.iter().rev() {
        match op.kind {
            DiffKind::Create => remove_at(value, &op.path)?,
            DiffKind::Change | DiffKind::Remove => {
                let v = op
                    .old_value
                    .clone()
                    .ok_or_else(|| DiffError::MissingValue(render_path(&op.path)))?;
                set_at(value, &op.path, v)?;
            }
        }
    }
    Ok(())
}

fn parent_mut<'a>(root: &'a mut Value, path: &[PathSegment]) -> Result<&'a mut Value, DiffError> {
    let mut current = root;
    for (depth, segment) in path.iter().enumerate() {
        let next = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
            _ => None,
        };
        current = next.ok_or_else(|| DiffError::PathNotFound(render_path(&path[..=depth])))?;
    }
    Ok(current)
}

fn set_at(root: &mut Value, path: &[PathSegment], value: Value) -> Result<(), DiffError> {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return Ok(());
    };
    let not_found = || DiffError::PathNotFound(render_path(path));
    match (parent_mut(root, parents)?, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Array(items), PathSegment::Index(i)) => {
            if *i < items.len() {
                items[*i] = value;
                Ok(())
            } else if *i == items.len() {
                items.push(value);
                Ok(())
            } else {
                Err(not_found())
            }
        }
        _ => Err(not_found()),
    }
}

fn remove_at(root: &mut Value, path: &[PathSegment]) -> Result<(), DiffError> {
    let (last, parents) = path.split_last().ok_or(DiffError::RemoveRoot)?;
    let not_found = || DiffError::PathNotFound(render_path(path));
    match (parent_mut(root, parents)?, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.remove(key).map(|_| ()).ok_or_else(not_found)
        }
        (Value::Array(items), PathSegment::Index(i)) if *i < items.len() => {
            items.remove(*i);
            Ok(())
        }
        _ => Err(not_found()),
    }
}
