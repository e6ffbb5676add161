use std::collections::HashSet;
use std::fmt::Write as _;

use indexmap::IndexMap;

use super::error::RuntimeError;
use super::heap::{Heap, RefId};

// ── Values ──────────────────────────────────────────────────────────────

/// A FastCode value. Compound payloads hold reference handles, never values,
/// so copying the enum itself is a shallow clone.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Char(char),
    Array(Vec<RefId>),
    Struct(StructValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub props: IndexMap<String, RefId>,
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Char(_) => "char",
            Value::Array(_) => "array",
            Value::Struct(s) => &s.type_name,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Struct(_))
    }

    /// Array size; zero for every other kind.
    pub fn length(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    /// Header copy that keeps sharing the payload references.
    pub fn shallow_clone(&self) -> Value {
        self.clone()
    }

    /// The i-th element reference of an array.
    pub fn iterate(&self, index: usize) -> Result<RefId, RuntimeError> {
        match self {
            Value::Array(items) => items.get(index).copied().ok_or(RuntimeError::IndexOutOfRange {
                index: index as f64,
                length: items.len(),
            }),
            other => Err(RuntimeError::type_mismatch(format!(
                "cannot index into a value of type {}",
                other.type_name()
            ))),
        }
    }

    /// Every reference held directly by this value, in slot order.
    pub fn payload(&self) -> Vec<RefId> {
        match self {
            Value::Array(items) => items.clone(),
            Value::Struct(s) => s.props.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn replace_slot(&mut self, slot: usize, id: RefId) {
        match self {
            Value::Array(items) => {
                if let Some(item) = items.get_mut(slot) {
                    *item = id;
                }
            }
            Value::Struct(s) => {
                if let Some((_, item)) = s.props.get_index_mut(slot) {
                    *item = id;
                }
            }
            _ => {}
        }
    }

    pub fn from_text(heap: &mut Heap, text: &str) -> Value {
        Value::Array(text.chars().map(|c| heap.alloc_root(Value::Char(c))).collect())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ── Deep copy ───────────────────────────────────────────────────────────

/// Duplicate a value and everything reachable from it into fresh, unanchored
/// roots.
pub fn deep_clone(heap: &mut Heap, value: &Value) -> Result<Value, RuntimeError> {
    let mut path = HashSet::new();
    deep_clone_inner(heap, value, &mut path)
}

fn deep_clone_inner(
    heap: &mut Heap,
    value: &Value,
    path: &mut HashSet<RefId>,
) -> Result<Value, RuntimeError> {
    match value {
        Value::Array(items) => {
            let mut copied = Vec::with_capacity(items.len());
            for item in items {
                copied.push(clone_slot(heap, *item, path)?);
            }
            Ok(Value::Array(copied))
        }
        Value::Struct(s) => {
            let mut props = IndexMap::with_capacity(s.props.len());
            for (name, item) in &s.props {
                props.insert(name.clone(), clone_slot(heap, *item, path)?);
            }
            Ok(Value::Struct(StructValue {
                type_name: s.type_name.clone(),
                props,
            }))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn clone_slot(
    heap: &mut Heap,
    slot: RefId,
    path: &mut HashSet<RefId>,
) -> Result<RefId, RuntimeError> {
    let root = heap.resolve_root(slot)?;
    if !path.insert(root) {
        return Err(RuntimeError::type_mismatch(
            "cannot copy a value that contains itself",
        ));
    }
    let inner = heap.value(root)?.clone();
    let copied = deep_clone_inner(heap, &inner, path)?;
    path.remove(&root);
    Ok(heap.alloc_root(copied))
}

// ── Rendering ───────────────────────────────────────────────────────────

pub fn render(heap: &Heap, value: &Value) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let mut path = HashSet::new();
    render_into(heap, value, &mut out, &mut path)?;
    Ok(out)
}

fn render_into(
    heap: &Heap,
    value: &Value,
    out: &mut String,
    path: &mut HashSet<RefId>,
) -> Result<(), RuntimeError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Char(c) => out.push(*c),
        Value::Array(items) => {
            if let Some(text) = as_text(heap, items)? {
                out.push_str(&text);
                return Ok(());
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_slot(heap, *item, out, path)?;
            }
            out.push(']');
        }
        Value::Struct(s) => {
            let _ = write!(out, "{} {{", s.type_name);
            for (i, (name, item)) in s.props.iter().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                let _ = write!(out, "{}: ", name);
                render_slot(heap, *item, out, path)?;
            }
            out.push_str(if s.props.is_empty() { "}" } else { " }" });
        }
    }
    Ok(())
}

fn render_slot(
    heap: &Heap,
    slot: RefId,
    out: &mut String,
    path: &mut HashSet<RefId>,
) -> Result<(), RuntimeError> {
    let root = heap.resolve_root(slot)?;
    if !path.insert(root) {
        out.push_str("[...]");
        return Ok(());
    }
    render_into(heap, heap.value(root)?, out, path)?;
    path.remove(&root);
    Ok(())
}

/// Non-empty arrays made only of characters print as text.
fn as_text(heap: &Heap, items: &[RefId]) -> Result<Option<String>, RuntimeError> {
    if items.is_empty() {
        return Ok(None);
    }
    let mut text = String::with_capacity(items.len());
    for item in items {
        match heap.value(*item)? {
            Value::Char(c) => text.push(*c),
            _ => return Ok(None),
        }
    }
    Ok(Some(text))
}
