use std::cmp::Ordering;
use std::collections::HashSet;

use crate::ast::{BinaryOp, UnaryOp};

use super::error::RuntimeError;
use super::heap::{Heap, RefId};
use super::value::Value;

fn bool_value(b: bool) -> Value {
    Value::Number(if b { 1.0 } else { 0.0 })
}

fn number_operand(op: &str, value: &Value) -> Result<f64, RuntimeError> {
    value.as_number().ok_or_else(|| {
        RuntimeError::type_mismatch(format!(
            "operator '{}' needs a number, got {}",
            op,
            value.type_name()
        ))
    })
}

// ── Unary ───────────────────────────────────────────────────────────────

pub fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, RuntimeError> {
    let n = number_operand(op.symbol(), value)?;
    match op {
        UnaryOp::Negate => Ok(Value::Number(-n)),
        UnaryOp::Not => Ok(bool_value(n == 0.0)),
        UnaryOp::Increment | UnaryOp::Decrement => Ok(Value::Number(n)),
    }
}

/// Mutate a number in place by one step and return its previous value.
pub fn apply_step(op: UnaryOp, value: &mut Value) -> Result<Value, RuntimeError> {
    let n = number_operand(op.symbol(), value)?;
    let next = match op {
        UnaryOp::Decrement => n - 1.0,
        _ => n + 1.0,
    };
    *value = Value::Number(next);
    Ok(Value::Number(n))
}

// ── Binary ──────────────────────────────────────────────────────────────

/// Apply a binary operator to the values behind two operand references.
/// Array concatenation is handled by [`concat`].
pub fn apply_binary(
    heap: &Heap,
    op: BinaryOp,
    left: RefId,
    right: RefId,
) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Equal => Ok(bool_value(values_equal(heap, left, right)?)),
        BinaryOp::NotEqual => Ok(bool_value(!values_equal(heap, left, right)?)),
        BinaryOp::Less => Ok(bool_value(ordering(heap, op, left, right)? == Ordering::Less)),
        BinaryOp::Greater => Ok(bool_value(ordering(heap, op, left, right)? == Ordering::Greater)),
        BinaryOp::LessEqual => Ok(bool_value(ordering(heap, op, left, right)? != Ordering::Greater)),
        BinaryOp::GreaterEqual => Ok(bool_value(ordering(heap, op, left, right)? != Ordering::Less)),
        _ => {
            let symbol = op.symbol();
            let l = number_operand(symbol, heap.value(left)?)?;
            let r = number_operand(symbol, heap.value(right)?)?;
            match op {
                BinaryOp::Or => Ok(bool_value(l != 0.0 || r != 0.0)),
                BinaryOp::And => Ok(bool_value(l != 0.0 && r != 0.0)),
                BinaryOp::Add => Ok(Value::Number(l + r)),
                BinaryOp::Subtract => Ok(Value::Number(l - r)),
                BinaryOp::Multiply => Ok(Value::Number(l * r)),
                BinaryOp::Divide => Ok(Value::Number(l / r)),
                BinaryOp::Modulo => Ok(Value::Number(l % r)),
                BinaryOp::Power => Ok(Value::Number(l.powf(r))),
                other => Err(RuntimeError::UnsupportedOperator(other.symbol().to_string())),
            }
        }
    }
}

pub fn is_concat(heap: &Heap, op: BinaryOp, left: RefId, right: RefId) -> Result<bool, RuntimeError> {
    Ok(op == BinaryOp::Add
        && matches!(heap.value(left)?, Value::Array(_))
        && matches!(heap.value(right)?, Value::Array(_)))
}

/// Join two arrays. Elements reached through an alias are shared with the
/// source array through fresh aliases; elements of an unanchored temporary
/// are moved.
pub fn concat(heap: &mut Heap, left: RefId, right: RefId) -> Result<Value, RuntimeError> {
    let mut items = Vec::new();
    for operand in [left, right] {
        let moved = heap.is_root(operand)? && heap.owner(operand)?.is_none();
        if moved {
            if let Value::Array(elements) = heap.take_value(operand)? {
                items.extend(elements);
            }
        } else if let Value::Array(elements) = heap.value(operand)?.shallow_clone() {
            for element in elements {
                items.push(heap.alloc_alias(element)?);
            }
        }
    }
    Ok(Value::Array(items))
}

// ── Comparison ──────────────────────────────────────────────────────────

/// `==` semantics: mismatched kinds are simply unequal, structs compare by
/// identity, arrays element-wise.
pub fn values_equal(heap: &Heap, left: RefId, right: RefId) -> Result<bool, RuntimeError> {
    let mut visiting = HashSet::new();
    equal_inner(heap, left, right, &mut visiting)
}

fn equal_inner(
    heap: &Heap,
    left: RefId,
    right: RefId,
    visiting: &mut HashSet<(RefId, RefId)>,
) -> Result<bool, RuntimeError> {
    let (lroot, rroot) = (heap.resolve_root(left)?, heap.resolve_root(right)?);
    if lroot == rroot {
        return Ok(true);
    }
    match (heap.value(lroot)?, heap.value(rroot)?) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::Char(a), Value::Char(b)) => Ok(a == b),
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            if !visiting.insert((lroot, rroot)) {
                return Ok(true);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                if !equal_inner(heap, *x, *y, visiting)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Ordering for `<`, `>`, `<=`, `>=`. Both sides must be the same orderable
/// kind; arrays order by length first, then element by element.
pub fn ordering(
    heap: &Heap,
    op: BinaryOp,
    left: RefId,
    right: RefId,
) -> Result<Ordering, RuntimeError> {
    if heap.resolve_root(left)? == heap.resolve_root(right)? {
        if let Value::Array(_) = heap.value(left)? {
            return Ok(Ordering::Equal);
        }
    }
    let (l, r) = (heap.value(left)?, heap.value(right)?);
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
        (Value::Char(a), Value::Char(b)) => Ok(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            let by_length = a.len().cmp(&b.len());
            if by_length != Ordering::Equal {
                return Ok(by_length);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                let item = ordering(heap, op, *x, *y)?;
                if item != Ordering::Equal {
                    return Ok(item);
                }
            }
            Ok(Ordering::Equal)
        }
        (Value::Null, Value::Null) | (Value::Struct(_), Value::Struct(_)) => {
            Err(RuntimeError::UnsupportedOperator(format!(
                "'{}' is not defined for {}",
                op.symbol(),
                l.type_name()
            )))
        }
        _ => Err(RuntimeError::type_mismatch(format!(
            "cannot compare {} with {} using '{}'",
            l.type_name(),
            r.type_name(),
            op.symbol()
        ))),
    }
}
