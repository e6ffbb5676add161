//! Built-in functions.
//!
//! Each built-in receives the references produced by evaluating its
//! arguments and returns one fresh value. User functions with the same name
//! take precedence.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use super::error::RuntimeError;
use super::heap::RefId;
use super::value::{self, Value};
use super::Interpreter;

pub(crate) type Builtin = fn(&mut Interpreter, &[RefId]) -> Result<Value, RuntimeError>;

pub(crate) fn lookup(name: &str) -> Option<Builtin> {
    let builtin: Builtin = match name {
        "print" => builtin_print,
        "printl" => builtin_printl,
        "input" => builtin_input,
        "len" => builtin_len,
        "array" => builtin_array,
        "clone" => builtin_clone,
        "type" => builtin_type,
        "str" => builtin_str,
        "num" => builtin_num,
        "stop" | "abort" => builtin_stop,
        _ => return None,
    };
    Some(builtin)
}

fn expect_args(name: &str, args: &[RefId], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn render_args(interp: &Interpreter, args: &[RefId]) -> Result<String, RuntimeError> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(value::render(&interp.heap, interp.heap.value(*arg)?)?);
    }
    Ok(parts.join(" "))
}

// ── I/O ─────────────────────────────────────────────────────────────────

fn builtin_print(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    let text = render_args(interp, args)?;
    interp.write_output(&text)?;
    Ok(Value::Null)
}

fn builtin_printl(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    let mut text = render_args(interp, args)?;
    text.push('\n');
    interp.write_output(&text)?;
    Ok(Value::Null)
}

fn builtin_input(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("input", args, 0)?;
    let _ = interp.output.flush();
    let mut line = String::new();
    let read = match interp.input.as_mut() {
        Some(reader) => reader.read_line(&mut line),
        None => io::stdin().read_line(&mut line),
    };
    read.map_err(|e| RuntimeError::Io(e.to_string()))?;
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    Ok(Value::from_text(&mut interp.heap, line))
}

// ── Arrays & values ─────────────────────────────────────────────────────

fn builtin_len(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("len", args, 1)?;
    Ok(Value::Number(interp.heap.value(args[0])?.length() as f64))
}

/// `array(n)` makes `n` nulls; any other argument list becomes the elements.
fn builtin_array(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    if let [only] = args {
        if let Value::Number(n) = interp.heap.value(*only)? {
            let n = *n;
            if n < 0.0 || n.fract() != 0.0 {
                return Err(RuntimeError::type_mismatch(format!(
                    "array size must be a non-negative integer, got {}",
                    value::format_number(n)
                )));
            }
            let items = (0..n as usize)
                .map(|_| interp.heap.alloc_root(Value::Null))
                .collect();
            return Ok(Value::Array(items));
        }
    }
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        let source = interp.heap.value(*arg)?.clone();
        let copy = value::deep_clone(&mut interp.heap, &source)?;
        items.push(interp.heap.alloc_root(copy));
    }
    Ok(Value::Array(items))
}

fn builtin_clone(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("clone", args, 1)?;
    let source = interp.heap.value(args[0])?.clone();
    value::deep_clone(&mut interp.heap, &source)
}

fn builtin_type(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("type", args, 1)?;
    let name = interp.heap.value(args[0])?.type_name().to_string();
    Ok(Value::from_text(&mut interp.heap, &name))
}

fn builtin_str(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("str", args, 1)?;
    let text = value::render(&interp.heap, interp.heap.value(args[0])?)?;
    Ok(Value::from_text(&mut interp.heap, &text))
}

fn builtin_num(interp: &mut Interpreter, args: &[RefId]) -> Result<Value, RuntimeError> {
    expect_args("num", args, 1)?;
    match interp.heap.value(args[0])? {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Char(c) => Ok(Value::Number(*c as u32 as f64)),
        other @ Value::Array(_) => {
            let text = value::render(&interp.heap, other)?;
            text.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                RuntimeError::type_mismatch(format!("cannot convert {:?} to a number", text))
            })
        }
        other => Err(RuntimeError::type_mismatch(format!(
            "cannot convert {} to a number",
            other.type_name()
        ))),
    }
}

fn builtin_stop(interp: &mut Interpreter, _args: &[RefId]) -> Result<Value, RuntimeError> {
    interp.exit_requested = true;
    Ok(Value::Null)
}

// ── Captured output ─────────────────────────────────────────────────────

/// In-memory program output, shareable between the interpreter and the
/// code that inspects it.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
