//! Stack-shuffling and variable-handle primitives.

use crate::error::MufError;
use crate::frame::{Frame, MAX_VAR};
use crate::value::Value;

pub fn pop(frame: &mut Frame) -> Result<(), MufError> {
    frame.pop()?;
    Ok(())
}

pub fn popn(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 {
        return Err(MufError::Value("negative count".into()));
    }
    for _ in 0..n {
        frame.pop()?;
    }
    Ok(())
}

pub fn dup(frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.peek(0)?.clone();
    frame.push(v)
}

pub fn nip(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    frame.pop()?;
    frame.push(b)
}

pub fn tuck(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(b.clone())?;
    frame.push(a)?;
    frame.push(b)
}

pub fn swap(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(b)?;
    frame.push(a)
}

pub fn over(frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.peek(1)?.clone();
    frame.push(v)
}

pub fn rot(frame: &mut Frame) -> Result<(), MufError> {
    // a b c -- b c a
    let c = frame.pop()?;
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(b)?;
    frame.push(c)?;
    frame.push(a)
}

pub fn rrot(frame: &mut Frame) -> Result<(), MufError> {
    // a b c -- c a b
    let c = frame.pop()?;
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(c)?;
    frame.push(a)?;
    frame.push(b)
}

pub fn pick(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 1 {
        return Err(MufError::Value("pick depth must be positive".into()));
    }
    let v = frame.peek(n as usize - 1)?.clone();
    frame.push(v)
}

pub fn put(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    let v = frame.pop()?;
    if n < 1 || n as usize > frame.stack.len() {
        return Err(MufError::Value("put depth out of range".into()));
    }
    let len = frame.stack.len();
    frame.stack[len - n as usize] = v;
    Ok(())
}

/// Rotate the top `n` items: positive lifts the deepest of them to the
/// top, negative rotates the opposite way.
pub fn rotate(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    let count = n.unsigned_abs() as usize;
    if count == 0 {
        return Ok(());
    }
    if count > frame.stack.len() {
        return Err(MufError::StackUnderflow);
    }
    let at = frame.stack.len() - count;
    let slice = &mut frame.stack[at..];
    if n > 0 {
        slice.rotate_left(1);
    } else {
        slice.rotate_right(1);
    }
    Ok(())
}

pub fn reverse(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 {
        return Err(MufError::Value("negative count".into()));
    }
    let count = n as usize;
    if count > frame.stack.len() {
        return Err(MufError::StackUnderflow);
    }
    let at = frame.stack.len() - count;
    frame.stack[at..].reverse();
    Ok(())
}

pub fn depth(frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.stack.len() as i32;
    frame.push(Value::Int(d))
}

pub fn mark(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Mark)
}

/// `}`: count the items above the topmost mark and drop the mark.
pub fn find_mark(frame: &mut Frame) -> Result<(), MufError> {
    let idx = frame
        .stack
        .iter()
        .rposition(|v| matches!(v, Value::Mark))
        .ok_or_else(|| MufError::Value("no mark on the stack".into()))?;
    let count = frame.stack.len() - idx - 1;
    frame.stack.remove(idx);
    frame.push(Value::Int(count as i32))
}

pub fn shallow_copy(frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.peek(0)?.clone();
    let copy = match v {
        Value::Array(a) => {
            // new container, shared element handles
            Value::Array(crate::value::MufArray::list(a.values()))
        }
        other => other,
    };
    frame.push(copy)
}

pub fn deep_copy(frame: &mut Frame) -> Result<(), MufError> {
    fn deep(v: &Value) -> Value {
        match v {
            Value::Array(a) => {
                if a.is_dict() {
                    let mut m = std::collections::BTreeMap::new();
                    for k in a.keys() {
                        if let Some(item) = a.get(&k) {
                            m.insert(k, deep(&item));
                        }
                    }
                    Value::Array(crate::value::MufArray::dict(m))
                } else {
                    Value::Array(crate::value::MufArray::list(
                        a.values().iter().map(deep).collect(),
                    ))
                }
            }
            other => other.clone(),
        }
    }
    let v = frame.peek(0)?.clone();
    let copy = deep(&v);
    frame.push(copy)
}

pub fn secure_sysvars(frame: &mut Frame) -> Result<(), MufError> {
    frame.secure_sysvars();
    Ok(())
}

/// `@`: read through a variable handle.
pub fn var_at(frame: &mut Frame) -> Result<(), MufError> {
    let h = frame.pop()?;
    let v = match h {
        Value::Var(n) => frame
            .gvars
            .get(n)
            .cloned()
            .ok_or_else(|| MufError::Value("variable index out of range".into()))?,
        Value::LVar(n) => {
            let prog = frame.program;
            frame
                .localvars(prog)
                .get(n)
                .cloned()
                .ok_or_else(|| MufError::Value("local variable out of range".into()))?
        }
        Value::SVar(n) => frame
            .svar_stack
            .last()
            .and_then(|s| s.get(n))
            .cloned()
            .ok_or_else(|| MufError::Value("scoped variable out of range".into()))?,
        other => {
            return Err(MufError::Type(format!(
                "expected variable, found {}",
                other.type_name()
            )));
        }
    };
    frame.push(v)
}

/// `!`: write through a variable handle.
pub fn var_bang(frame: &mut Frame) -> Result<(), MufError> {
    let h = frame.pop()?;
    let v = frame.pop()?;
    match h {
        Value::Var(n) if n < frame.gvars.len() => frame.gvars[n] = v,
        Value::LVar(n) if n < MAX_VAR => {
            let prog = frame.program;
            frame.localvars(prog)[n] = v;
        }
        Value::SVar(n) => {
            let scope = frame.current_scope_mut();
            if n >= scope.len() {
                return Err(MufError::Value("scoped variable out of range".into()));
            }
            scope[n] = v;
        }
        Value::Var(_) | Value::LVar(_) => {
            return Err(MufError::Value("variable index out of range".into()));
        }
        other => {
            return Err(MufError::Type(format!(
                "expected variable, found {}",
                other.type_name()
            )));
        }
    }
    Ok(())
}

pub fn variable(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 || n as usize >= MAX_VAR {
        return Err(MufError::Value("variable index out of range".into()));
    }
    frame.push(Value::Var(n as usize))
}

pub fn localvar(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 || n as usize >= MAX_VAR {
        return Err(MufError::Value("local variable out of range".into()));
    }
    frame.push(Value::LVar(n as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::{Dbref, NOTHING};

    fn frame_with(items: &[i32]) -> Frame {
        let mut fr = Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "");
        for i in items {
            fr.push(Value::Int(*i)).unwrap();
        }
        fr
    }

    fn ints(fr: &Frame) -> Vec<i32> {
        fr.stack.iter().filter_map(|v| v.as_int()).collect()
    }

    #[test]
    fn shuffles() {
        let mut fr = frame_with(&[1, 2, 3]);
        rot(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![2, 3, 1]);
        rrot(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 2, 3]);
        swap(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 3, 2]);
        over(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 3, 2, 3]);
        nip(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 3, 3]);
        tuck(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 3, 3, 3]);
    }

    #[test]
    fn pick_and_put_are_one_based() {
        let mut fr = frame_with(&[10, 20, 30]);
        fr.push(Value::Int(3)).unwrap();
        pick(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![10, 20, 30, 10]);

        fr.push(Value::Int(99)).unwrap();
        fr.push(Value::Int(4)).unwrap();
        put(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![99, 20, 30, 10]);
    }

    #[test]
    fn rotate_both_directions() {
        let mut fr = frame_with(&[1, 2, 3, 4]);
        fr.push(Value::Int(3)).unwrap();
        rotate(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 3, 4, 2]);
        fr.push(Value::Int(-3)).unwrap();
        rotate(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mark_and_count() {
        let mut fr = frame_with(&[7]);
        mark(&mut fr).unwrap();
        fr.push(Value::Int(1)).unwrap();
        fr.push(Value::Int(2)).unwrap();
        find_mark(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![7, 1, 2, 2]);
        assert!(find_mark(&mut fr).is_err());
    }

    #[test]
    fn variables_read_and_write() {
        let mut fr = frame_with(&[]);
        fr.push(Value::Int(42)).unwrap();
        fr.push(Value::Int(6)).unwrap();
        variable(&mut fr).unwrap();
        var_bang(&mut fr).unwrap();
        assert_eq!(fr.gvars[6], Value::Int(42));

        fr.push(Value::Int(6)).unwrap();
        variable(&mut fr).unwrap();
        var_at(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![42]);
    }

    #[test]
    fn reverse_top_n() {
        let mut fr = frame_with(&[1, 2, 3, 4]);
        fr.push(Value::Int(3)).unwrap();
        reverse(&mut fr).unwrap();
        assert_eq!(ints(&fr), vec![1, 4, 3, 2]);
    }
}
