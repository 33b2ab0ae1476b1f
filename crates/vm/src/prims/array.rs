//! Array and dictionary primitives.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::{ArrayKey, MufArray, Value};
use std::collections::BTreeMap;

fn pop_key(frame: &mut Frame) -> Result<ArrayKey, MufError> {
    match frame.pop()? {
        Value::Int(n) => Ok(ArrayKey::Int(n)),
        Value::Str(s) => Ok(ArrayKey::Str(s.to_string())),
        other => Err(MufError::Type(format!(
            "array keys are integers or strings, found {}",
            other.type_name()
        ))),
    }
}

fn push_array(frame: &mut Frame, arr: MufArray) -> Result<(), MufError> {
    if frame.pinning {
        arr.set_pinned(true);
    }
    frame.push(Value::Array(arr))
}

/// `vN .. v1 n array_make`: collect a stackrange into a packed list.
pub fn make(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 {
        return Err(MufError::Value("negative count".into()));
    }
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        items.push(frame.pop()?);
    }
    items.reverse();
    push_array(frame, MufArray::list(items))
}

/// `k1 v1 .. kN vN n array_make_dict`.
pub fn make_dict(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    if n < 0 {
        return Err(MufError::Value("negative count".into()));
    }
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let v = frame.pop()?;
        let k = pop_key(frame)?;
        map.insert(k, v);
    }
    push_array(frame, MufArray::dict(map))
}

pub fn count(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    frame.push(Value::Int(a.len() as i32))
}

/// `a array_first`: first key and 1, or just 0 when empty.
pub fn first(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    match a.first_key() {
        Some(k) => {
            frame.push(Value::from(&k))?;
            frame.push(Value::Int(1))
        }
        None => frame.push(Value::Int(0)),
    }
}

/// `a k array_next`: following key and 1, or just 0 at the end.
pub fn next(frame: &mut Frame) -> Result<(), MufError> {
    let k = pop_key(frame)?;
    let a = frame.pop_array()?;
    match a.next_key(&k) {
        Some(k2) => {
            frame.push(Value::from(&k2))?;
            frame.push(Value::Int(1))
        }
        None => frame.push(Value::Int(0)),
    }
}

pub fn getitem(frame: &mut Frame) -> Result<(), MufError> {
    let k = pop_key(frame)?;
    let a = frame.pop_array()?;
    frame.push(a.get(&k).unwrap_or(Value::Int(0)))
}

/// `v a k array_setitem -- a'`.
pub fn setitem(frame: &mut Frame) -> Result<(), MufError> {
    let k = pop_key(frame)?;
    let mut a = frame.pop_array()?;
    let v = frame.pop()?;
    if !a.set(k, v) {
        return Err(MufError::Value("index out of array bounds".into()));
    }
    frame.push(Value::Array(a))
}

/// `v a array_appenditem -- a'`.
pub fn append_item(frame: &mut Frame) -> Result<(), MufError> {
    let mut a = frame.pop_array()?;
    let v = frame.pop()?;
    a.push(v);
    frame.push(Value::Array(a))
}

pub fn delitem(frame: &mut Frame) -> Result<(), MufError> {
    let k = pop_key(frame)?;
    let mut a = frame.pop_array()?;
    a.delete(&k);
    frame.push(Value::Array(a))
}

pub fn keys(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    let ks = a.keys().iter().map(Value::from).collect();
    push_array(frame, MufArray::list(ks))
}

pub fn vals(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    push_array(frame, MufArray::list(a.values()))
}

/// Packed lists explode to `v1 .. vN n`; dictionaries to
/// `k1 v1 .. kN vN n` with n counting pairs.
pub fn explode(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    if a.is_dict() {
        let keys = a.keys();
        let n = keys.len();
        for k in keys {
            let v = a.get(&k).unwrap_or(Value::Int(0));
            frame.push(Value::from(&k))?;
            frame.push(v)?;
        }
        frame.push(Value::Int(n as i32))
    } else {
        let vals = a.values();
        let n = vals.len();
        for v in vals {
            frame.push(v)?;
        }
        frame.push(Value::Int(n as i32))
    }
}

/// `a sep array_join -- s`.
pub fn join(frame: &mut Frame) -> Result<(), MufError> {
    let sep = frame.pop_str()?;
    let a = frame.pop_array()?;
    let parts: Vec<String> = a
        .values()
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        })
        .collect();
    frame.push(Value::str(&parts.join(&sep)))
}

pub fn reverse(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    if a.is_dict() {
        return Err(MufError::Type("cannot reverse a dictionary".into()));
    }
    let mut vals = a.values();
    vals.reverse();
    push_array(frame, MufArray::list(vals))
}

pub fn pin(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    a.set_pinned(true);
    frame.push(Value::Array(a))
}

pub fn unpin(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop_array()?;
    a.set_pinned(false);
    frame.push(Value::Array(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::{Dbref, NOTHING};

    fn frame() -> Frame {
        Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "")
    }

    #[test]
    fn make_then_explode_returns_the_original_sequence() {
        let mut fr = frame();
        for n in [10, 20, 30] {
            fr.push(Value::Int(n)).unwrap();
        }
        fr.push(Value::Int(3)).unwrap();
        make(&mut fr).unwrap();
        assert!(matches!(fr.peek(0).unwrap(), Value::Array(_)));
        explode(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 3);
        let got: Vec<i32> = fr.stack.iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(got, vec![10, 20, 30]);
    }

    #[test]
    fn dict_construction_and_lookup() {
        let mut fr = frame();
        fr.push(Value::str("name")).unwrap();
        fr.push(Value::str("Ada")).unwrap();
        fr.push(Value::Int(7)).unwrap();
        fr.push(Value::Int(99)).unwrap();
        fr.push(Value::Int(2)).unwrap();
        make_dict(&mut fr).unwrap();
        let a = fr.pop_array().unwrap();
        assert!(a.is_dict());
        assert_eq!(a.get(&ArrayKey::Str("name".into())), Some(Value::str("Ada")));
        assert_eq!(a.get(&ArrayKey::Int(7)), Some(Value::Int(99)));
    }

    #[test]
    fn first_next_cursor_protocol() {
        let mut fr = frame();
        fr.push(Value::Array(MufArray::list(vec![
            Value::Int(5),
            Value::Int(6),
        ])))
        .unwrap();
        first(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 1);
        assert_eq!(fr.pop_int().unwrap(), 0); // first key

        fr.push(Value::Array(MufArray::list(vec![]))).unwrap();
        first(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 0);
        assert!(fr.stack.is_empty());
    }

    #[test]
    fn setitem_respects_list_bounds() {
        let mut fr = frame();
        fr.push(Value::Int(42)).unwrap();
        fr.push(Value::Array(MufArray::list(vec![Value::Int(0)]))).unwrap();
        fr.push(Value::Int(5)).unwrap();
        assert!(setitem(&mut fr).is_err());
    }

    #[test]
    fn join_stringifies_values() {
        let mut fr = frame();
        fr.push(Value::Array(MufArray::list(vec![
            Value::str("a"),
            Value::Int(2),
            Value::str("c"),
        ])))
        .unwrap();
        fr.push(Value::str("-")).unwrap();
        join(&mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::str("a-2-c"));
    }

    #[test]
    fn frame_pinning_marks_new_arrays() {
        let mut fr = frame();
        fr.pinning = true;
        fr.push(Value::Int(1)).unwrap();
        fr.push(Value::Int(1)).unwrap();
        make(&mut fr).unwrap();
        let a = fr.pop_array().unwrap();
        assert!(a.is_pinned());
    }
}
