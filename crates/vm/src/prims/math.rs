//! Integer/mixed arithmetic, comparison, logic, and the seeded RNG.
//!
//! Degenerate cases set the frame's error flags and push a sentinel
//! instead of aborting: programs opt in to checking the flags.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::Value;
use world::hash;
use world::Dbref;

/// Addition also concatenates strings; dbrefs shift by integers.
pub fn add(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    let out = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_result(frame, *x as i64 + *y as i64),
        (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 + y),
        (Value::Float(x), Value::Int(y)) => Value::Float(x + *y as f64),
        (Value::Ref(d), Value::Int(y)) => Value::Ref(Dbref(d.0.wrapping_add(*y))),
        (Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Value::str(&s)
        }
        _ => return type_err(&a, &b),
    };
    frame.push(out)
}

pub fn sub(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    let out = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_result(frame, *x as i64 - *y as i64),
        (Value::Float(x), Value::Float(y)) => Value::Float(x - y),
        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 - y),
        (Value::Float(x), Value::Int(y)) => Value::Float(x - *y as f64),
        (Value::Ref(d), Value::Int(y)) => Value::Ref(Dbref(d.0.wrapping_sub(*y))),
        _ => return type_err(&a, &b),
    };
    frame.push(out)
}

/// Multiplication also repeats strings by an integer count.
pub fn mul(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    let out = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_result(frame, *x as i64 * *y as i64),
        (Value::Float(x), Value::Float(y)) => Value::Float(x * y),
        (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 * y),
        (Value::Float(x), Value::Int(y)) => Value::Float(x * *y as f64),
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            if *n < 0 {
                Value::str("")
            } else if s.len().saturating_mul(*n as usize) > 65536 {
                frame.err.bounds = true;
                Value::str("")
            } else {
                Value::str(&s.repeat(*n as usize))
            }
        }
        _ => return type_err(&a, &b),
    };
    frame.push(out)
}

pub fn div(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    let out = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == -1 && *x == i32::MIN {
                frame.err.i_bounds = true;
                Value::Int(0)
            } else if *y == 0 {
                frame.err.div_zero = true;
                Value::Int(0)
            } else {
                Value::Int(x / y)
            }
        }
        (x, y) if x.as_int().is_some() || matches!(x, Value::Float(_)) => {
            let (Some(fx), Some(fy)) = (as_float(x), as_float(y)) else {
                return type_err(&a, &b);
            };
            if fy.abs() < f64::EPSILON {
                frame.err.div_zero = true;
                Value::Float(f64::INFINITY)
            } else if !fx.is_finite() || !fy.is_finite() {
                frame.err.f_bounds = true;
                Value::Float(0.0)
            } else {
                Value::Float(fx / fy)
            }
        }
        _ => return type_err(&a, &b),
    };
    frame.push(out)
}

/// Integer modulo only. `INT_MIN % -1` answers 1 with the bounds flag.
pub fn modulo(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    let out = if b == -1 && a == i32::MIN {
        frame.err.i_bounds = true;
        1
    } else if b == 0 {
        0
    } else {
        a % b
    };
    frame.push(Value::Int(out))
}

pub fn bitor(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    frame.push(Value::Int(a | b))
}

pub fn bitxor(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    frame.push(Value::Int(a ^ b))
}

pub fn bitand(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    frame.push(Value::Int(a & b))
}

/// Positive shifts left, negative shifts right; 32 or more of either
/// clears to zero (or the sign fill on the right).
pub fn bitshift(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    let a = frame.pop_int()?;
    let out = if n >= 32 {
        0
    } else if n >= 0 {
        ((a as u32) << n) as i32
    } else if n <= -32 {
        if a < 0 { -1 } else { 0 }
    } else {
        a >> (-n)
    };
    frame.push(Value::Int(out))
}

pub fn land(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(Value::Int((a.truthy() && b.truthy()) as i32))
}

pub fn lor(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(Value::Int((a.truthy() || b.truthy()) as i32))
}

pub fn lxor(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(Value::Int((a.truthy() != b.truthy()) as i32))
}

pub fn lnot(frame: &mut Frame) -> Result<(), MufError> {
    let a = frame.pop()?;
    frame.push(Value::Int(!a.truthy() as i32))
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Ref(d) => Some(d.0 as f64),
        _ => None,
    }
}

fn compare(frame: &mut Frame) -> Result<std::cmp::Ordering, MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    let (Some(x), Some(y)) = (as_float(&a), as_float(&b)) else {
        return type_err(&a, &b);
    };
    Ok(x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal))
}

pub fn lt(frame: &mut Frame) -> Result<(), MufError> {
    let ord = compare(frame)?;
    frame.push(Value::Int((ord == std::cmp::Ordering::Less) as i32))
}

pub fn gt(frame: &mut Frame) -> Result<(), MufError> {
    let ord = compare(frame)?;
    frame.push(Value::Int((ord == std::cmp::Ordering::Greater) as i32))
}

pub fn le(frame: &mut Frame) -> Result<(), MufError> {
    let ord = compare(frame)?;
    frame.push(Value::Int((ord != std::cmp::Ordering::Greater) as i32))
}

pub fn ge(frame: &mut Frame) -> Result<(), MufError> {
    let ord = compare(frame)?;
    frame.push(Value::Int((ord != std::cmp::Ordering::Less) as i32))
}

/// Equality also covers strings and refs; mixed numerics compare by
/// value.
pub fn eq(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(Value::Int((a == b) as i32))
}

pub fn ne(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop()?;
    let a = frame.pop()?;
    frame.push(Value::Int((a != b) as i32))
}

pub fn random(frame: &mut Frame) -> Result<(), MufError> {
    let n: i32 = rand::random::<i32>() & i32::MAX;
    frame.push(Value::Int(n))
}

/// Seeded random: advance the frame's MD5 chain.
pub fn srand(frame: &mut Frame) -> Result<(), MufError> {
    if frame.rndbuf.is_none() {
        frame.rndbuf = Some(hash::new_seed());
    }
    let buf = frame.rndbuf.as_mut().unwrap();
    let n = hash::rnd(buf) as i32;
    frame.push(Value::Int(n))
}

pub fn getseed(frame: &mut Frame) -> Result<(), MufError> {
    match &frame.rndbuf {
        None => frame.push(Value::str("")),
        Some(seed) => frame.push(Value::str(&hash::seed_to_string(seed))),
    }
}

pub fn setseed(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.rndbuf = Some(if s.is_empty() {
        hash::new_seed()
    } else {
        hash::seed_from_string(&s)
    });
    Ok(())
}

/// Coerce to integer; out-of-range floats clamp to 0 with the bounds
/// flag set.
pub fn int(frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.pop()?;
    let out = match v {
        Value::Int(n) => n,
        Value::Ref(d) => d.0,
        Value::Var(n) | Value::LVar(n) | Value::SVar(n) => n as i32,
        Value::Float(f) => {
            if f >= i32::MIN as f64 && f <= i32::MAX as f64 {
                f as i32
            } else {
                frame.err.i_bounds = true;
                0
            }
        }
        other => {
            return Err(MufError::Type(format!(
                "cannot convert {} to integer",
                other.type_name()
            )));
        }
    };
    frame.push(Value::Int(out))
}

pub fn abs(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    frame.push(Value::Int(n.wrapping_abs()))
}

pub fn sign(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    frame.push(Value::Int(n.signum()))
}

fn int_result(frame: &mut Frame, wide: i64) -> Value {
    if wide > i32::MAX as i64 || wide < i32::MIN as i64 {
        frame.err.i_bounds = true;
        Value::Int(wide as i32)
    } else {
        Value::Int(wide as i32)
    }
}

fn type_err<T>(a: &Value, b: &Value) -> Result<T, MufError> {
    Err(MufError::Type(format!(
        "cannot combine {} and {}",
        a.type_name(),
        b.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::NOTHING;

    fn frame() -> Frame {
        Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "")
    }

    #[test]
    fn int_min_divided_by_minus_one_is_zero_with_flag() {
        let mut fr = frame();
        fr.push(Value::Int(i32::MIN)).unwrap();
        fr.push(Value::Int(-1)).unwrap();
        div(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(0)));
        assert!(fr.err.i_bounds);
        assert!(!fr.err.div_zero);
    }

    #[test]
    fn integer_divide_by_zero_is_zero_with_flag() {
        let mut fr = frame();
        fr.push(Value::Int(10)).unwrap();
        fr.push(Value::Int(0)).unwrap();
        div(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(0)));
        assert!(fr.err.div_zero);
    }

    #[test]
    fn float_divide_by_zero_is_infinite_with_flag() {
        let mut fr = frame();
        fr.push(Value::Float(1.0)).unwrap();
        fr.push(Value::Float(0.0)).unwrap();
        div(&mut fr).unwrap();
        assert!(matches!(fr.stack.pop(), Some(Value::Float(f)) if f.is_infinite()));
        assert!(fr.err.div_zero);
    }

    #[test]
    fn mod_edge_cases() {
        let mut fr = frame();
        fr.push(Value::Int(i32::MIN)).unwrap();
        fr.push(Value::Int(-1)).unwrap();
        modulo(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(1)));
        assert!(fr.err.i_bounds);

        fr.push(Value::Int(7)).unwrap();
        fr.push(Value::Int(0)).unwrap();
        modulo(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(0)));
    }

    #[test]
    fn string_plus_concats_and_star_repeats() {
        let mut fr = frame();
        fr.push(Value::str("foo")).unwrap();
        fr.push(Value::str("bar")).unwrap();
        add(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::str("foobar")));

        fr.push(Value::str("ab")).unwrap();
        fr.push(Value::Int(3)).unwrap();
        mul(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::str("ababab")));
    }

    #[test]
    fn overflow_sets_i_bounds() {
        let mut fr = frame();
        fr.push(Value::Int(i32::MAX)).unwrap();
        fr.push(Value::Int(1)).unwrap();
        add(&mut fr).unwrap();
        assert!(fr.err.i_bounds);
    }

    #[test]
    fn srand_chain_replays_under_setseed() {
        let mut fr = frame();
        fr.push(Value::str("MYSEED")).unwrap();
        setseed(&mut fr).unwrap();
        srand(&mut fr).unwrap();
        srand(&mut fr).unwrap();
        let run1 = (fr.stack[0].clone(), fr.stack[1].clone());
        fr.stack.clear();

        fr.push(Value::str("MYSEED")).unwrap();
        setseed(&mut fr).unwrap();
        srand(&mut fr).unwrap();
        srand(&mut fr).unwrap();
        assert_eq!(run1, (fr.stack[0].clone(), fr.stack[1].clone()));
    }

    #[test]
    fn dbref_arithmetic() {
        let mut fr = frame();
        fr.push(Value::Ref(Dbref(5))).unwrap();
        fr.push(Value::Int(3)).unwrap();
        add(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Ref(Dbref(8))));
    }

    #[test]
    fn comparisons_mix_int_and_float() {
        let mut fr = frame();
        fr.push(Value::Int(2)).unwrap();
        fr.push(Value::Float(2.5)).unwrap();
        lt(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(1)));
    }
}
