//! Floating-point primitives.
//!
//! Domain errors set the frame's `nan`/`imaginary` flags and yield 0;
//! range errors set `f_bounds`. Nothing here aborts.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::Value;

/// Render a float the way players see it (shortest round-trip form).
pub fn format_float(x: f64) -> String {
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if x.is_nan() {
        return "nan".into();
    }
    let mut s = format!("{}", x);
    if !s.contains('.') && !s.contains('e') && !s.contains("inf") {
        s.push_str(".0");
    }
    s
}

pub fn pi(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Float(std::f64::consts::PI))
}

pub fn epsilon(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Float(f64::EPSILON))
}

pub fn inf(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Float(f64::INFINITY))
}

pub fn ceil(frame: &mut Frame) -> Result<(), MufError> {
    let f = frame.pop_float_coerce()?;
    frame.push(Value::Float(f.ceil()))
}

pub fn floor(frame: &mut Frame) -> Result<(), MufError> {
    let f = frame.pop_float_coerce()?;
    frame.push(Value::Float(f.floor()))
}

/// `f places round`: round to a number of decimal places.
pub fn round(frame: &mut Frame) -> Result<(), MufError> {
    let places = frame.pop_int()?;
    let f = frame.pop_float_coerce()?;
    let mult = 10f64.powi(places.clamp(-15, 15));
    frame.push(Value::Float((f * mult).round() / mult))
}

pub fn sqrt(frame: &mut Frame) -> Result<(), MufError> {
    let f = frame.pop_float_coerce()?;
    if f < 0.0 {
        frame.err.imaginary = true;
        return frame.push(Value::Float(0.0));
    }
    frame.push(Value::Float(f.sqrt()))
}

fn unary(
    frame: &mut Frame,
    f: impl FnOnce(f64) -> f64,
) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    if !x.is_finite() {
        frame.err.nan = true;
        return frame.push(Value::Float(0.0));
    }
    let y = f(x);
    if y.is_nan() {
        frame.err.nan = true;
        return frame.push(Value::Float(0.0));
    }
    if y.is_infinite() {
        frame.err.f_bounds = true;
    }
    frame.push(Value::Float(y))
}

pub fn sin(frame: &mut Frame) -> Result<(), MufError> {
    unary(frame, f64::sin)
}

pub fn cos(frame: &mut Frame) -> Result<(), MufError> {
    unary(frame, f64::cos)
}

pub fn tan(frame: &mut Frame) -> Result<(), MufError> {
    unary(frame, f64::tan)
}

pub fn asin(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    if !(-1.0..=1.0).contains(&x) {
        frame.err.nan = true;
        return frame.push(Value::Float(0.0));
    }
    frame.push(Value::Float(x.asin()))
}

pub fn acos(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    if !(-1.0..=1.0).contains(&x) {
        frame.err.nan = true;
        return frame.push(Value::Float(0.0));
    }
    frame.push(Value::Float(x.acos()))
}

pub fn atan(frame: &mut Frame) -> Result<(), MufError> {
    unary(frame, f64::atan)
}

/// `fy fx atan2`.
pub fn atan2(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    let y = frame.pop_float_coerce()?;
    frame.push(Value::Float(y.atan2(x)))
}

pub fn exp(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    let y = x.exp();
    if y.is_infinite() {
        frame.err.f_bounds = true;
    }
    frame.push(Value::Float(y))
}

pub fn log(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    if x <= 0.0 {
        frame.err.imaginary = true;
        return frame.push(Value::Float(0.0));
    }
    frame.push(Value::Float(x.ln()))
}

pub fn log10(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    if x <= 0.0 {
        frame.err.imaginary = true;
        return frame.push(Value::Float(0.0));
    }
    frame.push(Value::Float(x.log10()))
}

pub fn pow(frame: &mut Frame) -> Result<(), MufError> {
    let e = frame.pop_float_coerce()?;
    let b = frame.pop_float_coerce()?;
    if b < 0.0 && e.fract() != 0.0 {
        frame.err.imaginary = true;
        return frame.push(Value::Float(0.0));
    }
    let y = b.powf(e);
    if y.is_infinite() {
        frame.err.f_bounds = true;
    }
    frame.push(Value::Float(y))
}

pub fn fmod(frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_float_coerce()?;
    let n = frame.pop_float_coerce()?;
    if d.abs() < f64::EPSILON {
        frame.err.div_zero = true;
        return frame.push(Value::Float(f64::INFINITY));
    }
    frame.push(Value::Float(n % d))
}

/// Pushes the integral part, then the fractional part on top.
pub fn modf(frame: &mut Frame) -> Result<(), MufError> {
    let x = frame.pop_float_coerce()?;
    frame.push(Value::Float(x.trunc()))?;
    frame.push(Value::Float(x.fract()))
}

pub fn strtof(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    match s.trim().parse::<f64>() {
        Ok(f) => frame.push(Value::Float(f)),
        Err(_) => {
            frame.err.nan = true;
            frame.push(Value::Float(0.0))
        }
    }
}

pub fn ftostr(frame: &mut Frame) -> Result<(), MufError> {
    let f = frame.pop_float_coerce()?;
    frame.push(Value::str(&format_float(f)))
}

/// Box-Muller polar transform. The second result of each pair is kept
/// for the next call.
pub fn gaussian(frame: &mut Frame) -> Result<(), MufError> {
    let mean = frame.pop_float_coerce()?;
    let stddev = frame.pop_float_coerce()?;
    let unit = match frame.gauss_saved.take() {
        Some(saved) => saved,
        None => {
            let (mut srca, mut srcb, mut radius);
            loop {
                srca = 2.0 * rand::random::<f64>() - 1.0;
                srcb = 2.0 * rand::random::<f64>() - 1.0;
                radius = srca * srca + srcb * srcb;
                if radius < 1.0 && radius > 0.0 {
                    break;
                }
            }
            let scale = (-2.0 * radius.ln() / radius).sqrt();
            frame.gauss_saved = Some(srcb * scale);
            srca * scale
        }
    };
    frame.push(Value::Float(mean + unit * stddev))
}

pub fn frand(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Float(rand::random::<f64>()))
}

pub fn clear_errs(frame: &mut Frame) -> Result<(), MufError> {
    frame.err.clear();
    Ok(())
}

pub fn err_any(frame: &mut Frame) -> Result<(), MufError> {
    let any = frame.err.any();
    frame.push(Value::Int(any as i32))
}

pub fn err_bit(frame: &mut Frame) -> Result<(), MufError> {
    let name = frame.pop_str()?;
    match frame.err.get(&name) {
        Some(set) => frame.push(Value::Int(set as i32)),
        None => Err(MufError::Value(format!("unknown error flag {:?}", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::{Dbref, NOTHING};

    fn frame() -> Frame {
        Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "")
    }

    #[test]
    fn sqrt_of_negative_flags_imaginary() {
        let mut fr = frame();
        fr.push(Value::Float(-4.0)).unwrap();
        sqrt(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Float(0.0)));
        assert!(fr.err.imaginary);
    }

    #[test]
    fn asin_domain() {
        let mut fr = frame();
        fr.push(Value::Float(2.0)).unwrap();
        asin(&mut fr).unwrap();
        assert!(fr.err.nan);
        assert_eq!(fr.stack.pop(), Some(Value::Float(0.0)));
    }

    #[test]
    fn strtof_failure_flags_nan() {
        let mut fr = frame();
        fr.push(Value::str("not-a-number")).unwrap();
        strtof(&mut fr).unwrap();
        assert!(fr.err.nan);
        assert_eq!(fr.stack.pop(), Some(Value::Float(0.0)));

        fr.err.clear();
        fr.push(Value::str("  3.25 ")).unwrap();
        strtof(&mut fr).unwrap();
        assert!(!fr.err.nan);
        assert_eq!(fr.stack.pop(), Some(Value::Float(3.25)));
    }

    #[test]
    fn gaussian_uses_and_clears_the_saved_result() {
        let mut fr = frame();
        fr.push(Value::Float(1.0)).unwrap(); // stddev
        fr.push(Value::Float(0.0)).unwrap(); // mean
        gaussian(&mut fr).unwrap();
        assert!(fr.gauss_saved.is_some());
        let saved = fr.gauss_saved.unwrap();
        fr.push(Value::Float(1.0)).unwrap();
        fr.push(Value::Float(0.0)).unwrap();
        gaussian(&mut fr).unwrap();
        assert!(fr.gauss_saved.is_none());
        assert_eq!(fr.stack.pop(), Some(Value::Float(saved)));
    }

    #[test]
    fn modf_splits_parts() {
        let mut fr = frame();
        fr.push(Value::Float(3.75)).unwrap();
        modf(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Float(0.75)));
        assert_eq!(fr.stack.pop(), Some(Value::Float(3.0)));
    }

    #[test]
    fn error_bits_by_name() {
        let mut fr = frame();
        fr.push(Value::Float(-1.0)).unwrap();
        sqrt(&mut fr).unwrap();
        fr.stack.clear();

        fr.push(Value::str("imaginary")).unwrap();
        err_bit(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(1)));
        err_any(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(1)));
        clear_errs(&mut fr).unwrap();
        err_any(&mut fr).unwrap();
        assert_eq!(fr.stack.pop(), Some(Value::Int(0)));
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
