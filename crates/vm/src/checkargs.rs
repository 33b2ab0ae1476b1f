//! Declarative stack-shape checking for primitives.
//!
//! A format string describes the expected stack from deepest to top:
//! `i` integer, `f` float, `s` string, `S` non-empty string, `d` dbref,
//! `D` valid-object dbref, `e` exit, `r` room, `t` thing, `p` player,
//! `q` program, `l` lock, `v` variable, `a` address, `x` dictionary,
//! `y` any array, `Y` packed array, `?` anything. A digit repeats the
//! following specifier; spaces are cosmetic. Nothing is consumed: the
//! caller still pops.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::Value;
use world::obj::ObjType;
use world::World;

fn expected(spec: char) -> &'static str {
    match spec {
        'i' => "integer",
        'f' => "float",
        's' | 'S' => "string",
        'd' | 'D' => "dbref",
        'e' => "exit dbref",
        'r' => "room dbref",
        't' => "thing dbref",
        'p' => "player dbref",
        'q' => "program dbref",
        'l' => "lock",
        'v' => "variable",
        'a' => "address",
        'x' => "dictionary",
        'y' | 'Y' => "array",
        _ => "value",
    }
}

fn matches_spec(world: &World, v: &Value, spec: char) -> bool {
    match spec {
        '?' => true,
        'i' => matches!(v, Value::Int(_)),
        'f' => matches!(v, Value::Float(_)),
        's' => matches!(v, Value::Str(_)),
        'S' => matches!(v, Value::Str(s) if !s.is_empty()),
        'd' => matches!(v, Value::Ref(_)),
        'D' => matches!(v, Value::Ref(d) if world.arena.is_valid_object(*d)),
        'e' | 'r' | 't' | 'p' | 'q' => match v {
            Value::Ref(d) => {
                let want = match spec {
                    'e' => ObjType::Exit,
                    'r' => ObjType::Room,
                    't' => ObjType::Thing,
                    'p' => ObjType::Player,
                    _ => ObjType::Program,
                };
                world.arena.get(*d).map(|o| o.kind() == want).unwrap_or(false)
            }
            _ => false,
        },
        'l' => matches!(v, Value::Lock(_)),
        'v' => matches!(v, Value::Var(_) | Value::LVar(_) | Value::SVar(_)),
        'a' => matches!(v, Value::Addr(_)),
        'x' => matches!(v, Value::Array(a) if a.is_dict()),
        'y' => matches!(v, Value::Array(_)),
        'Y' => matches!(v, Value::Array(a) if !a.is_dict()),
        _ => false,
    }
}

/// Verify the top of the stack against `fmt`. Aborts the frame (via
/// the returned error) with a positional message on the first
/// mismatch, counting arguments from the deepest expected slot.
pub fn check_args(world: &World, frame: &Frame, fmt: &str) -> Result<(), MufError> {
    let mut specs: Vec<char> = Vec::new();
    let mut repeat = 0usize;
    for ch in fmt.chars() {
        match ch {
            ' ' => {}
            '0'..='9' => repeat = repeat * 10 + (ch as usize - '0' as usize),
            spec => {
                for _ in 0..repeat.max(1) {
                    specs.push(spec);
                }
                repeat = 0;
            }
        }
    }
    if frame.stack.len() < specs.len() {
        return Err(MufError::StackUnderflow);
    }
    // specs run deepest-to-top
    for (pos, spec) in specs.iter().enumerate() {
        let depth = specs.len() - 1 - pos;
        let v = frame.peek(depth)?;
        if !matches_spec(world, v, *spec) {
            return Err(MufError::Type(format!(
                "expected {} at argument {}, found {}",
                expected(*spec),
                pos + 1,
                v.type_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::tune::Tunables;
    use world::{Dbref, NOTHING};

    fn harness() -> (World, Frame) {
        let world = World::bootstrap(Tunables::default());
        let frame = Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "");
        (world, frame)
    }

    #[test]
    fn matches_simple_shapes() {
        let (world, mut fr) = harness();
        fr.push(Value::Int(3)).unwrap();
        fr.push(Value::str("hi")).unwrap();
        check_args(&world, &fr, "is").unwrap();
        check_args(&world, &fr, "?s").unwrap();
        assert!(check_args(&world, &fr, "si").is_err());
        assert!(check_args(&world, &fr, "iss").is_err()); // underflow
    }

    #[test]
    fn digits_repeat_and_typed_refs_check_the_arena() {
        let (world, mut fr) = harness();
        let wiz = world.lookup_player("wizard").unwrap();
        for _ in 0..3 {
            fr.push(Value::Int(1)).unwrap();
        }
        check_args(&world, &fr, "3i").unwrap();
        fr.push(Value::Ref(wiz)).unwrap();
        check_args(&world, &fr, "p").unwrap();
        check_args(&world, &fr, "D").unwrap();
        assert!(check_args(&world, &fr, "r").is_err());
        fr.push(Value::Ref(Dbref(9999))).unwrap();
        assert!(check_args(&world, &fr, "D").is_err());
        check_args(&world, &fr, "d").unwrap();
    }

    #[test]
    fn nonempty_string_spec() {
        let (world, mut fr) = harness();
        fr.push(Value::str("")).unwrap();
        check_args(&world, &fr, "s").unwrap();
        assert!(check_args(&world, &fr, "S").is_err());
    }
}
