//! Property primitives.
//!
//! Every access from program code passes the permission filter with
//! the frame's blessing and the caller's effective ownership.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::Value;
use std::rc::Rc;
use world::prop::{PropFlags, PropValue};
use world::{Dbref, NOTHING, World};

fn check_read(world: &World, frame: &Frame, obj: Dbref, path: &str) -> Result<(), MufError> {
    let owner = world.effective_owner(frame.player);
    let perms = world.perms_for(owner, obj, frame.blessed || frame.mlev >= 4);
    if !perms.can_read(path) {
        return Err(MufError::Perm(format!("cannot read {:?}", path)));
    }
    Ok(())
}

fn check_write(world: &World, frame: &Frame, obj: Dbref, path: &str) -> Result<(), MufError> {
    let owner = world.effective_owner(frame.player);
    let perms = world.perms_for(owner, obj, frame.blessed || frame.mlev >= 4);
    if !perms.can_write(path) {
        return Err(MufError::Perm(format!("cannot write {:?}", path)));
    }
    Ok(())
}

fn prop_to_value(v: PropValue) -> Value {
    match v {
        PropValue::Int(n) => Value::Int(n),
        PropValue::Float(f) => Value::Float(f),
        PropValue::Str(s) => Value::str(&s),
        PropValue::Ref(d) => Value::Ref(d),
        PropValue::Lock(l) => Value::Lock(Rc::new(l)),
        PropValue::Dir | PropValue::Unloaded => Value::Int(0),
    }
}

/// `d s getprop`: the value in its natural type, or 0.
pub fn getprop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_read(world, frame, obj, &path)?;
    let v = world.get_prop(obj, &path)?;
    frame.push(v.map(prop_to_value).unwrap_or(Value::Int(0)))
}

pub fn getprop_str(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_read(world, frame, obj, &path)?;
    let s = world.get_prop_str(obj, &path).unwrap_or_default();
    frame.push(Value::str(&s))
}

pub fn getprop_val(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_read(world, frame, obj, &path)?;
    let n = match world.get_prop(obj, &path)? {
        Some(PropValue::Int(n)) => n,
        _ => 0,
    };
    frame.push(Value::Int(n))
}

pub fn getprop_fval(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_read(world, frame, obj, &path)?;
    let f = match world.get_prop(obj, &path)? {
        Some(PropValue::Float(f)) => f,
        _ => 0.0,
    };
    frame.push(Value::Float(f))
}

/// `d s v setprop`.
pub fn setprop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    crate::checkargs::check_args(world, frame, "DS?")?;
    let v = frame.pop()?;
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_write(world, frame, obj, &path)?;
    let pv = match v {
        Value::Int(n) => PropValue::Int(n),
        Value::Float(f) => PropValue::Float(f),
        Value::Str(s) => PropValue::Str(s.to_string()),
        Value::Ref(d) => PropValue::Ref(d),
        Value::Lock(l) => PropValue::Lock((*l).clone()),
        other => {
            return Err(MufError::Type(format!(
                "cannot store {} in a property",
                other.type_name()
            )));
        }
    };
    world.set_prop(obj, &path, pv, PropFlags::empty())?;
    Ok(())
}

pub fn remove_prop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_write(world, frame, obj, &path)?;
    world.del_prop(obj, &path)?;
    Ok(())
}

pub fn propdir_p(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    check_read(world, frame, obj, &path)?;
    let entries = world.prop_dir_entries(obj, &path)?;
    frame.push(Value::Int(!entries.is_empty() as i32))
}

/// `d s nextprop`: the next sibling property path, or "".
pub fn nextprop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let obj = frame.pop_ref()?;
    let (dir, prev) = match path.rsplit_once('/') {
        Some((dir, prev)) => (dir.to_string(), prev.to_string()),
        None => (String::new(), path.to_string()),
    };
    // permission scan applies to the names we might reveal
    let entries = world.prop_dir_entries(obj, &dir)?;
    let owner = world.effective_owner(frame.player);
    let perms = world.perms_for(owner, obj, frame.blessed || frame.mlev >= 4);
    let mut walked = entries.iter().skip_while(|n| {
        !prev.is_empty() && !n.eq_ignore_ascii_case(&prev)
    });
    if !prev.is_empty() {
        walked.next();
    }
    for name in walked {
        let full = if dir.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", dir, name)
        };
        if perms.can_read(&full) {
            return frame.push(Value::str(&full));
        }
    }
    frame.push(Value::str(""))
}

/// `d s envprop`: search up the environment; pushes the holding dbref
/// (or #-1) then the value.
pub fn envprop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let start = frame.pop_ref()?;
    check_read(world, frame, start, &path)?;
    match world.envprop(start, &path)? {
        Some((holder, v)) => {
            frame.push(Value::Ref(holder))?;
            frame.push(prop_to_value(v))
        }
        None => {
            frame.push(Value::Ref(NOTHING))?;
            frame.push(Value::Int(0))
        }
    }
}

pub fn envprop_str(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let path = frame.pop_str()?;
    let start = frame.pop_ref()?;
    check_read(world, frame, start, &path)?;
    match world.envprop(start, &path)? {
        Some((holder, PropValue::Str(s))) => {
            frame.push(Value::Ref(holder))?;
            frame.push(Value::str(&s))
        }
        _ => {
            frame.push(Value::Ref(NOTHING))?;
            frame.push(Value::str(""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::obj::ObjType;
    use world::tune::Tunables;

    fn setup() -> (World, Frame, Dbref) {
        let mut world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let thing = world.arena.create(ObjType::Thing, wiz, "gadget");
        let mut frame = Frame::new(1, Dbref(1), wiz, Dbref(0), NOTHING, "");
        frame.mlev = 3;
        (world, frame, thing)
    }

    #[test]
    fn set_then_get_preserves_type() {
        let (mut world, mut fr, thing) = setup();
        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("stats/height")).unwrap();
        fr.push(Value::Float(1.8)).unwrap();
        setprop(&mut world, &mut fr).unwrap();

        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("STATS/HEIGHT")).unwrap();
        getprop(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Float(1.8));
    }

    #[test]
    fn missing_props_read_as_defaults() {
        let (mut world, mut fr, thing) = setup();
        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("absent")).unwrap();
        getprop_str(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::str(""));

        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("absent")).unwrap();
        getprop_val(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Int(0));
    }

    #[test]
    fn unblessed_frames_cannot_touch_hidden_props() {
        let (mut world, mut fr, thing) = setup();
        let bob = world.create_player("bob", "pw").unwrap();
        fr.player = bob;
        fr.mlev = 2;
        fr.blessed = false;
        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("@secret")).unwrap();
        fr.push(Value::Int(1)).unwrap();
        assert!(matches!(
            setprop(&mut world, &mut fr),
            Err(MufError::Perm(_))
        ));
    }

    #[test]
    fn nextprop_walks_in_order() {
        let (mut world, mut fr, thing) = setup();
        for name in ["alpha", "beta", "gamma"] {
            world
                .set_prop(thing, &format!("list/{}", name), PropValue::Int(1), PropFlags::empty())
                .unwrap();
        }
        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("list/alpha")).unwrap();
        nextprop(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::str("list/beta"));

        fr.push(Value::Ref(thing)).unwrap();
        fr.push(Value::str("list/gamma")).unwrap();
        nextprop(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::str(""));
    }
}
