//! Database and lock primitives.

use crate::error::MufError;
use crate::frame::Frame;
use crate::value::Value;
use std::rc::Rc;
use world::World;
use world::obj::{Flags, ObjType};

const VERSION: &str = concat!("muckd ", env!("CARGO_PKG_VERSION"));

pub fn dbtop(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let top = world.arena.db_top();
    frame.push(Value::Ref(world::Dbref(top)))
}

pub fn prog(frame: &mut Frame) -> Result<(), MufError> {
    let p = frame.program;
    frame.push(Value::Ref(p))
}

pub fn trig(frame: &mut Frame) -> Result<(), MufError> {
    let t = frame.trig;
    frame.push(Value::Ref(t))
}

pub fn version(frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::str(VERSION))
}

pub fn name(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let name = world.arena.get(d)?.name.clone();
    frame.push(Value::str(&name))
}

pub fn setname(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let name = frame.pop_str()?;
    let d = frame.pop_ref()?;
    let owner = world.effective_owner(frame.player);
    if world.arena.get(d)?.owner != owner && frame.mlev < 4 {
        return Err(MufError::Perm("you do not own that".into()));
    }
    if world.arena.get(d)?.kind() == ObjType::Player {
        return Err(MufError::Perm("use @name for players".into()));
    }
    world.arena.get_mut(d)?.name = name.to_string();
    Ok(())
}

pub fn owner(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let o = world.arena.get(d)?.owner;
    frame.push(Value::Ref(o))
}

pub fn location(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let l = world.arena.get(d)?.location;
    frame.push(Value::Ref(l))
}

/// `d d' moveto`.
pub fn moveto(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    crate::checkargs::check_args(world, frame, "DD")?;
    let dest = frame.pop_ref()?;
    let what = frame.pop_ref()?;
    let owner = world.effective_owner(frame.player);
    let obj_owner = world.arena.get(what)?.owner;
    if obj_owner != owner && frame.mlev < 4 {
        return Err(MufError::Perm("you do not control that".into()));
    }
    world.arena.move_to(what, dest)?;
    Ok(())
}

pub fn contents(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let c = world.arena.get(d)?.contents;
    frame.push(Value::Ref(c))
}

pub fn exits(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let e = world.arena.get(d)?.exits;
    frame.push(Value::Ref(e))
}

pub fn next_obj(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let n = world.arena.get(d)?.next;
    frame.push(Value::Ref(n))
}

pub fn ok_p(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.pop()?;
    let ok = match v {
        Value::Ref(d) => world.arena.is_valid_object(d),
        _ => false,
    };
    frame.push(Value::Int(ok as i32))
}

pub fn type_p(world: &mut World, frame: &mut Frame, want: ObjType) -> Result<(), MufError> {
    let d = frame.pop_ref()?;
    let is = world.arena.get(d).map(|o| o.kind() == want).unwrap_or(false);
    frame.push(Value::Int(is as i32))
}

/// `d s flag?`.
pub fn flag_p(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let name = frame.pop_str()?;
    let d = frame.pop_ref()?;
    let flag = match name.to_ascii_lowercase().as_str() {
        "dark" => Flags::DARK,
        "link_ok" => Flags::LINK_OK,
        "sticky" => Flags::STICKY,
        "builder" => Flags::BUILDER,
        "chown_ok" => Flags::CHOWN_OK,
        "jump_ok" => Flags::JUMP_OK,
        "haven" => Flags::HAVEN,
        "abode" => Flags::ABODE,
        "wizard" => Flags::WIZARD,
        "quell" => Flags::QUELL,
        "interactive" => Flags::INTERACTIVE,
        "zombie" => Flags::ZOMBIE,
        "vehicle" => Flags::VEHICLE,
        "xforcible" => Flags::XFORCIBLE,
        "color" => Flags::COLOR,
        _ => return Err(MufError::Value(format!("unknown flag {:?}", name))),
    };
    let set = world
        .arena
        .get(d)
        .map(|o| o.flags.contains(flag))
        .unwrap_or(false);
    frame.push(Value::Int(set as i32))
}

/// `s parselock`.
pub fn parselock(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let text = frame.pop_str()?;
    let lock = world
        .parse_lock(frame.player, &text)
        .map_err(|e| MufError::Value(e.to_string()))?;
    frame.push(Value::Lock(Rc::new(lock)))
}

/// `d l testlock`.
pub fn testlock(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let lock = match frame.pop()? {
        Value::Lock(l) => l,
        other => {
            return Err(MufError::Type(format!(
                "expected lock, found {}",
                other.type_name()
            )));
        }
    };
    let who = frame.pop_ref()?;
    let passed = world.eval_lock(who, &lock);
    frame.push(Value::Int(passed as i32))
}

pub fn unparselock(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let lock = match frame.pop()? {
        Value::Lock(l) => l,
        other => {
            return Err(MufError::Type(format!(
                "expected lock, found {}",
                other.type_name()
            )));
        }
    };
    let text = world.unparse_lock(&lock, false);
    frame.push(Value::str(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::tune::Tunables;
    use world::{Dbref, NOTHING};

    fn setup() -> (World, Frame) {
        let world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let mut frame = Frame::new(1, Dbref(1), wiz, Dbref(0), NOTHING, "");
        frame.mlev = 4;
        (world, frame)
    }

    #[test]
    fn db_navigation() {
        let (mut world, mut fr) = setup();
        let wiz = world.lookup_player("wizard").unwrap();
        fr.push(Value::Ref(wiz)).unwrap();
        location(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Ref(Dbref(0)));

        fr.push(Value::Ref(Dbref(0))).unwrap();
        contents(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Ref(wiz));
    }

    #[test]
    fn lock_parse_eval_roundtrip() {
        let (mut world, mut fr) = setup();
        let wiz = world.lookup_player("wizard").unwrap();
        fr.push(Value::str("*wizard")).unwrap();
        parselock(&mut world, &mut fr).unwrap();
        let lock = fr.pop().unwrap();

        fr.push(Value::Ref(wiz)).unwrap();
        fr.push(lock).unwrap();
        testlock(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Int(1));
    }

    #[test]
    fn testlock_denies_strangers() {
        let (mut world, mut fr) = setup();
        let bob = world.create_player("bob", "pw").unwrap();
        let lock = world.parse_lock(bob, "me").unwrap();
        let wiz = world.lookup_player("wizard").unwrap();
        fr.push(Value::Ref(wiz)).unwrap();
        fr.push(Value::Lock(Rc::new(lock))).unwrap();
        testlock(&mut world, &mut fr).unwrap();
        assert_eq!(fr.pop().unwrap(), Value::Int(0));
    }

    #[test]
    fn moveto_respects_ownership() {
        let (mut world, mut fr) = setup();
        let bob = world.create_player("bob", "pw").unwrap();
        let rock = world.arena.create(ObjType::Thing, bob, "rock");
        fr.mlev = 2;
        fr.push(Value::Ref(rock)).unwrap();
        fr.push(Value::Ref(Dbref(0))).unwrap();
        assert!(matches!(moveto(&mut world, &mut fr), Err(MufError::Perm(_))));
        fr.stack.clear();
        fr.mlev = 4;
        fr.push(Value::Ref(rock)).unwrap();
        fr.push(Value::Ref(Dbref(0))).unwrap();
        moveto(&mut world, &mut fr).unwrap();
        assert_eq!(world.arena.get(rock).unwrap().location, Dbref(0));
    }
}
