//! Process-control primitives: calls across programs, nested
//! interpreters, forking, the time queue, multitasking modes, and
//! FORCE.

use crate::error::MufError;
use crate::event::{DELAY_MAX, DELAY_MIN, TqKind};
use crate::frame::{CallRecord, ForNode, Frame, Multitask, SCOPE_VARS, MAX_INTERP_LEVEL};
use crate::interp::{Flow, Machine, QueuedCommand, RunOutcome};
use crate::value::Value;
use world::obj::{Flags, ObjType};
use world::prop::PropValue;
use world::{Dbref, NOTHING, World};

/// Force-lock property consulted before a FORCE lands.
const FORCE_LOCK_PROP: &str = "@flock";

pub fn pid(frame: &mut Frame) -> Result<(), MufError> {
    let p = frame.pid;
    frame.push(Value::Int(p))
}

pub fn systime(machine: &mut Machine, frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Int(machine.now as i32))
}

/// `start end step for`.
pub fn for_prim(frame: &mut Frame) -> Result<(), MufError> {
    let step = frame.pop_int()?;
    let end = frame.pop_int()?;
    let start = frame.pop_int()?;
    if step == 0 {
        return Err(MufError::Value("zero step".into()));
    }
    // a descending range with a default step still terminates
    let step = if start > end && step > 0 { -step } else { step };
    frame.for_stack.push(ForNode::Range {
        cur: start,
        end,
        step,
        started: false,
    });
    Ok(())
}

/// `a foreach`.
pub fn foreach_prim(frame: &mut Frame) -> Result<(), MufError> {
    let arr = frame.pop_array()?;
    frame.for_stack.push(ForNode::Arr { arr, idx: 0 });
    Ok(())
}

/// `a execute`: jump through an address value.
pub fn execute(machine: &mut Machine, frame: &mut Frame) -> Result<Flow, MufError> {
    let addr = match frame.pop()? {
        Value::Addr(a) => a,
        other => {
            return Err(MufError::Type(format!(
                "expected address, found {}",
                other.type_name()
            )));
        }
    };
    if !machine.programs.is_loaded(addr.prog) {
        return Err(MufError::NoProgram(addr.prog));
    }
    let switched = addr.prog != frame.program;
    frame.call_stack.push(CallRecord {
        prog: frame.program,
        pc: frame.pc,
        scope_depth: frame.svar_stack.len(),
    });
    frame.svar_stack.push(vec![Value::Int(0); SCOPE_VARS]);
    if switched {
        frame.caller_refs.push(frame.program);
    }
    frame.program = addr.prog;
    frame.pc = addr.pc;
    Ok(if switched { Flow::Switch } else { Flow::Cont })
}

/// `d call`: run another program from its entry point.
pub fn call(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<Flow, MufError> {
    let prog = frame.pop_ref()?;
    if !matches!(
        world.arena.get(prog).map(|o| o.kind()),
        Ok(ObjType::Program)
    ) {
        return Err(MufError::InvalidObject(prog));
    }
    if !machine.programs.is_loaded(prog) {
        return Err(MufError::NoProgram(prog));
    }
    frame.call_stack.push(CallRecord {
        prog: frame.program,
        pc: frame.pc,
        scope_depth: frame.svar_stack.len(),
    });
    frame.svar_stack.push(vec![Value::Int(0); SCOPE_VARS]);
    frame.caller_refs.push(frame.program);
    frame.program = prog;
    frame.pc = 0;
    Ok(Flow::Switch)
}

/// `p t s interp`: run another program to completion in PREEMPT mode
/// and leave its result as a string.
pub fn interp(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<Flow, MufError> {
    let arg = frame.pop_str()?;
    let trig = frame.pop_ref()?;
    let prog = frame.pop_ref()?;
    if frame.level + 1 >= MAX_INTERP_LEVEL {
        return Err(MufError::Recursion("interp nesting too deep"));
    }
    if !matches!(
        world.arena.get(prog).map(|o| o.kind()),
        Ok(ObjType::Program)
    ) {
        return Err(MufError::InvalidObject(prog));
    }
    if !machine.programs.is_loaded(prog) {
        return Err(MufError::NoProgram(prog));
    }
    let mlev = world.arena.get(prog)?.flags.mucker_level();
    let pid = machine.next_pid();
    let mut sub = Frame::spawn(
        pid,
        prog,
        frame.player,
        world.arena.get(frame.player).map(|o| o.location).unwrap_or(NOTHING),
        trig,
        &arg,
        Multitask::Preempt,
        frame.descr,
    );
    sub.level = frame.level + 1;
    sub.mlev = mlev;
    sub.blessed = mlev >= 4;
    let _ = sub.push(Value::str(&arg));

    if let Ok(obj) = world.arena.get_mut(prog) {
        if let Some(p) = obj.program_data_mut() {
            p.instances += 1;
        }
    }
    let outcome = machine.run_slice(world, &mut sub, i32::MAX);
    machine.retire(world, &sub);

    let result = match outcome {
        RunOutcome::Done(Some(v)) => v.to_string(),
        _ => String::new(),
    };
    frame.push(Value::str(&result))?;
    Ok(Flow::Cont)
}

/// Split the frame: the parent sees the child pid, the child sees 0
/// and runs backgrounded.
pub fn fork(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    if frame.mlev < 3 {
        return Err(MufError::Perm("fork requires mucker level 3".into()));
    }
    let child_pid = machine.next_pid();
    let mut child = Box::new(frame.clone());
    child.pid = child_pid;
    child.mode = Multitask::Background;
    child.been_background = true;
    child.push(Value::Int(0))?;
    if let Ok(obj) = world.arena.get_mut(child.program) {
        if let Some(p) = obj.program_data_mut() {
            p.instances += 1;
        }
    }
    machine.run_queue.push_back(child);
    frame.push(Value::Int(child_pid))
}

/// `i kill`: cancel a queued process. Killing yourself is fatal to
/// yourself.
pub fn kill(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let target = frame.pop_int()?;
    if target == frame.pid {
        return Err(MufError::Killed);
    }
    let killed = machine.kill(world, target);
    frame.push(Value::Int(killed as i32))
}

pub fn is_pid_p(machine: &mut Machine, frame: &mut Frame) -> Result<(), MufError> {
    let target = frame.pop_int()?;
    let exists = machine.pid_exists(target) || target == frame.pid;
    frame.push(Value::Int(exists as i32))
}

/// `i s delay`: queue command text to run after a delay; yields the
/// new pid.
pub fn delay(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let cmd = frame.pop_str()?;
    let secs = frame.pop_int()? as i64;
    if !(DELAY_MIN..=DELAY_MAX).contains(&secs) {
        return Err(MufError::Value(format!(
            "delay must be between {} and {} seconds",
            DELAY_MIN, DELAY_MAX
        )));
    }
    if world.tune.process_limit > 0 && machine.tq.len() >= world.tune.process_limit as usize {
        return Err(MufError::Value("process table is full".into()));
    }
    let pid = machine.next_pid();
    machine.tq.enqueue(
        pid,
        machine.now + secs,
        TqKind::MpiDelay,
        frame.player,
        frame.trig,
        NOTHING,
        Some(cmd.to_string()),
        None,
        frame.descr,
    );
    frame.push(Value::Int(pid))
}

pub fn mode(frame: &mut Frame) -> Result<(), MufError> {
    let m = match frame.mode {
        Multitask::Preempt => 0,
        Multitask::Foreground => 1,
        Multitask::Background => 2,
    };
    frame.push(Value::Int(m))
}

pub fn set_mode(frame: &mut Frame) -> Result<(), MufError> {
    let m = frame.pop_int()?;
    match m {
        0 => preempt(frame),
        1 => foreground(frame),
        2 => background(frame),
        _ => Err(MufError::Value("unknown multitasking mode".into())),
    }
}

pub fn preempt(frame: &mut Frame) -> Result<(), MufError> {
    frame.mode = Multitask::Preempt;
    Ok(())
}

/// One-way rule: a frame that has ever been backgrounded may never
/// come back to the foreground.
pub fn foreground(frame: &mut Frame) -> Result<(), MufError> {
    if frame.been_background {
        return Err(MufError::Perm(
            "cannot foreground a backgrounded program".into(),
        ));
    }
    frame.mode = Multitask::Foreground;
    Ok(())
}

pub fn background(frame: &mut Frame) -> Result<(), MufError> {
    frame.mode = Multitask::Background;
    frame.been_background = true;
    Ok(())
}

/// `d s force`: run a command as the target object.
pub fn force(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let cmd = frame.pop_str()?;
    let target = frame.pop_ref()?;
    if cmd.is_empty() {
        return Err(MufError::Value("empty command".into()));
    }
    if frame.mlev < 4 {
        return Err(MufError::Perm("force requires wizard level".into()));
    }
    if !world.arena.is_valid_object(target) {
        return Err(MufError::InvalidObject(target));
    }
    if machine.force_level + 1 > world.tune.max_force_level {
        return Err(MufError::Recursion("force nesting too deep"));
    }
    let target_obj = world.arena.get(target)?;
    let kind = target_obj.kind();
    let name = target_obj.name.clone();
    if !matches!(kind, ObjType::Player | ObjType::Thing) {
        return Err(MufError::InvalidObject(target));
    }
    // God is beyond even wizards when god_priv is set
    if world.tune.god_priv && target == Dbref(1) {
        return Err(MufError::Perm("you cannot force God".into()));
    }
    if kind == ObjType::Thing {
        let xforcible = world
            .arena
            .get(target)
            .map(|o| o.flags.contains(Flags::XFORCIBLE))
            .unwrap_or(false);
        if !xforcible && !frame.blessed {
            return Err(MufError::Perm("target is not set XFORCIBLE".into()));
        }
        // a thing whose first name-word shadows a player cannot be
        // forced; the command would be indistinguishable from speech
        if world.first_word_is_player(&name) {
            return Err(MufError::Perm(
                "cannot force an object named after a player".into(),
            ));
        }
        if let Ok(Some(PropValue::Lock(lock))) = world.get_prop(target, FORCE_LOCK_PROP) {
            if !world.eval_lock(frame.player, &lock) {
                return Err(MufError::Perm("force lock denies you".into()));
            }
        }
    }
    machine.pending_commands.push_back(QueuedCommand {
        player: target,
        descr: None,
        command: cmd.to_string(),
        force_level: machine.force_level + 1,
    });
    Ok(())
}

pub fn force_level(machine: &mut Machine, frame: &mut Frame) -> Result<(), MufError> {
    frame.push(Value::Int(machine.force_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{CodeImage, Inst, Prim};
    use world::tune::Tunables;

    fn setup() -> (Machine, World, Frame, Dbref) {
        let mut world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let prog = world.arena.create(ObjType::Program, wiz, "main.muf");
        let mut machine = Machine::new();
        machine.programs.load(prog, CodeImage::new(vec![Inst::Ret]));
        let mut frame = Frame::new(1, prog, wiz, Dbref(0), NOTHING, "");
        frame.mlev = 4;
        frame.blessed = true;
        (machine, world, frame, prog)
    }

    #[test]
    fn delay_then_kill_cancels_the_event() {
        let (mut machine, mut world, mut frame, _) = setup();
        machine.now = 1000;
        frame.push(Value::Int(30)).unwrap();
        frame.push(Value::str("me @ \"ping\" notify")).unwrap();
        delay(&mut machine, &mut world, &mut frame).unwrap();
        let pid = frame.pop_int().unwrap();
        assert!(machine.tq.contains_pid(pid));
        assert_eq!(machine.tq.next_fire(), Some(1030));

        frame.push(Value::Int(pid)).unwrap();
        kill(&mut machine, &mut world, &mut frame).unwrap();
        assert_eq!(frame.pop_int().unwrap(), 1);
        assert!(!machine.tq.contains_pid(pid));
        // nothing fires later
        machine.fire_due(&mut world, 2000);
        assert!(machine.pending_commands.is_empty());
    }

    #[test]
    fn delay_rejects_out_of_range() {
        let (mut machine, mut world, mut frame, _) = setup();
        frame.push(Value::Int(0)).unwrap();
        frame.push(Value::str("x")).unwrap();
        assert!(delay(&mut machine, &mut world, &mut frame).is_err());
        frame.stack.clear();
        frame.push(Value::Int((DELAY_MAX + 1) as i32)).unwrap();
        frame.push(Value::str("x")).unwrap();
        assert!(delay(&mut machine, &mut world, &mut frame).is_err());
    }

    #[test]
    fn foreground_after_background_is_refused() {
        let (_, _, mut frame, _) = setup();
        background(&mut frame).unwrap();
        assert!(matches!(foreground(&mut frame), Err(MufError::Perm(_))));
        // but background -> preempt -> background is fine
        preempt(&mut frame).unwrap();
        background(&mut frame).unwrap();
    }

    #[test]
    fn fork_splits_parent_and_child() {
        let (mut machine, mut world, mut frame, prog) = setup();
        frame.push(Value::Int(7)).unwrap();
        fork(&mut machine, &mut world, &mut frame).unwrap();
        let child_pid = frame.pop_int().unwrap();
        assert!(child_pid > 0);
        let child = machine.run_queue.pop_front().unwrap();
        assert_eq!(child.pid, child_pid);
        assert_eq!(child.mode, Multitask::Background);
        // child kept the 7 and got a 0 on top
        let ints: Vec<i32> = child.stack.iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(ints, vec![7, 0]);
        assert_eq!(
            world
                .arena
                .get(prog)
                .unwrap()
                .program_data()
                .map(|p| p.instances),
            Some(1)
        );
    }

    #[test]
    fn force_guards() {
        let (mut machine, mut world, mut frame, _) = setup();
        let bob = world.create_player("bob", "pw").unwrap();
        let statue = world.arena.create(ObjType::Thing, bob, "bob statue");
        world.arena.get_mut(statue).unwrap().flags |= Flags::XFORCIBLE;

        // a thing named after a player is off limits even to wizards
        frame.push(Value::Ref(statue)).unwrap();
        frame.push(Value::str("look")).unwrap();
        assert!(matches!(
            force(&mut machine, &mut world, &mut frame),
            Err(MufError::Perm(_))
        ));

        // renaming clears the collision
        world.arena.get_mut(statue).unwrap().name = "granite statue".into();
        frame.push(Value::Ref(statue)).unwrap();
        frame.push(Value::str("look")).unwrap();
        force(&mut machine, &mut world, &mut frame).unwrap();
        let queued = machine.pending_commands.pop_front().unwrap();
        assert_eq!(queued.player, statue);
        assert_eq!(queued.force_level, 1);

        // God is protected
        frame.push(Value::Ref(Dbref(1))).unwrap();
        frame.push(Value::str("say hi")).unwrap();
        assert!(matches!(
            force(&mut machine, &mut world, &mut frame),
            Err(MufError::Perm(_))
        ));
    }

    #[test]
    fn force_recursion_cap() {
        let (mut machine, mut world, mut frame, _) = setup();
        machine.force_level = world.tune.max_force_level;
        let bob = world.create_player("bob", "pw").unwrap();
        frame.push(Value::Ref(bob)).unwrap();
        frame.push(Value::str("look")).unwrap();
        assert!(matches!(
            force(&mut machine, &mut world, &mut frame),
            Err(MufError::Recursion(_))
        ));
    }

    #[test]
    fn interp_runs_nested_and_returns_top_as_string() {
        let (mut machine, mut world, mut frame, _) = setup();
        let wiz = world.lookup_player("wizard").unwrap();
        let inner = world.arena.create(ObjType::Program, wiz, "inner.muf");
        machine.programs.load(
            inner,
            CodeImage::new(vec![
                Inst::Prim(Prim::Pop), // drop the arg
                Inst::Push(Value::Int(21)),
                Inst::Push(Value::Int(2)),
                Inst::Prim(Prim::Mul),
            ]),
        );
        frame.push(Value::Ref(inner)).unwrap();
        frame.push(Value::Ref(NOTHING)).unwrap();
        frame.push(Value::str("arg")).unwrap();
        interp(&mut machine, &mut world, &mut frame).unwrap();
        assert_eq!(frame.pop().unwrap(), Value::str("42"));
    }
}
