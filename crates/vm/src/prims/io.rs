//! Notification, descriptor input, and session-introspection
//! primitives.

use crate::error::MufError;
use crate::event::DELAY_MAX;
use crate::frame::{Frame, Multitask};
use crate::interp::{Flow, Machine};
use crate::notify as fabric;
use crate::value::Value;
use world::{Dbref, NOTHING, World};

/// `d s notify`.
pub fn notify(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    crate::checkargs::check_args(world, frame, "Ds")?;
    let msg = frame.pop_str()?;
    let target = frame.pop_ref()?;
    if !msg.is_empty() {
        fabric::notify_listeners(
            machine,
            world,
            frame.player,
            frame.program,
            target,
            NOTHING,
            &msg,
            true,
        );
    }
    Ok(())
}

/// `s tell`: notify the running player.
pub fn tell(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let msg = frame.pop_str()?;
    let me = frame.player;
    if !msg.is_empty() {
        fabric::notify_listeners(machine, world, me, frame.program, me, NOTHING, &msg, true);
    }
    Ok(())
}

/// `s otell`: everyone else in the room.
pub fn otell(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let msg = frame.pop_str()?;
    let me = frame.player;
    let room = world.arena.get(me).map(|o| o.location).unwrap_or(NOTHING);
    if room.is_objref() {
        fabric::notify_except(machine, world, room, me, &msg, me);
    }
    Ok(())
}

/// `room dN .. d1 n s notify_exclude`: the room's contents minus the
/// listed refs.
pub fn notify_exclude(
    machine: &mut Machine,
    world: &mut World,
    frame: &mut Frame,
) -> Result<(), MufError> {
    let msg = frame.pop_str()?;
    let n = frame.pop_int()?;
    if n < 0 {
        return Err(MufError::Value("negative exclusion count".into()));
    }
    let mut excluded = Vec::with_capacity(n as usize);
    for _ in 0..n {
        excluded.push(frame.pop_ref()?);
    }
    let room = frame.pop_ref()?;
    if msg.is_empty() {
        return Ok(());
    }
    let members: Vec<Dbref> = world.arena.contents_of(room).collect();
    for m in members {
        if !excluded.contains(&m) {
            fabric::notify_from_echo(machine, world, frame.player, m, &msg, false);
        }
    }
    Ok(())
}

/// `room d s notify_except`: single-exception convenience form.
pub fn notify_except(
    machine: &mut Machine,
    world: &mut World,
    frame: &mut Frame,
) -> Result<(), MufError> {
    let msg = frame.pop_str()?;
    let exception = frame.pop_ref()?;
    let room = frame.pop_ref()?;
    if !msg.is_empty() {
        fabric::notify_except(machine, world, room, exception, &msg, frame.player);
    }
    Ok(())
}

/// `s1 s2 d notify_secure`: the secure line to encrypted descriptors,
/// the plain one elsewhere. Listeners fire once, on the secure text.
pub fn notify_secure(
    machine: &mut Machine,
    world: &mut World,
    frame: &mut Frame,
) -> Result<(), MufError> {
    crate::checkargs::check_args(world, frame, "ssD")?;
    let target = frame.pop_ref()?;
    let secure = frame.pop_str()?;
    let plain = frame.pop_str()?;
    let descrs = world.sessions.descrs_of(target);
    let max = world.tune.max_output;
    for d in descrs {
        let is_ssl = world.sessions.get(d).map(|s| s.is_ssl).unwrap_or(false);
        let text = if is_ssl { &secure } else { &plain };
        let line = format!("{}\r\n", crate::ansi::strip_ansi(text));
        if let Some(s) = world.sessions.get_mut(d) {
            s.queue_output(line.as_bytes(), max);
        }
    }
    if world.tune.listeners {
        fabric::notify_listeners(
            machine,
            world,
            frame.player,
            frame.program,
            target,
            NOTHING,
            &secure,
            true,
        );
    }
    Ok(())
}

fn check_read_allowed(world: &World, frame: &Frame) -> Result<u32, MufError> {
    if frame.mode == Multitask::Background {
        return Err(MufError::Perm(
            "background programs cannot use READ".into(),
        ));
    }
    let descr = frame
        .descr
        .ok_or_else(|| MufError::Perm("no descriptor to read from".into()))?;
    if world.sessions.get(descr).is_none() {
        return Err(MufError::Perm("descriptor has gone away".into()));
    }
    Ok(descr)
}

/// Block until the descriptor produces a line.
pub fn read(world: &mut World, frame: &mut Frame) -> Result<Flow, MufError> {
    let descr = check_read_allowed(world, frame)?;
    if let Some(s) = world.sessions.get_mut(descr) {
        s.read_blocked_pid = Some(frame.pid);
    }
    Ok(Flow::Read { timeout: None })
}

/// `i tread`: like READ but resumes with ("", 0) after `i` seconds.
pub fn tread(world: &mut World, frame: &mut Frame) -> Result<Flow, MufError> {
    let secs = frame.pop_int()? as i64;
    if !(1..=DELAY_MAX).contains(&secs) {
        return Err(MufError::Value("timeout out of range".into()));
    }
    let descr = check_read_allowed(world, frame)?;
    if let Some(s) = world.sessions.get_mut(descr) {
        s.read_blocked_pid = Some(frame.pid);
    }
    Ok(Flow::Read {
        timeout: Some(secs),
    })
}

/// `i sleep`.
pub fn sleep(frame: &mut Frame) -> Result<Flow, MufError> {
    let secs = frame.pop_int()? as i64;
    if secs < 0 {
        return Err(MufError::Value("negative sleep".into()));
    }
    Ok(Flow::Sleep(secs))
}

pub fn concount(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let n = world.sessions.connected_count() as i32;
    frame.push(Value::Int(n))
}

/// `i condbref`: player bound to connection number i.
pub fn condbref(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let con = frame.pop_int()?;
    if con < 1 {
        return Err(MufError::Value("connection numbers start at 1".into()));
    }
    let player = world
        .sessions
        .descr_by_con(con as usize)
        .and_then(|d| world.sessions.get(d))
        .map(|s| s.player)
        .unwrap_or(NOTHING);
    frame.push(Value::Ref(player))
}

pub fn conidle(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let con = frame.pop_int()?;
    let idle = world
        .sessions
        .descr_by_con(con.max(1) as usize)
        .and_then(|d| world.sessions.get(d))
        .map(|s| s.idle_secs(machine.now))
        .unwrap_or(-1);
    frame.push(Value::Int(idle as i32))
}

pub fn contime(machine: &mut Machine, world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let con = frame.pop_int()?;
    let secs = world
        .sessions
        .descr_by_con(con.max(1) as usize)
        .and_then(|d| world.sessions.get(d))
        .map(|s| s.ontime_secs(machine.now))
        .unwrap_or(-1);
    frame.push(Value::Int(secs as i32))
}

pub fn descr(frame: &mut Frame) -> Result<(), MufError> {
    let d = frame.descr.map(|d| d as i32).unwrap_or(-1);
    frame.push(Value::Int(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use world::session::Session;
    use world::tune::Tunables;

    fn harness() -> (Machine, World, Frame) {
        let mut world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let (tx, rx) = unbounded_channel();
        std::mem::forget(rx);
        let mut s = Session::new(7, "localhost".into(), 100, tx);
        s.player = wiz;
        world.sessions.add(s);
        let mut frame = Frame::new(1, Dbref(1), wiz, Dbref(0), NOTHING, "");
        frame.descr = Some(7);
        (Machine::new(), world, frame)
    }

    #[test]
    fn read_parks_and_registers_the_hold() {
        let (_machine, mut world, mut frame) = harness();
        let flow = read(&mut world, &mut frame).unwrap();
        assert!(matches!(flow, Flow::Read { timeout: None }));
        assert_eq!(world.sessions.get(7).unwrap().read_blocked_pid, Some(1));
    }

    #[test]
    fn background_frames_may_not_read() {
        let (_machine, mut world, mut frame) = harness();
        frame.mode = Multitask::Background;
        assert!(matches!(
            read(&mut world, &mut frame),
            Err(MufError::Perm(_))
        ));
    }

    #[test]
    fn con_introspection() {
        let (mut machine, mut world, mut frame) = harness();
        machine.now = 130;
        concount(&mut world, &mut frame).unwrap();
        assert_eq!(frame.pop_int().unwrap(), 1);

        frame.push(Value::Int(1)).unwrap();
        condbref(&mut world, &mut frame).unwrap();
        let wiz = world.lookup_player("wizard").unwrap();
        assert_eq!(frame.pop().unwrap(), Value::Ref(wiz));

        frame.push(Value::Int(1)).unwrap();
        contime(&mut machine, &mut world, &mut frame).unwrap();
        assert_eq!(frame.pop_int().unwrap(), 30);
    }
}
