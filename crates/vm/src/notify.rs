//! The notification fabric: routing one line of text to players,
//! zombies, vehicles, and listener programs.

use crate::ansi;
use crate::event::TqKind;
use crate::interp::Machine;
use world::obj::{Flags, ObjType};
use world::prop::PropValue;
use world::{Dbref, NOTHING, World};

/// Zombie prefix override property.
const PECHO_PROP: &str = "_/pecho";
/// Vehicle prefix override property.
const OECHO_PROP: &str = "_/oecho";

const LISTEN_DIR: &str = "_listen";
const WLISTEN_DIR: &str = "~listen";
const OLISTEN_DIR: &str = "_olisten";

/// Queue one finished line to every descriptor of `player`, applying
/// the recipient's ANSI policy.
fn deliver_line(world: &mut World, player: Dbref, msg: &str) -> bool {
    let color = world
        .arena
        .get(player)
        .map(|o| o.flags.contains(Flags::COLOR))
        .unwrap_or(false);
    let text = if color {
        ansi::sanitize_ansi(msg)
    } else {
        ansi::strip_ansi(msg)
    };
    let line = format!("{}\r\n", text);
    let max = world.tune.max_output;
    let descrs = world.sessions.descrs_of(player);
    for d in &descrs {
        if let Some(s) = world.sessions.get_mut(*d) {
            s.queue_output(line.as_bytes(), max);
        }
    }
    !descrs.is_empty()
}

/// Plain delivery: players get the line on every descriptor; zombie
/// things relay to their owner with a name prefix, subject to the
/// suppression rules.
pub fn notify_nolisten(world: &mut World, player: Dbref, msg: &str, isprivate: bool) -> bool {
    let Ok(obj) = world.arena.get(player) else {
        return false;
    };
    match obj.kind() {
        ObjType::Player => deliver_line(world, player, msg),
        ObjType::Thing if obj.flags.contains(Flags::ZOMBIE) && world.tune.zombies => {
            let owner = obj.owner;
            let zloc = obj.location;
            let zname = obj.name.clone();
            let zdark = obj.flags.contains(Flags::DARK);
            if zdark {
                return false;
            }
            let Ok(owner_obj) = world.arena.get(owner) else {
                return false;
            };
            if owner_obj.flags.contains(Flags::DARK) {
                return false;
            }
            let owner_loc = owner_obj.location;
            // a room flagged ZOMBIE suppresses puppets inside it
            if world
                .arena
                .get(zloc)
                .map(|o| o.flags.contains(Flags::ZOMBIE))
                .unwrap_or(false)
            {
                return false;
            }
            // the owner already hears non-private traffic in the room
            if !isprivate && owner_loc == zloc {
                return false;
            }
            let prefix = match world.get_prop(player, PECHO_PROP) {
                Ok(Some(PropValue::Str(s))) if !s.is_empty() => s,
                _ => format!("{}> ", zname),
            };
            deliver_line(world, owner, &format!("{}{}", prefix, msg))
        }
        _ => false,
    }
}

/// Delivery with the ignore filter in front.
pub fn notify_filtered(
    world: &mut World,
    from: Dbref,
    player: Dbref,
    msg: &str,
    isprivate: bool,
) -> bool {
    let (arena, tune) = (&mut world.arena, &world.tune);
    if world::ignore::is_ignoring(arena, tune, player, from) {
        return false;
    }
    notify_nolisten(world, player, msg, isprivate)
}

fn prop_as_program(world: &mut World, obj: Dbref, path: &str) -> Option<Dbref> {
    match world.get_prop(obj, path).ok()? {
        Some(PropValue::Ref(d)) => Some(d),
        Some(PropValue::Str(s)) => s
            .trim()
            .trim_start_matches('#')
            .parse::<i32>()
            .ok()
            .map(Dbref),
        _ => None,
    }
}

/// Fire every program named in a propqueue directory against `msg`.
/// `xprog` is skipped to keep a listener from hearing itself. Also
/// used directly for the `_connect`/`_disconnect` queues.
pub fn propqueue(
    machine: &mut Machine,
    world: &mut World,
    player: Dbref,
    obj: Dbref,
    dir: &str,
    xprog: Dbref,
    msg: &str,
) {
    let mut candidates = Vec::new();
    if let Some(d) = prop_as_program(world, obj, dir) {
        candidates.push(d);
    }
    if let Ok(entries) = world.prop_dir_entries(obj, dir) {
        for name in entries {
            if let Some(d) = prop_as_program(world, obj, &format!("{}/{}", dir, name)) {
                candidates.push(d);
            }
        }
    }
    for prog in candidates {
        if prog == xprog || !world.arena.is_valid_object(prog) {
            continue;
        }
        if !matches!(world.arena.get(prog).map(|o| o.kind()), Ok(ObjType::Program)) {
            continue;
        }
        let pid = machine.next_pid();
        machine.tq.enqueue(
            pid,
            machine.now,
            TqKind::Listen,
            player,
            obj,
            prog,
            Some(msg.to_string()),
            None,
            None,
        );
    }
}

/// Run the LISTEN propqueues on `obj`, then deliver. `xprog` names
/// the program that produced the message, if any.
#[allow(clippy::too_many_arguments)]
pub fn notify_listeners(
    machine: &mut Machine,
    world: &mut World,
    who: Dbref,
    xprog: Dbref,
    obj: Dbref,
    _room: Dbref,
    msg: &str,
    isprivate: bool,
) -> bool {
    if world.tune.listeners {
        let listens_here = world.tune.listeners_obj
            || world
                .arena
                .get(obj)
                .map(|o| o.kind() == ObjType::Room)
                .unwrap_or(false);
        if listens_here {
            propqueue(machine, world, who, obj, LISTEN_DIR, xprog, msg);
            propqueue(machine, world, who, obj, WLISTEN_DIR, xprog, msg);
            if !isprivate {
                propqueue(machine, world, who, obj, OLISTEN_DIR, xprog, msg);
            }
        }
    }
    notify_filtered(world, who, obj, msg, isprivate)
}

/// Filtered delivery plus listener dispatch on the target and the
/// vehicle "Outside>" rebroadcast.
pub fn notify_from_echo(
    machine: &mut Machine,
    world: &mut World,
    from: Dbref,
    player: Dbref,
    msg: &str,
    isprivate: bool,
) -> bool {
    if world.tune.listeners {
        let listens = world.tune.listeners_obj
            || world
                .arena
                .get(player)
                .map(|o| o.kind() == ObjType::Room)
                .unwrap_or(false);
        if listens {
            propqueue(machine, world, from, player, LISTEN_DIR, NOTHING, msg);
            if !isprivate {
                propqueue(machine, world, from, player, OLISTEN_DIR, NOTHING, msg);
            }
        }
    }

    let is_vehicle = world
        .arena
        .get(player)
        .map(|o| o.kind() == ObjType::Thing && o.flags.contains(Flags::VEHICLE))
        .unwrap_or(false);
    if is_vehicle {
        let same_room = {
            let ploc = world.arena.get(player).map(|o| o.location).unwrap_or(NOTHING);
            let floc = world.arena.get(from).map(|o| o.location).unwrap_or(NOTHING);
            ploc == floc && ploc != NOTHING
        };
        if !(isprivate && same_room) {
            let prefix = match world.get_prop(player, OECHO_PROP) {
                Ok(Some(PropValue::Str(s))) if !s.is_empty() => s,
                _ => "Outside>".to_string(),
            };
            let inner: Vec<Dbref> = world.arena.contents_of(player).collect();
            let relayed = format!("{} {}", prefix, msg);
            for c in inner {
                if c != from {
                    notify_filtered(world, from, c, &relayed, isprivate);
                }
            }
        }
    }

    notify_filtered(world, from, player, msg, isprivate)
}

/// Everyone in a room except one object; the room itself (and its
/// environment, when tuned) also gets a listener pass.
pub fn notify_except(
    machine: &mut Machine,
    world: &mut World,
    room: Dbref,
    exception: Dbref,
    msg: &str,
    who: Dbref,
) {
    let members: Vec<Dbref> = world.arena.contents_of(room).collect();
    for m in members {
        if m != exception {
            notify_from_echo(machine, world, who, m, msg, false);
        }
    }
    if world.tune.listeners {
        propqueue(machine, world, who, room, LISTEN_DIR, NOTHING, msg);
        propqueue(machine, world, who, room, OLISTEN_DIR, NOTHING, msg);
        if world.tune.listeners_env {
            let mut cur = world.arena.get(room).map(|o| o.location).unwrap_or(NOTHING);
            let mut hops = 0;
            while cur.is_objref() && hops < world.arena.db_top() {
                propqueue(machine, world, who, cur, LISTEN_DIR, NOTHING, msg);
                cur = world.arena.get(cur).map(|o| o.location).unwrap_or(NOTHING);
                hops += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use world::session::{OutFrame, Session};
    use world::tune::Tunables;

    struct Harness {
        world: World,
        machine: Machine,
        wiz: Dbref,
        rx: tokio::sync::mpsc::UnboundedReceiver<OutFrame>,
    }

    fn harness() -> Harness {
        let mut world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let (tx, rx) = unbounded_channel();
        let mut s = Session::new(1, "localhost".into(), 0, tx);
        s.player = wiz;
        world.sessions.add(s);
        Harness {
            world,
            machine: Machine::new(),
            wiz,
            rx,
        }
    }

    fn drain(h: &mut Harness) -> String {
        h.world.sessions.get_mut(1).unwrap().flush_output();
        let mut out = String::new();
        while let Ok(OutFrame::Data(d)) = h.rx.try_recv() {
            out.push_str(&String::from_utf8_lossy(&d));
        }
        out
    }

    #[test]
    fn player_notification_strips_ansi_without_color_flag() {
        let mut h = harness();
        notify_nolisten(&mut h.world, h.wiz, "\x1b[31mhello\x1b[0m", false);
        let out = drain(&mut h);
        assert_eq!(out, "hello\r\n");
    }

    #[test]
    fn zombie_relays_to_owner_with_prefix() {
        let mut h = harness();
        let wiz = h.wiz;
        let den = h.world.arena.create(ObjType::Room, wiz, "Den");
        let pet = h.world.arena.create(ObjType::Thing, wiz, "Rover");
        h.world.arena.get_mut(pet).unwrap().flags |= Flags::ZOMBIE;
        h.world.arena.move_to(pet, den).unwrap();

        // owner elsewhere: relay happens
        assert!(notify_nolisten(&mut h.world, pet, "woof", false));
        assert_eq!(drain(&mut h), "Rover> woof\r\n");

        // owner in the same room hears the original instead
        h.world.arena.move_to(wiz, den).unwrap();
        assert!(!notify_nolisten(&mut h.world, pet, "woof", false));

        // private traffic still relays when co-located
        assert!(notify_nolisten(&mut h.world, pet, "psst", true));
        assert_eq!(drain(&mut h), "Rover> psst\r\n");
    }

    #[test]
    fn dark_zombie_is_suppressed() {
        let mut h = harness();
        let wiz = h.wiz;
        let pet = h.world.arena.create(ObjType::Thing, wiz, "Shade");
        h.world.arena.get_mut(pet).unwrap().flags |= Flags::ZOMBIE | Flags::DARK;
        assert!(!notify_nolisten(&mut h.world, pet, "boo", false));
        assert_eq!(drain(&mut h), "");
    }

    #[test]
    fn ignore_suppresses_both_directions_when_tuned() {
        let mut h = harness();
        let wiz = h.wiz;
        let bob = h.world.create_player("bob", "pw").unwrap();
        // wizards are exempt, so test between two mortals
        let amy = h.world.create_player("amy", "pw").unwrap();
        world::ignore::add(&mut h.world.arena, amy, bob);

        assert!(!notify_filtered(&mut h.world, bob, amy, "hi", false));
        assert!(!notify_filtered(&mut h.world, amy, bob, "hi", false));
        let _ = wiz;
    }

    #[test]
    fn vehicle_rebroadcasts_inside_with_prefix() {
        let mut h = harness();
        let wiz = h.wiz;
        let garage = h.world.arena.create(ObjType::Room, wiz, "Garage");
        let car = h.world.arena.create(ObjType::Thing, wiz, "Car");
        h.world.arena.get_mut(car).unwrap().flags |= Flags::VEHICLE;
        h.world.arena.move_to(car, garage).unwrap();
        // the wizard is riding inside
        h.world.arena.move_to(wiz, car).unwrap();

        let bob = h.world.create_player("bob", "pw").unwrap();
        h.world.arena.move_to(bob, garage).unwrap();

        notify_from_echo(&mut h.machine, &mut h.world, bob, car, "honk", false);
        let out = drain(&mut h);
        assert_eq!(out, "Outside> honk\r\n");
    }

    #[test]
    fn listener_propqueue_enqueues_program() {
        let mut h = harness();
        let wiz = h.wiz;
        let room = h.world.arena.create(ObjType::Room, wiz, "Stage");
        let prog = h.world.arena.create(ObjType::Program, wiz, "ear.muf");
        h.world
            .set_prop(
                room,
                "_listen/ear",
                PropValue::Ref(prog),
                world::prop::PropFlags::empty(),
            )
            .unwrap();
        notify_listeners(
            &mut h.machine,
            &mut h.world,
            wiz,
            NOTHING,
            room,
            room,
            "a noise",
            false,
        );
        assert_eq!(h.machine.tq.len(), 1);
        let entry = h.machine.tq.entries().next().unwrap();
        assert_eq!(entry.program, prog);
        assert_eq!(entry.command.as_deref(), Some("a noise"));
    }
}
