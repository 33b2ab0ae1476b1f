//! The object arena: a dbref-indexed table of heterogeneous objects.
//!
//! Objects form a graph through intrusive dbref chains: `contents` and
//! `exits` head per-container lists, `next` threads siblings. Destroyed
//! objects become GARBAGE and their dbrefs are recycled.

use crate::dbref::{Dbref, NOTHING};
use crate::error::Error;
use crate::ignore::IgnoreCache;
use crate::prop::PropTree;

/// Separator for exit name aliases ("out;o;leave").
pub const EXIT_DELIMITER: char = ';';

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct Flags: u32 {
        const DARK        = 0x0000_0001;
        const LINK_OK     = 0x0000_0002;
        const STICKY      = 0x0000_0004;
        const BUILDER     = 0x0000_0008;
        const CHOWN_OK    = 0x0000_0010;
        const JUMP_OK     = 0x0000_0020;
        const HAVEN       = 0x0000_0040;
        const ABODE       = 0x0000_0080;
        const WIZARD      = 0x0000_0100;
        const QUELL       = 0x0000_0200;
        const MUCKER      = 0x0000_0400;
        const SMUCKER     = 0x0000_0800;
        const INTERACTIVE = 0x0000_1000;
        const READMODE    = 0x0000_2000;
        const ZOMBIE      = 0x0000_4000;
        const VEHICLE     = 0x0000_8000;
        const XFORCIBLE   = 0x0001_0000;
        const LISTENER    = 0x0002_0000;
        const COLOR       = 0x0004_0000;
    }
}

impl Flags {
    /// Effective MUCKER level 0-4 from the flag bits.
    pub fn mucker_level(self) -> i32 {
        if self.contains(Flags::WIZARD) && !self.contains(Flags::QUELL) {
            4
        } else {
            match (self.contains(Flags::SMUCKER), self.contains(Flags::MUCKER)) {
                (false, false) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (true, true) => 3,
            }
        }
    }

    pub fn is_wizard(self) -> bool {
        self.contains(Flags::WIZARD) && !self.contains(Flags::QUELL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ObjType {
    Room,
    Thing,
    Exit,
    Player,
    Program,
    Garbage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PlayerData {
    pub home: Dbref,
    /// Hex digest of the password; never the cleartext.
    pub password: String,
    /// Live descriptor ids, mirrored from the connection manager.
    #[serde(skip)]
    pub descrs: Vec<u32>,
    #[serde(skip)]
    pub ignore: IgnoreCache,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgramData {
    /// Running frames referencing this program. Destruction is refused
    /// while nonzero.
    #[serde(skip)]
    pub instances: u32,
}

/// Per-type side data.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Room { dropto: Dbref },
    Thing { home: Dbref, value: i32 },
    Exit { destinations: Vec<Dbref> },
    Player(PlayerData),
    Program(ProgramData),
    Garbage,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Object {
    pub name: String,
    pub location: Dbref,
    pub contents: Dbref,
    pub next: Dbref,
    pub exits: Dbref,
    pub owner: Dbref,
    pub flags: Flags,
    pub side: Side,
    pub props: PropTree,
    /// Set on every persistent mutation; cleared by the snapshot walk.
    #[serde(skip)]
    pub dirty: bool,
}

impl Object {
    pub fn kind(&self) -> ObjType {
        match self.side {
            Side::Room { .. } => ObjType::Room,
            Side::Thing { .. } => ObjType::Thing,
            Side::Exit { .. } => ObjType::Exit,
            Side::Player(_) => ObjType::Player,
            Side::Program(_) => ObjType::Program,
            Side::Garbage => ObjType::Garbage,
        }
    }

    pub fn is_garbage(&self) -> bool {
        matches!(self.side, Side::Garbage)
    }

    pub fn player_data(&self) -> Option<&PlayerData> {
        match &self.side {
            Side::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn player_data_mut(&mut self) -> Option<&mut PlayerData> {
        match &mut self.side {
            Side::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn program_data(&self) -> Option<&ProgramData> {
        match &self.side {
            Side::Program(p) => Some(p),
            _ => None,
        }
    }

    pub fn program_data_mut(&mut self) -> Option<&mut ProgramData> {
        match &mut self.side {
            Side::Program(p) => Some(p),
            _ => None,
        }
    }

    /// First name of an exit's alias list, or the whole name otherwise.
    pub fn display_name(&self) -> &str {
        match self.kind() {
            ObjType::Exit => self.name.split(EXIT_DELIMITER).next().unwrap_or(&self.name),
            _ => &self.name,
        }
    }
}

fn blank_side(kind: ObjType) -> Side {
    match kind {
        ObjType::Room => Side::Room { dropto: NOTHING },
        ObjType::Thing => Side::Thing { home: NOTHING, value: 0 },
        ObjType::Exit => Side::Exit { destinations: Vec::new() },
        ObjType::Player => Side::Player(PlayerData::default()),
        ObjType::Program => Side::Program(ProgramData::default()),
        ObjType::Garbage => Side::Garbage,
    }
}

/// The arena itself. Index = dbref; slots are never removed, only
/// recycled through the free list.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Arena {
    entries: Vec<Object>,
    free: Vec<Dbref>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    /// One past the highest dbref ever allocated.
    pub fn db_top(&self) -> i32 {
        self.entries.len() as i32
    }

    /// A dbref that names a live (non-garbage) object.
    pub fn is_valid_object(&self, d: Dbref) -> bool {
        d.is_objref()
            && (d.0 as usize) < self.entries.len()
            && !self.entries[d.0 as usize].is_garbage()
    }

    pub fn get(&self, d: Dbref) -> Result<&Object, Error> {
        if !d.is_objref() || d.0 as usize >= self.entries.len() {
            return Err(Error::NoSuchObject(d));
        }
        Ok(&self.entries[d.0 as usize])
    }

    pub fn get_mut(&mut self, d: Dbref) -> Result<&mut Object, Error> {
        if !d.is_objref() || d.0 as usize >= self.entries.len() {
            return Err(Error::NoSuchObject(d));
        }
        self.entries[d.0 as usize].dirty = true;
        Ok(&mut self.entries[d.0 as usize])
    }

    /// Allocate a fresh object. Recycles the lowest freed dbref first.
    pub fn create(&mut self, kind: ObjType, owner: Dbref, name: &str) -> Dbref {
        let obj = Object {
            name: name.to_string(),
            location: NOTHING,
            contents: NOTHING,
            next: NOTHING,
            exits: NOTHING,
            owner,
            flags: Flags::empty(),
            side: blank_side(kind),
            props: PropTree::new(),
            dirty: true,
        };
        match self.free.pop() {
            Some(d) => {
                self.entries[d.0 as usize] = obj;
                d
            }
            None => {
                self.entries.push(obj);
                Dbref(self.db_top() - 1)
            }
        }
    }

    /// Unlink `child` from its location's contents chain, if present.
    fn detach_contents(&mut self, child: Dbref) -> Result<(), Error> {
        let loc = self.get(child)?.location;
        if !loc.is_objref() {
            return Ok(());
        }
        let first = self.get(loc)?.contents;
        if first == child {
            let next = self.get(child)?.next;
            self.get_mut(loc)?.contents = next;
        } else {
            let mut cur = first;
            while cur.is_objref() {
                let cur_next = self.get(cur)?.next;
                if cur_next == child {
                    let skip = self.get(child)?.next;
                    self.get_mut(cur)?.next = skip;
                    break;
                }
                cur = cur_next;
            }
        }
        let obj = self.get_mut(child)?;
        obj.next = NOTHING;
        obj.location = NOTHING;
        Ok(())
    }

    fn detach_exit(&mut self, exit: Dbref) -> Result<(), Error> {
        let loc = self.get(exit)?.location;
        if !loc.is_objref() {
            return Ok(());
        }
        let first = self.get(loc)?.exits;
        if first == exit {
            let next = self.get(exit)?.next;
            self.get_mut(loc)?.exits = next;
        } else {
            let mut cur = first;
            while cur.is_objref() {
                let cur_next = self.get(cur)?.next;
                if cur_next == exit {
                    let skip = self.get(exit)?.next;
                    self.get_mut(cur)?.next = skip;
                    break;
                }
                cur = cur_next;
            }
        }
        let obj = self.get_mut(exit)?;
        obj.next = NOTHING;
        obj.location = NOTHING;
        Ok(())
    }

    /// Would placing `child` inside `dest` close a containment loop?
    fn parent_loop(&self, child: Dbref, dest: Dbref) -> bool {
        let mut cur = dest;
        let mut hops = 0;
        while cur.is_objref() && hops <= self.db_top() {
            if cur == child {
                return true;
            }
            cur = match self.get(cur) {
                Ok(o) => o.location,
                Err(_) => return false,
            };
            hops += 1;
        }
        false
    }

    /// Move an object into a new container (contents chain). Exits use
    /// `attach_exit` instead.
    pub fn move_to(&mut self, child: Dbref, dest: Dbref) -> Result<(), Error> {
        if dest.is_objref() && self.parent_loop(child, dest) {
            return Err(Error::ContainmentLoop { child, dest });
        }
        if self.get(child)?.kind() == ObjType::Exit {
            self.detach_exit(child)?;
        } else {
            self.detach_contents(child)?;
        }
        if dest.is_objref() {
            let head = self.get(dest)?.contents;
            {
                let obj = self.get_mut(child)?;
                obj.next = head;
                obj.location = dest;
            }
            self.get_mut(dest)?.contents = child;
        }
        Ok(())
    }

    /// Hang an exit on a container's exits chain.
    pub fn attach_exit(&mut self, exit: Dbref, container: Dbref) -> Result<(), Error> {
        self.detach_exit(exit)?;
        let head = self.get(container)?.exits;
        {
            let obj = self.get_mut(exit)?;
            obj.next = head;
            obj.location = container;
        }
        self.get_mut(container)?.exits = exit;
        Ok(())
    }

    /// Recycle an object. Running programs are protected; everything
    /// else is unlinked and marked GARBAGE.
    pub fn destroy(&mut self, d: Dbref) -> Result<(), Error> {
        {
            let obj = self.get(d)?;
            if obj.is_garbage() {
                return Err(Error::Garbage(d));
            }
            if let Side::Program(p) = &obj.side {
                if p.instances > 0 {
                    return Err(Error::ProgramBusy(d));
                }
            }
        }
        if self.get(d)?.kind() == ObjType::Exit {
            self.detach_exit(d)?;
        } else {
            self.detach_contents(d)?;
        }
        // evict any remaining contents to nowhere; callers relocate
        // them beforehand if they care
        let mut cur = self.get(d)?.contents;
        while cur.is_objref() {
            let next = self.get(cur)?.next;
            let obj = self.get_mut(cur)?;
            obj.location = NOTHING;
            obj.next = NOTHING;
            cur = next;
        }
        let obj = self.get_mut(d)?;
        obj.name.clear();
        obj.contents = NOTHING;
        obj.exits = NOTHING;
        obj.owner = NOTHING;
        obj.flags = Flags::empty();
        obj.side = Side::Garbage;
        obj.props = PropTree::new();
        self.free.push(d);
        self.free.sort_by(|a, b| b.cmp(a));
        Ok(())
    }

    /// Dbrefs in a container's contents chain, in list order.
    pub fn contents_of(&self, container: Dbref) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: self.get(container).map(|o| o.contents).unwrap_or(NOTHING),
        }
    }

    /// Dbrefs in a container's exits chain, in list order.
    pub fn exits_of(&self, container: Dbref) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: self.get(container).map(|o| o.exits).unwrap_or(NOTHING),
        }
    }

    /// All live dbrefs, ascending.
    pub fn iter_live(&self) -> impl Iterator<Item = Dbref> + '_ {
        (0..self.db_top())
            .map(Dbref)
            .filter(|d| self.is_valid_object(*d))
    }
}

pub struct ChainIter<'a> {
    arena: &'a Arena,
    cur: Dbref,
}

impl Iterator for ChainIter<'_> {
    type Item = Dbref;

    fn next(&mut self) -> Option<Dbref> {
        if !self.cur.is_objref() {
            return None;
        }
        let here = self.cur;
        self.cur = self.arena.get(here).map(|o| o.next).unwrap_or(NOTHING);
        Some(here)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_room() -> (Arena, Dbref) {
        let mut a = Arena::new();
        let room = a.create(ObjType::Room, Dbref(1), "Limbo");
        (a, room)
    }

    #[test]
    fn contents_chain_holds_each_child_once() {
        let (mut a, room) = world_with_room();
        let t1 = a.create(ObjType::Thing, Dbref(1), "rock");
        let t2 = a.create(ObjType::Thing, Dbref(1), "stick");
        a.move_to(t1, room).unwrap();
        a.move_to(t2, room).unwrap();
        // most recent move lands at the front
        assert_eq!(a.contents_of(room).collect::<Vec<_>>(), vec![t2, t1]);
        // re-moving does not duplicate
        a.move_to(t1, room).unwrap();
        assert_eq!(a.contents_of(room).collect::<Vec<_>>(), vec![t1, t2]);
    }

    #[test]
    fn move_rejects_containment_loop() {
        let (mut a, room) = world_with_room();
        let bag = a.create(ObjType::Thing, Dbref(1), "bag");
        let box_ = a.create(ObjType::Thing, Dbref(1), "box");
        a.move_to(bag, room).unwrap();
        a.move_to(box_, bag).unwrap();
        let err = a.move_to(bag, box_).unwrap_err();
        assert!(matches!(err, Error::ContainmentLoop { .. }));
        // moving an object into itself is the degenerate loop
        assert!(a.move_to(bag, bag).is_err());
    }

    #[test]
    fn destroy_recycles_dbrefs() {
        let (mut a, room) = world_with_room();
        let t = a.create(ObjType::Thing, Dbref(1), "junk");
        a.move_to(t, room).unwrap();
        a.destroy(t).unwrap();
        assert!(!a.is_valid_object(t));
        assert!(a.contents_of(room).next().is_none());
        // garbage slots are reused before the arena grows
        let again = a.create(ObjType::Thing, Dbref(1), "new");
        assert_eq!(again, t);
        assert_eq!(a.db_top(), 2);
    }

    #[test]
    fn running_program_cannot_be_destroyed() {
        let mut a = Arena::new();
        let prog = a.create(ObjType::Program, Dbref(1), "daemon.muf");
        a.get_mut(prog).unwrap().program_data_mut().unwrap().instances = 1;
        assert!(matches!(a.destroy(prog), Err(Error::ProgramBusy(_))));
        a.get_mut(prog).unwrap().program_data_mut().unwrap().instances = 0;
        a.destroy(prog).unwrap();
    }

    #[test]
    fn exits_use_their_own_chain() {
        let (mut a, room) = world_with_room();
        let e1 = a.create(ObjType::Exit, Dbref(1), "out;o");
        let e2 = a.create(ObjType::Exit, Dbref(1), "up");
        a.attach_exit(e1, room).unwrap();
        a.attach_exit(e2, room).unwrap();
        assert_eq!(a.exits_of(room).collect::<Vec<_>>(), vec![e2, e1]);
        assert!(a.contents_of(room).next().is_none());
        assert_eq!(a.get(e1).unwrap().display_name(), "out");
    }

    #[test]
    fn mucker_levels_from_flags() {
        assert_eq!(Flags::empty().mucker_level(), 0);
        assert_eq!(Flags::SMUCKER.mucker_level(), 1);
        assert_eq!(Flags::MUCKER.mucker_level(), 2);
        assert_eq!((Flags::MUCKER | Flags::SMUCKER).mucker_level(), 3);
        assert_eq!(Flags::WIZARD.mucker_level(), 4);
        assert_eq!((Flags::WIZARD | Flags::QUELL).mucker_level(), 0);
    }
}
