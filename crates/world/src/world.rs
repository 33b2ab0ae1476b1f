//! The single world value threaded through every component.
//!
//! Owns the arena, the tunables, the session table, and the optional
//! paging store. Property access from here is read-through: stubs are
//! materialized before the caller sees the tree.

use crate::dbref::{Dbref, GLOBAL_ENVIRONMENT, NOTHING};
use crate::error::Error;
use crate::hash::md5hex;
use crate::lock::Boolexp;
use crate::obj::{Arena, Flags, ObjType, Side};
use crate::pager::Pager;
use crate::prop::{PropFlags, PropPerms, PropValue};
use crate::session::Sessions;
use crate::tune::Tunables;
use std::collections::HashMap;

pub struct World {
    pub arena: Arena,
    pub tune: Tunables,
    pub sessions: Sessions,
    pub pager: Option<Pager>,
    players: HashMap<String, Dbref>,
}

impl World {
    /// A minimal fresh world: the environment room and the wizard.
    pub fn bootstrap(tune: Tunables) -> Self {
        let mut arena = Arena::new();
        let room = arena.create(ObjType::Room, Dbref(1), "Room Zero");
        debug_assert_eq!(room, GLOBAL_ENVIRONMENT);
        let wizard = arena.create(ObjType::Player, Dbref(1), "Wizard");
        {
            let obj = arena.get_mut(wizard).unwrap();
            obj.owner = wizard;
            obj.flags |= Flags::WIZARD;
            if let Some(p) = obj.player_data_mut() {
                p.home = room;
                p.password = md5hex(b"potrzebie");
            }
        }
        let mut world = World {
            arena,
            tune,
            sessions: Sessions::new(),
            pager: None,
            players: HashMap::new(),
        };
        world.players.insert("wizard".to_string(), wizard);
        let _ = world.arena.move_to(wizard, room);
        world
    }

    /// Wrap a loaded arena, rebuilding the player name index.
    pub fn from_snapshot(arena: Arena, pager: Option<Pager>, tune: Tunables) -> Self {
        let mut players = HashMap::new();
        for d in arena.iter_live() {
            if let Ok(obj) = arena.get(d) {
                if obj.kind() == ObjType::Player {
                    players.insert(obj.name.to_ascii_lowercase(), d);
                }
            }
        }
        World {
            arena,
            tune,
            sessions: Sessions::new(),
            pager,
            players,
        }
    }

    pub fn lookup_player(&self, name: &str) -> Option<Dbref> {
        self.players.get(&name.to_ascii_lowercase()).copied()
    }

    /// Does the first whitespace-delimited word of `name` collide with
    /// a player name? FORCE refuses such targets.
    pub fn first_word_is_player(&self, name: &str) -> bool {
        name.split_whitespace()
            .next()
            .and_then(|w| self.lookup_player(w))
            .is_some()
    }

    pub fn create_player(&mut self, name: &str, password: &str) -> Result<Dbref, Error> {
        if name.is_empty()
            || name.contains(char::is_whitespace)
            || self.lookup_player(name).is_some()
        {
            return Err(Error::PermDenied("that name is unavailable"));
        }
        let start = Dbref(self.tune.player_start);
        let d = self.arena.create(ObjType::Player, NOTHING, name);
        {
            let obj = self.arena.get_mut(d)?;
            obj.owner = d;
            if let Some(p) = obj.player_data_mut() {
                p.home = start;
                p.password = md5hex(password.as_bytes());
            }
        }
        self.arena.move_to(d, start)?;
        self.players.insert(name.to_ascii_lowercase(), d);
        Ok(d)
    }

    pub fn check_password(&self, player: Dbref, password: &str) -> bool {
        self.arena
            .get(player)
            .ok()
            .and_then(|o| o.player_data())
            .is_some_and(|p| p.password == md5hex(password.as_bytes()))
    }

    pub fn set_password(&mut self, player: Dbref, password: &str) -> Result<(), Error> {
        let obj = self.arena.get_mut(player)?;
        if let Some(p) = obj.player_data_mut() {
            p.password = md5hex(password.as_bytes());
        }
        Ok(())
    }

    /// Authenticate a login attempt.
    pub fn connect_player(&mut self, name: &str, password: &str) -> Option<Dbref> {
        let d = self.lookup_player(name)?;
        if self.check_password(d, password) {
            Some(d)
        } else {
            None
        }
    }

    pub fn destroy(&mut self, d: Dbref) -> Result<(), Error> {
        let was_player = self.arena.get(d)?.kind() == ObjType::Player;
        let name = self.arena.get(d)?.name.to_ascii_lowercase();
        self.arena.destroy(d)?;
        if was_player {
            self.players.remove(&name);
            crate::ignore::flush_all(&mut self.arena);
        }
        Ok(())
    }

    /// Owner-or-blessed permission context for property access.
    pub fn perms_for(&self, caller_owner: Dbref, target: Dbref, blessed: bool) -> PropPerms {
        let owner_ok = blessed
            || self
                .arena
                .get(target)
                .map(|o| o.owner == caller_owner)
                .unwrap_or(false);
        PropPerms {
            blessed,
            owner_ok,
        }
    }

    fn page_in(&mut self, d: Dbref, path: &str) -> Result<(), Error> {
        let obj = self.arena.get_mut(d)?;
        if let Some(pager) = self.pager.as_mut() {
            pager.fetch_into(d, &mut obj.props, path)?;
        } else if obj.props.unloaded_prefix(path).is_some() {
            return Err(Error::NoPageRecord {
                dbref: d,
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Value of a property, paging the path in as needed.
    pub fn get_prop(&mut self, d: Dbref, path: &str) -> Result<Option<PropValue>, Error> {
        self.page_in(d, path)?;
        Ok(self.arena.get(d)?.props.get_value(path).cloned())
    }

    pub fn get_prop_str(&mut self, d: Dbref, path: &str) -> Option<String> {
        match self.get_prop(d, path) {
            Ok(Some(PropValue::Str(s))) => Some(s),
            _ => None,
        }
    }

    pub fn set_prop(
        &mut self,
        d: Dbref,
        path: &str,
        value: PropValue,
        flags: PropFlags,
    ) -> Result<(), Error> {
        self.page_in(d, path)?;
        self.arena.get_mut(d)?.props.set(path, value, flags)
    }

    pub fn del_prop(&mut self, d: Dbref, path: &str) -> Result<bool, Error> {
        self.page_in(d, path)?;
        Ok(self.arena.get_mut(d)?.props.delete(path))
    }

    pub fn prop_dir_entries(&mut self, d: Dbref, dir: &str) -> Result<Vec<String>, Error> {
        self.page_in(d, dir)?;
        Ok(self.arena.get(d)?.props.dir_entries(dir))
    }

    /// Walk `d` and its location chain to the environment root, return
    /// the first object carrying `path`.
    pub fn envprop(&mut self, d: Dbref, path: &str) -> Result<Option<(Dbref, PropValue)>, Error> {
        let mut cur = d;
        let mut hops = 0;
        while cur.is_objref() && hops <= self.arena.db_top() {
            if let Some(v) = self.get_prop(cur, path)? {
                return Ok(Some((cur, v)));
            }
            cur = self.arena.get(cur)?.location;
            hops += 1;
        }
        Ok(None)
    }

    /// Resolve a lock-atom name for `uid`: `me`, `#n`, `*player`, a
    /// player name, or something in sight.
    pub fn resolve_lock_name(&self, uid: Dbref, name: &str) -> Dbref {
        if name.eq_ignore_ascii_case("me") {
            return uid;
        }
        if let Some(num) = name.strip_prefix('#') {
            if let Ok(n) = num.parse::<i32>() {
                let d = Dbref(n);
                if self.arena.is_valid_object(d) {
                    return d;
                }
                return NOTHING;
            }
        }
        if let Some(rest) = name.strip_prefix('*') {
            return self.lookup_player(rest).unwrap_or(NOTHING);
        }
        if let Some(d) = self.lookup_player(name) {
            return d;
        }
        // things in the player's hands or room
        let here = self.arena.get(uid).map(|o| o.location).unwrap_or(NOTHING);
        for container in [uid, here] {
            for d in self.arena.contents_of(container) {
                if let Ok(o) = self.arena.get(d) {
                    if o.display_name().eq_ignore_ascii_case(name) {
                        return d;
                    }
                }
            }
        }
        NOTHING
    }

    pub fn parse_lock(&self, uid: Dbref, text: &str) -> Result<Boolexp, Error> {
        let mut resolve = |name: &str| self.resolve_lock_name(uid, name);
        Boolexp::parse(text, &mut resolve)
    }

    /// Evaluate a lock against the current world state.
    pub fn eval_lock(&mut self, who: Dbref, expr: &Boolexp) -> bool {
        match expr {
            Boolexp::True => true,
            Boolexp::And(a, b) => self.eval_lock(who, a) && self.eval_lock(who, b),
            Boolexp::Or(a, b) => self.eval_lock(who, a) || self.eval_lock(who, b),
            Boolexp::Not(a) => !self.eval_lock(who, a),
            Boolexp::Const(d) => {
                let d = *d;
                if who == d {
                    return true;
                }
                let Ok(obj) = self.arena.get(who) else {
                    return false;
                };
                if obj.location == d || obj.owner == d {
                    return true;
                }
                self.arena.contents_of(who).any(|c| c == d)
            }
            Boolexp::Prop(name, value) => {
                let expr_name = name.clone();
                let want = value.clone();
                match self.envprop(who, &expr_name) {
                    Ok(Some((_, PropValue::Str(s)))) => s.eq_ignore_ascii_case(&want),
                    Ok(Some((_, PropValue::Int(n)))) => {
                        want.parse::<i32>().map(|w| w == n).unwrap_or(false)
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn unparse_lock(&self, expr: &Boolexp, fullnames: bool) -> String {
        expr.unparse(fullnames, &|d| {
            self.arena
                .get(d)
                .map(|o| o.name.clone())
                .unwrap_or_else(|_| "*INVALID*".to_string())
        })
    }

    /// Live unquelled wizards, for operator walls.
    pub fn wizards(&self) -> Vec<Dbref> {
        self.arena
            .iter_live()
            .filter(|d| {
                self.arena
                    .get(*d)
                    .map(|o| o.kind() == ObjType::Player && o.flags.is_wizard())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Effective owner used for permission decisions: things defer to
    /// their owner, players stand for themselves.
    pub fn effective_owner(&self, d: Dbref) -> Dbref {
        match self.arena.get(d) {
            Ok(o) if o.kind() == ObjType::Player => d,
            Ok(o) => o.owner,
            Err(_) => NOTHING,
        }
    }

    /// An exit's ordered destinations.
    pub fn exit_destinations(&self, d: Dbref) -> Vec<Dbref> {
        match self.arena.get(d) {
            Ok(o) => match &o.side {
                Side::Exit { destinations } => destinations.clone(),
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        World::bootstrap(Tunables::default())
    }

    #[test]
    fn bootstrap_has_wizard_in_room_zero() {
        let w = world();
        let wiz = w.lookup_player("WIZARD").unwrap();
        assert_eq!(w.arena.get(wiz).unwrap().location, GLOBAL_ENVIRONMENT);
        assert!(w.arena.get(wiz).unwrap().flags.is_wizard());
    }

    #[test]
    fn player_login_roundtrip() {
        let mut w = world();
        let d = w.create_player("bob", "sekrit").unwrap();
        assert_eq!(w.connect_player("Bob", "sekrit"), Some(d));
        assert_eq!(w.connect_player("bob", "wrong"), None);
        assert!(w.create_player("bob", "again").is_err());
    }

    #[test]
    fn envprop_walks_to_the_environment() {
        let mut w = world();
        let bob = w.create_player("bob", "pw").unwrap();
        w.set_prop(
            GLOBAL_ENVIRONMENT,
            "_say/format",
            PropValue::Str("%s says, \"%s\"".into()),
            PropFlags::empty(),
        )
        .unwrap();
        let (holder, v) = w.envprop(bob, "_say/format").unwrap().unwrap();
        assert_eq!(holder, GLOBAL_ENVIRONMENT);
        assert!(matches!(v, PropValue::Str(_)));
    }

    #[test]
    fn lock_compile_eval_unparse() {
        let mut w = world();
        let bob = w.create_player("bob", "pw").unwrap();
        let key = w.arena.create(ObjType::Thing, bob, "brass key");
        w.arena.move_to(key, bob).unwrap();

        let lock = w.parse_lock(bob, "brass key | *bob").unwrap();
        assert!(w.eval_lock(bob, &lock));

        let wiz = w.lookup_player("wizard").unwrap();
        // wizard neither carries the key nor is bob
        assert!(!w.eval_lock(wiz, &lock));

        let text = w.unparse_lock(&lock, false);
        assert_eq!(text, format!("({}|{})", key, bob));
    }

    #[test]
    fn force_name_guard_tokenizes_on_whitespace() {
        let mut w = world();
        w.create_player("bob", "pw").unwrap();
        assert!(w.first_word_is_player("bob the builder"));
        assert!(w.first_word_is_player("Bob"));
        assert!(!w.first_word_is_player("bobcat statue"));
    }
}
