//! Per-player ignore lists.
//!
//! The list is stored in a property and cached as a sorted dbref array
//! on the player's side data. Lookups are binary searches with a
//! last-positive-hit memo in front.

use crate::dbref::Dbref;
use crate::obj::{Arena, ObjType};
use crate::prop::{PropFlags, PropValue};
use crate::tune::Tunables;

/// Property holding the space-separated ignore list.
pub const IGNORE_PROP: &str = "IGNORE";

#[derive(Debug, Clone, Default)]
pub struct IgnoreCache {
    list: Option<Vec<Dbref>>,
    last: Option<Dbref>,
}

impl IgnoreCache {
    fn contains(&mut self, who: Dbref) -> bool {
        if self.last == Some(who) {
            return true;
        }
        let hit = self
            .list
            .as_ref()
            .is_some_and(|l| l.binary_search(&who).is_ok());
        if hit {
            self.last = Some(who);
        }
        hit
    }

    pub fn invalidate(&mut self) {
        self.list = None;
        self.last = None;
    }
}

fn parse_list(text: &str) -> Vec<Dbref> {
    let mut refs: Vec<Dbref> = text
        .split_whitespace()
        .filter_map(|tok| tok.trim_start_matches('#').parse::<i32>().ok())
        .map(Dbref)
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

/// Resolve to the owning player: things/zombies speak with their
/// owner's standing.
fn effective_player(arena: &Arena, d: Dbref) -> Dbref {
    match arena.get(d) {
        Ok(o) if o.kind() == ObjType::Player => d,
        Ok(o) => o.owner,
        Err(_) => d,
    }
}

fn ensure_loaded(arena: &mut Arena, player: Dbref) {
    let text = arena
        .get(player)
        .ok()
        .and_then(|o| match o.props.get_value(IGNORE_PROP) {
            Some(PropValue::Str(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default();
    if let Ok(obj) = arena.get_mut(player) {
        if let Some(p) = obj.player_data_mut() {
            if p.ignore.list.is_none() {
                p.ignore.list = Some(parse_list(&text));
            }
        }
    }
}

fn one_way(arena: &mut Arena, player: Dbref, who: Dbref) -> bool {
    ensure_loaded(arena, player);
    match arena.get_mut(player) {
        Ok(obj) => match obj.player_data_mut() {
            Some(p) => p.ignore.contains(who),
            None => false,
        },
        Err(_) => false,
    }
}

/// Is `who`'s output suppressed for `player`? Applies owner
/// resolution, the wizard exemption, and the bidirectional option.
pub fn is_ignoring(arena: &mut Arena, tune: &Tunables, player: Dbref, who: Dbref) -> bool {
    if !tune.ignore_support {
        return false;
    }
    let player = effective_player(arena, player);
    let who = effective_player(arena, who);
    if player == who {
        return false;
    }
    for d in [player, who] {
        if arena.get(d).map(|o| o.flags.is_wizard()).unwrap_or(false) {
            return false;
        }
    }
    one_way(arena, player, who) || (tune.ignore_bidirectional && one_way(arena, who, player))
}

/// Add `who` to `player`'s list, rewriting the property and dropping
/// the cache.
pub fn add(arena: &mut Arena, player: Dbref, who: Dbref) {
    let mut refs = current_list(arena, player);
    if !refs.contains(&who) {
        refs.push(who);
    }
    store_list(arena, player, &refs);
}

/// Remove `who` from `player`'s list.
pub fn remove(arena: &mut Arena, player: Dbref, who: Dbref) {
    let mut refs = current_list(arena, player);
    refs.retain(|d| *d != who);
    store_list(arena, player, &refs);
}

/// Drop one player's cache (their property changed).
pub fn flush_cache(arena: &mut Arena, player: Dbref) {
    if let Ok(obj) = arena.get_mut(player) {
        if let Some(p) = obj.player_data_mut() {
            p.ignore.invalidate();
        }
    }
}

/// Drop every cache, e.g. after a player deletion reshuffles dbrefs.
pub fn flush_all(arena: &mut Arena) {
    let players: Vec<Dbref> = arena
        .iter_live()
        .filter(|d| arena.get(*d).map(|o| o.kind() == ObjType::Player).unwrap_or(false))
        .collect();
    for p in players {
        flush_cache(arena, p);
    }
}

fn current_list(arena: &mut Arena, player: Dbref) -> Vec<Dbref> {
    arena
        .get(player)
        .ok()
        .and_then(|o| match o.props.get_value(IGNORE_PROP) {
            Some(PropValue::Str(s)) => Some(parse_list(s)),
            _ => None,
        })
        .unwrap_or_default()
}

fn store_list(arena: &mut Arena, player: Dbref, refs: &[Dbref]) {
    let text = refs
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    if let Ok(obj) = arena.get_mut(player) {
        let _ = obj.props.set(IGNORE_PROP, PropValue::Str(text), PropFlags::empty());
        if let Some(p) = obj.player_data_mut() {
            p.ignore.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::Flags;

    fn setup() -> (Arena, Tunables, Dbref, Dbref) {
        let mut arena = Arena::new();
        let a = arena.create(ObjType::Player, Dbref(0), "Alice");
        let b = arena.create(ObjType::Player, Dbref(1), "Bob");
        arena.get_mut(a).unwrap().owner = a;
        arena.get_mut(b).unwrap().owner = b;
        (arena, Tunables::default(), a, b)
    }

    #[test]
    fn ignore_is_bidirectional_when_tuned() {
        let (mut arena, mut tune, a, b) = setup();
        add(&mut arena, a, b);
        assert!(is_ignoring(&mut arena, &tune, a, b));
        assert!(is_ignoring(&mut arena, &tune, b, a));
        tune.ignore_bidirectional = false;
        assert!(is_ignoring(&mut arena, &tune, a, b));
        assert!(!is_ignoring(&mut arena, &tune, b, a));
    }

    #[test]
    fn wizards_are_never_ignored() {
        let (mut arena, tune, a, b) = setup();
        add(&mut arena, a, b);
        arena.get_mut(b).unwrap().flags |= Flags::WIZARD;
        assert!(!is_ignoring(&mut arena, &tune, a, b));
    }

    #[test]
    fn removal_invalidates_cache() {
        let (mut arena, tune, a, b) = setup();
        add(&mut arena, a, b);
        assert!(is_ignoring(&mut arena, &tune, a, b));
        remove(&mut arena, a, b);
        assert!(!is_ignoring(&mut arena, &tune, a, b));
    }

    #[test]
    fn zombie_resolves_to_owner() {
        let (mut arena, tune, a, b) = setup();
        let pet = arena.create(ObjType::Thing, b, "pet");
        add(&mut arena, a, b);
        assert!(is_ignoring(&mut arena, &tune, a, pet));
    }
}
