//! The time/event queue.
//!
//! Entries fire in (fire_time, enqueue_order) order. The queue holds
//! sleeping frames, delayed command text, and listener dispatches; the
//! scheduler drains what is due each pass and sleeps until the next
//! fire time otherwise.

use crate::frame::Frame;
use world::Dbref;

/// Shortest and longest accepted DELAY, in seconds (one year).
pub const DELAY_MIN: i64 = 1;
pub const DELAY_MAX: i64 = 31_622_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TqKind {
    /// A sleeping MUF frame resumes.
    MufTimer,
    /// Deferred command text re-enters the command path.
    MpiDelay,
    /// A listener propqueue program fires against a message.
    Listen,
    /// A timed action trigger.
    Trigger,
    /// A TREAD deadline: if the frame is still read-blocked when this
    /// fires, it resumes empty-handed.
    ReadTimeout,
}

#[derive(Debug)]
pub struct TqEntry {
    pub pid: i32,
    pub fire_at: i64,
    seq: u64,
    pub kind: TqKind,
    pub player: Dbref,
    pub trig: Dbref,
    /// Program to spawn, or NOTHING for plain command text.
    pub program: Dbref,
    pub command: Option<String>,
    pub frame: Option<Box<Frame>>,
    pub descr: Option<u32>,
}

#[derive(Debug, Default)]
pub struct TimeQueue {
    /// Kept sorted by (fire_at, seq).
    entries: Vec<TqEntry>,
    seq: u64,
}

impl TimeQueue {
    pub fn new() -> Self {
        TimeQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &mut self,
        pid: i32,
        fire_at: i64,
        kind: TqKind,
        player: Dbref,
        trig: Dbref,
        program: Dbref,
        command: Option<String>,
        frame: Option<Box<Frame>>,
        descr: Option<u32>,
    ) {
        let seq = self.seq;
        self.seq += 1;
        let entry = TqEntry {
            pid,
            fire_at,
            seq,
            kind,
            player,
            trig,
            program,
            command,
            frame,
            descr,
        };
        let at = self
            .entries
            .partition_point(|e| (e.fire_at, e.seq) <= (entry.fire_at, entry.seq));
        self.entries.insert(at, entry);
    }

    /// Earliest pending fire time.
    pub fn next_fire(&self) -> Option<i64> {
        self.entries.first().map(|e| e.fire_at)
    }

    /// Remove and return everything due at `now`, in firing order.
    pub fn pop_due(&mut self, now: i64) -> Vec<TqEntry> {
        let split = self.entries.partition_point(|e| e.fire_at <= now);
        self.entries.drain(..split).collect()
    }

    pub fn contains_pid(&self, pid: i32) -> bool {
        self.entries.iter().any(|e| e.pid == pid)
    }

    /// Cancel a queued entry, returning it (frame included) so the
    /// caller can release resources.
    pub fn remove_pid(&mut self, pid: i32) -> Option<TqEntry> {
        let idx = self.entries.iter().position(|e| e.pid == pid)?;
        Some(self.entries.remove(idx))
    }

    pub fn entries(&self) -> impl Iterator<Item = &TqEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::NOTHING;

    fn push(q: &mut TimeQueue, pid: i32, at: i64) {
        q.enqueue(pid, at, TqKind::MpiDelay, NOTHING, NOTHING, NOTHING, None, None, None);
    }

    #[test]
    fn fires_in_time_then_enqueue_order() {
        let mut q = TimeQueue::new();
        push(&mut q, 1, 50);
        push(&mut q, 2, 10);
        push(&mut q, 3, 10);
        push(&mut q, 4, 99);
        assert_eq!(q.next_fire(), Some(10));
        let due: Vec<i32> = q.pop_due(50).iter().map(|e| e.pid).collect();
        // same fire time preserves enqueue order
        assert_eq!(due, vec![2, 3, 1]);
        assert_eq!(q.next_fire(), Some(99));
    }

    #[test]
    fn kill_removes_the_entry() {
        let mut q = TimeQueue::new();
        push(&mut q, 7, 30);
        push(&mut q, 8, 40);
        assert!(q.contains_pid(7));
        let gone = q.remove_pid(7).unwrap();
        assert_eq!(gone.pid, 7);
        assert!(!q.contains_pid(7));
        assert!(q.remove_pid(7).is_none());
        assert_eq!(q.len(), 1);
    }
}
