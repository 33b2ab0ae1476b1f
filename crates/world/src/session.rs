//! World-side session bookkeeping.
//!
//! The connection manager owns sockets; this table owns everything the
//! game logic needs to know about them: who is logged in, queued
//! command lines, buffered output, and command-rate quota. One entry
//! per live descriptor, in accept order (which is also dispatch order).

use crate::dbref::{Dbref, NOTHING};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;

/// Marker left behind when over-quota output is dropped.
pub const FLUSHED_MESSAGE: &str = "<Output Flushed>\r\n";

/// Frames handed to a connection's writer task.
#[derive(Debug)]
pub enum OutFrame {
    Data(Vec<u8>),
    /// Flush what has been written and drop the connection.
    Close,
}

/// Boot level: 0 live, 1 drop after flush, 2 farewell then drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    Live,
    Drop,
    DropWithFarewell,
}

#[derive(Debug)]
pub struct Session {
    /// Descriptor id, unique for the server's lifetime.
    pub descr: u32,
    /// Connected player, or NOTHING at the welcome screen.
    pub player: Dbref,
    pub hostname: String,
    pub username: String,
    pub connected_at: i64,
    pub last_time: i64,
    pub last_pinged_at: i64,
    /// Command tokens remaining in the current burst.
    pub quota: i32,
    pub booted: Boot,
    pub is_ssl: bool,
    pub telnet_enabled: bool,
    /// Writes held back while a STARTTLS handshake is in flight.
    pub block_writes: bool,
    /// Pid of a MUF frame blocked in READ on this descriptor.
    pub read_blocked_pid: Option<i32>,
    /// Complete command lines awaiting dispatch.
    pub input: VecDeque<String>,
    priority_output: VecDeque<Vec<u8>>,
    output: VecDeque<Vec<u8>>,
    output_size: usize,
    tx: UnboundedSender<OutFrame>,
}

impl Session {
    pub fn new(descr: u32, hostname: String, now: i64, tx: UnboundedSender<OutFrame>) -> Self {
        Session {
            descr,
            player: NOTHING,
            hostname,
            username: String::new(),
            connected_at: now,
            last_time: now,
            last_pinged_at: now,
            quota: 0,
            booted: Boot::Live,
            is_ssl: false,
            telnet_enabled: false,
            block_writes: false,
            read_blocked_pid: None,
            input: VecDeque::new(),
            priority_output: VecDeque::new(),
            output: VecDeque::new(),
            output_size: 0,
            tx,
        }
    }

    pub fn connected(&self) -> bool {
        self.player != NOTHING
    }

    /// Seconds this session has been idle at `now`.
    pub fn idle_secs(&self, now: i64) -> i64 {
        now - self.last_time
    }

    pub fn ontime_secs(&self, now: i64) -> i64 {
        now - self.connected_at
    }

    /// Queue ordinary output, dropping from the front when the buffer
    /// would exceed `max_output`. A single flush marker is kept at the
    /// head so the player knows something went missing.
    pub fn queue_output(&mut self, bytes: &[u8], max_output: usize) {
        if bytes.is_empty() {
            return;
        }
        let limit = max_output.saturating_sub(bytes.len());
        if self.output_size > limit {
            let mut freed = 0usize;
            while self.output_size.saturating_sub(freed) > limit {
                match self.output.pop_front() {
                    Some(block) => freed += block.len(),
                    None => break,
                }
            }
            self.output_size -= freed;
            self.output.push_front(FLUSHED_MESSAGE.as_bytes().to_vec());
            self.output_size += FLUSHED_MESSAGE.len();
        }
        self.output_size += bytes.len();
        self.output.push_back(bytes.to_vec());
    }

    /// Queue telnet control traffic; never clamped, always flushed
    /// ahead of ordinary output.
    pub fn queue_priority(&mut self, bytes: &[u8]) {
        self.priority_output.push_back(bytes.to_vec());
    }

    pub fn has_output(&self) -> bool {
        !self.priority_output.is_empty() || (!self.block_writes && !self.output.is_empty())
    }

    /// Push queued output to the writer task: priority first, ordinary
    /// only when writes are not blocked.
    pub fn flush_output(&mut self) {
        while let Some(block) = self.priority_output.pop_front() {
            let _ = self.tx.send(OutFrame::Data(block));
        }
        if self.block_writes {
            return;
        }
        while let Some(block) = self.output.pop_front() {
            self.output_size -= block.len();
            let _ = self.tx.send(OutFrame::Data(block));
        }
    }

    /// Ask the writer task to close after what has already been sent.
    pub fn send_close(&self) {
        let _ = self.tx.send(OutFrame::Close);
    }

    #[cfg(test)]
    fn buffered(&self) -> Vec<u8> {
        let mut all = Vec::new();
        for b in &self.priority_output {
            all.extend_from_slice(b);
        }
        for b in &self.output {
            all.extend_from_slice(b);
        }
        all
    }
}

#[derive(Debug, Default)]
pub struct Sessions {
    list: Vec<Session>,
}

impl Sessions {
    pub fn new() -> Self {
        Sessions::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn add(&mut self, s: Session) {
        self.list.push(s);
    }

    pub fn remove(&mut self, descr: u32) -> Option<Session> {
        let idx = self.list.iter().position(|s| s.descr == descr)?;
        Some(self.list.remove(idx))
    }

    pub fn get(&self, descr: u32) -> Option<&Session> {
        self.list.iter().find(|s| s.descr == descr)
    }

    pub fn get_mut(&mut self, descr: u32) -> Option<&mut Session> {
        self.list.iter_mut().find(|s| s.descr == descr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.list.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.list.iter_mut()
    }

    pub fn descrs(&self) -> Vec<u32> {
        self.list.iter().map(|s| s.descr).collect()
    }

    /// Descriptors bound to `player`, in accept order.
    pub fn descrs_of(&self, player: Dbref) -> Vec<u32> {
        self.list
            .iter()
            .filter(|s| s.player == player)
            .map(|s| s.descr)
            .collect()
    }

    /// Count of connected (logged-in) sessions.
    pub fn connected_count(&self) -> usize {
        self.list.iter().filter(|s| s.connected()).count()
    }

    /// MUF's stable 1-based connection number for a descriptor.
    pub fn con_number_of(&self, descr: u32) -> Option<usize> {
        self.list
            .iter()
            .filter(|s| s.connected())
            .position(|s| s.descr == descr)
            .map(|i| i + 1)
    }

    /// Inverse of `con_number_of`.
    pub fn descr_by_con(&self, con: usize) -> Option<u32> {
        self.list
            .iter()
            .filter(|s| s.connected())
            .nth(con.checked_sub(1)?)
            .map(|s| s.descr)
    }
}
