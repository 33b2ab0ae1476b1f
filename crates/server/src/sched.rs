//! The dispatch loop.
//!
//! One task owns the world, the interpreter, and the session table.
//! Each pass: refresh quotas, fire due events, process at most one
//! command per session, grant every runnable frame its quantum, drain
//! output, reap booted sessions. Between passes it sleeps on the
//! event channel, the signal streams, and the next timer deadline,
//! never longer than ten seconds.

use crate::conn::NetEvent;
use crate::signals::{SignalEvent, Signals, reap_children};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use vm::frame::{Frame, Multitask};
use vm::interp::{Machine, QueuedCommand, RunOutcome};
use vm::notify;
use world::obj::{Flags, ObjType};
use world::pager::{self, SnapshotPaths};
use world::session::{Boot, Session};
use world::{Dbref, NOTHING, World};

/// Shared TLS acceptor slot; SIGHUP swaps in a reloaded one.
pub type SharedAcceptor = Rc<RefCell<Option<TlsAcceptor>>>;

pub struct ServerConfig {
    pub snapshot: SnapshotPaths,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub wizonly: bool,
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct GameServer {
    pub world: World,
    pub machine: Machine,
    rx: UnboundedReceiver<NetEvent>,
    signals: Signals,
    resolver_tx: Option<UnboundedSender<String>>,
    pending_resolves: HashMap<String, u32>,
    acceptor: SharedAcceptor,
    cfg: ServerConfig,
    dump_child: Option<libc::pid_t>,
    last_slice_ms: i64,
    last_dump: i64,
    started_at: i64,
    wizonly: bool,
    shutdown: bool,
}

impl GameServer {
    pub fn new(
        world: World,
        machine: Machine,
        rx: UnboundedReceiver<NetEvent>,
        signals: Signals,
        resolver_tx: Option<UnboundedSender<String>>,
        acceptor: SharedAcceptor,
        cfg: ServerConfig,
    ) -> Self {
        let wizonly = cfg.wizonly;
        GameServer {
            world,
            machine,
            rx,
            signals,
            resolver_tx,
            pending_resolves: HashMap::new(),
            acceptor,
            cfg,
            dump_child: None,
            last_slice_ms: now_millis(),
            last_dump: now_secs(),
            started_at: now_secs(),
            wizonly,
            shutdown: false,
        }
    }

    pub async fn run(mut self) -> i32 {
        info!("dispatch loop up");
        while !self.shutdown {
            let sleep_ms = self.sleep_budget_ms();
            tokio::select! {
                ev = self.rx.recv() => {
                    if let Some(ev) = ev {
                        self.handle_net(ev);
                    }
                    // drain whatever else arrived in the same wakeup
                    while let Ok(ev) = self.rx.try_recv() {
                        self.handle_net(ev);
                    }
                }
                sig = self.signals.recv() => self.handle_signal(sig),
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms as u64)) => {}
            }
            self.tick();
        }
        self.close_down()
    }

    /// Sleep no longer than 10s, the next timer, or the next quota
    /// slice boundary.
    fn sleep_budget_ms(&self) -> i64 {
        let mut ms: i64 = 10_000;
        if let Some(at) = self.machine.tq.next_fire() {
            ms = ms.min(((at - now_secs()).max(0)) * 1000);
        }
        let slice = self.world.tune.command_time_msec as i64;
        let since = now_millis() - self.last_slice_ms;
        ms = ms.min((slice - since).max(10));
        ms
    }

    fn handle_net(&mut self, ev: NetEvent) {
        match ev {
            NetEvent::Connected {
                descr,
                hostname,
                port,
                is_ssl,
                tx,
            } => {
                let now = now_secs();
                let key = format!("{}({})", hostname, port);
                let mut session = Session::new(descr, hostname, now, tx);
                session.is_ssl = is_ssl;
                self.world.sessions.add(session);
                if let Some(rtx) = &self.resolver_tx {
                    self.pending_resolves.insert(key.clone(), descr);
                    let _ = rtx.send(format!("{}{}", key, port));
                }
                self.offer_starttls(descr, is_ssl);
                self.welcome_user(descr);
            }
            NetEvent::Line { descr, line } => {
                let now = now_secs();
                let track_idle = !line.is_empty() || self.world.tune.recognize_null_command;
                if let Some(s) = self.world.sessions.get_mut(descr) {
                    if track_idle {
                        s.last_time = now;
                    }
                    if s.input.len() < 100 {
                        s.input.push_back(line);
                    }
                }
            }
            NetEvent::Break { descr } => {
                let pid = self
                    .world
                    .sessions
                    .get(descr)
                    .and_then(|s| s.read_blocked_pid);
                if let Some(pid) = pid {
                    self.machine.kill(&mut self.world, pid);
                    self.queue_line(descr, "Interrupted.");
                }
            }
            NetEvent::TelnetSeen { descr } => {
                if let Some(s) = self.world.sessions.get_mut(descr) {
                    s.telnet_enabled = true;
                }
            }
            NetEvent::StartTlsBegun { descr } => {
                if let Some(s) = self.world.sessions.get_mut(descr) {
                    s.block_writes = true;
                }
            }
            NetEvent::StartTlsDone { descr, ok } => {
                if let Some(s) = self.world.sessions.get_mut(descr) {
                    s.block_writes = false;
                    if ok {
                        s.is_ssl = true;
                    }
                }
            }
            NetEvent::ForwardedHost { descr, hostname } => {
                if let Some(s) = self.world.sessions.get_mut(descr) {
                    info!(descr, %hostname, "forwarded hostname accepted");
                    s.hostname = hostname;
                }
            }
            NetEvent::HostResolved {
                key,
                hostname,
                username,
            } => {
                if let Some(descr) = self.pending_resolves.remove(&key) {
                    if let Some(s) = self.world.sessions.get_mut(descr) {
                        s.hostname = hostname;
                        s.username = username;
                    }
                }
            }
            NetEvent::Gone { descr } => self.drop_session(descr),
        }
    }

    fn handle_signal(&mut self, sig: SignalEvent) {
        match sig {
            SignalEvent::Reconfigure => {
                info!("SIGHUP: reloading TLS certificates");
                if let (Some(cert), Some(key)) = (&self.cfg.certfile, &self.cfg.keyfile) {
                    match crate::tls::load_acceptor(cert, key) {
                        Ok(acc) => *self.acceptor.borrow_mut() = Some(acc),
                        Err(err) => error!(%err, "certificate reload failed; keeping old"),
                    }
                }
            }
            SignalEvent::DumpStatus => self.log_status(),
            SignalEvent::Emergency => {
                warn!("SIGUSR2: emergency shutdown");
                self.wall_and_flush("\nEmergency shutdown.\n");
                self.shutdown = true;
            }
            SignalEvent::Shutdown => {
                info!("shutdown signal");
                self.shutdown = true;
            }
            SignalEvent::ChildExited => {
                for (pid, code) in reap_children() {
                    if Some(pid) == self.dump_child {
                        self.dump_child = None;
                        if code == 0 {
                            info!("snapshot dump finished");
                            if self.world.tune.dumpdone_warning {
                                let msg = self.world.tune.dumpdone_mesg.clone();
                                self.wall_and_flush(&msg);
                            }
                        } else {
                            error!(code, "forked DB save process crashed");
                            self.wall_wizards(
                                "## WARNING: the forked DB save process crashed. The old snapshot is intact.",
                            );
                        }
                    } else {
                        // the resolver task reaps its own child through
                        // tokio; anything else here is unexpected
                        warn!(pid, code, "reaped unexpected child");
                    }
                }
            }
        }
    }

    fn log_status(&self) {
        let now = now_secs();
        info!(
            uptime_secs = now - self.started_at,
            sessions = self.world.sessions.len(),
            connected = self.world.sessions.connected_count(),
            queued_events = self.machine.tq.len(),
            runnable = self.machine.run_queue.len(),
            read_blocked = self.machine.read_blocked.len(),
            db_top = self.world.arena.db_top(),
            "status"
        );
    }

    /// One full dispatch pass.
    pub fn tick(&mut self) {
        let now = now_secs();
        self.machine.now = now;
        self.update_quotas();
        self.machine.fire_due(&mut self.world, now);
        self.run_pending_commands();
        self.process_inputs();
        self.run_frames();
        self.periodic(now);
        self.flush_outputs();
    }

    fn update_quotas(&mut self) {
        let now_ms = now_millis();
        let slice = self.world.tune.command_time_msec as i64;
        let nslices = (now_ms - self.last_slice_ms) / slice;
        if nslices <= 0 {
            return;
        }
        self.last_slice_ms += nslices * slice;
        let per_time = self.world.tune.commands_per_time;
        let burst = self.world.tune.command_burst_size;
        let interactive: Vec<u32> = self
            .world
            .sessions
            .iter()
            .filter(|s| {
                s.connected()
                    && self
                        .world
                        .arena
                        .get(s.player)
                        .map(|o| o.flags.contains(Flags::INTERACTIVE))
                        .unwrap_or(false)
            })
            .map(|s| s.descr)
            .collect();
        for s in self.world.sessions.iter_mut() {
            let rate = if interactive.contains(&s.descr) {
                per_time * 8
            } else {
                per_time
            };
            s.quota = (s.quota + rate * nslices as i32).min(burst);
        }
    }

    fn run_pending_commands(&mut self) {
        while let Some(qc) = self.machine.pending_commands.pop_front() {
            let QueuedCommand {
                player,
                descr,
                command,
                force_level,
            } = qc;
            let saved = self.machine.force_level;
            self.machine.force_level = force_level;
            self.process_command(descr, player, &command);
            self.machine.force_level = saved;
        }
    }

    fn process_inputs(&mut self) {
        for descr in self.world.sessions.descrs() {
            let Some(s) = self.world.sessions.get_mut(descr) else {
                continue;
            };
            if s.booted != Boot::Live || s.quota <= 0 || s.input.is_empty() {
                continue;
            }
            let line = s.input.pop_front().unwrap();
            s.quota -= 1;
            let player = s.player;
            let reading = s.read_blocked_pid.is_some();
            if reading {
                self.machine.deliver_read(&mut self.world, descr, &line);
            } else if player == NOTHING {
                self.check_connect(descr, &line);
            } else {
                self.process_command(Some(descr), player, &line);
            }
        }
    }

    fn run_frames(&mut self) {
        let runnable = self.machine.run_queue.len();
        for _ in 0..runnable {
            let Some(mut frame) = self.machine.run_queue.pop_front() else {
                break;
            };
            let budget = self.world.tune.instr_slice;
            let outcome = self.machine.run_slice(&mut self.world, &mut frame, budget);
            self.settle_frame(frame, outcome);
        }
    }

    fn settle_frame(&mut self, frame: Box<Frame>, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Done(_) => {
                self.machine.retire(&mut self.world, &frame);
            }
            RunOutcome::Yield => self.machine.run_queue.push_back(frame),
            RunOutcome::Sleep(secs) => {
                let pid = frame.pid;
                let player = frame.player;
                let trig = frame.trig;
                let program = frame.program;
                let descr = frame.descr;
                self.machine.tq.enqueue(
                    pid,
                    now_secs() + secs,
                    vm::event::TqKind::MufTimer,
                    player,
                    trig,
                    program,
                    None,
                    Some(frame),
                    descr,
                );
            }
            RunOutcome::BlockedRead { timeout } => {
                let Some(descr) = frame.descr else {
                    self.machine.retire(&mut self.world, &frame);
                    return;
                };
                if let Some(t) = timeout {
                    self.machine.tq.enqueue(
                        frame.pid,
                        now_secs() + t,
                        vm::event::TqKind::ReadTimeout,
                        frame.player,
                        frame.trig,
                        frame.program,
                        None,
                        None,
                        Some(descr),
                    );
                }
                self.machine.read_blocked.insert(descr, frame);
            }
            RunOutcome::Died(err) => {
                let player = frame.player;
                let program = frame.program;
                let pid = frame.pid;
                self.machine.retire(&mut self.world, &frame);
                warn!(pid, %program, %err, "frame died");
                notify::notify_nolisten(
                    &mut self.world,
                    player,
                    &format!("Program {} exited with error: {}", program, err),
                    true,
                );
                let wizmsg = format!(
                    "## PID {} in program {} aborted: {}",
                    pid, program, err
                );
                self.wall_wizards(&wizmsg);
            }
        }
    }

    fn periodic(&mut self, now: i64) {
        // welcome-screen loiterers
        let connidle = self.world.tune.connidle as i64;
        let idleboot = self.world.tune.idleboot;
        let maxidle = self.world.tune.maxidle as i64;
        let ping_enable = self.world.tune.idle_ping_enable;
        let ping_after = self.world.tune.idle_ping_time as i64;
        let idle_mesg = self.world.tune.idle_mesg.clone();

        let mut to_idleboot = Vec::new();
        let mut to_connboot = Vec::new();
        let mut to_ping = Vec::new();
        for s in self.world.sessions.iter() {
            if s.booted != Boot::Live {
                continue;
            }
            if !s.connected() {
                if now - s.connected_at > connidle {
                    to_connboot.push(s.descr);
                }
                continue;
            }
            let wizard = self
                .world
                .arena
                .get(s.player)
                .map(|o| o.flags.is_wizard())
                .unwrap_or(false);
            if idleboot && maxidle > 0 && s.idle_secs(now) > maxidle && !wizard {
                to_idleboot.push(s.descr);
            } else if ping_enable && now - s.last_pinged_at > ping_after {
                to_ping.push((s.descr, s.player));
            }
        }
        for descr in to_connboot {
            self.queue_line(descr, "Login timed out.");
            self.boot(descr, false);
        }
        for descr in to_idleboot {
            self.queue_line(descr, &idle_mesg);
            self.boot(descr, true);
        }
        for (descr, player) in to_ping {
            let suppressed = self
                .world
                .get_prop(player, "_no_idle_ping")
                .ok()
                .flatten()
                .is_some();
            if let Some(s) = self.world.sessions.get_mut(descr) {
                s.last_pinged_at = now;
                if !suppressed {
                    if s.telnet_enabled {
                        s.queue_priority(&[crate::telnet::IAC, crate::telnet::NOP]);
                    } else {
                        s.queue_priority(b"");
                    }
                }
            }
        }

        // scheduled snapshot
        let interval = self.world.tune.dump_interval as i64;
        if interval > 0 && now - self.last_dump >= interval {
            self.start_dump();
        }
    }

    fn flush_outputs(&mut self) {
        let mut closed = Vec::new();
        for s in self.world.sessions.iter_mut() {
            s.flush_output();
            if s.booted != Boot::Live {
                s.send_close();
                closed.push(s.descr);
            }
        }
        for descr in closed {
            self.drop_session(descr);
        }
    }

    /// Mark a session for dropping; `farewell` adds the goodbye text.
    fn boot(&mut self, descr: u32, farewell: bool) {
        let leave = self.world.tune.leave_mesg.clone();
        if let Some(s) = self.world.sessions.get_mut(descr) {
            if farewell {
                let max = self.world.tune.max_output;
                s.queue_output(format!("{}\r\n", leave).as_bytes(), max);
                s.booted = Boot::DropWithFarewell;
            } else {
                s.booted = Boot::Drop;
            }
        }
    }

    fn drop_session(&mut self, descr: u32) {
        // frames reading from this descriptor die with it
        if let Some(frame) = self.machine.read_blocked.remove(&descr) {
            self.machine.retire(&mut self.world, &frame);
        }
        let Some(session) = self.world.sessions.remove(descr) else {
            return;
        };
        if session.connected() {
            self.announce_disconnect(descr, session.player);
        }
    }

    pub fn wall_and_flush(&mut self, msg: &str) {
        let max = self.world.tune.max_output;
        let line = format!("{}\r\n", msg);
        for s in self.world.sessions.iter_mut() {
            s.queue_output(line.as_bytes(), max);
            s.flush_output();
        }
    }

    pub fn wall_wizards(&mut self, msg: &str) {
        let wizards: Vec<Dbref> = self.world.wizards();
        let max = self.world.tune.max_output;
        let line = format!("{}\r\n", msg);
        let descrs: Vec<u32> = self
            .world
            .sessions
            .iter()
            .filter(|s| wizards.contains(&s.player))
            .map(|s| s.descr)
            .collect();
        for d in descrs {
            if let Some(s) = self.world.sessions.get_mut(d) {
                s.queue_output(line.as_bytes(), max);
                s.flush_output();
            }
        }
    }

    fn queue_line(&mut self, descr: u32, msg: &str) {
        let max = self.world.tune.max_output;
        if let Some(s) = self.world.sessions.get_mut(descr) {
            s.queue_output(format!("{}\r\n", msg).as_bytes(), max);
        }
    }

    fn offer_starttls(&mut self, descr: u32, is_ssl: bool) {
        if is_ssl || !self.world.tune.starttls_allow || self.acceptor.borrow().is_none() {
            return;
        }
        if let Some(s) = self.world.sessions.get_mut(descr) {
            s.queue_priority(&[
                crate::telnet::IAC,
                crate::telnet::DO,
                crate::telnet::TELOPT_STARTTLS,
            ]);
        }
    }

    fn welcome_user(&mut self, descr: u32) {
        let mut lines: Vec<String> = Vec::new();
        // numbered banner props override the welcome file
        if let Ok(names) = self.world.prop_dir_entries(Dbref(0), "@/welcome#") {
            let mut numbered: Vec<(i32, String)> = names
                .iter()
                .filter_map(|n| n.parse::<i32>().ok().map(|i| (i, n.clone())))
                .collect();
            numbered.sort();
            for (_, name) in numbered {
                if let Some(text) = self
                    .world
                    .get_prop_str(Dbref(0), &format!("@/welcome#/{}", name))
                {
                    lines.push(text);
                }
            }
        }
        if lines.is_empty() {
            let path = self.world.tune.file_welcome_screen.clone();
            match std::fs::read_to_string(&path) {
                Ok(text) => lines.extend(text.lines().map(|l| l.to_string())),
                Err(_) => {
                    lines.push("Welcome to the world.".to_string());
                    lines.push("To connect: connect <name> <password>".to_string());
                    lines.push("To create:  cr <name> <password>".to_string());
                }
            }
        }
        for line in lines {
            self.queue_line(descr, &line);
        }
    }

    /// Unauthenticated input: `connect`/`cr`/`help`/`WHO`/`quit`, with
    /// the first two characters of the command word significant.
    fn check_connect(&mut self, descr: u32, line: &str) {
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
        let user = parts.next().unwrap_or("").to_string();
        let pass = parts.next().unwrap_or("").to_string();

        if cmd.starts_with("co") && !cmd.is_empty() {
            match self.world.connect_player(&user, &pass) {
                Some(player) => self.login(descr, player),
                None => {
                    info!("FAILED CONNECT {} on descriptor {}", user, descr);
                    self.queue_line(
                        descr,
                        "Either that player does not exist, or has a different password.",
                    );
                }
            }
        } else if cmd.starts_with("cr") {
            if !self.world.tune.registration {
                self.queue_line(descr, "Sorry, character creation is disabled.");
                return;
            }
            match self.world.create_player(&user, &pass) {
                Ok(player) => {
                    info!("CREATED {}({}) on descriptor {}", user, player, descr);
                    self.login(descr, player);
                }
                Err(_) => {
                    self.queue_line(descr, "Either there is already a player with that name, or that name is illegal.");
                }
            }
        } else if cmd.starts_with("he") {
            self.queue_line(descr, "To connect: connect <name> <password>");
            self.queue_line(descr, "To create:  cr <name> <password>");
        } else if line.trim().eq_ignore_ascii_case("who") {
            self.dump_users(descr);
        } else if line.trim().eq_ignore_ascii_case("quit") {
            self.boot(descr, true);
        } else if !line.trim().is_empty() {
            self.welcome_user(descr);
        }
    }

    fn login(&mut self, descr: u32, player: Dbref) {
        if self.wizonly
            && !self
                .world
                .arena
                .get(player)
                .map(|o| o.flags.is_wizard())
                .unwrap_or(false)
        {
            self.queue_line(descr, "Sorry, but the game is in maintenance mode currently, and only wizards are allowed to connect.  Try again later.");
            return;
        }
        let name = self
            .world
            .arena
            .get(player)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        info!("CONNECTED {}({}) on descriptor {}", name, player, descr);
        if let Some(s) = self.world.sessions.get_mut(descr) {
            s.player = player;
        }
        if let Ok(obj) = self.world.arena.get_mut(player) {
            obj.flags.remove(Flags::INTERACTIVE | Flags::READMODE);
            if let Some(p) = obj.player_data_mut() {
                p.descrs.push(descr);
            }
        }
        self.announce_connect(descr, player);
    }

    fn announce_connect(&mut self, descr: u32, player: Dbref) {
        let name = self
            .world
            .arena
            .get(player)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        let room = self
            .world
            .arena
            .get(player)
            .map(|o| o.location)
            .unwrap_or(NOTHING);
        if room.is_objref() {
            notify::notify_except(
                &mut self.machine,
                &mut self.world,
                room,
                player,
                &format!("{} has connected.", name),
                player,
            );
        }
        for (obj, dir) in [(player, "_connect"), (room, "_oconnect")] {
            if obj.is_objref() {
                notify::propqueue(
                    &mut self.machine,
                    &mut self.world,
                    player,
                    obj,
                    dir,
                    NOTHING,
                    "Connect",
                );
            }
        }
        let _ = descr;
    }

    fn announce_disconnect(&mut self, descr: u32, player: Dbref) {
        if let Ok(obj) = self.world.arena.get_mut(player) {
            if let Some(p) = obj.player_data_mut() {
                p.descrs.retain(|d| *d != descr);
            }
        }
        let name = self
            .world
            .arena
            .get(player)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        let room = self
            .world
            .arena
            .get(player)
            .map(|o| o.location)
            .unwrap_or(NOTHING);
        if room.is_objref() {
            notify::notify_except(
                &mut self.machine,
                &mut self.world,
                room,
                player,
                &format!("{} has disconnected.", name),
                player,
            );
        }
        for (obj, dir) in [(player, "_disconnect"), (room, "_odisconnect")] {
            if obj.is_objref() {
                notify::propqueue(
                    &mut self.machine,
                    &mut self.world,
                    player,
                    obj,
                    dir,
                    NOTHING,
                    "Disconnect",
                );
            }
        }
    }

    fn dump_users(&mut self, descr: u32) {
        let now = now_secs();
        let mut lines = vec![format!("{:<24}{:>10}{:>8}", "Player Name", "On For", "Idle")];
        let rows: Vec<(String, i64, i64)> = self
            .world
            .sessions
            .iter()
            .filter(|s| s.connected())
            .map(|s| {
                let name = self
                    .world
                    .arena
                    .get(s.player)
                    .map(|o| o.name.clone())
                    .unwrap_or_default();
                (name, s.ontime_secs(now), s.idle_secs(now))
            })
            .collect();
        let count = rows.len();
        for (name, on, idle) in rows {
            lines.push(format!(
                "{:<24}{:>7}:{:02}{:>7}s",
                name,
                on / 60,
                on % 60,
                idle
            ));
        }
        lines.push(format!("{} players are connected.", count));
        for l in lines {
            self.queue_line(descr, &l);
        }
    }

    /// One typed (or forced, or delayed) command line.
    pub fn process_command(&mut self, descr: Option<u32>, player: Dbref, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let lower = line.to_ascii_lowercase();

        if lower == "quit" {
            if let Some(d) = descr {
                self.boot(d, true);
            }
            return;
        }
        if lower == "who" {
            if let Some(d) = descr {
                self.dump_users(d);
            }
            return;
        }
        if let Some(rest) = line.strip_prefix('"') {
            self.do_say(player, rest);
            return;
        }
        if lower.starts_with("say ") {
            self.do_say(player, line[4..].trim_start());
            return;
        }
        if let Some(rest) = line.strip_prefix(':') {
            self.do_pose(player, rest);
            return;
        }
        if lower.starts_with("pose ") {
            self.do_pose(player, line[5..].trim_start());
            return;
        }
        if lower == "@shutdown" {
            if self.is_wizard(player) {
                info!(%player, "@shutdown");
                self.wall_and_flush("Going down - Bye");
                self.shutdown = true;
            } else {
                self.notify(player, "Only a Wizard may do that.");
            }
            return;
        }
        if lower == "@dump" {
            if self.is_wizard(player) {
                self.start_dump();
                self.notify(player, "Dumping...");
            } else {
                self.notify(player, "Only a Wizard may do that.");
            }
            return;
        }

        if self.try_exit(descr, player, line) {
            return;
        }
        let huh = self.world.tune.huh_mesg.clone();
        self.notify(player, &huh);
    }

    fn is_wizard(&self, player: Dbref) -> bool {
        self.world
            .arena
            .get(player)
            .map(|o| o.flags.is_wizard())
            .unwrap_or(false)
    }

    fn notify(&mut self, player: Dbref, msg: &str) {
        notify::notify_nolisten(&mut self.world, player, msg, true);
    }

    fn do_say(&mut self, player: Dbref, what: &str) {
        let name = self
            .world
            .arena
            .get(player)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        let room = self
            .world
            .arena
            .get(player)
            .map(|o| o.location)
            .unwrap_or(NOTHING);
        self.notify(player, &format!("You say, \"{}\"", what));
        if room.is_objref() {
            notify::notify_except(
                &mut self.machine,
                &mut self.world,
                room,
                player,
                &format!("{} says, \"{}\"", name, what),
                player,
            );
        }
    }

    fn do_pose(&mut self, player: Dbref, what: &str) {
        let name = self
            .world
            .arena
            .get(player)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        let room = self
            .world
            .arena
            .get(player)
            .map(|o| o.location)
            .unwrap_or(NOTHING);
        if room.is_objref() {
            notify::notify_except(
                &mut self.machine,
                &mut self.world,
                room,
                player,
                &format!("{} {}", name, what),
                NOTHING,
            );
        }
    }

    /// Match the command word against exits here and up the
    /// environment; triggers move the player or start a program.
    fn try_exit(&mut self, descr: Option<u32>, player: Dbref, line: &str) -> bool {
        let word = line.split_whitespace().next().unwrap_or("");
        let mut room = self
            .world
            .arena
            .get(player)
            .map(|o| o.location)
            .unwrap_or(NOTHING);
        let mut hops = 0;
        while room.is_objref() && hops <= self.world.arena.db_top() {
            let exits: Vec<Dbref> = self.world.arena.exits_of(room).collect();
            for exit in exits {
                let Ok(obj) = self.world.arena.get(exit) else {
                    continue;
                };
                let matched = obj
                    .name
                    .split(world::obj::EXIT_DELIMITER)
                    .any(|alias| alias.trim().eq_ignore_ascii_case(word));
                if !matched {
                    continue;
                }
                let dests = self.world.exit_destinations(exit);
                return self.fire_exit(descr, player, exit, &dests, line);
            }
            room = self
                .world
                .arena
                .get(room)
                .map(|o| o.location)
                .unwrap_or(NOTHING);
            hops += 1;
        }
        false
    }

    fn fire_exit(
        &mut self,
        descr: Option<u32>,
        player: Dbref,
        exit: Dbref,
        dests: &[Dbref],
        line: &str,
    ) -> bool {
        for dest in dests {
            match self.world.arena.get(*dest).map(|o| o.kind()) {
                Ok(ObjType::Room) => {
                    if self.world.arena.move_to(player, *dest).is_ok() {
                        let name = self
                            .world
                            .arena
                            .get(*dest)
                            .map(|o| o.name.clone())
                            .unwrap_or_default();
                        self.notify(player, &name);
                    }
                    return true;
                }
                Ok(ObjType::Program) => {
                    match self.machine.spawn(
                        &mut self.world,
                        *dest,
                        player,
                        exit,
                        line,
                        Multitask::Foreground,
                        descr,
                    ) {
                        Ok(_) => {}
                        Err(err) => {
                            let msg = format!("Program error: {}", err);
                            self.notify(player, &msg);
                        }
                    }
                    return true;
                }
                _ => continue,
            }
        }
        self.notify(player, "You can't go that way.");
        true
    }

    pub fn start_dump(&mut self) {
        if self.dump_child.is_some() {
            return;
        }
        self.last_dump = now_secs();
        let dumping = self.world.tune.dumping_mesg.clone();
        if self.world.tune.dumpdone_warning {
            self.wall_and_flush(&dumping);
        }
        match pager::dump_forked(&self.world.arena, self.world.pager.as_ref(), &self.cfg.snapshot)
        {
            Ok(pid) => {
                info!(pid, "forked snapshot dump");
                self.dump_child = Some(pid);
            }
            Err(err) => {
                error!(%err, "could not fork the dumper");
                self.wall_wizards("## WARNING: could not fork a DB save process.");
            }
        }
    }

    #[cfg(test)]
    pub fn inject(&mut self, ev: NetEvent) {
        self.handle_net(ev);
    }

    /// Final synchronous save and goodbye.
    fn close_down(&mut self) -> i32 {
        self.wall_and_flush("Server shutting down. Goodbye.");
        let descrs = self.world.sessions.descrs();
        for d in descrs {
            if let Some(s) = self.world.sessions.get_mut(d) {
                s.flush_output();
                s.send_close();
            }
        }
        match pager::write_snapshot(
            &self.world.arena,
            self.world.pager.as_ref(),
            &self.cfg.snapshot,
        ) {
            Ok(()) => {
                info!("final snapshot saved");
                crate::cli::exit::OK
            }
            Err(err) => {
                error!(%err, "final snapshot failed");
                crate::cli::exit::PANIC
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use world::session::OutFrame;
    use world::tune::Tunables;

    struct Harness {
        srv: GameServer,
        rx: UnboundedReceiver<OutFrame>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotPaths::inline(&dir.path().join("world.db"));
        let (_net_tx, net_rx) = unbounded_channel();
        let signals = Signals::install().unwrap();
        let mut tune = Tunables::default();
        // keep the quota clock still so tests control tokens exactly
        tune.command_time_msec = 3_600_000;
        let world = World::bootstrap(tune);
        let mut srv = GameServer::new(
            world,
            Machine::new(),
            net_rx,
            signals,
            None,
            Rc::new(RefCell::new(None)),
            ServerConfig {
                snapshot,
                certfile: None,
                keyfile: None,
                wizonly: false,
            },
        );
        let (tx, rx) = unbounded_channel();
        srv.inject(NetEvent::Connected {
            descr: 1,
            hostname: "localhost".into(),
            port: 4201,
            is_ssl: false,
            tx,
        });
        Harness { srv, rx, _dir: dir }
    }

    fn drain(h: &mut Harness) -> String {
        if let Some(s) = h.srv.world.sessions.get_mut(1) {
            s.flush_output();
        }
        let mut out = String::new();
        while let Ok(frame) = h.rx.try_recv() {
            if let OutFrame::Data(d) = frame {
                out.push_str(&String::from_utf8_lossy(&d));
            }
        }
        out
    }

    #[tokio::test]
    async fn failed_logins_cost_quota_but_never_lock_out() {
        let mut h = harness().await;
        drain(&mut h);
        h.srv.world.sessions.get_mut(1).unwrap().quota = 5;
        for _ in 0..5 {
            h.srv.inject(NetEvent::Line {
                descr: 1,
                line: "connect bob wrongpass".into(),
            });
        }
        for _ in 0..5 {
            h.srv.tick();
        }
        let s = h.srv.world.sessions.get(1).unwrap();
        assert_eq!(s.quota, 0);
        assert_eq!(s.booted, Boot::Live);
        assert!(!s.connected());
        let out = drain(&mut h);
        assert_eq!(out.matches("different password").count(), 5);

        // starved sessions keep their input queued until tokens return
        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "connect bob wrongpass".into(),
        });
        h.srv.tick();
        assert_eq!(h.srv.world.sessions.get(1).unwrap().input.len(), 1);
    }

    #[tokio::test]
    async fn login_updates_descriptor_bookkeeping() {
        let mut h = harness().await;
        h.srv.world.sessions.get_mut(1).unwrap().quota = 5;
        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "connect Wizard potrzebie".into(),
        });
        h.srv.tick();

        let wiz = h.srv.world.lookup_player("wizard").unwrap();
        assert_eq!(h.srv.world.sessions.get(1).unwrap().player, wiz);
        // the player's descriptor list mirrors the session table
        let descrs = h
            .srv
            .world
            .arena
            .get(wiz)
            .unwrap()
            .player_data()
            .unwrap()
            .descrs
            .clone();
        assert_eq!(descrs, vec![1]);
        assert_eq!(h.srv.world.sessions.descrs_of(wiz), vec![1]);

        h.srv.inject(NetEvent::Gone { descr: 1 });
        let descrs = h
            .srv
            .world
            .arena
            .get(wiz)
            .unwrap()
            .player_data()
            .unwrap()
            .descrs
            .clone();
        assert!(descrs.is_empty());
        assert!(h.srv.world.sessions.get(1).is_none());
    }

    #[tokio::test]
    async fn commands_route_say_and_huh() {
        let mut h = harness().await;
        h.srv.world.sessions.get_mut(1).unwrap().quota = 10;
        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "connect Wizard potrzebie".into(),
        });
        h.srv.tick();
        drain(&mut h);

        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "\"hello there".into(),
        });
        h.srv.tick();
        let out = drain(&mut h);
        assert!(out.contains("You say, \"hello there\""));

        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "frobnicate".into(),
        });
        h.srv.tick();
        let out = drain(&mut h);
        assert!(out.contains("Huh?"));
    }

    #[tokio::test]
    async fn welcome_timeout_boots_the_descriptor() {
        let mut h = harness().await;
        drain(&mut h);
        // pretend the session has been idle at the banner for too long
        {
            let s = h.srv.world.sessions.get_mut(1).unwrap();
            s.connected_at -= 301;
        }
        h.srv.tick();
        let out = drain(&mut h);
        assert!(out.contains("Login timed out."));
    }

    #[tokio::test]
    async fn muf_read_receives_typed_line() {
        use vm::program::{CodeImage, Inst, Prim};
        let mut h = harness().await;
        h.srv.world.sessions.get_mut(1).unwrap().quota = 10;
        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "connect Wizard potrzebie".into(),
        });
        h.srv.tick();
        drain(&mut h);

        let wiz = h.srv.world.lookup_player("wizard").unwrap();
        let prog = h
            .srv
            .world
            .arena
            .create(world::obj::ObjType::Program, wiz, "echo.muf");
        h.srv.machine.programs.load(
            prog,
            CodeImage::new(vec![
                Inst::Prim(Prim::Read),
                Inst::Push(vm::Value::Ref(wiz)),
                Inst::Prim(Prim::Swap),
                Inst::Prim(Prim::Notify),
            ]),
        );
        h.srv
            .machine
            .spawn(
                &mut h.srv.world,
                prog,
                wiz,
                NOTHING,
                "",
                Multitask::Foreground,
                Some(1),
            )
            .unwrap();
        h.srv.tick();
        // the frame is parked on the descriptor now
        assert_eq!(
            h.srv.world.sessions.get(1).unwrap().read_blocked_pid.is_some(),
            true
        );
        h.srv.inject(NetEvent::Line {
            descr: 1,
            line: "marco".into(),
        });
        h.srv.tick();
        h.srv.tick();
        let out = drain(&mut h);
        assert!(out.contains("marco"), "got: {out:?}");
    }
}
