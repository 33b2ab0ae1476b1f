//! The bytecode dispatch loop and the process table around it.
//!
//! Frames run cooperatively: each scheduling pass grants a quantum of
//! instructions, and only READ, TREAD, SLEEP, and normal exit leave
//! the loop early. Recoverable aborts unwind to the nearest armed TRY;
//! everything else kills the frame.

use crate::error::MufError;
use crate::event::{TimeQueue, TqEntry, TqKind};
use crate::frame::{Frame, FrameState, Multitask, TryNode};
use crate::prims;
use crate::program::{CodeImage, Inst, ProgramRegistry};
use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use world::obj::ObjType;
use world::{Dbref, NOTHING, World};

/// What a primitive tells the dispatch loop to do next.
pub enum Flow {
    Cont,
    /// The frame switched programs; refetch the image.
    Switch,
    Read { timeout: Option<i64> },
    Sleep(i64),
    Done,
}

/// Why `run_slice` returned.
#[derive(Debug)]
pub enum RunOutcome {
    /// Normal exit; carries the top of stack if any.
    Done(Option<Value>),
    /// Quantum exhausted; reschedule.
    Yield,
    /// Parked on descriptor input (TREAD deadline included when set).
    BlockedRead { timeout: Option<i64> },
    /// SLEEP for this many seconds.
    Sleep(i64),
    /// Unrecoverable or uncaught error; the frame is dead.
    Died(MufError),
}

/// A command the interpreter wants run as if a player typed it
/// (FORCE targets and fired MPI delays).
#[derive(Debug)]
pub struct QueuedCommand {
    pub player: Dbref,
    pub descr: Option<u32>,
    pub command: String,
    pub force_level: i32,
}

pub struct Machine {
    pub programs: ProgramRegistry,
    pub tq: TimeQueue,
    pub run_queue: VecDeque<Box<Frame>>,
    /// READ-parked frames, keyed by descriptor.
    pub read_blocked: HashMap<u32, Box<Frame>>,
    /// Commands awaiting the server's command path.
    pub pending_commands: VecDeque<QueuedCommand>,
    /// Depth of the FORCE chain currently executing.
    pub force_level: i32,
    /// Wall-clock seconds, refreshed by the dispatch loop each pass.
    pub now: i64,
    next_pid: i32,
}

impl Machine {
    pub fn new() -> Self {
        Machine {
            programs: ProgramRegistry::default(),
            tq: TimeQueue::new(),
            run_queue: VecDeque::new(),
            read_blocked: HashMap::new(),
            pending_commands: VecDeque::new(),
            force_level: 0,
            now: 0,
            next_pid: 1,
        }
    }

    pub fn next_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1).max(1);
        pid
    }

    fn image(&self, prog: Dbref) -> Result<Rc<CodeImage>, MufError> {
        self.programs.get(prog).ok_or(MufError::NoProgram(prog))
    }

    /// Start a program as a new READY frame.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        world: &mut World,
        program: Dbref,
        player: Dbref,
        trig: Dbref,
        cmd: &str,
        mode: Multitask,
        descr: Option<u32>,
    ) -> Result<i32, MufError> {
        let obj = world.arena.get(program)?;
        if obj.kind() != ObjType::Program {
            return Err(MufError::InvalidObject(program));
        }
        if !self.programs.is_loaded(program) {
            return Err(MufError::NoProgram(program));
        }
        let mlev = obj.flags.mucker_level();
        let loc = world.arena.get(player).map(|o| o.location).unwrap_or(NOTHING);
        let pid = self.next_pid();
        let mut frame = Frame::spawn(pid, program, player, loc, trig, cmd, mode, descr);
        frame.mlev = mlev;
        frame.blessed = mlev >= 4;
        self.bump_instances(world, program, 1);
        self.run_queue.push_back(frame);
        Ok(pid)
    }

    fn bump_instances(&self, world: &mut World, program: Dbref, delta: i32) {
        if let Ok(obj) = world.arena.get_mut(program) {
            if let Some(p) = obj.program_data_mut() {
                p.instances = (p.instances as i32 + delta).max(0) as u32;
            }
        }
    }

    /// Release a finished or killed frame's hold on its program.
    pub fn retire(&self, world: &mut World, frame: &Frame) {
        self.bump_instances(world, frame.program, -1);
    }

    /// Does a pid exist anywhere: runnable, sleeping, or read-parked?
    pub fn pid_exists(&self, pid: i32) -> bool {
        self.run_queue.iter().any(|f| f.pid == pid)
            || self.tq.contains_pid(pid)
            || self.read_blocked.values().any(|f| f.pid == pid)
    }

    /// Kill a process anywhere in the table. Read-parked frames also
    /// release their descriptor's read hold.
    pub fn kill(&mut self, world: &mut World, pid: i32) -> bool {
        if let Some(idx) = self.run_queue.iter().position(|f| f.pid == pid) {
            let frame = self.run_queue.remove(idx).unwrap();
            self.retire(world, &frame);
            return true;
        }
        if let Some(entry) = self.tq.remove_pid(pid) {
            if let Some(frame) = entry.frame {
                self.retire(world, &frame);
            }
            // a TREAD deadline may leave its twin parked on the descriptor
            if entry.kind == TqKind::ReadTimeout {
                self.release_read_hold(world, pid);
            }
            return true;
        }
        self.release_read_hold(world, pid)
    }

    fn release_read_hold(&mut self, world: &mut World, pid: i32) -> bool {
        let descr = self
            .read_blocked
            .iter()
            .find(|(_, f)| f.pid == pid)
            .map(|(d, _)| *d);
        match descr {
            Some(d) => {
                if let Some(frame) = self.read_blocked.remove(&d) {
                    self.retire(world, &frame);
                }
                if let Some(s) = world.sessions.get_mut(d) {
                    s.read_blocked_pid = None;
                }
                true
            }
            None => false,
        }
    }

    /// Hand a complete input line to a frame blocked in READ.
    pub fn deliver_read(&mut self, world: &mut World, descr: u32, line: &str) -> bool {
        let Some(mut frame) = self.read_blocked.remove(&descr) else {
            return false;
        };
        let pid = frame.pid;
        if let Some(s) = world.sessions.get_mut(descr) {
            s.read_blocked_pid = None;
        }
        let tread = self
            .tq
            .remove_pid(pid)
            .map(|e| e.kind == TqKind::ReadTimeout)
            .unwrap_or(false);
        let _ = frame.push(Value::str(line));
        if tread {
            let _ = frame.push(Value::Int(1));
        }
        frame.state = FrameState::Ready;
        self.run_queue.push_back(frame);
        true
    }

    /// Move everything due at `now` onto the runnable structures.
    pub fn fire_due(&mut self, world: &mut World, now: i64) {
        for entry in self.tq.pop_due(now) {
            self.fire_entry(world, entry);
        }
    }

    fn fire_entry(&mut self, world: &mut World, entry: TqEntry) {
        match entry.kind {
            TqKind::MufTimer => {
                if let Some(mut frame) = entry.frame {
                    frame.state = FrameState::Ready;
                    self.run_queue.push_back(frame);
                }
            }
            TqKind::ReadTimeout => {
                // resume empty-handed if the line never came
                let descr = entry.descr.unwrap_or(0);
                if let Some(mut frame) = self.read_blocked.remove(&descr) {
                    if let Some(s) = world.sessions.get_mut(descr) {
                        s.read_blocked_pid = None;
                    }
                    let _ = frame.push(Value::str(""));
                    let _ = frame.push(Value::Int(0));
                    frame.state = FrameState::Ready;
                    self.run_queue.push_back(frame);
                }
            }
            TqKind::MpiDelay => {
                if let Some(command) = entry.command {
                    self.pending_commands.push_back(QueuedCommand {
                        player: entry.player,
                        descr: entry.descr,
                        command,
                        force_level: 0,
                    });
                }
            }
            TqKind::Listen | TqKind::Trigger => {
                let cmd = entry.command.unwrap_or_default();
                let _ = self.spawn(
                    world,
                    entry.program,
                    entry.player,
                    entry.trig,
                    &cmd,
                    Multitask::Background,
                    entry.descr,
                );
            }
        }
    }

    /// Run one frame for up to `budget` instructions.
    pub fn run_slice(&mut self, world: &mut World, frame: &mut Frame, budget: i32) -> RunOutcome {
        let mut code = match self.image(frame.program) {
            Ok(c) => c,
            Err(e) => return RunOutcome::Died(e),
        };
        frame.state = FrameState::Running;
        let mut remaining = budget;

        loop {
            if frame.kill_requested {
                frame.state = FrameState::Killed;
                return RunOutcome::Died(MufError::Killed);
            }
            if frame.pc >= code.code.len() {
                return self.finish(frame);
            }
            if remaining <= 0 && frame.mode != Multitask::Preempt {
                frame.state = FrameState::Ready;
                return RunOutcome::Yield;
            }
            let max = world.tune.max_instr_count as u64;
            if frame.mode == Multitask::Preempt && max > 0 && frame.instr_count > max {
                return self.die(
                    frame,
                    MufError::Value("Maximum total instruction count exceeded".into()),
                );
            }

            let inst = code.code[frame.pc].clone();
            frame.pc += 1;
            frame.instr_count += 1;
            remaining -= 1;

            let result = self.step(world, frame, inst);
            match result {
                Ok(Flow::Cont) => {}
                Ok(Flow::Switch) => match self.image(frame.program) {
                    Ok(c) => code = c,
                    Err(e) => return self.die(frame, e),
                },
                Ok(Flow::Done) => return self.finish(frame),
                Ok(Flow::Read { timeout }) => {
                    frame.state = FrameState::BlockedRead;
                    return RunOutcome::BlockedRead { timeout };
                }
                Ok(Flow::Sleep(secs)) => {
                    frame.state = FrameState::BlockedWait;
                    return RunOutcome::Sleep(secs);
                }
                Err(e) => match self.unwind(frame, e) {
                    None => match self.image(frame.program) {
                        Ok(c) => code = c,
                        Err(e) => return self.die(frame, e),
                    },
                    Some(outcome) => return outcome,
                },
            }
        }
    }

    fn step(&mut self, world: &mut World, frame: &mut Frame, inst: Inst) -> Result<Flow, MufError> {
        match inst {
            Inst::Push(v) => {
                frame.push(v)?;
                Ok(Flow::Cont)
            }
            Inst::Prim(p) => prims::dispatch(self, world, frame, p),
            Inst::Jmp(t) => {
                frame.pc = t;
                Ok(Flow::Cont)
            }
            Inst::JmpFalse(t) => {
                let v = frame.pop()?;
                if !v.truthy() {
                    frame.pc = t;
                }
                Ok(Flow::Cont)
            }
            Inst::CallAddr(t) => {
                frame.call_stack.push(crate::frame::CallRecord {
                    prog: frame.program,
                    pc: frame.pc,
                    scope_depth: frame.svar_stack.len(),
                });
                frame
                    .svar_stack
                    .push(vec![Value::Int(0); crate::frame::SCOPE_VARS]);
                frame.pc = t;
                Ok(Flow::Cont)
            }
            Inst::Ret => match frame.call_stack.pop() {
                None => Ok(Flow::Done),
                Some(rec) => {
                    let switched = rec.prog != frame.program;
                    if switched {
                        frame.caller_refs.pop();
                    }
                    frame.program = rec.prog;
                    frame.pc = rec.pc;
                    frame.svar_stack.truncate(rec.scope_depth);
                    if switched { Ok(Flow::Switch) } else { Ok(Flow::Cont) }
                }
            },
            Inst::ForIter { done } => {
                enum Step {
                    One(Value),
                    Pair(Value, Value),
                    Exhausted,
                }
                let next = match frame.for_stack.last_mut() {
                    None => return Err(MufError::BadInstruction(frame.pc - 1)),
                    Some(crate::frame::ForNode::Range { cur, end, step, started }) => {
                        if *started {
                            *cur = cur.wrapping_add(*step);
                        } else {
                            *started = true;
                        }
                        let more = if *step >= 0 { *cur <= *end } else { *cur >= *end };
                        if more {
                            Step::One(Value::Int(*cur))
                        } else {
                            Step::Exhausted
                        }
                    }
                    Some(crate::frame::ForNode::Arr { arr, idx }) => match arr.key_at(*idx) {
                        Some(k) => {
                            *idx += 1;
                            let val = arr.get(&k).unwrap_or(Value::Int(0));
                            Step::Pair(Value::from(&k), val)
                        }
                        None => Step::Exhausted,
                    },
                };
                match next {
                    Step::One(v) => frame.push(v)?,
                    Step::Pair(k, v) => {
                        frame.push(k)?;
                        frame.push(v)?;
                    }
                    Step::Exhausted => frame.pc = done,
                }
                Ok(Flow::Cont)
            }
            Inst::ForPop => {
                frame
                    .for_stack
                    .pop()
                    .ok_or(MufError::BadInstruction(frame.pc - 1))?;
                Ok(Flow::Cont)
            }
            Inst::Try { catch } => {
                frame.try_stack.push(TryNode {
                    catch_pc: catch,
                    stack_depth: frame.stack.len(),
                    for_depth: frame.for_stack.len(),
                    call_depth: frame.call_stack.len(),
                });
                Ok(Flow::Cont)
            }
            Inst::TryPop => {
                frame
                    .try_stack
                    .pop()
                    .ok_or(MufError::BadInstruction(frame.pc - 1))?;
                Ok(Flow::Cont)
            }
        }
    }

    /// A recoverable abort lands on the innermost TRY: intervening
    /// iterators and calls are cleaned up, and the handler receives
    /// the error text on the stack.
    fn unwind(&mut self, frame: &mut Frame, e: MufError) -> Option<RunOutcome> {
        if !e.recoverable() {
            return Some(self.die_outcome(frame, e));
        }
        let Some(t) = frame.try_stack.pop() else {
            return Some(self.die_outcome(frame, e));
        };
        frame.stack.truncate(t.stack_depth);
        frame.for_stack.truncate(t.for_depth);
        while frame.call_stack.len() > t.call_depth {
            // restore the program context the TRY was armed in
            let rec = frame.call_stack.pop().unwrap();
            if rec.prog != frame.program {
                frame.caller_refs.pop();
            }
            frame.program = rec.prog;
            frame.svar_stack.truncate(rec.scope_depth);
        }
        frame.pc = t.catch_pc;
        let _ = frame.push(Value::str(&e.to_string()));
        None
    }

    fn die(&mut self, frame: &mut Frame, e: MufError) -> RunOutcome {
        self.die_outcome(frame, e)
    }

    fn die_outcome(&mut self, frame: &mut Frame, e: MufError) -> RunOutcome {
        frame.state = FrameState::Killed;
        RunOutcome::Died(e)
    }

    fn finish(&mut self, frame: &mut Frame) -> RunOutcome {
        frame.state = FrameState::Done;
        RunOutcome::Done(frame.stack.last().cloned())
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
