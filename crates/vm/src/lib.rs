//! The MUF execution engine: tagged values, frames, the bytecode
//! interpreter, the time/event queue, and the notification fabric.

pub mod ansi;
pub mod checkargs;
pub mod error;
pub mod event;
pub mod frame;
pub mod interp;
pub mod notify;
pub mod prims;
pub mod program;
pub mod value;

pub use error::MufError;
pub use frame::{Frame, FrameState, Multitask};
pub use interp::{Machine, QueuedCommand, RunOutcome};
pub use program::{CodeImage, Inst, Prim};
pub use value::{ArrayKey, MufArray, Value};
