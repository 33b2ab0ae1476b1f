//! The persistent object world: arena, property trees, paging store,
//! locks, ignore lists, and the session table.

pub mod dbref;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod lock;
pub mod obj;
pub mod pager;
pub mod prop;
pub mod session;
pub mod tune;
mod world;

pub use dbref::{AMBIGUOUS, Dbref, GLOBAL_ENVIRONMENT, HOME, NIL, NOTHING, PERMDENIED};
pub use error::Error;
pub use world::World;
