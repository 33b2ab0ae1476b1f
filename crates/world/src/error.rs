use crate::dbref::Dbref;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No such object: {0}")]
    NoSuchObject(Dbref),
    #[error("Object {0} is garbage")]
    Garbage(Dbref),
    #[error("Moving {child} into {dest} would create a containment loop")]
    ContainmentLoop { child: Dbref, dest: Dbref },
    #[error("Program {0} still has running instances")]
    ProgramBusy(Dbref),
    #[error("Permission denied: {0}")]
    PermDenied(&'static str),
    #[error("Bad property path: {0:?}")]
    BadPropPath(String),
    #[error("Lock parse error: {0}")]
    LockParse(String),
    #[error("Paging store has no record for {dbref} {path:?}")]
    NoPageRecord { dbref: Dbref, path: String },
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] postcard::Error),
    #[error("Parmfile error: {0}")]
    Parmfile(#[from] toml::de::Error),
    #[error("fork() failed: {0}")]
    Fork(std::io::Error),
}
