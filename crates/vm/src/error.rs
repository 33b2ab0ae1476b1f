use world::Dbref;

/// Everything that can abort a running frame.
///
/// Most aborts are recoverable: a TRY in scope catches them. The rest
/// (corrupt frames, missing code) kill the frame outright.
#[derive(Debug, thiserror::Error)]
pub enum MufError {
    #[error("Stack underflow.")]
    StackUnderflow,
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Invalid argument type. {0}")]
    Type(String),
    #[error("Invalid argument. {0}")]
    Value(String),
    #[error("Invalid object. {0}")]
    InvalidObject(Dbref),
    #[error("Permission denied. {0}")]
    Perm(String),
    #[error("Recursion limit exceeded. {0}")]
    Recursion(&'static str),
    #[error("Process killed.")]
    Killed,
    #[error("Interrupt.")]
    Interrupted,
    #[error("{0}")]
    World(#[from] world::Error),
    #[error("Program not loaded: {0}")]
    NoProgram(Dbref),
    #[error("Corrupt instruction at {0}.")]
    BadInstruction(usize),
}

impl MufError {
    /// Can a TRY handler catch this?
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            MufError::Killed | MufError::NoProgram(_) | MufError::BadInstruction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(MufError::StackUnderflow.recoverable());
        assert!(MufError::Type("(1)".into()).recoverable());
        assert!(!MufError::BadInstruction(3).recoverable());
        assert!(!MufError::Killed.recoverable());
    }
}
