//! Loaded program images.
//!
//! The compiler is out of scope here: images arrive as opcode vectors,
//! either loaded from a program object's stored text by an external
//! assembler or built programmatically (tests do the latter).

use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use world::Dbref;

/// One instruction. Control flow is explicit; everything else funnels
/// through the primitive table.
#[derive(Debug, Clone)]
pub enum Inst {
    Push(Value),
    Prim(Prim),
    Jmp(usize),
    /// IF: pop, fall through when truthy, branch when false.
    JmpFalse(usize),
    /// Intra-program function call; pushes a return record and a scope.
    CallAddr(usize),
    /// Return from function, or finish the program at the root.
    Ret,
    /// Drive the innermost FOR/FOREACH: push the next element or jump
    /// past the loop when exhausted.
    ForIter { done: usize },
    /// Discard the innermost iterator on loop exit.
    ForPop,
    /// Arm a handler: a recoverable abort unwinds here.
    Try { catch: usize },
    /// Disarm the innermost handler on normal exit.
    TryPop,
}

/// The primitive set, by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    // stack
    Pop, PopN, Dup, Nip, Tuck, Swap, Over, Rot, RRot, Pick, Put,
    Rotate, Reverse, Depth, FullDepth, Mark, FindMark,
    ShallowCopy, DeepCopy, SecureSysvars,
    // variables
    At, Bang, Variable, LocalVar,
    // introspection
    DbTop, Prog, Trig, Pid, Version, Systime,
    // math
    Add, Sub, Mul, Div, Mod, BitOr, BitXor, BitAnd, BitShift,
    LAnd, LOr, LXor, LNot, Lt, Gt, Eq, Le, Ge, Ne,
    Random, SRand, GetSeed, SetSeed, Int, Abs, Sign,
    // float
    Ceil, Floor, Round, Sqrt, Pi, Epsilon, Inf,
    Sin, Cos, Tan, Asin, Acos, Atan, Atan2,
    Exp, Log, Log10, Pow, Fmod, Modf, Strtof, Ftostr,
    Gaussian, FRand, ClearErrs, ErrAny, ErrBit,
    // strings
    StrLen, StrCat, StrCmp, StringCmp, StrCut, MidStr,
    Instr, RInstr, Explode, ExplodeArray, Subst,
    ToUpper, ToLower, StripLead, StripTail, Strip,
    IntoStr, Atoi, NumberP, PronounSub,
    Md5Hash, Md5Base64, Sha1Hash, StrEncrypt, StrDecrypt,
    AnsiStrLen, AnsiStrCut, AnsiMidStr, AnsiStrip,
    FmtString, ArrayFmtStrings,
    // arrays
    ArrayMake, ArrayMakeDict, ArrayCount, ArrayFirst, ArrayNext,
    ArrayGetItem, ArraySetItem, ArrayAppendItem, ArrayDelItem,
    ArrayKeys, ArrayVals, ArrayExplode, ArrayJoin, ArrayReverse,
    ArrayPin, ArrayUnpin,
    // properties
    GetProp, GetPropStr, GetPropVal, GetPropFVal, SetProp,
    RemoveProp, PropDirP, NextProp, EnvProp, EnvPropStr,
    // database
    Name, SetName, Owner, Location, Moveto, Contents, Exits, NextObj,
    OkP, PlayerP, ThingP, ExitP, RoomP, ProgramP, FlagP,
    // locks
    ParseLock, TestLock, UnparseLock,
    // i/o and notification
    Notify, NotifyExclude, NotifyExcept, NotifySecure, OTell, Tell,
    Read, TRead, Sleep,
    // sessions
    ConCount, ConDbref, ConIdle, ConTime, Descr,
    // iteration setup
    ForPrim, Foreach,
    // process control
    Execute, Call, Interp, Fork, Kill, IsPidP, Delay,
    Mode, SetMode, Preempt, Foreground, Background,
    Force, ForceLevel,
}

/// A compiled program image.
#[derive(Debug, Clone)]
pub struct CodeImage {
    pub code: Vec<Inst>,
}

impl CodeImage {
    pub fn new(code: Vec<Inst>) -> Rc<Self> {
        Rc::new(CodeImage { code })
    }
}

/// Programs currently loaded, by dbref.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    map: HashMap<Dbref, Rc<CodeImage>>,
}

impl ProgramRegistry {
    pub fn load(&mut self, d: Dbref, image: Rc<CodeImage>) {
        self.map.insert(d, image);
    }

    pub fn unload(&mut self, d: Dbref) {
        self.map.remove(&d);
    }

    pub fn get(&self, d: Dbref) -> Option<Rc<CodeImage>> {
        self.map.get(&d).cloned()
    }

    pub fn is_loaded(&self, d: Dbref) -> bool {
        self.map.contains_key(&d)
    }
}
