//! Primitive implementations, grouped by family.

pub mod array;
pub mod db;
pub mod float;
pub mod io;
pub mod math;
pub mod process;
pub mod props;
pub mod stack;
pub mod strings;

use crate::error::MufError;
use crate::frame::Frame;
use crate::interp::{Flow, Machine};
use crate::program::Prim;
use world::World;

/// Route one primitive to its implementation.
pub fn dispatch(
    machine: &mut Machine,
    world: &mut World,
    frame: &mut Frame,
    prim: Prim,
) -> Result<Flow, MufError> {
    use Prim::*;
    // families that never touch control flow just continue
    macro_rules! cont {
        ($e:expr) => {{
            $e?;
            Ok(Flow::Cont)
        }};
    }

    match prim {
        // stack
        Pop => cont!(stack::pop(frame)),
        PopN => cont!(stack::popn(frame)),
        Dup => cont!(stack::dup(frame)),
        Nip => cont!(stack::nip(frame)),
        Tuck => cont!(stack::tuck(frame)),
        Swap => cont!(stack::swap(frame)),
        Over => cont!(stack::over(frame)),
        Rot => cont!(stack::rot(frame)),
        RRot => cont!(stack::rrot(frame)),
        Pick => cont!(stack::pick(frame)),
        Put => cont!(stack::put(frame)),
        Rotate => cont!(stack::rotate(frame)),
        Reverse => cont!(stack::reverse(frame)),
        Depth => cont!(stack::depth(frame)),
        FullDepth => cont!(stack::depth(frame)),
        Mark => cont!(stack::mark(frame)),
        FindMark => cont!(stack::find_mark(frame)),
        ShallowCopy => cont!(stack::shallow_copy(frame)),
        DeepCopy => cont!(stack::deep_copy(frame)),
        SecureSysvars => cont!(stack::secure_sysvars(frame)),
        // variables
        At => cont!(stack::var_at(frame)),
        Bang => cont!(stack::var_bang(frame)),
        Variable => cont!(stack::variable(frame)),
        LocalVar => cont!(stack::localvar(frame)),
        // introspection
        DbTop => cont!(db::dbtop(world, frame)),
        Prog => cont!(db::prog(frame)),
        Trig => cont!(db::trig(frame)),
        Pid => cont!(process::pid(frame)),
        Version => cont!(db::version(frame)),
        Systime => cont!(process::systime(machine, frame)),
        // math
        Add => cont!(math::add(frame)),
        Sub => cont!(math::sub(frame)),
        Mul => cont!(math::mul(frame)),
        Div => cont!(math::div(frame)),
        Mod => cont!(math::modulo(frame)),
        BitOr => cont!(math::bitor(frame)),
        BitXor => cont!(math::bitxor(frame)),
        BitAnd => cont!(math::bitand(frame)),
        BitShift => cont!(math::bitshift(frame)),
        LAnd => cont!(math::land(frame)),
        LOr => cont!(math::lor(frame)),
        LXor => cont!(math::lxor(frame)),
        LNot => cont!(math::lnot(frame)),
        Lt => cont!(math::lt(frame)),
        Gt => cont!(math::gt(frame)),
        Eq => cont!(math::eq(frame)),
        Le => cont!(math::le(frame)),
        Ge => cont!(math::ge(frame)),
        Ne => cont!(math::ne(frame)),
        Random => cont!(math::random(frame)),
        SRand => cont!(math::srand(frame)),
        GetSeed => cont!(math::getseed(frame)),
        SetSeed => cont!(math::setseed(frame)),
        Int => cont!(math::int(frame)),
        Abs => cont!(math::abs(frame)),
        Sign => cont!(math::sign(frame)),
        // float
        Ceil => cont!(float::ceil(frame)),
        Floor => cont!(float::floor(frame)),
        Round => cont!(float::round(frame)),
        Sqrt => cont!(float::sqrt(frame)),
        Pi => cont!(float::pi(frame)),
        Epsilon => cont!(float::epsilon(frame)),
        Inf => cont!(float::inf(frame)),
        Sin => cont!(float::sin(frame)),
        Cos => cont!(float::cos(frame)),
        Tan => cont!(float::tan(frame)),
        Asin => cont!(float::asin(frame)),
        Acos => cont!(float::acos(frame)),
        Atan => cont!(float::atan(frame)),
        Atan2 => cont!(float::atan2(frame)),
        Exp => cont!(float::exp(frame)),
        Log => cont!(float::log(frame)),
        Log10 => cont!(float::log10(frame)),
        Pow => cont!(float::pow(frame)),
        Fmod => cont!(float::fmod(frame)),
        Modf => cont!(float::modf(frame)),
        Strtof => cont!(float::strtof(frame)),
        Ftostr => cont!(float::ftostr(frame)),
        Gaussian => cont!(float::gaussian(frame)),
        FRand => cont!(float::frand(frame)),
        ClearErrs => cont!(float::clear_errs(frame)),
        ErrAny => cont!(float::err_any(frame)),
        ErrBit => cont!(float::err_bit(frame)),
        // strings
        StrLen => cont!(strings::strlen(frame)),
        StrCat => cont!(strings::strcat(frame)),
        StrCmp => cont!(strings::strcmp(frame)),
        StringCmp => cont!(strings::stringcmp(frame)),
        StrCut => cont!(strings::strcut(frame)),
        MidStr => cont!(strings::midstr(frame)),
        Instr => cont!(strings::instr(frame)),
        RInstr => cont!(strings::rinstr(frame)),
        Explode => cont!(strings::explode(frame)),
        ExplodeArray => cont!(strings::explode_array(frame)),
        Subst => cont!(strings::subst(frame)),
        ToUpper => cont!(strings::toupper(frame)),
        ToLower => cont!(strings::tolower(frame)),
        StripLead => cont!(strings::striplead(frame)),
        StripTail => cont!(strings::striptail(frame)),
        Strip => cont!(strings::strip(frame)),
        IntoStr => cont!(strings::intostr(frame)),
        Atoi => cont!(strings::atoi(frame)),
        NumberP => cont!(strings::number_p(frame)),
        PronounSub => cont!(strings::pronoun_sub(world, frame)),
        Md5Hash => cont!(strings::md5hash(frame)),
        Md5Base64 => cont!(strings::md5base64(frame)),
        Sha1Hash => cont!(strings::sha1hash(frame)),
        StrEncrypt => cont!(strings::strencrypt(frame)),
        StrDecrypt => cont!(strings::strdecrypt(frame)),
        AnsiStrLen => cont!(strings::ansi_strlen(frame)),
        AnsiStrCut => cont!(strings::ansi_strcut(frame)),
        AnsiMidStr => cont!(strings::ansi_midstr(frame)),
        AnsiStrip => cont!(strings::ansi_strip(frame)),
        FmtString => cont!(strings::fmtstring(frame)),
        ArrayFmtStrings => cont!(strings::array_fmtstrings(frame)),
        // arrays
        ArrayMake => cont!(array::make(frame)),
        ArrayMakeDict => cont!(array::make_dict(frame)),
        ArrayCount => cont!(array::count(frame)),
        ArrayFirst => cont!(array::first(frame)),
        ArrayNext => cont!(array::next(frame)),
        ArrayGetItem => cont!(array::getitem(frame)),
        ArraySetItem => cont!(array::setitem(frame)),
        ArrayAppendItem => cont!(array::append_item(frame)),
        ArrayDelItem => cont!(array::delitem(frame)),
        ArrayKeys => cont!(array::keys(frame)),
        ArrayVals => cont!(array::vals(frame)),
        ArrayExplode => cont!(array::explode(frame)),
        ArrayJoin => cont!(array::join(frame)),
        ArrayReverse => cont!(array::reverse(frame)),
        ArrayPin => cont!(array::pin(frame)),
        ArrayUnpin => cont!(array::unpin(frame)),
        // properties
        GetProp => cont!(props::getprop(world, frame)),
        GetPropStr => cont!(props::getprop_str(world, frame)),
        GetPropVal => cont!(props::getprop_val(world, frame)),
        GetPropFVal => cont!(props::getprop_fval(world, frame)),
        SetProp => cont!(props::setprop(world, frame)),
        RemoveProp => cont!(props::remove_prop(world, frame)),
        PropDirP => cont!(props::propdir_p(world, frame)),
        NextProp => cont!(props::nextprop(world, frame)),
        EnvProp => cont!(props::envprop(world, frame)),
        EnvPropStr => cont!(props::envprop_str(world, frame)),
        // database
        Name => cont!(db::name(world, frame)),
        SetName => cont!(db::setname(world, frame)),
        Owner => cont!(db::owner(world, frame)),
        Location => cont!(db::location(world, frame)),
        Moveto => cont!(db::moveto(world, frame)),
        Contents => cont!(db::contents(world, frame)),
        Exits => cont!(db::exits(world, frame)),
        NextObj => cont!(db::next_obj(world, frame)),
        OkP => cont!(db::ok_p(world, frame)),
        PlayerP => cont!(db::type_p(world, frame, world::obj::ObjType::Player)),
        ThingP => cont!(db::type_p(world, frame, world::obj::ObjType::Thing)),
        ExitP => cont!(db::type_p(world, frame, world::obj::ObjType::Exit)),
        RoomP => cont!(db::type_p(world, frame, world::obj::ObjType::Room)),
        ProgramP => cont!(db::type_p(world, frame, world::obj::ObjType::Program)),
        FlagP => cont!(db::flag_p(world, frame)),
        // locks
        ParseLock => cont!(db::parselock(world, frame)),
        TestLock => cont!(db::testlock(world, frame)),
        UnparseLock => cont!(db::unparselock(world, frame)),
        // notification and i/o
        Notify => cont!(io::notify(machine, world, frame)),
        NotifyExclude => cont!(io::notify_exclude(machine, world, frame)),
        NotifyExcept => cont!(io::notify_except(machine, world, frame)),
        NotifySecure => cont!(io::notify_secure(machine, world, frame)),
        OTell => cont!(io::otell(machine, world, frame)),
        Tell => cont!(io::tell(machine, world, frame)),
        Read => io::read(world, frame),
        TRead => io::tread(world, frame),
        Sleep => io::sleep(frame),
        // sessions
        ConCount => cont!(io::concount(world, frame)),
        ConDbref => cont!(io::condbref(world, frame)),
        ConIdle => cont!(io::conidle(machine, world, frame)),
        ConTime => cont!(io::contime(machine, world, frame)),
        Descr => cont!(io::descr(frame)),
        // iteration setup
        ForPrim => cont!(process::for_prim(frame)),
        Foreach => cont!(process::foreach_prim(frame)),
        // process control
        Execute => process::execute(machine, frame),
        Call => process::call(machine, world, frame),
        Interp => process::interp(machine, world, frame),
        Fork => cont!(process::fork(machine, world, frame)),
        Kill => cont!(process::kill(machine, world, frame)),
        IsPidP => cont!(process::is_pid_p(machine, frame)),
        Delay => cont!(process::delay(machine, world, frame)),
        Mode => cont!(process::mode(frame)),
        SetMode => cont!(process::set_mode(frame)),
        Preempt => cont!(process::preempt(frame)),
        Foreground => cont!(process::foreground(frame)),
        Background => cont!(process::background(frame)),
        Force => cont!(process::force(machine, world, frame)),
        ForceLevel => cont!(process::force_level(machine, frame)),
    }
}
