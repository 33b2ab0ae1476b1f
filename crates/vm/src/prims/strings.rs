//! String primitives, including the ANSI-aware family and the
//! printf-style formatter.

use crate::ansi;
use crate::error::MufError;
use crate::frame::Frame;
use crate::value::{ArrayKey, MufArray, Value};
use world::prop::PropValue;
use world::World;

pub fn strlen(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::Int(s.chars().count() as i32))
}

pub fn strcat(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_str()?;
    let a = frame.pop_str()?;
    let mut s = String::with_capacity(a.len() + b.len());
    s.push_str(&a);
    s.push_str(&b);
    frame.push(Value::str(&s))
}

pub fn strcmp(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_str()?;
    let a = frame.pop_str()?;
    let r = match a.as_ref().cmp(b.as_ref()) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    };
    frame.push(Value::Int(r))
}

/// Case-insensitive comparison; zero means equal.
pub fn stringcmp(frame: &mut Frame) -> Result<(), MufError> {
    let b = frame.pop_str()?;
    let a = frame.pop_str()?;
    let la = a.to_ascii_lowercase();
    let lb = b.to_ascii_lowercase();
    let r = match la.cmp(&lb) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    };
    frame.push(Value::Int(r))
}

fn char_split(s: &str, n: usize) -> (String, String) {
    let mut head = String::new();
    let mut tail = String::new();
    for (i, c) in s.chars().enumerate() {
        if i < n {
            head.push(c);
        } else {
            tail.push(c);
        }
    }
    (head, tail)
}

/// `s n strcut`: split after n characters.
pub fn strcut(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    let s = frame.pop_str()?;
    if n < 0 {
        return Err(MufError::Value("cut position must not be negative".into()));
    }
    let (head, tail) = char_split(&s, n as usize);
    frame.push(Value::str(&head))?;
    frame.push(Value::str(&tail))
}

/// `s start len midstr`: 1-based substring.
pub fn midstr(frame: &mut Frame) -> Result<(), MufError> {
    let len = frame.pop_int()?;
    let start = frame.pop_int()?;
    let s = frame.pop_str()?;
    if start < 1 || len < 0 {
        return Err(MufError::Value("bad substring range".into()));
    }
    let out: String = s
        .chars()
        .skip(start as usize - 1)
        .take(len as usize)
        .collect();
    frame.push(Value::str(&out))
}

/// 1-based position of the first occurrence, 0 when absent.
pub fn instr(frame: &mut Frame) -> Result<(), MufError> {
    let needle = frame.pop_str()?;
    let hay = frame.pop_str()?;
    let pos = if needle.is_empty() {
        0
    } else {
        hay.find(needle.as_ref())
            .map(|byte| hay[..byte].chars().count() + 1)
            .unwrap_or(0)
    };
    frame.push(Value::Int(pos as i32))
}

pub fn rinstr(frame: &mut Frame) -> Result<(), MufError> {
    let needle = frame.pop_str()?;
    let hay = frame.pop_str()?;
    let pos = if needle.is_empty() {
        0
    } else {
        hay.rfind(needle.as_ref())
            .map(|byte| hay[..byte].chars().count() + 1)
            .unwrap_or(0)
    };
    frame.push(Value::Int(pos as i32))
}

fn split_parts(s: &str, sep: &str) -> Vec<String> {
    s.split(sep).map(|p| p.to_string()).collect()
}

/// `s sep explode`: parts pushed so the first ends up just under the
/// count. Empty subject or empty separator aborts.
pub fn explode(frame: &mut Frame) -> Result<(), MufError> {
    let sep = frame.pop_str()?;
    let s = frame.pop_str()?;
    if s.is_empty() {
        return Err(MufError::Value("cannot explode an empty string".into()));
    }
    if sep.is_empty() {
        return Err(MufError::Value("empty delimiter".into()));
    }
    let parts = split_parts(&s, &sep);
    let n = parts.len();
    for p in parts.iter().rev() {
        frame.push(Value::str(p))?;
    }
    frame.push(Value::Int(n as i32))
}

pub fn explode_array(frame: &mut Frame) -> Result<(), MufError> {
    let sep = frame.pop_str()?;
    let s = frame.pop_str()?;
    if sep.is_empty() {
        return Err(MufError::Value("empty delimiter".into()));
    }
    let parts = split_parts(&s, &sep)
        .into_iter()
        .map(|p| Value::str(&p))
        .collect();
    frame.push(Value::Array(MufArray::list(parts)))
}

/// `s new old subst`: replace every occurrence of `old` with `new`.
pub fn subst(frame: &mut Frame) -> Result<(), MufError> {
    let old = frame.pop_str()?;
    let new = frame.pop_str()?;
    let s = frame.pop_str()?;
    if old.is_empty() {
        return Err(MufError::Value("empty pattern".into()));
    }
    frame.push(Value::str(&s.replace(old.as_ref(), &new)))
}

pub fn toupper(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(&s.to_uppercase()))
}

pub fn tolower(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(&s.to_lowercase()))
}

pub fn striplead(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(s.trim_start()))
}

pub fn striptail(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(s.trim_end()))
}

pub fn strip(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(s.trim()))
}

pub fn intostr(frame: &mut Frame) -> Result<(), MufError> {
    let v = frame.pop()?;
    let s = match v {
        Value::Int(n) => n.to_string(),
        Value::Ref(d) => d.0.to_string(),
        Value::Float(f) => super::float::format_float(f),
        Value::Str(s) => s.to_string(),
        other => {
            return Err(MufError::Type(format!(
                "cannot stringify {}",
                other.type_name()
            )));
        }
    };
    frame.push(Value::str(&s))
}

pub fn atoi(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    let n = s.trim().parse::<i32>().unwrap_or(0);
    frame.push(Value::Int(n))
}

pub fn number_p(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    let t = s.trim();
    let ok = !t.is_empty() && t.strip_prefix('-').unwrap_or(t).chars().all(|c| c.is_ascii_digit());
    frame.push(Value::Int(ok as i32))
}

/// `%`-substitution by the target's gender property. Capitalized codes
/// capitalize the replacement.
pub fn pronoun_sub(world: &mut World, frame: &mut Frame) -> Result<(), MufError> {
    let template = frame.pop_str()?;
    let who = frame.pop_ref()?;
    let name = world
        .arena
        .get(who)
        .map(|o| o.name.clone())
        .unwrap_or_else(|_| "Someone".to_string());
    let gender = match world.get_prop(who, "sex") {
        Ok(Some(PropValue::Str(s))) => s.to_ascii_lowercase(),
        _ => String::new(),
    };
    // subjective, objective, possessive, absolute, reflexive
    let (s, o, p, a, r) = match gender.as_str() {
        "male" => ("he", "him", "his", "his", "himself"),
        "female" => ("she", "her", "her", "hers", "herself"),
        "neuter" => ("it", "it", "its", "its", "itself"),
        _ => ("they", "them", "their", "theirs", "themselves"),
    };
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('%'),
            Some(code) => {
                let rep = match code.to_ascii_lowercase() {
                    'n' => name.as_str(),
                    's' => s,
                    'o' => o,
                    'p' => p,
                    'a' => a,
                    'r' => r,
                    '%' => "%",
                    _ => {
                        out.push('%');
                        out.push(code);
                        continue;
                    }
                };
                if code.is_ascii_uppercase() {
                    let mut cs = rep.chars();
                    if let Some(first) = cs.next() {
                        out.extend(first.to_uppercase());
                        out.push_str(cs.as_str());
                    }
                } else {
                    out.push_str(rep);
                }
            }
        }
    }
    frame.push(Value::str(&out))
}

pub fn md5hash(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(&world::hash::md5hex(s.as_bytes())))
}

pub fn md5base64(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(&world::hash::md5_base64(s.as_bytes())))
}

pub fn sha1hash(frame: &mut Frame) -> Result<(), MufError> {
    use sha1::{Digest, Sha1};
    let s = frame.pop_str()?;
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(40);
    for b in digest {
        hex.push_str(&format!("{:02x}", b));
    }
    frame.push(Value::str(&hex))
}

const CRYPT_BASE: u8 = 32;
const CRYPT_SPAN: u32 = 95; // printable ASCII

fn crypt_shift(data: &str, key: &str, encrypt: bool) -> Result<String, MufError> {
    if key.is_empty() {
        return Err(MufError::Value("empty key".into()));
    }
    let keyb: Vec<u8> = key.bytes().collect();
    let mut out = String::with_capacity(data.len());
    for (i, c) in data.bytes().enumerate() {
        if !(CRYPT_BASE..127).contains(&c) {
            out.push(c as char);
            continue;
        }
        let k = (keyb[i % keyb.len()].wrapping_sub(CRYPT_BASE)) as u32 % CRYPT_SPAN;
        let v = (c - CRYPT_BASE) as u32;
        let shifted = if encrypt {
            (v + k) % CRYPT_SPAN
        } else {
            (v + CRYPT_SPAN - k) % CRYPT_SPAN
        };
        out.push((shifted as u8 + CRYPT_BASE) as char);
    }
    Ok(out)
}

pub fn strencrypt(frame: &mut Frame) -> Result<(), MufError> {
    let key = frame.pop_str()?;
    let data = frame.pop_str()?;
    let out = crypt_shift(&data, &key, true)?;
    frame.push(Value::str(&out))
}

pub fn strdecrypt(frame: &mut Frame) -> Result<(), MufError> {
    let key = frame.pop_str()?;
    let data = frame.pop_str()?;
    let out = crypt_shift(&data, &key, false)?;
    frame.push(Value::str(&out))
}

pub fn ansi_strlen(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::Int(ansi::ansi_strlen(&s) as i32))
}

pub fn ansi_strcut(frame: &mut Frame) -> Result<(), MufError> {
    let n = frame.pop_int()?;
    let s = frame.pop_str()?;
    if n < 0 {
        return Err(MufError::Value("cut position must not be negative".into()));
    }
    let (head, tail) = ansi::ansi_strcut(&s, n as usize);
    frame.push(Value::str(&head))?;
    frame.push(Value::str(&tail))
}

pub fn ansi_midstr(frame: &mut Frame) -> Result<(), MufError> {
    let len = frame.pop_int()?;
    let start = frame.pop_int()?;
    let s = frame.pop_str()?;
    if start < 1 || len < 0 {
        return Err(MufError::Value("bad substring range".into()));
    }
    frame.push(Value::str(&ansi::ansi_midstr(&s, start as usize, len as usize)))
}

pub fn ansi_strip(frame: &mut Frame) -> Result<(), MufError> {
    let s = frame.pop_str()?;
    frame.push(Value::str(&ansi::strip_ansi(&s)))
}

/// One parsed `%` conversion.
struct Conv {
    left: bool,
    center: bool,
    zero: bool,
    width: Option<usize>,
    star_width: bool,
    precision: Option<usize>,
    key: Option<String>,
    kind: char,
}

fn parse_format(fmt: &str) -> Result<(Vec<Result<String, Conv>>, usize), MufError> {
    // pieces are literal runs or conversions; returns the count of
    // stack arguments consumed (star widths included)
    let mut out: Vec<Result<String, Conv>> = Vec::new();
    let mut lit = String::new();
    let mut args = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            lit.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            lit.push('%');
            continue;
        }
        if !lit.is_empty() {
            out.push(Ok(std::mem::take(&mut lit)));
        }
        let mut conv = Conv {
            left: false,
            center: false,
            zero: false,
            width: None,
            star_width: false,
            precision: None,
            key: None,
            kind: 's',
        };
        // tokenised access: %[name]s
        if chars.peek() == Some(&'[') {
            chars.next();
            let mut key = String::new();
            for c in chars.by_ref() {
                if c == ']' {
                    break;
                }
                key.push(c);
            }
            conv.key = Some(key);
        }
        while let Some(&c) = chars.peek() {
            match c {
                '-' => conv.left = true,
                '|' => conv.center = true,
                '0' if conv.width.is_none() => conv.zero = true,
                _ => break,
            }
            chars.next();
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            conv.star_width = true;
            args += 1;
        } else {
            let mut w = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    w.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if !w.is_empty() {
                conv.width = w.parse().ok();
            }
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    p.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            conv.precision = p.parse().ok();
        }
        let kind = chars
            .next()
            .ok_or_else(|| MufError::Value("truncated format conversion".into()))?;
        if !matches!(kind, 's' | 'd' | 'i' | 'f' | 'D' | '~' | '?') {
            return Err(MufError::Value(format!("unknown conversion %{}", kind)));
        }
        conv.kind = kind;
        if conv.key.is_none() {
            args += 1;
        }
        out.push(Err(conv));
    }
    if !lit.is_empty() {
        out.push(Ok(lit));
    }
    Ok((out, args))
}

fn render_one(conv: &Conv, v: &Value, width_arg: Option<i32>) -> Result<String, MufError> {
    let body = match conv.kind {
        's' => match v {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        },
        'd' | 'i' => match v {
            Value::Int(n) => n.to_string(),
            Value::Ref(d) => d.0.to_string(),
            Value::Float(f) => (*f as i64).to_string(),
            other => {
                return Err(MufError::Type(format!(
                    "%{} expects a number, found {}",
                    conv.kind,
                    other.type_name()
                )));
            }
        },
        'f' => match v {
            Value::Float(f) => match conv.precision {
                Some(p) => format!("{:.*}", p, f),
                None => super::float::format_float(*f),
            },
            Value::Int(n) => match conv.precision {
                Some(p) => format!("{:.*}", p, *n as f64),
                None => super::float::format_float(*n as f64),
            },
            other => {
                return Err(MufError::Type(format!(
                    "%f expects a float, found {}",
                    other.type_name()
                )));
            }
        },
        'D' => match v {
            Value::Ref(d) => d.to_string(),
            other => other.to_string(),
        },
        '~' => v.to_string(),
        '?' => v.type_name().to_string(),
        _ => unreachable!(),
    };
    let width = match width_arg {
        Some(w) => Some(w.max(0) as usize),
        None => conv.width,
    };
    let visual = ansi::ansi_strlen(&body);
    let Some(w) = width else {
        return Ok(body);
    };
    if visual >= w {
        return Ok(body);
    }
    let pad = w - visual;
    Ok(if conv.center {
        let l = pad / 2;
        format!("{}{}{}", " ".repeat(l), body, " ".repeat(pad - l))
    } else if conv.left {
        format!("{}{}", body, " ".repeat(pad))
    } else if conv.zero && matches!(conv.kind, 'd' | 'i' | 'f') {
        format!("{}{}", "0".repeat(pad), body)
    } else {
        format!("{}{}", " ".repeat(pad), body)
    })
}

fn format_with(
    pieces: &[Result<String, Conv>],
    args: &mut std::vec::IntoIter<Value>,
    dict: Option<&MufArray>,
) -> Result<String, MufError> {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Ok(lit) => out.push_str(lit),
            Err(conv) => {
                let width_arg = if conv.star_width {
                    match args.next() {
                        Some(Value::Int(n)) => Some(n),
                        Some(other) => {
                            return Err(MufError::Type(format!(
                                "dynamic width expects an integer, found {}",
                                other.type_name()
                            )));
                        }
                        None => return Err(MufError::StackUnderflow),
                    }
                } else {
                    None
                };
                let v = match &conv.key {
                    Some(key) => {
                        let d = dict.ok_or_else(|| {
                            MufError::Value("%[key] outside array formatting".into())
                        })?;
                        d.get(&ArrayKey::Str(key.clone())).unwrap_or(Value::str(""))
                    }
                    None => args.next().ok_or(MufError::StackUnderflow)?,
                };
                out.push_str(&render_one(conv, &v, width_arg)?);
            }
        }
    }
    Ok(out)
}

/// `argN .. arg1 fmt fmtstring`: printf-style formatting with
/// ANSI-aware widths.
pub fn fmtstring(frame: &mut Frame) -> Result<(), MufError> {
    let fmt = frame.pop_str()?;
    let (pieces, argc) = parse_format(&fmt)?;
    let mut argv = Vec::with_capacity(argc);
    for _ in 0..argc {
        argv.push(frame.pop()?);
    }
    argv.reverse();
    let mut args = argv.into_iter();
    let out = format_with(&pieces, &mut args, None)?;
    frame.push(Value::str(&out))
}

/// `arr fmt array_fmtstrings`: format each dictionary row through
/// `%[key]` conversions, producing one string per row.
pub fn array_fmtstrings(frame: &mut Frame) -> Result<(), MufError> {
    let fmt = frame.pop_str()?;
    let arr = frame.pop_array()?;
    let (pieces, _) = parse_format(&fmt)?;
    let mut rows = Vec::new();
    for k in arr.keys() {
        let row = match arr.get(&k) {
            Some(Value::Array(d)) if d.is_dict() => d,
            _ => {
                return Err(MufError::Type(
                    "array_fmtstrings expects an array of dictionaries".into(),
                ));
            }
        };
        let mut no_args = Vec::new().into_iter();
        rows.push(Value::str(&format_with(&pieces, &mut no_args, Some(&row))?));
    }
    frame.push(Value::Array(MufArray::list(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use world::{Dbref, NOTHING};

    fn frame() -> Frame {
        Frame::new(1, Dbref(1), Dbref(1), Dbref(0), NOTHING, "")
    }

    fn pop_string(fr: &mut Frame) -> String {
        match fr.pop().unwrap() {
            Value::Str(s) => s.to_string(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn explode_then_join_roundtrip() {
        let mut fr = frame();
        fr.push(Value::str("a:b:c")).unwrap();
        fr.push(Value::str(":")).unwrap();
        explode(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 3);
        // first part sits on top
        assert_eq!(pop_string(&mut fr), "a");
        assert_eq!(pop_string(&mut fr), "b");
        assert_eq!(pop_string(&mut fr), "c");
    }

    #[test]
    fn explode_aborts_on_empty_inputs() {
        let mut fr = frame();
        fr.push(Value::str("")).unwrap();
        fr.push(Value::str(":")).unwrap();
        assert!(explode(&mut fr).is_err());

        let mut fr = frame();
        fr.push(Value::str("abc")).unwrap();
        fr.push(Value::str("")).unwrap();
        assert!(explode(&mut fr).is_err());
    }

    #[test]
    fn strcut_and_midstr() {
        let mut fr = frame();
        fr.push(Value::str("abcdef")).unwrap();
        fr.push(Value::Int(2)).unwrap();
        strcut(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "cdef");
        assert_eq!(pop_string(&mut fr), "ab");

        fr.push(Value::str("abcdef")).unwrap();
        fr.push(Value::Int(2)).unwrap();
        fr.push(Value::Int(3)).unwrap();
        midstr(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "bcd");
    }

    #[test]
    fn instr_is_one_based() {
        let mut fr = frame();
        fr.push(Value::str("hello world")).unwrap();
        fr.push(Value::str("o")).unwrap();
        instr(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 5);

        fr.push(Value::str("hello world")).unwrap();
        fr.push(Value::str("o")).unwrap();
        rinstr(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 8);

        fr.push(Value::str("hello")).unwrap();
        fr.push(Value::str("z")).unwrap();
        instr(&mut fr).unwrap();
        assert_eq!(fr.pop_int().unwrap(), 0);
    }

    #[test]
    fn hashes_are_pure_functions() {
        let mut fr = frame();
        fr.push(Value::str("abc")).unwrap();
        md5hash(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "900150983cd24fb0d6963f7d28e17f72");

        fr.push(Value::str("abc")).unwrap();
        sha1hash(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn crypt_roundtrip_for_printable_input() {
        let mut fr = frame();
        fr.push(Value::str("Attack at dawn! #42")).unwrap();
        fr.push(Value::str("sekrit")).unwrap();
        strencrypt(&mut fr).unwrap();
        let cipher = pop_string(&mut fr);
        assert_ne!(cipher, "Attack at dawn! #42");

        fr.push(Value::str(&cipher)).unwrap();
        fr.push(Value::str("sekrit")).unwrap();
        strdecrypt(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "Attack at dawn! #42");
    }

    #[test]
    fn fmtstring_widths_and_conversions() {
        let mut fr = frame();
        fr.push(Value::str("ok")).unwrap();
        fr.push(Value::Int(7)).unwrap();
        fr.push(Value::str("%-5s|%03d")).unwrap();
        fmtstring(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "ok   |007");
    }

    #[test]
    fn fmtstring_center_and_dynamic_width() {
        let mut fr = frame();
        fr.push(Value::str("hi")).unwrap();
        fr.push(Value::Int(6)).unwrap();
        fr.push(Value::str("[%|*s]")).unwrap();
        fmtstring(&mut fr).unwrap();
        assert_eq!(pop_string(&mut fr), "[  hi  ]");
    }

    #[test]
    fn fmtstring_ansi_width_is_visual() {
        let mut fr = frame();
        fr.push(Value::str("\x1b[31mab\x1b[0m")).unwrap();
        fr.push(Value::str("%4s!")).unwrap();
        fmtstring(&mut fr).unwrap();
        let out = pop_string(&mut fr);
        assert_eq!(ansi::strip_ansi(&out), "  ab!");
    }

    #[test]
    fn array_fmtstrings_uses_keys() {
        use std::collections::BTreeMap;
        let mut row = BTreeMap::new();
        row.insert(ArrayKey::Str("name".into()), Value::str("Bob"));
        row.insert(ArrayKey::Str("score".into()), Value::Int(9));
        let arr = MufArray::list(vec![Value::Array(MufArray::dict(row))]);

        let mut fr = frame();
        fr.push(Value::Array(arr)).unwrap();
        fr.push(Value::str("%[name]s: %[score]d")).unwrap();
        array_fmtstrings(&mut fr).unwrap();
        let out = fr.pop_array().unwrap();
        assert_eq!(out.get(&ArrayKey::Int(0)), Some(Value::str("Bob: 9")));
    }

    #[test]
    fn pronoun_sub_defaults_to_they() {
        use world::tune::Tunables;
        let mut world = World::bootstrap(Tunables::default());
        let wiz = world.lookup_player("wizard").unwrap();
        let mut fr = frame();
        fr.push(Value::Ref(wiz)).unwrap();
        fr.push(Value::str("%N waves. %S smile%s.")).unwrap();
        pronoun_sub(&mut world, &mut fr).unwrap();
        let out = pop_string(&mut fr);
        assert_eq!(out, "Wizard waves. They smilethey.");
    }
}
