//! Terminal escape handling for the string primitives and the
//! notification fabric.
//!
//! The visual length of a string excludes escape sequences; cutting and
//! slicing must never split one in half.

const ESC: char = '\x1b';

/// One lexed piece of a string: a visible char or a whole escape
/// sequence.
enum Piece<'a> {
    Visible(char),
    Escape(&'a str),
}

fn pieces(s: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut iter = s.char_indices().peekable();
    while let Some((start, ch)) = iter.next() {
        if ch != ESC {
            out.push(Piece::Visible(ch));
            continue;
        }
        // CSI sequences run to the first alphabetic final byte; a bare
        // escape swallows one following char
        let mut end = start + ch.len_utf8();
        if let Some((_, '[')) = iter.peek().copied() {
            for (i, c) in iter.by_ref() {
                end = i + c.len_utf8();
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else if let Some((i, c)) = iter.next() {
            end = i + c.len_utf8();
        }
        out.push(Piece::Escape(&s[start..end]));
    }
    out
}

/// Visible length, escape sequences excluded.
pub fn ansi_strlen(s: &str) -> usize {
    pieces(s)
        .iter()
        .filter(|p| matches!(p, Piece::Visible(_)))
        .count()
}

/// Remove every escape sequence.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for p in pieces(s) {
        if let Piece::Visible(c) = p {
            out.push(c);
        }
    }
    out
}

/// Keep SGR color sequences (`ESC[...m`), drop everything else a
/// client could abuse (cursor movement, clears).
pub fn sanitize_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for p in pieces(s) {
        match p {
            Piece::Visible(c) => out.push(c),
            Piece::Escape(seq) => {
                if seq.ends_with('m') && seq.starts_with("\x1b[") {
                    out.push_str(seq);
                }
            }
        }
    }
    out
}

/// Split after `n` visible characters. Escape sequences stay attached
/// to the side they were on.
pub fn ansi_strcut(s: &str, n: usize) -> (String, String) {
    let mut head = String::new();
    let mut tail = String::new();
    let mut seen = 0usize;
    for p in pieces(s) {
        let target = if seen < n { &mut head } else { &mut tail };
        match p {
            Piece::Visible(c) => {
                target.push(c);
                seen += 1;
            }
            Piece::Escape(seq) => target.push_str(seq),
        }
    }
    (head, tail)
}

/// 1-based visible substring of `len` characters starting at `start`.
pub fn ansi_midstr(s: &str, start: usize, len: usize) -> String {
    let (_, rest) = ansi_strcut(s, start.saturating_sub(1));
    let (mid, _) = ansi_strcut(&rest, len);
    mid
}
