//! The per-connection telnet state machine.
//!
//! Bytes go in one at a time; complete command lines, option replies,
//! and upgrade requests come out. The codec never touches the socket:
//! the connection task interprets its outputs.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const EL: u8 = 248;
pub const EC: u8 = 247;
pub const AYT: u8 = 246;
pub const AO: u8 = 245;
pub const IP: u8 = 244;
pub const BRK: u8 = 243;
pub const NOP: u8 = 241;
pub const SE: u8 = 240;

/// RFC 2595-style in-band TLS upgrade.
pub const TELOPT_STARTTLS: u8 = 46;
/// Forwarded-hostname subnegotiation, honored from loopback only.
pub const TELOPT_FORWARDED: u8 = 113;

/// "1 = TLS follows" subnegotiation payload.
pub const TLS_FOLLOWS: &[u8] = &[IAC, SB, TELOPT_STARTTLS, 1, IAC, SE];

const MAX_LINE: usize = 4096;
const MAX_FORWARDED: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Sb,
    SbForwarded,
}

/// What the codec wants done.
#[derive(Debug, PartialEq, Eq)]
pub enum TelnetOut {
    /// A complete command line (newline stripped).
    Line(String),
    /// BRK/IP arrived; queue the interrupt pseudo-command.
    Break,
    /// Control bytes to send immediately, ahead of ordinary output.
    Reply(Vec<u8>),
    /// Client agreed to STARTTLS: send `TLS_FOLLOWS`, stop writing,
    /// and hand the socket to the TLS acceptor.
    StartTls,
    /// A gateway finished forwarding the real peer hostname.
    ForwardedHost(String),
}

#[derive(Debug)]
pub struct TelnetCodec {
    state: State,
    line: Vec<u8>,
    sb_opt: u8,
    forwarded: Vec<u8>,
    /// The peer has spoken telnet at least once; keepalives may use
    /// NOP instead of a bare write.
    pub telnet_seen: bool,
    /// STARTTLS may be offered/accepted (plaintext port, TLS config
    /// present, not already encrypted).
    pub allow_starttls: bool,
    /// Loopback peers may rewrite their hostname.
    pub allow_forwarding: bool,
    /// Replace TAB with a space in input.
    pub tab_to_space: bool,
    forwarding_negotiated: bool,
}

impl TelnetCodec {
    pub fn new(allow_starttls: bool, allow_forwarding: bool, tab_to_space: bool) -> Self {
        TelnetCodec {
            state: State::Normal,
            line: Vec::new(),
            sb_opt: 0,
            forwarded: Vec::new(),
            telnet_seen: false,
            allow_starttls,
            allow_forwarding,
            tab_to_space,
            forwarding_negotiated: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<TelnetOut>) {
        for &b in bytes {
            self.feed_byte(b, out);
        }
    }

    fn finish_line(&mut self, out: &mut Vec<TelnetOut>) {
        let raw = std::mem::take(&mut self.line);
        out.push(TelnetOut::Line(String::from_utf8_lossy(&raw).into_owned()));
    }

    fn feed_byte(&mut self, b: u8, out: &mut Vec<TelnetOut>) {
        match self.state {
            State::Normal => match b {
                b'\n' => self.finish_line(out),
                b'\r' => {}
                IAC => self.state = State::Iac,
                8 | 127 => {
                    self.line.pop();
                }
                b'\t' => {
                    if self.line.len() < MAX_LINE {
                        self.line.push(if self.tab_to_space { b' ' } else { b'\t' });
                    }
                }
                _ if b >= 32 => {
                    if self.line.len() < MAX_LINE {
                        self.line.push(b);
                    }
                }
                _ => {}
            },
            State::Iac => {
                self.state = State::Normal;
                match b {
                    NOP | AO | GA => {}
                    BRK | IP => out.push(TelnetOut::Break),
                    AYT => out.push(TelnetOut::Reply(b"[Yes]\r\n".to_vec())),
                    EC => {
                        self.line.pop();
                    }
                    EL => self.line.clear(),
                    WILL => self.state = State::Will,
                    WONT => self.state = State::Wont,
                    DO => self.state = State::Do,
                    DONT => self.state = State::Dont,
                    SB => self.state = State::Sb,
                    SE => {
                        if self.sb_opt == TELOPT_FORWARDED && !self.forwarded.is_empty() {
                            let host =
                                String::from_utf8_lossy(&self.forwarded).into_owned();
                            self.forwarded.clear();
                            out.push(TelnetOut::ForwardedHost(host));
                        }
                        self.sb_opt = 0;
                    }
                    IAC => {}
                    _ => {}
                }
            }
            State::Will => {
                self.state = State::Normal;
                self.telnet_seen = true;
                if b == TELOPT_STARTTLS && self.allow_starttls {
                    out.push(TelnetOut::Reply(TLS_FOLLOWS.to_vec()));
                    out.push(TelnetOut::StartTls);
                } else if b == TELOPT_FORWARDED && self.allow_forwarding {
                    out.push(TelnetOut::Reply(vec![IAC, DO, b]));
                    self.forwarding_negotiated = true;
                } else {
                    out.push(TelnetOut::Reply(vec![IAC, DONT, b]));
                }
            }
            State::Wont => {
                self.state = State::Normal;
                self.telnet_seen = true;
            }
            State::Do | State::Dont => {
                // we do not negotiate options ourselves
                self.state = State::Normal;
                self.telnet_seen = true;
                out.push(TelnetOut::Reply(vec![IAC, WONT, b]));
            }
            State::Sb => {
                self.sb_opt = b;
                if b == TELOPT_FORWARDED && self.forwarding_negotiated {
                    self.state = State::SbForwarded;
                } else {
                    self.state = State::Normal;
                }
            }
            State::SbForwarded => {
                if b == IAC {
                    self.state = State::Iac;
                } else if self.forwarded.len() < MAX_FORWARDED {
                    self.forwarded.push(b);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(codec: &mut TelnetCodec, bytes: &[u8]) -> Vec<TelnetOut> {
        let mut out = Vec::new();
        codec.feed(bytes, &mut out);
        out
    }

    #[test]
    fn plain_lines_split_on_newline() {
        let mut c = TelnetCodec::new(false, false, true);
        let out = feed(&mut c, b"look\r\nsay hi\n");
        assert_eq!(
            out,
            vec![
                TelnetOut::Line("look".into()),
                TelnetOut::Line("say hi".into())
            ]
        );
    }

    #[test]
    fn backspace_and_erase_line() {
        let mut c = TelnetCodec::new(false, false, true);
        let out = feed(&mut c, b"lokk\x08\x08ok\n");
        assert_eq!(out, vec![TelnetOut::Line("look".into())]);

        let out = feed(&mut c, &[b'x', b'y', IAC, EL, b'w', b'h', b'o', b'\n']);
        assert_eq!(out, vec![TelnetOut::Line("who".into())]);
    }

    #[test]
    fn tab_policy() {
        let mut c = TelnetCodec::new(false, false, true);
        let out = feed(&mut c, b"a\tb\n");
        assert_eq!(out, vec![TelnetOut::Line("a b".into())]);
        let mut c = TelnetCodec::new(false, false, false);
        let out = feed(&mut c, b"a\tb\n");
        assert_eq!(out, vec![TelnetOut::Line("a\tb".into())]);
    }

    #[test]
    fn unknown_options_are_refused() {
        let mut c = TelnetCodec::new(true, false, true);
        // client offers NAWS (31): we answer DONT
        let out = feed(&mut c, &[IAC, WILL, 31]);
        assert_eq!(out, vec![TelnetOut::Reply(vec![IAC, DONT, 31])]);
        // client requests an option from us: we answer WONT
        let out = feed(&mut c, &[IAC, DO, 1]);
        assert_eq!(out, vec![TelnetOut::Reply(vec![IAC, WONT, 1])]);
        assert!(c.telnet_seen);
    }

    #[test]
    fn ayt_and_break() {
        let mut c = TelnetCodec::new(false, false, true);
        let out = feed(&mut c, &[IAC, AYT, IAC, IP]);
        assert_eq!(
            out,
            vec![TelnetOut::Reply(b"[Yes]\r\n".to_vec()), TelnetOut::Break]
        );
    }

    #[test]
    fn starttls_negotiation_sequence() {
        let mut c = TelnetCodec::new(true, false, true);
        let out = feed(&mut c, &[IAC, WILL, TELOPT_STARTTLS]);
        assert_eq!(
            out,
            vec![
                TelnetOut::Reply(TLS_FOLLOWS.to_vec()),
                TelnetOut::StartTls
            ]
        );
        // with STARTTLS disallowed the same offer is declined
        let mut c = TelnetCodec::new(false, false, true);
        let out = feed(&mut c, &[IAC, WILL, TELOPT_STARTTLS]);
        assert_eq!(
            out,
            vec![TelnetOut::Reply(vec![IAC, DONT, TELOPT_STARTTLS])]
        );
    }

    #[test]
    fn forwarded_hostname_roundtrip() {
        let mut c = TelnetCodec::new(false, true, true);
        // gateway announces the option, we accept
        let out = feed(&mut c, &[IAC, WILL, TELOPT_FORWARDED]);
        assert_eq!(out, vec![TelnetOut::Reply(vec![IAC, DO, TELOPT_FORWARDED])]);
        // subnegotiated hostname
        let mut bytes = vec![IAC, SB, TELOPT_FORWARDED];
        bytes.extend_from_slice(b"real.example.net");
        bytes.extend_from_slice(&[IAC, SE]);
        let out = feed(&mut c, &bytes);
        assert_eq!(
            out,
            vec![TelnetOut::ForwardedHost("real.example.net".into())]
        );
    }

    #[test]
    fn forwarded_hostname_requires_negotiation() {
        // a non-local peer never negotiated forwarding; the subneg
        // payload is discarded
        let mut c = TelnetCodec::new(false, false, true);
        let mut bytes = vec![IAC, SB, TELOPT_FORWARDED];
        bytes.extend_from_slice(b"spoofed.example.net");
        bytes.extend_from_slice(&[IAC, SE]);
        let out = feed(&mut c, &bytes);
        assert!(out.is_empty());
    }
}
