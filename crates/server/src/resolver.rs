//! Optional hostname-resolver subprocess.
//!
//! Line protocol: we write `ip(port)lport`, it answers
//! `ip(port)|hostname(user)`. Lossy or partial replies are tolerated;
//! if the child dies it is respawned, at most once per five seconds.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Resolved hostname for the peer keyed by "ip(port)".
#[derive(Debug)]
pub struct Resolved {
    pub key: String,
    pub hostname: String,
    pub username: String,
}

const RESPAWN_DEBOUNCE: Duration = Duration::from_secs(5);

fn spawn_child(path: &PathBuf) -> std::io::Result<(Child, ChildStdin)> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdin = child.stdin.take().expect("piped stdin");
    Ok((child, stdin))
}

fn parse_reply(line: &str) -> Option<Resolved> {
    // ip(port)|hostname(user)
    let (key, rest) = line.split_once('|')?;
    let (host, user) = match rest.rsplit_once('(') {
        Some((h, u)) => (h, u.trim_end_matches(')')),
        None => (rest, ""),
    };
    if key.is_empty() || host.is_empty() {
        return None;
    }
    Some(Resolved {
        key: key.to_string(),
        hostname: host.to_string(),
        username: user.to_string(),
    })
}

/// Own the resolver child for the life of the server. Queries arrive
/// on `queries`; resolved names leave on `replies`.
pub async fn run(
    path: PathBuf,
    mut queries: UnboundedReceiver<String>,
    replies: UnboundedSender<Resolved>,
) {
    loop {
        let (mut child, mut stdin) = match spawn_child(&path) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(?path, %err, "cannot spawn resolver; retrying");
                tokio::time::sleep(RESPAWN_DEBOUNCE).await;
                continue;
            }
        };
        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                query = queries.recv() => {
                    match query {
                        None => {
                            let _ = child.kill().await;
                            return;
                        }
                        Some(q) => {
                            if stdin.write_all(format!("{}\n", q).as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if let Some(r) = parse_reply(text.trim()) {
                                let _ = replies.send(r);
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
        warn!("resolver died; respawning after debounce");
        let _ = child.kill().await;
        tokio::time::sleep(RESPAWN_DEBOUNCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_parsing() {
        let r = parse_reply("10.1.2.3(4201)|gateway.example.com(bob)").unwrap();
        assert_eq!(r.key, "10.1.2.3(4201)");
        assert_eq!(r.hostname, "gateway.example.com");
        assert_eq!(r.username, "bob");

        let r = parse_reply("10.1.2.3(4201)|bare.host").unwrap();
        assert_eq!(r.username, "");

        assert!(parse_reply("garbage with no pipe").is_none());
        assert!(parse_reply("|no.key").is_none());
    }
}
