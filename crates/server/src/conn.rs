//! Per-connection tasks.
//!
//! Each accepted socket gets one task owning the stream and the telnet
//! codec. Complete lines and control events flow to the world task
//! over a channel; output comes back on a per-connection channel. A
//! STARTTLS upgrade happens wholly inside the task: while the TLS
//! handshake runs, the task is not draining its output channel, which
//! is exactly the write-blocking the protocol requires.

use crate::telnet::{TelnetCodec, TelnetOut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};
use world::session::OutFrame;

/// Events a connection reports to the world task.
#[derive(Debug)]
pub enum NetEvent {
    Connected {
        descr: u32,
        hostname: String,
        port: u16,
        is_ssl: bool,
        tx: UnboundedSender<OutFrame>,
    },
    Line {
        descr: u32,
        line: String,
    },
    /// Telnet BRK/IP: interrupt whatever is reading.
    Break {
        descr: u32,
    },
    TelnetSeen {
        descr: u32,
    },
    StartTlsBegun {
        descr: u32,
    },
    StartTlsDone {
        descr: u32,
        ok: bool,
    },
    ForwardedHost {
        descr: u32,
        hostname: String,
    },
    /// A resolver answer, routed through the same channel.
    HostResolved {
        key: String,
        hostname: String,
        username: String,
    },
    Gone {
        descr: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ConnOpts {
    pub allow_starttls: bool,
    pub tab_to_space: bool,
}

enum PumpEnd<S> {
    Closed,
    Upgrade(S),
}

async fn pump<S>(
    stream: S,
    codec: &mut TelnetCodec,
    descr: u32,
    world_tx: &UnboundedSender<NetEvent>,
    out_rx: &mut UnboundedReceiver<OutFrame>,
) -> PumpEnd<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    enum LoopEnd {
        Closed,
        Upgrade,
    }
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut buf = [0u8; 1024];
    let mut telnet_reported = false;
    let end = 'conn: loop {
        tokio::select! {
            read = rd.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break 'conn LoopEnd::Closed,
                    Ok(n) => n,
                };
                let mut outs = Vec::new();
                codec.feed(&buf[..n], &mut outs);
                for o in outs {
                    match o {
                        TelnetOut::Line(line) => {
                            let _ = world_tx.send(NetEvent::Line { descr, line });
                        }
                        TelnetOut::Break => {
                            let _ = world_tx.send(NetEvent::Break { descr });
                        }
                        TelnetOut::Reply(bytes) => {
                            if wr.write_all(&bytes).await.is_err() {
                                break 'conn LoopEnd::Closed;
                            }
                        }
                        TelnetOut::StartTls => {
                            let _ = world_tx.send(NetEvent::StartTlsBegun { descr });
                            // only one upgrade per connection
                            codec.allow_starttls = false;
                            break 'conn LoopEnd::Upgrade;
                        }
                        TelnetOut::ForwardedHost(hostname) => {
                            let _ = world_tx.send(NetEvent::ForwardedHost { descr, hostname });
                        }
                    }
                }
                if codec.telnet_seen && !telnet_reported {
                    telnet_reported = true;
                    let _ = world_tx.send(NetEvent::TelnetSeen { descr });
                }
            }
            frame = out_rx.recv() => {
                match frame {
                    None => break 'conn LoopEnd::Closed,
                    Some(OutFrame::Data(d)) => {
                        if wr.write_all(&d).await.is_err() {
                            break 'conn LoopEnd::Closed;
                        }
                    }
                    Some(OutFrame::Close) => {
                        let _ = wr.flush().await;
                        let _ = wr.shutdown().await;
                        break 'conn LoopEnd::Closed;
                    }
                }
            }
        }
    };
    match end {
        LoopEnd::Closed => PumpEnd::Closed,
        LoopEnd::Upgrade => PumpEnd::Upgrade(rd.unsplit(wr)),
    }
}

/// Drive one connection from accept to close.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    descr: u32,
    is_tls_port: bool,
    acceptor: Option<TlsAcceptor>,
    world_tx: UnboundedSender<NetEvent>,
    opts: ConnOpts,
) {
    let _ = stream.set_nodelay(true);
    let (tx, mut out_rx) = unbounded_channel();
    let _ = world_tx.send(NetEvent::Connected {
        descr,
        hostname: peer.ip().to_string(),
        port: peer.port(),
        is_ssl: is_tls_port,
        tx,
    });

    let mut codec = TelnetCodec::new(
        opts.allow_starttls && !is_tls_port && acceptor.is_some(),
        peer.ip().is_loopback(),
        opts.tab_to_space,
    );

    if is_tls_port {
        match acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls) => {
                    let _ = pump(tls, &mut codec, descr, &world_tx, &mut out_rx).await;
                }
                Err(err) => debug!(descr, %err, "TLS accept failed"),
            },
            None => debug!(descr, "TLS port without TLS config"),
        }
    } else {
        match pump(stream, &mut codec, descr, &world_tx, &mut out_rx).await {
            PumpEnd::Closed => {}
            PumpEnd::Upgrade(plain) => match acceptor {
                Some(acceptor) => match acceptor.accept(plain).await {
                    Ok(tls) => {
                        info!(descr, "STARTTLS");
                        let _ = world_tx.send(NetEvent::StartTlsDone { descr, ok: true });
                        let _ = pump(tls, &mut codec, descr, &world_tx, &mut out_rx).await;
                    }
                    Err(err) => {
                        debug!(descr, %err, "STARTTLS handshake failed");
                        let _ = world_tx.send(NetEvent::StartTlsDone { descr, ok: false });
                    }
                },
                None => {
                    let _ = world_tx.send(NetEvent::StartTlsDone { descr, ok: false });
                }
            },
        }
    }

    let _ = world_tx.send(NetEvent::Gone { descr });
}
