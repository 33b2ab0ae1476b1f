//! muckd: the server binary.

mod cli;
mod conn;
mod resolver;
mod sched;
mod signals;
mod telnet;
mod tls;

use clap::{CommandFactory, Parser};
use cli::{Args, exit};
use conn::{ConnOpts, NetEvent};
use sched::{GameServer, ServerConfig, SharedAcceptor};
use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use vm::Machine;
use world::pager::SnapshotPaths;
use world::tune::Tunables;
use world::{Dbref, World};

static NEXT_DESCR: AtomicU32 = AtomicU32::new(1);

const VERSION: &str = concat!("muckd ", env!("CARGO_PKG_VERSION"));

fn main() -> ExitCode {
    let args = Args::parse();
    if args.version {
        println!("{}", VERSION);
        return ExitCode::from(exit::OK as u8);
    }
    if args.help {
        let _ = Args::command().print_help();
        return ExitCode::from(exit::USAGE as u8);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Some(dir) = &args.gamedir {
        if let Err(err) = std::env::set_current_dir(dir) {
            error!(?dir, %err, "cannot chdir to gamedir");
            return ExitCode::from(exit::USAGE as u8);
        }
    }

    let tune = match &args.parmfile {
        Some(path) => match Tunables::load(path) {
            Ok(t) => t,
            Err(err) => {
                error!(?path, %err, "bad parmfile");
                return ExitCode::from(exit::USAGE as u8);
            }
        },
        None => Tunables::default(),
    };

    // load or bootstrap the database
    let in_paths = SnapshotPaths::diskbase(&args.db_in());
    let mut world = if args.db_in().exists() {
        match world::pager::load_snapshot(&in_paths) {
            Ok((arena, pager)) => World::from_snapshot(arena, pager, tune.clone()),
            Err(err) => {
                error!(%err, "could not load the database");
                return ExitCode::from(exit::DB_LOAD as u8);
            }
        }
    } else {
        info!("no database found; bootstrapping a fresh world");
        World::bootstrap(tune.clone())
    };

    if !args.nosanity && !sanity_check(&world, args.sanfix) {
        error!("database failed the sanity check (use --sanfix or --nosanity)");
        return ExitCode::from(exit::DB_LOAD as u8);
    }
    if args.insanity {
        error!("interactive repair is not supported in this build");
        return ExitCode::from(exit::USAGE as u8);
    }

    let mut convert = args.convert;
    if let Some(pass) = &args.godpasswd {
        if let Err(err) = world.set_password(Dbref(1), pass) {
            error!(%err, "could not reset the god password");
            return ExitCode::from(exit::DB_LOAD as u8);
        }
        convert = true;
    }

    let out_paths = SnapshotPaths::diskbase(&args.db_out());
    if convert {
        return match world::pager::write_snapshot(&world.arena, world.pager.as_ref(), &out_paths)
        {
            Ok(()) => ExitCode::from(exit::OK as u8),
            Err(err) => {
                error!(%err, "convert failed");
                ExitCode::from(exit::DB_LOAD as u8)
            }
        };
    }

    if let Err(err) = write_pid_file("muckd.pid") {
        warn!(%err, "could not write the pid file");
    }

    // single thread by design: the world is owned by one task, and a
    // forked dumper never races a sibling thread
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(%err, "runtime");
            return ExitCode::from(exit::USAGE as u8);
        }
    };
    let local = LocalSet::new();
    let code = local.block_on(&runtime, serve(args, world, out_paths));
    ExitCode::from(code as u8)
}

/// Cheap structural checks: every live object must appear in its
/// location's contents or exits chain.
fn sanity_check(world: &World, _fix: bool) -> bool {
    for d in world.arena.iter_live() {
        let Ok(obj) = world.arena.get(d) else {
            return false;
        };
        let loc = obj.location;
        if loc.is_objref() {
            if !world.arena.is_valid_object(loc) {
                return false;
            }
            if !world.arena.contents_of(loc).any(|c| c == d)
                && !world.arena.exits_of(loc).any(|c| c == d)
            {
                return false;
            }
        }
    }
    true
}

fn write_pid_file(path: &str) -> std::io::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
}

fn bind_addr(bindv4: &Option<String>, bindv6: &Option<String>, port: u16) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    match bindv4 {
        Some(a) => {
            if let Ok(ip) = a.parse::<Ipv4Addr>() {
                out.push(SocketAddr::new(IpAddr::V4(ip), port));
            }
        }
        None => out.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
    }
    match bindv6 {
        Some(a) => {
            if let Ok(ip) = a.parse::<Ipv6Addr>() {
                out.push(SocketAddr::new(IpAddr::V6(ip), port));
            }
        }
        None => out.push(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)),
    }
    out
}

async fn listen_on(
    addrs: Vec<SocketAddr>,
    is_tls_port: bool,
    acceptor: SharedAcceptor,
    world_tx: UnboundedSender<NetEvent>,
    opts: ConnOpts,
) -> Result<(), i32> {
    for addr in addrs {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(err) => {
                // dual-stack systems often refuse the v6 twin bind
                if addr.is_ipv6() {
                    warn!(%addr, %err, "ipv6 bind failed; continuing");
                    continue;
                }
                error!(%addr, %err, "bind failed");
                return Err(if addr.is_ipv4() {
                    exit::SOCKET_V4
                } else {
                    exit::SOCKET_V6
                });
            }
        };
        info!(%addr, tls = is_tls_port, "listening");
        let acceptor = acceptor.clone();
        let world_tx = world_tx.clone();
        tokio::task::spawn_local(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let descr = NEXT_DESCR.fetch_add(1, Ordering::Relaxed);
                        let acc = acceptor.borrow().clone();
                        let tx = world_tx.clone();
                        tokio::task::spawn_local(conn::handle_connection(
                            stream, peer, descr, is_tls_port, acc, tx, opts,
                        ));
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }
                }
            }
        });
    }
    Ok(())
}

async fn serve(args: Args, world: World, snapshot: SnapshotPaths) -> i32 {
    let acceptor: SharedAcceptor = Rc::new(RefCell::new(None));
    if let (Some(cert), Some(key)) = (&args.certfile, &args.keyfile) {
        match tls::load_acceptor(cert, key) {
            Ok(acc) => *acceptor.borrow_mut() = Some(acc),
            Err(err) => {
                error!(%err, "TLS configuration failed");
                return exit::USAGE;
            }
        }
    }
    if !args.tls_ports().is_empty() && acceptor.borrow().is_none() {
        error!("TLS ports requested without --certfile/--keyfile");
        return exit::USAGE;
    }

    let (world_tx, world_rx) = unbounded_channel();

    let opts = ConnOpts {
        allow_starttls: world.tune.starttls_allow,
        tab_to_space: world.tune.tab_input_replaced_with_space,
    };
    for port in args.plain_ports() {
        let addrs = bind_addr(&args.bindv4, &args.bindv6, port);
        if let Err(code) = listen_on(addrs, false, acceptor.clone(), world_tx.clone(), opts).await
        {
            return code;
        }
    }
    for port in args.tls_ports() {
        let addrs = bind_addr(&args.bindv4, &args.bindv6, port);
        if let Err(code) = listen_on(addrs, true, acceptor.clone(), world_tx.clone(), opts).await {
            return code;
        }
    }

    // optional hostname resolver subprocess
    let resolver_tx = match &args.resolver {
        Some(path) => {
            let (qtx, qrx) = unbounded_channel();
            let replies = world_tx.clone();
            let (rtx, mut rrx) = unbounded_channel::<resolver::Resolved>();
            tokio::task::spawn_local(resolver::run(path.clone(), qrx, rtx));
            tokio::task::spawn_local(async move {
                while let Some(r) = rrx.recv().await {
                    let _ = replies.send(NetEvent::HostResolved {
                        key: r.key,
                        hostname: r.hostname,
                        username: r.username,
                    });
                }
            });
            Some(qtx)
        }
        None => None,
    };

    let signals = match signals::Signals::install() {
        Ok(s) => s,
        Err(err) => {
            error!(%err, "signal installation failed");
            return exit::BAILOUT;
        }
    };

    let cfg = ServerConfig {
        snapshot,
        certfile: args.certfile.clone(),
        keyfile: args.keyfile.clone(),
        wizonly: args.wizonly,
    };
    let server = GameServer::new(
        world,
        Machine::new(),
        world_rx,
        signals,
        resolver_tx,
        acceptor,
        cfg,
    );
    server.run().await
}
