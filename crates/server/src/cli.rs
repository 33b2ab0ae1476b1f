//! Command-line surface.

use clap::Parser;
use std::path::PathBuf;

/// Exit codes shared with the restart wrapper.
pub mod exit {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const DB_LOAD: i32 = 2;
    pub const SOCKET_V4: i32 = 3;
    pub const SOCKET_V6: i32 = 4;
    pub const BAILOUT: i32 = 7;
    pub const PANIC: i32 = 135;
    /// Asks the wrapper script to restart us.
    pub const RESTART: i32 = 32;
}

#[derive(Debug, Parser)]
#[command(
    name = "muckd",
    about = "Multi-user text world server",
    disable_version_flag = true,
    disable_help_flag = true
)]
pub struct Args {
    /// Input database path.
    pub infile: Option<PathBuf>,
    /// Output database path.
    pub outfile: Option<PathBuf>,
    /// Plaintext listening ports.
    pub ports: Vec<u16>,

    /// Override the input DB path.
    #[arg(long = "dbin", value_name = "PATH")]
    pub dbin: Option<PathBuf>,
    /// Override the output DB path.
    #[arg(long = "dbout", value_name = "PATH")]
    pub dbout: Option<PathBuf>,
    /// Add a plaintext listening port.
    #[arg(long = "port", value_name = "N")]
    pub port: Vec<u16>,
    /// Add a TLS listening port.
    #[arg(long = "sport", value_name = "N")]
    pub sport: Vec<u16>,
    /// chdir here before doing anything else.
    #[arg(long = "gamedir", value_name = "PATH")]
    pub gamedir: Option<PathBuf>,
    /// Override the tuning-parameter file.
    #[arg(long = "parmfile", value_name = "PATH")]
    pub parmfile: Option<PathBuf>,
    /// Load the db, save it, exit.
    #[arg(long = "convert")]
    pub convert: bool,
    /// Skip post-load integrity checks.
    #[arg(long = "nosanity")]
    pub nosanity: bool,
    /// Interactive repair console (not supported in this build).
    #[arg(long = "insanity")]
    pub insanity: bool,
    /// Attempt automatic repair after load.
    #[arg(long = "sanfix")]
    pub sanfix: bool,
    /// Only wizards may log in at startup.
    #[arg(long = "wizonly")]
    pub wizonly: bool,
    /// Reset dbref #1's password and convert.
    #[arg(long = "godpasswd", value_name = "PASS")]
    pub godpasswd: Option<String>,
    /// Bind IPv4 listeners to this address.
    #[arg(long = "bindv4", value_name = "ADDR")]
    pub bindv4: Option<String>,
    /// Bind IPv6 listeners to this address.
    #[arg(long = "bindv6", value_name = "ADDR")]
    pub bindv6: Option<String>,
    /// Stay in the foreground.
    #[arg(long = "nodetach")]
    pub nodetach: bool,
    /// Explicit resolver binary path.
    #[arg(long = "resolver", value_name = "PATH")]
    pub resolver: Option<PathBuf>,
    /// TLS certificate chain (PEM).
    #[arg(long = "certfile", value_name = "PATH")]
    pub certfile: Option<PathBuf>,
    /// TLS private key (PEM).
    #[arg(long = "keyfile", value_name = "PATH")]
    pub keyfile: Option<PathBuf>,
    /// Print the version and exit.
    #[arg(long = "version")]
    pub version: bool,
    /// Print usage and exit.
    #[arg(long = "help")]
    pub help: bool,
}

/// At most this many listening ports, plaintext and TLS combined each.
pub const MAX_PORTS: usize = 16;

impl Args {
    pub fn db_in(&self) -> PathBuf {
        self.dbin
            .clone()
            .or_else(|| self.infile.clone())
            .unwrap_or_else(|| PathBuf::from("data/world.db"))
    }

    pub fn db_out(&self) -> PathBuf {
        self.dbout
            .clone()
            .or_else(|| self.outfile.clone())
            .unwrap_or_else(|| self.db_in())
    }

    /// Positional ports and `--port` merged, capped at MAX_PORTS.
    pub fn plain_ports(&self) -> Vec<u16> {
        let mut all: Vec<u16> = self.ports.iter().chain(self.port.iter()).copied().collect();
        all.truncate(MAX_PORTS);
        if all.is_empty() && self.sport.is_empty() {
            all.push(4201);
        }
        all
    }

    pub fn tls_ports(&self) -> Vec<u16> {
        let mut all = self.sport.clone();
        all.truncate(MAX_PORTS);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positionals_and_options_merge() {
        let args =
            Args::parse_from(["muckd", "in.db", "out.db", "4201", "--port", "4202", "--sport", "4203"]);
        assert_eq!(args.db_in(), PathBuf::from("in.db"));
        assert_eq!(args.db_out(), PathBuf::from("out.db"));
        assert_eq!(args.plain_ports(), vec![4201, 4202]);
        assert_eq!(args.tls_ports(), vec![4203]);
    }

    #[test]
    fn dbin_overrides_positional() {
        let args = Args::parse_from(["muckd", "in.db", "--dbin", "real.db"]);
        assert_eq!(args.db_in(), PathBuf::from("real.db"));
        // outfile falls back to the effective input
        assert_eq!(args.db_out(), PathBuf::from("real.db"));
    }

    #[test]
    fn default_port_when_none_given() {
        let args = Args::parse_from(["muckd"]);
        assert_eq!(args.plain_ports(), vec![4201]);
    }
}
