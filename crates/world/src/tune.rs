//! Server tuning parameters.
//!
//! Every knob the core consults lives here, with its default. A parmfile
//! (TOML) may override any subset of fields.

use crate::error::Error;
use std::path::Path;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Length of one command-quota time slice, in milliseconds.
    pub command_time_msec: u64,
    /// Command tokens granted per slice (8x while INTERACTIVE).
    pub commands_per_time: i32,
    /// Cap on accumulated command tokens.
    pub command_burst_size: i32,
    /// Max bytes of buffered ordinary output per session before flushing.
    pub max_output: usize,
    /// Boot non-wizards idle longer than this many seconds (0 = off).
    pub maxidle: u64,
    /// Whether idle players are booted at all.
    pub idleboot: bool,
    /// Seconds of silence before a keepalive NOP is sent.
    pub idle_ping_time: u64,
    /// Whether keepalive pings are sent at all.
    pub idle_ping_enable: bool,
    /// Seconds an unauthenticated connection may linger at the welcome
    /// screen before being booted.
    pub connidle: u64,
    /// Allow telnet STARTTLS upgrades on plaintext ports.
    pub starttls_allow: bool,
    /// Replace TAB with a space in player input.
    pub tab_input_replaced_with_space: bool,
    /// Maximum nested FORCE depth.
    pub max_force_level: i32,
    /// "A ignoring B" also suppresses B's view of A.
    pub ignore_bidirectional: bool,
    /// Whether the ignore system is consulted at all.
    pub ignore_support: bool,
    /// Whether ZOMBIE things relay output to their owners.
    pub zombies: bool,
    /// Whether LISTEN propqueues fire on notifications.
    pub listeners: bool,
    /// Whether objects (not just rooms) may carry listeners.
    pub listeners_obj: bool,
    /// Whether listener search climbs the environment.
    pub listeners_env: bool,
    /// Instruction quantum granted to a frame per scheduling pass.
    pub instr_slice: i32,
    /// Hard per-frame instruction budget for PREEMPT runs (0 = unlimited).
    pub max_instr_count: i32,
    /// Process-table cap for queued MUF events per player (0 = unlimited).
    pub process_limit: i32,
    /// Seconds between automatic snapshot dumps (0 = off).
    pub dump_interval: u64,
    /// Wall players when a snapshot completes.
    pub dumpdone_warning: bool,
    /// Message for the dump-complete wall.
    pub dumpdone_mesg: String,
    /// Message walled when a snapshot starts.
    pub dumping_mesg: String,
    /// Deliver `huh?` for unknown commands.
    pub huh_mesg: String,
    /// Message sent to an idle-booted player.
    pub idle_mesg: String,
    /// Welcome-screen banner file.
    pub file_welcome_screen: String,
    /// Goodbye message on normal disconnect.
    pub leave_mesg: String,
    /// Only wizards may log in.
    pub wizonly_mode: bool,
    /// Treat a lone ENTER as a real command (affects idle tracking).
    pub recognize_null_command: bool,
    /// The GOD dbref (#1) is exempt from FORCE even by wizards.
    pub god_priv: bool,
    /// Player registration: `cr` creates new characters when true.
    pub registration: bool,
    /// Starting room for newly created players.
    pub player_start: i32,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            command_time_msec: 1000,
            commands_per_time: 2,
            command_burst_size: 500,
            max_output: 131_071,
            maxidle: 2 * 60 * 60,
            idleboot: false,
            idle_ping_time: 55,
            idle_ping_enable: true,
            connidle: 300,
            starttls_allow: true,
            tab_input_replaced_with_space: true,
            max_force_level: 1,
            ignore_bidirectional: true,
            ignore_support: true,
            zombies: true,
            listeners: true,
            listeners_obj: true,
            listeners_env: false,
            instr_slice: 2000,
            max_instr_count: 20000,
            process_limit: 32,
            dump_interval: 4 * 60 * 60,
            dumpdone_warning: false,
            dumpdone_mesg: "## Save complete. ##".into(),
            dumping_mesg: "## Pausing to save database. This may take a while. ##".into(),
            huh_mesg: "Huh?  (Type \"help\" for help.)".into(),
            idle_mesg: "Autodisconnecting for inactivity.".into(),
            file_welcome_screen: "data/welcome.txt".into(),
            leave_mesg: "Come back later!".into(),
            wizonly_mode: false,
            recognize_null_command: false,
            god_priv: true,
            registration: true,
            player_start: 0,
        }
    }
}

impl Tunables {
    /// Load a parmfile, overriding defaults with whatever keys it sets.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
