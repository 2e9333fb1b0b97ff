//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use linkrec_core::{ExpirationPolicy, Role, SettleMode};

#[derive(Parser)]
#[command(name = "linkrec", about = "AMQP 1.0 link recovery diagnostics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the reconciliation decision table
    Table(TableOpts),
    /// Reconcile a single (local, remote) pair
    Reconcile(ReconcileOpts),
    /// Replay a lifecycle scenario file against a live registry
    Simulate(SimulateOpts),
}

#[derive(clap::Args)]
pub struct TableOpts {
    /// Emit JSON instead of a text table
    #[arg(long)]
    pub json: bool,

    /// Sender settle mode
    #[arg(long, value_enum, default_value = "settle-on-receive")]
    pub settle_mode: SettleModeArg,
}

#[derive(clap::Args)]
pub struct ReconcileOpts {
    /// Our record: absent, unknown, received, accepted, ..., txn, txn:<outcome>
    #[arg(long, default_value = "absent")]
    pub local: String,

    /// Peer's record, same forms as --local
    #[arg(long, default_value = "absent")]
    pub remote: String,

    /// Role of the local endpoint
    #[arg(long, value_enum, default_value = "sender")]
    pub role: RoleArg,

    /// Negotiated sender settle mode
    #[arg(long, value_enum, default_value = "settle-on-receive")]
    pub settle_mode: SettleModeArg,

    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct SimulateOpts {
    /// Scenario file (.toml or .json)
    pub scenario: PathBuf,

    /// Override the scenario's expiration policy
    #[arg(long)]
    pub policy: Option<ExpirationPolicy>,

    /// Override the scenario's expiry timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Persist deliveries in this SQLite file instead of memory
    #[arg(long, env = "LINKREC_STORE")]
    pub store: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SettleModeArg {
    SettleOnSend,
    SettleOnReceive,
    SettleOnDispose,
}

impl From<SettleModeArg> for SettleMode {
    fn from(arg: SettleModeArg) -> Self {
        match arg {
            SettleModeArg::SettleOnSend => SettleMode::SettleOnSend,
            SettleModeArg::SettleOnReceive => SettleMode::SettleOnReceive,
            SettleModeArg::SettleOnDispose => SettleMode::SettleOnDispose,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Sender,
    Receiver,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Sender => Role::Sender,
            RoleArg::Receiver => Role::Receiver,
        }
    }
}
