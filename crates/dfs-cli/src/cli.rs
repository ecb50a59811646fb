use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use dfs_p2p::HandshakeKind;
use dfs_protocol::CodecKind;
use dfs_store::TransformKind;

#[derive(Parser)]
#[command(
    name = "dfs",
    about = "DFS: content-addressed storage replicated across peers",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a node until interrupted
    Serve(ServeArgs),
    /// Start a node, replicate one file to its peers, and exit
    Put(PutArgs),
    /// Read an object from a local store
    Get(GetArgs),
    /// Replicate an object between two in-process nodes
    Demo(DemoArgs),
}

/// Node settings shared by commands that start a node. Flags override the
/// values loaded from `--config`.
#[derive(Args, Debug, Default)]
pub struct NodeArgs {
    /// TOML file with a full node configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(short, long)]
    pub listen: Option<String>,
    /// Peer to dial on start; repeatable
    #[arg(short, long = "bootstrap")]
    pub bootstrap: Vec<String>,
    /// Store root, defaults to `<listen>_network`
    #[arg(long)]
    pub root: Option<PathBuf>,
    #[arg(long)]
    pub transform: Option<TransformKind>,
    #[arg(long)]
    pub codec: Option<CodecKind>,
    #[arg(long)]
    pub handshake: Option<HandshakeKind>,
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub node: NodeArgs,
}

#[derive(Args)]
pub struct PutArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    pub key: String,
    pub file: PathBuf,
    /// How long to wait for bootstrap peers to register
    #[arg(long, default_value_t = 10_000)]
    pub peer_wait_ms: u64,
    /// Delay before exiting, so peers can finish ingesting
    #[arg(long, default_value_t = 500)]
    pub grace_ms: u64,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(long)]
    pub root: PathBuf,
    #[arg(long, default_value = "cas")]
    pub transform: TransformKind,
    pub key: String,
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DemoArgs {
    #[arg(long, default_value = "dfs_demo")]
    pub dir: PathBuf,
    #[arg(long, default_value = "myprivatedata")]
    pub key: String,
    #[arg(long, default_value = "meow meow meow")]
    pub data: String,
    /// Leave both stores on disk afterwards
    #[arg(long)]
    pub keep: bool,
}
