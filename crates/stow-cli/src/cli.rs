use clap::{Args, Parser, Subcommand};

use stow_core::VERSION;

/// Stow - a layered key-value store with plain and encrypted engines
#[derive(Parser)]
#[command(name = "stow")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the backend files
    #[arg(short, long, global = true, env = "STOW_DIR")]
    pub dir: Option<String>,

    /// Storage area (sync, local, session, managed)
    #[arg(short, long, global = true)]
    pub area: Option<String>,

    /// Key namespace
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Use the password-encrypted engine
    #[arg(short, long, global = true)]
    pub secure: bool,

    /// Mirror every key to the secondary store
    #[arg(long, global = true)]
    pub all_copied: bool,

    /// Mirror this key to the secondary store (repeatable)
    #[arg(long = "copied", global = true, value_name = "KEY")]
    pub copied_keys: Vec<String>,

    /// Disable interactive prompts
    #[arg(long, global = true)]
    pub no_input: bool,

    /// Config path override
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the value stored under a key
    Get(GetArgs),

    /// Store a value under a key
    Set(SetArgs),

    /// Remove a key
    Remove {
        /// Key to remove
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// List every entry in the namespace
    List(ListArgs),

    /// Clear the storage area
    Clear {
        /// Also clear the secondary store
        #[arg(long)]
        include_copies: bool,
    },

    /// Copy entries from the primary to the secondary store
    Copy {
        /// Copy only this key
        #[arg(value_name = "KEY")]
        key: Option<String>,
    },

    /// Watch keys and print their changes
    Watch(WatchArgs),

    /// Re-encrypt every entry under a new password
    Migrate(MigrateArgs),
}

/// Arguments for the `get` command
#[derive(Args)]
pub struct GetArgs {
    /// Key to read
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Pretty-print the JSON value
    #[arg(long)]
    pub pretty: bool,
}

/// Arguments for the `set` command
#[derive(Args)]
pub struct SetArgs {
    /// Key to write
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Value; parsed as JSON when possible, stored as a string otherwise
    #[arg(value_name = "VALUE")]
    pub value: String,

    /// Always store the value as a string
    #[arg(long)]
    pub string: bool,
}

/// Arguments for the `list` command
#[derive(Args)]
pub struct ListArgs {
    /// Output decoded values as JSON
    #[arg(long)]
    pub json: bool,

    /// Show values as stored, without decoding
    #[arg(long, conflicts_with = "json")]
    pub raw: bool,
}

/// Arguments for the `watch` command
#[derive(Args)]
pub struct WatchArgs {
    /// Keys to watch; with none, the whole area is re-listed on every change
    #[arg(value_name = "KEY")]
    pub keys: Vec<String>,

    /// How often to look for changes written by other processes
    #[arg(long, default_value_t = 500, value_name = "MS")]
    pub interval_ms: u64,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Arguments for the `migrate` command
#[derive(Args)]
pub struct MigrateArgs {
    /// Namespace for the re-encrypted entries
    #[arg(long)]
    pub to_namespace: Option<String>,
}
