use altair_db::completions::CompletionShell;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "altair-db")]
#[command(version)]
#[command(about = "Manage the shared Altair database service", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show whether the database service is installed and running
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the database service and wait until it is ready
    Start,

    /// Stop the database service
    Stop,

    /// Stop, pause briefly, then start again
    Restart,

    /// Register the database as an OS service (systemd, launchd, Windows SCM)
    Install,

    /// Remove the OS service registration
    Uninstall,

    /// Start the service automatically at login/boot
    Enable,

    /// Stop starting the service automatically
    Disable,

    /// Manage the service credentials
    Credentials {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Full-text search across quests, notes, items, initiatives and routines
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Manage links between records
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
pub(crate) enum CredentialCommands {
    /// Show the stored username and where the credentials live
    Show,

    /// Generate a new password, changing it inside an existing database first
    Generate {
        /// Replace existing credentials
        #[arg(long)]
        force: bool,

        /// Password length (minimum 16)
        #[arg(long, default_value = "32")]
        length: usize,
    },

    /// Delete stored credentials
    Delete,
}

#[derive(Subcommand)]
pub(crate) enum LinkCommands {
    /// Link two records (e.g. quest:abc note:xyz relates)
    Add {
        source: String,
        target: String,
        link_type: String,

        /// JSON object stored with the link
        #[arg(long)]
        metadata: Option<String>,

        /// Who created the link
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Remove a link
    Remove {
        source: String,
        target: String,
        link_type: String,
    },

    /// List everything linked to a record
    List {
        resource: String,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}
