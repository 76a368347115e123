use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod progress;

#[derive(Parser)]
#[command(name = "relaydrive")]
#[command(about = "Chunked, encrypted file storage on a rate-limited remote store")]
#[command(version)]
struct Cli {
    /// Bot token for the remote store
    #[arg(long, global = true, env = "RELAYDRIVE_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Channel that receives the shards
    #[arg(long = "channel", global = true, env = "RELAYDRIVE_CHANNEL")]
    channel_id: Option<String>,

    /// Encryption password (manual key mode)
    #[arg(long, global = true, env = "RELAYDRIVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Folder id recorded on the new files
        #[arg(long)]
        parent: Option<String>,
    },
    /// Download a stored file
    Download {
        file_id: String,
        /// Destination path (defaults to the stored file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Reassemble in memory before writing
        #[arg(long)]
        in_memory: bool,
        /// Skip the large in-memory download prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a stored file and its shards
    Delete { file_id: String },
    /// List stored files
    List {
        #[arg(long)]
        json: bool,
    },
    /// Set up encryption
    InitKey {
        /// Generate and store the password instead of asking for it
        #[arg(long)]
        automatic: bool,
        /// Replace existing settings
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,relaydrive=debug"
    } else {
        "warn,relaydrive=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Context {
        password: cli.password,
        bot_token: cli.bot_token,
        channel_id: cli.channel_id,
    };

    match cli.command {
        Commands::Upload { files, parent } => commands::upload(&ctx, files, parent).await,
        Commands::Download {
            file_id,
            output,
            in_memory,
            yes,
        } => commands::download(&ctx, file_id, output, in_memory, yes).await,
        Commands::Delete { file_id } => commands::delete(&ctx, file_id).await,
        Commands::List { json } => commands::list(json).await,
        Commands::InitKey { automatic, force } => commands::init_key(automatic, force),
    }
}
