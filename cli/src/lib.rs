//! Command-line access to any configured storage backend
//!
//! ```text
//! asto --config storage.json ls [prefix]
//! asto --config storage.json put <key> [file]     # stdin when no file
//! asto --config storage.json get <key>
//! asto --config storage.json mv <source> <destination>
//! asto --config storage.json rm <key>
//! asto --config storage.json stat <key>
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use asto::{Attribute, Config, Content, Key, Meta, Storage};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "asto", version, about = "Blob storage client", long_about = None)]
pub struct Cli {
    /// Backend configuration: a JSON object whose `type` field names the backend
    #[arg(short, long)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List keys nested under a prefix (everything by default)
    Ls { prefix: Option<String> },

    /// Write a value to stdout
    Get { key: String },

    /// Store a file, or stdin when no file is given
    Put { key: String, file: Option<PathBuf> },

    /// Move a value, overwriting the destination
    Mv { source: String, destination: String },

    /// Delete a value
    Rm { key: String },

    /// Print a value's metadata as JSON
    Stat { key: String },
}

/// `stat` output; times are milliseconds since the Unix epoch
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub key: String,
    pub size: Option<u64>,
    pub created: Option<u64>,
    pub modified: Option<u64>,
    pub accessed: Option<u64>,
}

impl Stat {
    #[must_use]
    pub fn new(key: &Key, meta: &Meta) -> Self {
        let millis = |attr| {
            meta.time(attr)
                .and_then(|t: SystemTime| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| u64::try_from(d.as_millis()).ok())
        };
        Self {
            key: key.string(),
            size: meta.size(),
            created: millis(Attribute::Created),
            modified: millis(Attribute::Modified),
            accessed: millis(Attribute::Accessed),
        }
    }
}

/// Read and parse the backend configuration file
///
/// # Errors
///
/// Unreadable file or malformed JSON.
pub async fn load_config(path: &Path) -> Result<Config> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read config {}", path.display()))?;
    Config::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Build the configured storage and run the command, writing output to `out`
///
/// # Errors
///
/// Configuration, storage, or output errors.
pub async fn run<W>(cli: Cli, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let config = load_config(&cli.config).await?;
    let storage = asto::storage(&config)?;
    debug!(storage = %storage.identifier(), command = ?cli.command, "running");
    execute(&*storage, cli.command, out).await
}

/// Run one command against `storage`
///
/// # Errors
///
/// Storage or output errors.
pub async fn execute<W>(storage: &dyn Storage, command: Command, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    match command {
        Command::Ls { prefix } => {
            let prefix = prefix.as_deref().map_or(Key::ROOT, Key::parse);
            for key in storage.list(&prefix).await? {
                out.write_all(format!("{key}\n").as_bytes()).await?;
            }
        }
        Command::Get { key } => {
            let key = Key::parse(&key);
            let mut content = storage.value(&key).await?;
            while let Some(chunk) = content.next().await {
                let chunk = chunk.with_context(|| format!("reading {key}"))?;
                out.write_all(&chunk).await?;
            }
        }
        Command::Put { key, file } => {
            let key = Key::parse(&key);
            let content = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("cannot open {}", path.display()))?;
                    let size = file.metadata().await?.len();
                    Content::from_reader(file, Some(size))
                }
                None => Content::from_reader(tokio::io::stdin(), None),
            };
            storage.save(&key, content).await?;
        }
        Command::Mv {
            source,
            destination,
        } => {
            storage
                .move_to(&Key::parse(&source), &Key::parse(&destination))
                .await?;
        }
        Command::Rm { key } => {
            storage.delete(&Key::parse(&key)).await?;
        }
        Command::Stat { key } => {
            let key = Key::parse(&key);
            let meta = storage.metadata(&key).await?;
            let json = serde_json::to_string_pretty(&Stat::new(&key, &meta))?;
            out.write_all(json.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }
    out.flush().await?;
    Ok(())
}
