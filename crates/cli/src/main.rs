//! Command-line client for pallet.

mod api_client;
mod push;

use anyhow::{Context, Result};
use api_client::ApiClient;
use clap::{Parser, Subcommand};
use push::{PushOptions, RetryConfig, push_file};
use std::path::PathBuf;
use std::time::Duration;

/// Default append size: 8 MiB.
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "palletctl")]
#[command(about = "Resumable upload client for pallet")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(
        long,
        env = "PALLET_SERVER",
        default_value = "http://127.0.0.1:8080",
        global = true
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and import it, resuming an earlier session if given
    Push {
        /// File to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Declared name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Resume this upload session
        #[arg(long)]
        upload_id: Option<String>,

        /// Bytes per append request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Metadata to attach, as a JSON document
        #[arg(long, default_value = "{}")]
        metadata: String,

        /// Repository to attach the content to
        #[arg(long = "repo")]
        repo_id: Option<String>,

        /// Retries for transient failures per request
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
    /// Show an upload session's progress
    Status {
        upload_id: String,
    },
    /// Abort an upload session
    Abort {
        upload_id: String,
    },
    /// Show an imported content object and its attachments
    Show {
        checksum: String,
    },
    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Cli { server, command } = Cli::parse();
    let client = ApiClient::new(&server)?;

    match command {
        Commands::Push {
            file,
            name,
            upload_id,
            chunk_size,
            metadata,
            repo_id,
            retries,
        } => {
            let metadata: serde_json::Value =
                serde_json::from_str(&metadata).context("--metadata must be valid JSON")?;
            let opts = PushOptions {
                file,
                name,
                upload_id,
                chunk_size,
                metadata,
                repo_id,
                retry: RetryConfig {
                    max_retries: retries,
                    base_delay: Duration::from_secs(1),
                },
            };
            handle_push_command(&client, &opts).await
        }
        Commands::Status { upload_id } => handle_status_command(&client, &upload_id).await,
        Commands::Abort { upload_id } => {
            client.abort(&upload_id).await?;
            println!("Aborted upload {upload_id}");
            Ok(())
        }
        Commands::Show { checksum } => handle_show_command(&client, &checksum).await,
        Commands::Health => handle_health_command(&client).await,
    }
}

async fn handle_push_command(client: &ApiClient, opts: &PushOptions) -> Result<()> {
    let outcome = push_file(client, opts).await?;

    println!("Imported {}", opts.file.display());
    println!("  Checksum: sha256:{}", outcome.checksum);
    println!("  Size:     {}", format_bytes(outcome.size));
    println!("  Location: {}", outcome.storage_location);
    match outcome.deduplicated {
        Some(true) => println!("  Content already stored; metadata attached"),
        Some(false) => {}
        None => println!("  Import confirmed by content lookup"),
    }
    if outcome.resumed_from > 0 {
        println!("  Resumed from byte {}", outcome.resumed_from);
    }
    Ok(())
}

async fn handle_status_command(client: &ApiClient, upload_id: &str) -> Result<()> {
    let status = client.get_upload(upload_id).await?;
    println!("Upload {}", status.upload_id);
    println!("  Name:     {}", status.name);
    println!("  Status:   {}", status.status);
    println!(
        "  Progress: {} / {} ({})",
        status.offset,
        status.size,
        format_percent(status.offset, status.size)
    );
    println!("  Checksum: sha256:{}", status.checksum);
    println!("  Expires:  {}", status.expires_at);
    Ok(())
}

async fn handle_show_command(client: &ApiClient, checksum: &str) -> Result<()> {
    let content = client.get_content(checksum).await?;
    println!("Content sha256:{}", content.checksum);
    println!("  Size:     {}", format_bytes(content.size));
    println!("  Location: {}", content.storage_location);
    println!("  Created:  {}", content.created_at);
    println!("  Attachments: {}", content.attachments.len());
    for attachment in &content.attachments {
        let repo = attachment.repo_id.as_deref().unwrap_or("-");
        println!("    [{repo}] {}", attachment.metadata);
    }
    Ok(())
}

async fn handle_health_command(client: &ApiClient) -> Result<()> {
    match client.health().await {
        Ok(_) => {
            println!("{}: ok", client.base_url());
            Ok(())
        }
        Err(e) => anyhow::bail!("{} is unhealthy: {e}", client.base_url()),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_percent(done: u64, total: u64) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    format!("{:.0}%", done as f64 * 100.0 / total as f64)
}
