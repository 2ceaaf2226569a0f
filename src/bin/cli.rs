//! CLI for talking to a filemesh gateway

use anyhow::Context;
use clap::{Parser, Subcommand};
use filemesh::protocol::Request;
use filemesh::RawClient;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "filemesh")]
#[command(about = "filemesh distributed file store CLI")]
#[command(version)]
struct Cli {
    /// Gateway raw TCP address
    #[arg(long, default_value = "127.0.0.1:12346")]
    gateway: String,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// File path
        file: PathBuf,

        /// Stored name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a document
    Download {
        name: String,

        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a document as text
    View { name: String },

    /// Delete a document
    Delete { name: String },

    /// List stored documents
    List,

    /// Show the coordinator of the node serving this connection
    Coordinator,

    /// Interactive session; one command per line
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut client = RawClient::connect(&cli.gateway)
        .await
        .with_context(|| format!("connecting to gateway at {}", cli.gateway))?
        .with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Upload { file, name } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("cannot derive a document name; pass --name")?,
            };
            println!("{}", client.upload(&name, &content).await?);
        }

        Commands::Download { name, output } => {
            let content = client.download(&name).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &content).await?;
                    println!("Saved {} bytes to {}", content.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&content)),
            }
        }

        Commands::View { name } => {
            println!("{}", client.view(&name).await?);
        }

        Commands::Delete { name } => {
            println!("{}", client.delete(&name).await?);
        }

        Commands::List => {
            let names = client.list().await?;
            if names.is_empty() {
                println!("No files available");
            }
            for name in names {
                println!("{}", name);
            }
        }

        Commands::Coordinator => {
            println!("Coordinator: {}", client.coordinator().await?);
        }

        Commands::Shell => shell(client).await?,
    }

    Ok(())
}

async fn shell(mut client: RawClient) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match Request::parse(line) {
            Ok(request) => client.request(&request).await?,
            // let the node word the error
            Err(_) => {
                client.send_line(line).await?;
                loop {
                    match client.read_line().await? {
                        Some(reply) if reply.starts_with("ERROR ") => break reply,
                        Some(_) => continue,
                        None => anyhow::bail!("connection closed"),
                    }
                }
            }
        };
        println!("{}", reply);
        if reply.starts_with("BYE") {
            break;
        }
    }
    Ok(())
}
