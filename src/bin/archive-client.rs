//! Command-line client for the archive relay.
//!
//! `upload` pushes a file through the chunked protocol; `download` fetches
//! the latest archive (or the latest revision of a named file).

use anyhow::{Context, Result, bail};
use archive_relay::models::chunk::{ChunkRequest, ChunkResponse};
use base64::{Engine as _, engine::general_purpose};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use reqwest::{Client, Response, header};
use std::path::{Path, PathBuf};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing_subscriber::EnvFilter;

/// Size of each chunk before base64 encoding.
const CHUNK_SIZE: usize = 100 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload to and download from an archive relay")]
struct Cli {
    /// Base URL of the relay
    #[arg(long, env = "ARCHIVE_RELAY_URL", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file in chunks
    Upload {
        path: PathBuf,
        /// Name to upload under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download the latest archive, or the latest revision of NAME
    Download {
        name: Option<String>,
        /// Directory to write the download into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new();
    let server = cli.server.trim_end_matches('/');

    match cli.command {
        Command::Upload { path, name } => upload(&client, server, &path, name).await,
        Command::Download { name, out_dir } => download(&client, server, name, &out_dir).await,
    }
}

async fn upload(client: &Client, server: &str, path: &Path, name: Option<String>) -> Result<()> {
    let file_name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("{} has no usable file name", path.display()))?,
    };
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let chunks: Vec<&[u8]> = if content.is_empty() {
        vec![&content[..]]
    } else {
        content.chunks(CHUNK_SIZE).collect()
    };
    let total = chunks.len();
    tracing::info!("Uploading {} ({} bytes) in {} chunks", file_name, content.len(), total);

    let url = format!("{}/chunks", server);
    let mut last = None;
    for (index, chunk) in chunks.into_iter().enumerate() {
        let request = ChunkRequest {
            data: general_purpose::STANDARD.encode(chunk),
            chunk_number: (index + 1) as u32,
            total_chunks: total as u32,
            file_name: file_name.clone(),
            is_started: index == 0,
            is_completed: index + 1 == total,
        };

        let response = ensure_success(client.post(&url).json(&request).send().await?).await?;
        let body: ChunkResponse = response.json().await?;
        tracing::debug!("chunk {}/{} -> {:?}", index + 1, total, body.status);
        last = Some(body);
    }

    match last.and_then(|body| body.url.zip(body.filename)) {
        Some((url, filename)) => println!("Uploaded {} as {} -> {}", file_name, filename, url),
        None => bail!("relay did not report a committed object"),
    }
    Ok(())
}

async fn download(
    client: &Client,
    server: &str,
    name: Option<String>,
    out_dir: &Path,
) -> Result<()> {
    let request = match &name {
        Some(name) => client
            .get(format!("{}/download", server))
            .query(&[("filename", name)]),
        None => client.get(format!("{}/latest", server)),
    };
    let response = ensure_success(request.send().await?).await?;

    let remote_name = disposition_filename(&response)
        .or_else(|| {
            response
                .url()
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .or(name)
        .unwrap_or_else(|| format!("{}.bin", chrono::Utc::now().timestamp()));
    let target = out_dir.join(format!("downloaded_{}", remote_name));

    let mut file = File::create(&target)
        .await
        .with_context(|| format!("creating {}", target.display()))?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    println!("Downloaded {} bytes to {}", written, target.display());
    Ok(())
}

/// Filename from `Content-Disposition: attachment; filename=<name>`.
fn disposition_filename(response: &Response) -> Option<String> {
    let value = response
        .headers()
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let (_, name) = value.split_once("filename=")?;
    let name = name.split(';').next()?.trim().trim_matches('"');
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("relay answered {}: {}", status, body)
}
