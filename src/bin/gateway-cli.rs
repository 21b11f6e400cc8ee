use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Test client for the RPC gateway", long_about = None)]
struct Cli {
    /// Sent as x-request-id when given.
    #[arg(short, long, global = true)]
    request_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// POST a JSON body and print the reply
    Http {
        #[arg(short, long, default_value = "http://localhost:8585/httpcase")]
        url: String,

        /// JSON body; empty lets the gateway send its default greeting.
        #[arg(short, long, default_value = "")]
        data: String,
    },
    /// Stream a file as binary frames, then "EOS", and print what comes back
    Stream {
        #[arg(short, long, default_value = "ws://localhost:8585/websocket")]
        url: String,

        /// File to upload; a few greeting frames are sent when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long, default_value_t = 32 * 1024)]
        chunk_size: usize,

        /// Delay between frames in milliseconds.
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Http { url, data } => http(&url, data, cli.request_id.as_deref()).await,
        Commands::Stream {
            url,
            file,
            chunk_size,
            pace_ms,
        } => {
            let frames = match file {
                Some(path) => chunk(Bytes::from(tokio::fs::read(path).await?), chunk_size.max(1)),
                None => (1..=3)
                    .map(|i| Bytes::from(format!("{{\"saying\":\"hello {}\"}}", i)))
                    .collect(),
            };
            stream(&url, frames, Duration::from_millis(pace_ms), cli.request_id.as_deref()).await
        }
    }
}

async fn http(url: &str, data: String, request_id: Option<&str>) -> CliResult<()> {
    let client = reqwest::Client::new();
    let mut request = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(data);
    if let Some(id) = request_id {
        request = request.header("x-request-id", id);
    }

    let res = request.send().await?;
    let status = res.status();
    if let Some(id) = res.headers().get("x-request-id") {
        eprintln!("x-request-id: {}", id.to_str().unwrap_or("<binary>"));
    }
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }
    print_json(&text)
}

async fn stream(url: &str, frames: Vec<Bytes>, pace: Duration, request_id: Option<&str>) -> CliResult<()> {
    let mut request = url.into_client_request()?;
    if let Some(id) = request_id {
        request.headers_mut().insert("x-request-id", HeaderValue::from_str(id)?);
    }

    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    let (mut writer, mut reader) = socket.split();

    let total = frames.len();
    let upload = tokio::spawn(async move {
        for frame in frames {
            writer.send(Message::Binary(frame)).await?;
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
        }
        writer.send(Message::Binary(Bytes::from_static(b"EOS"))).await?;
        Ok::<_, tokio_tungstenite::tungstenite::Error>(writer)
    });
    eprintln!("sending {} frames", total);

    while let Some(message) = reader.next().await {
        match message? {
            Message::Binary(data) => println!("<- {} bytes: {}", data.len(), String::from_utf8_lossy(&data)),
            Message::Text(text) => print_json(text.as_str())?,
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    eprintln!("closed: {} {}", u16::from(frame.code), frame.reason.as_str());
                }
                break;
            }
            _ => {}
        }
    }

    // The gateway may close before the upload finishes when it rejects a frame.
    match upload.await? {
        Ok(_) => {}
        Err(e) => eprintln!("upload stopped: {}", e),
    }
    Ok(())
}

fn chunk(data: Bytes, size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(size)
        .map(|start| data.slice(start..(start + size).min(data.len())))
        .collect()
}

fn print_json(text: &str) -> CliResult<()> {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
