//! `neromon-cli`: a thin one-shot client for the daemon's JSON-RPC bridge.
//!
//! Sends a single request line over the bridge's Unix socket and prints the
//! response line to stdout, exiting non-zero on a transport or bridge-level
//! error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use neromon_core::paths::DataPaths;

#[derive(Parser, Debug)]
#[command(name = "neromon-cli", author, version, about = "Client for the neromon daemon's JSON-RPC bridge")]
struct Args {
    /// Directory holding the daemon's state (for locating bridge.sock).
    /// Defaults to the OS-appropriate data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bridge method to invoke: put, get, remove, map, status, clear.
    method: String,

    /// JSON object of method parameters, e.g. '{"key_hex":"..."}'.
    #[arg(default_value = "{}")]
    params: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let paths = DataPaths::resolve(args.data_dir.as_deref())?;
    let params: serde_json::Value = serde_json::from_str(&args.params)?;

    let mut stream = UnixStream::connect(paths.bridge_socket_path()).await?;
    let request = serde_json::json!({
        "id": rand::random::<u64>(),
        "method": args.method,
        "params": params,
    });
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    stream.write_all(&line).await?;

    let mut reader = BufReader::new(stream).lines();
    let response_line = reader
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("bridge closed the connection without responding"))?;
    println!("{response_line}");

    let response: serde_json::Value = serde_json::from_str(&response_line)?;
    if response.get("error").is_some() {
        anyhow::bail!("bridge returned an error: {response_line}");
    }
    Ok(())
}
