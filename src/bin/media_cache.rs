// media_cache - derived-media cache daemon
// Serves cache operations over a Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use media_cache::organ::{CacheOrgan, Organ, Response, Stimulus};
use media_cache::{CacheConfig, CacheStore};

/// Frames above this size are rejected before the body is read.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "media_cache", version, about = "Derived-media cache daemon")]
struct Args {
    /// JSON config file; command line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding published renditions
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Parent directory for per-job scratch directories
    #[arg(long)]
    scratch_path: Option<PathBuf>,

    /// Concurrent image and document conversions
    #[arg(long)]
    threads: Option<usize>,

    /// Unix socket path for UDS server
    #[arg(long, default_value = "/tmp/media_cache.sock")]
    socket_path: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::load(path)?,
            None => CacheConfig::default(),
        };
        if let Some(cache_path) = &self.cache_path {
            config.cache_path = cache_path.clone();
        }
        if let Some(scratch_path) = &self.scratch_path {
            config.scratch_path = Some(scratch_path.clone());
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level))
        )
        .init();

    let config = args.cache_config()?;

    info!("Starting media cache daemon");
    info!("   Socket: {}", args.socket_path.display());

    let start_time = Instant::now();

    config.tools.discover().await;

    let store = CacheStore::open(&config).context("Failed to open cache")?;
    let organ = Arc::new(CacheOrgan::new(store));

    info!("   ✓ Cache ready at {}", config.cache_path.display());

    if args.socket_path.exists() {
        std::fs::remove_file(&args.socket_path)
            .context("Failed to remove old socket")?;
    }

    let listener = UnixListener::bind(&args.socket_path)
        .context("Failed to bind Unix socket")?;

    info!("   ✓ Listening on {}", args.socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let organ = Arc::clone(&organ);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, organ, start_time).await {
                        error!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single UDS connection: 4-byte big-endian length, then a JSON stimulus.
async fn handle_connection(
    mut stream: UnixStream,
    organ: Arc<CacheOrgan>,
    start_time: Instant,
) -> Result<()> {
    let mut buffer = vec![0u8; 65536];

    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        if len > buffer.len() {
            buffer.resize(len, 0);
        }

        stream.read_exact(&mut buffer[..len]).await?;

        let response = match serde_json::from_slice::<Stimulus>(&buffer[..len]) {
            Ok(stimulus) => {
                debug!("Received: op={}", stimulus.op);
                respond(&organ, stimulus, start_time).await
            }
            Err(e) => failure(json!({
                "error": "InvalidStimulus",
                "message": e.to_string(),
            })),
        };

        let response_bytes = serde_json::to_vec(&response)
            .context("Failed to serialize response")?;

        let len_bytes = (response_bytes.len() as u32).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        debug!("Sent: ok={}, latency={}ms", response.ok, response.latency_ms);
    }
}

async fn respond(organ: &CacheOrgan, stimulus: Stimulus, start_time: Instant) -> Response {
    if stimulus.op == "health" || stimulus.op == "health.check" {
        return Response {
            ok: true,
            output: json!({
                "status": "healthy",
                "organ": "media_cache",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_ms": start_time.elapsed().as_millis() as u64,
                "jobs": organ.store().status().len(),
            }),
            latency_ms: 0,
            cost: None,
        };
    }

    match organ.stimulate(stimulus).await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Stimulate error: {:?}", e);
            failure(json!({ "error": e.to_string() }))
        }
    }
}

fn failure(output: serde_json::Value) -> Response {
    Response {
        ok: false,
        output,
        latency_ms: 0,
        cost: None,
    }
}
