//! Make one HTTP request with retries and print the decoded body.
//!
//! Logging follows `RUST_LOG` (default `warn`, which shows retry lines).
//!
//! # Examples
//!
//! ```sh
//! # Plain GET
//! tether get https://example.com/health
//!
//! # JSON with a custom header and a tighter retry budget
//! tether --retries 3 --retry-delay-ms 100 get https://api.example.com/items \
//!   --kind json -H "Accept: application/json"
//!
//! # Stream a large download to a file (Ctrl-C stops it cleanly)
//! tether get https://example.com/big.bin --kind stream > big.bin
//!
//! # Run each attempt as its own task in this process
//! tether --execution offload get https://example.com/health
//!
//! # Upload stdin as a streamed body and report progress
//! cat data.csv | tether post https://example.com/upload --stdin --progress
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tether::config::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_MS};
use tether::{
    CancelSignal, ClientOptions, ExecutionMode, HttpClient, RequestSpec, ResponseData, ResponseKind,
};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Make one HTTP request with retries and print the decoded body.
#[derive(Parser)]
#[command(name = "tether", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    // ── Retry ──────────────────────────────────────────────────
    /// Maximum retries for transient failures (0 = single attempt)
    #[arg(long, global = true, default_value_t = DEFAULT_RETRIES)]
    retries: u32,

    /// Base backoff delay in milliseconds, grown 1.5x per retry
    #[arg(long, global = true, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Suppress the per-retry log line
    #[arg(long, global = true)]
    no_logs: bool,

    // ── Execution ──────────────────────────────────────────────
    /// Where requests run
    #[arg(long, global = true, value_enum, default_value_t = ExecutionArg::Isolated)]
    execution: ExecutionArg,

    /// Shorthand for --execution local
    #[arg(long, global = true, conflicts_with = "execution")]
    local: bool,
}

impl Cli {
    fn execution_mode(&self) -> ExecutionMode {
        if self.local {
            ExecutionMode::Local
        } else {
            self.execution.into()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Send a GET request
    Get(RequestArgs),
    /// Send a POST request
    Post(PostArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// Target URL
    url: String,

    /// How to decode the response body
    #[arg(long, value_enum, default_value_t = KindArg::Text)]
    kind: KindArg,

    /// Extra header as "Name: value" (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Per-attempt receive timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct PostArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Inline request body
    #[arg(long, conflicts_with_all = ["data_file", "stdin"])]
    data: Option<String>,

    /// Read the request body from a file
    #[arg(long, conflicts_with = "stdin")]
    data_file: Option<PathBuf>,

    /// Stream the request body from stdin
    #[arg(long)]
    stdin: bool,

    /// Report upload progress on stderr
    #[arg(long)]
    progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Text,
    Json,
    Bytes,
    Stream,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExecutionArg {
    /// Isolated worker, local fallback
    Isolated,
    /// This process's runtime
    Local,
    /// Each attempt on its own runtime task
    Offload,
}

impl From<ExecutionArg> for ExecutionMode {
    fn from(arg: ExecutionArg) -> Self {
        match arg {
            ExecutionArg::Isolated => ExecutionMode::Isolated,
            ExecutionArg::Local => ExecutionMode::Local,
            ExecutionArg::Offload => ExecutionMode::Offload,
        }
    }
}

impl From<KindArg> for ResponseKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => ResponseKind::Text,
            KindArg::Json => ResponseKind::Json,
            KindArg::Bytes => ResponseKind::Bytes,
            KindArg::Stream => ResponseKind::Stream,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_header(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .ok_or_else(|| format!("header '{raw}' must look like 'Name: value'"))
}

fn build_spec(method: reqwest::Method, args: &RequestArgs) -> Result<RequestSpec, String> {
    let mut spec = RequestSpec::new(method, args.url.as_str()).expect(args.kind.into());
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        spec = spec.with_header(name, value);
    }
    if let Some(secs) = args.timeout_secs {
        spec = spec.with_receive_timeout(Duration::from_secs(secs));
    }
    Ok(spec)
}

async fn post_spec(args: &PostArgs) -> Result<RequestSpec, String> {
    let mut spec = build_spec(reqwest::Method::POST, &args.request)?;
    if let Some(data) = &args.data {
        spec = spec.with_body(data.as_str());
    } else if let Some(path) = &args.data_file {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
        spec = spec.with_body(bytes);
    } else if args.stdin {
        spec = spec.with_stream_body(Box::pin(ReaderStream::new(tokio::io::stdin())));
    }
    if args.progress {
        spec = spec.on_progress(|sent, total| match total {
            Some(total) => eprintln!("  [progress] {sent}/{total} bytes"),
            None => eprintln!("  [progress] {sent} bytes"),
        });
    }
    Ok(spec)
}

async fn run(cli: Cli) -> Result<(), String> {
    let options = ClientOptions::default()
        .with_retries(cli.retries)
        .with_retry_delay_ms(cli.retry_delay_ms)
        .with_no_logs(cli.no_logs)
        .with_execution(cli.execution_mode());
    let client = HttpClient::with_options(options).map_err(|e| e.to_string())?;

    let mut spec = match &cli.command {
        Command::Get(args) => build_spec(reqwest::Method::GET, args)?,
        Command::Post(args) => post_spec(args).await?,
    };

    if spec.response_kind() == ResponseKind::Stream {
        let signal = CancelSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel("interrupted");
            }
        });
        spec = spec.with_cancel(signal);
    }

    let response = client.request(spec).await.map_err(|e| e.to_string())?;
    if response.retry_attempts > 0 {
        eprintln!("  [retries] {}", response.retry_attempts);
    }

    let mut stdout = tokio::io::stdout();
    match response.data {
        ResponseData::Text(text) => print!("{text}"),
        ResponseData::Json(value) => {
            let pretty = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
            println!("{pretty}");
        }
        ResponseData::Bytes(bytes) => println!("{} bytes", bytes.len()),
        ResponseData::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| e.to_string())?;
                stdout
                    .write_all(&chunk)
                    .await
                    .map_err(|e| format!("failed to write output: {e}"))?;
            }
            stdout
                .flush()
                .await
                .map_err(|e| format!("failed to write output: {e}"))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
