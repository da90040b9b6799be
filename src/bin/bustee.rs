use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use relaybus::uploader::{self, Config};

/// Producer-side resumable uploader: runs `cmd [args...]`, streaming its
/// combined stdout/stderr to `url` and resuming across disconnects.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Broker URL to stream output to. Empty disables uploading entirely;
    /// the child still runs to completion.
    url: String,

    /// Command to run, with its own arguments.
    #[arg(required = true, trailing_var_arg = true)]
    cmd: Vec<String>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,

    /// Dial timeout, in seconds.
    #[arg(long)]
    timeout: Option<f64>,

    /// Whole-request retries on transport failure.
    #[arg(long, default_value_t = 0)]
    retry: u32,

    /// Per-connection retries within a single request.
    #[arg(long, default_value_t = 0)]
    stream_retry: u32,

    /// Delay between retries, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    sleep: u64,

    /// Prefix every log line with this string.
    #[arg(long)]
    log_prefix: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Value sent as the `Request-Id` header on every POST.
    #[arg(long)]
    request_id: Option<String>,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();

    if let Some(prefix) = args.log_prefix.clone() {
        builder.format(move |buf, record| writeln!(buf, "{prefix}{}", record.args()));
    }

    if let Some(path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let url = if args.url.is_empty() {
        None
    } else {
        match Url::parse(&args.url) {
            Ok(u) => Some(u),
            Err(e) => {
                log::error!("count#busltee.stream.missingurl error={e}");
                None
            }
        }
    };

    let config = Config {
        url,
        args: args.cmd,
        insecure: args.insecure,
        timeout: args.timeout.map(Duration::from_secs_f64),
        retry: args.retry,
        stream_retry: args.stream_retry,
        sleep: Duration::from_millis(args.sleep),
        request_id: args.request_id,
    };

    let exit_code = uploader::run(config).await;
    std::process::exit(exit_code);
}
