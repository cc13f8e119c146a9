//! Process entry: CLI parsing, logging setup, and the supervisor lifecycle.
//!
//! Without `--operation` the binary loads the configuration, starts one
//! runner per job plus the control server, and runs until SIGINT/SIGTERM.
//! `--operation service` turns it into a thin client that forwards
//! `--option` to a running supervisor over the control socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use quevisor::{
    config::ConfigFile,
    control,
    subscribers::{LogWriter, Subscribe},
    Supervisor,
};

/// File the supervisor's own log is appended to, inside `--log`.
const SUPERVISOR_LOG_FILE: &str = "quevisor-logs.txt";

#[derive(Parser, Debug)]
#[command(name = "quevisor", version, about = "Queue-aware process supervisor")]
struct Args {
    /// Path of the configuration file.
    #[arg(long, default_value = "./quevisor-config.json")]
    config: PathBuf,

    /// Directory where the supervisor log is stored.
    #[arg(long, default_value = "./")]
    log: PathBuf,

    /// Port where the control server listens.
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// One-shot operation instead of running the supervisor.
    #[arg(long, value_enum)]
    operation: Option<Operation>,

    /// Control command forwarded with `--operation service`, e.g. "status"
    /// or "pause <job name>".
    #[arg(long, default_value = "")]
    option: String,

    /// Install method used by the packaging assets.
    #[arg(long = "installMethod", default_value = "servicectl")]
    install_method: String,

    /// Install with default values.
    #[arg(long)]
    silent: bool,

    /// Force every queue probe to report one ready message.
    #[arg(long)]
    testing: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Operation {
    Install,
    Uninstall,
    Service,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(operation) = args.operation {
        run_operation(operation, &args).await;
        return;
    }

    init_logging(&args.log);

    tracing::info!("loading configuration");
    let config = match ConfigFile::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration");
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    tracing::info!("configuration loaded");

    let supervisor = Supervisor::new(vec![Arc::new(LogWriter) as Arc<dyn Subscribe>]);
    tracing::info!("Starting workers");
    supervisor.run(&config, args.port, args.testing).await;

    tracing::info!("Terminated");
    tracing::info!("- - - - - - - - - - - - - - -");
}

async fn run_operation(operation: Operation, args: &Args) {
    match operation {
        Operation::Service => match control::forward(args.port, &args.option).await {
            Ok(response) => print!("{response}"),
            Err(err) => {
                eprintln!(
                    "Failed to connect to service at localhost:{}: {err}",
                    args.port
                );
            }
        },
        Operation::Install | Operation::Uninstall => {
            // Unit files ship with the distribution packages; the flags stay
            // accepted so existing invocations keep working.
            println!(
                "Service installation ({method}{defaults}) is handled by the packaging assets shipped with this release.",
                method = args.install_method,
                defaults = if args.silent { ", default values" } else { "" },
            );
        }
    }
}

/// Routes `tracing` output to the supervisor log file; falls back to stderr
/// when the file cannot be opened.
fn init_logging(dir: &Path) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let path = dir.join(SUPERVISOR_LOG_FILE);

    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        Err(err) => {
            eprintln!("error opening log file {}: {err}", path.display());
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
    }
}
