use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod client;
mod metrics;
mod runner;

#[derive(Parser)]
#[command(name = "gatecast-loadtest")]
#[command(about = "Load testing tool for the Gatecast device endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a device fleet against the WebSocket endpoint
    Run(RunArgs),

    /// Display results from a previous test run
    Report(ReportArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Device endpoint URL
    #[arg(short, long, default_value = "ws://localhost:8080/device")]
    url: String,

    /// Control server URL, scraped for gateway-side counters
    #[arg(long, default_value = "http://localhost:9090")]
    control_url: String,

    /// Number of simulated devices
    #[arg(short = 'n', long, default_value = "100")]
    devices: usize,

    /// Messages per second per device
    #[arg(short, long, default_value = "1.0")]
    rate: f64,

    /// Test duration in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Ramp-up period in seconds
    #[arg(long, default_value = "5")]
    ramp_up: u64,

    /// Message payload size in bytes
    #[arg(long, default_value = "256")]
    payload_size: usize,

    /// Device id prefix; devices connect as <prefix>-00000 and up
    #[arg(long, default_value = "loadtest")]
    prefix: String,

    /// Output file for results
    #[arg(short, long, default_value = "./loadtest-results.json")]
    output: PathBuf,

    /// Real-time progress report interval in seconds
    #[arg(long, default_value = "5")]
    report_interval: u64,
}

#[derive(clap::Args)]
struct ReportArgs {
    /// Path to results file
    #[arg(short, long, default_value = "./loadtest-results.json")]
    input: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: ReportFormat,

    /// Compare with another results file
    #[arg(long)]
    compare: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Run(args) => {
            runner::run_loadtest(args).await?;
        }
        Commands::Report(args) => {
            report::run_report(args)?;
        }
    }

    Ok(())
}

mod report {
    use super::*;

    pub fn run_report(args: ReportArgs) -> anyhow::Result<()> {
        let results = std::fs::read_to_string(&args.input)?;
        let results: metrics::TestResults = serde_json::from_str(&results)?;

        match args.format {
            ReportFormat::Text => println!("{}", results.format_text()),
            ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            ReportFormat::Csv => println!("{}", results.format_csv()),
        }

        if let Some(compare_path) = args.compare {
            let baseline = std::fs::read_to_string(&compare_path)?;
            let baseline: metrics::TestResults = serde_json::from_str(&baseline)?;
            println!("\n{}", results.compare(&baseline));
        }

        Ok(())
    }
}
