use crate::commands::{run_demo, run_inspect, run_rate, DemoArgs, InspectArgs, RateArgs};
use crate::error::AppError;
use clap::{Parser, Subcommand};
use hydro_rating::{telemetry, EngineConfig, RatingContext};
use std::io;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "rating",
    about = "Rate hydrologic time series against versioned rating curves",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rate (or reverse rate) a CSV time series against a rating series record
    Rate(RateArgs),
    /// Describe the ratings held in a rating series record
    Inspect(InspectArgs),
    /// Rate a built-in stage/flow series (default command)
    Demo(DemoArgs),
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = EngineConfig::load()?;
    telemetry::init(&config.telemetry)?;
    debug!(?config.environment, ?config.safety, "rating engine configured");

    let ctx = RatingContext::from_config(&config);
    let command = cli.command.unwrap_or_else(|| Command::Demo(DemoArgs::default()));
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Rate(args) => run_rate(args, &ctx, &mut out),
        Command::Inspect(args) => run_inspect(args, &ctx, &mut out),
        Command::Demo(args) => run_demo(args, &ctx, &mut out),
    }
}
