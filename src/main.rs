use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gantry::Error;
use gantry::cli::{Cli, Command, run_down_command, run_run_command, run_status_command};
use gantry::engine::diagnose_engine;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "gantry=debug"
    } else {
        "gantry=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = match cli.command {
        Command::Run(args) => run_run_command(args).await,
        Command::Status(args) => run_status_command(&args).await.map(|()| 0),
        Command::Down => run_down_command().await.map(|()| 0),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            if e
                .downcast_ref::<Error>()
                .is_some_and(Error::is_engine_unavailable)
                && let Some(hint) = diagnose_engine().await.hint()
            {
                eprintln!("\n{}", hint);
            }
            1
        }
    };

    // Stdin forwarding may still be parked in a blocking read; exit without
    // waiting for the runtime to join it.
    std::process::exit(code);
}
