mod cli;
mod error;
mod forge;
mod logging;
mod model;
mod monitor;

use model::Outcome;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse_args();

    if let Err(e) = logging::init_logging(args.log_format) {
        eprintln!("{e:#}");
    }

    match cli::run(args).await {
        // Success, an exhausted rerun budget and operator cancellation all exit cleanly.
        Ok(outcome) => {
            let result = match outcome {
                Outcome::Succeeded { .. } => "succeeded",
                Outcome::Exhausted { .. } => "exhausted",
                Outcome::Cancelled { .. } => "cancelled",
            };
            tracing::info!(result, reruns = outcome.reruns(), "monitor finished");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "monitor failed");
            std::process::exit(1);
        }
    }
}
