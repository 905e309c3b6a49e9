//! Rollout - pull-based host configuration agent.

use clap::Parser;

use rollout::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle Ctrl+C gracefully; the flock releases with the process.
    tokio::select! {
        result = cli.run() => match result {
            Ok(errors) => std::process::exit(errors),
            Err(err) => {
                eprintln!("Error: {err:#}");
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
            std::process::exit(1);
        }
    }
}
