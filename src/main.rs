use clap::Parser;
use podstack::cli::{self, Cli};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let code = tokio::select! {
        result = cli::run(args) => match result {
            Ok(()) => 0,
            Err(err) => {
                cli::output::error(&err.to_string());
                1
            }
        },
        _ = signal::ctrl_c() => {
            info!("interrupted");
            130
        }
    };

    std::process::exit(code);
}
