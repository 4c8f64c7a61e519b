// src/main.rs

use jobwave::cli::CliExit;
use jobwave::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("jobwave error: {err:?}");
        std::process::exit(CliExit::SetupFailed.code());
    }
    let exit = run(args).await;
    std::process::exit(exit.code());
}
