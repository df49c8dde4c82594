use std::process::ExitCode;

use clap::Parser;
use docqa_cli::{Cli, render, run};
use docqa_telemetry::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render::error(&e));
            ExitCode::FAILURE
        }
    }
}
