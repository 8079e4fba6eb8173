use std::process::ExitCode;

use clap::Parser;
use hubctl::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(err) = cli::run(cli).await {
        eprintln!("Error: {err}");
        for (level, cause) in err.chain().skip(1).enumerate() {
            eprintln!(
                "{:indent$}Caused by: {}",
                "",
                cause,
                indent = (level + 1) * 2
            );
        }
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
