use clap::Parser;
use poke_lens_lib::commands::cli::{execute, Cli};
use tracing_subscriber::EnvFilter;

fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = execute(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
