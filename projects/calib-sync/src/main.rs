use anyhow::Result;
use calib_sync::cli::{self, Args};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries only the report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse_args();

    let report = cli::run(&args)?;
    print!("{}", report);

    Ok(())
}
