use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod display;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    // Keep diagnostics off stdout so they never interleave with the UI.
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit = app::run(args).await?;
    std::process::exit(exit);
}
