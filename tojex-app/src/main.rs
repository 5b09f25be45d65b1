mod app;
mod audio;
mod cli;
mod host;

use app::App;
use clap::Parser;
use cli::Args;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let app = App::new(&args)?;
    app.run()?;

    Ok(())
}
