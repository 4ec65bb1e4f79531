use anyhow::Result;
use std::{env, process};
use stockroom::cli::{self, USAGE};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    // ─── 2) parse the command line ───────────────────────────────────
    let invocation = match cli::parse(env::args().skip(1)) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            process::exit(2);
        }
    };
    info!("startup");

    // ─── 3) run ──────────────────────────────────────────────────────
    if let Err(e) = cli::run(invocation).await {
        error!(error = %format!("{:#}", e), "command failed");
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
    Ok(())
}
