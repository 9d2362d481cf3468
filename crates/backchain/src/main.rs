//! Backchain CLI - backup chains and point-in-time restore
//!
//! Binary name: `backchain`

use std::process;

use backchain::cli::handlers::run_cli;

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--json` output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run_cli().await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {err}");
        }

        let code = err
            .downcast_ref::<backchain_core::Error>()
            .map_or(1, backchain_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}
