mod application;
mod domain;
mod infrastructure;
mod presentation;

use crate::domain::errors::GurlError;
use crate::presentation::cli::Cli;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "GURL_LOG";

/// gurl: HTTP requests from the command line
///
/// Builds requests from `key=value` style items, fills `${var}` and
/// `@generator` templates, and can replay NDJSON files line by line, upload
/// files as multipart, or repeat a request concurrently.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.run().await {
        Ok(summary) if summary.is_success() => {}
        Ok(_) => std::process::exit(1),
        Err(err) if is_abort(&err) => std::process::exit(0),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

fn is_abort(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<GurlError>().is_some_and(GurlError::is_abort))
}

/// Logs go to stderr. `-v` selects debug, otherwise `GURL_LOG` or `warn`.
fn init_tracing(verbose: bool) {
    let directives = if verbose {
        "debug".to_string()
    } else {
        std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string())
    };
    let filter = EnvFilter::builder().parse_lossy(format!("{directives},hyper=warn,hyper_util=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
