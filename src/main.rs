//! Partix binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use partix::cli::{Cli, execute};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match execute(&cli).await {
        Ok(result) => {
            #[allow(clippy::print_stdout)]
            {
                print!("{}", ensure_newline(result.output));
            }
            i32::from(!result.success)
        }
        Err(err) => {
            // anyhow's alternate format prints the whole source chain.
            let err = anyhow::Error::new(err);
            tracing::error!("command failed: {err:#}");
            2
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr so piped output stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn ensure_newline(mut s: String) -> String {
    if !s.is_empty() && !s.ends_with('\n') {
        s.push('\n');
    }
    s
}
