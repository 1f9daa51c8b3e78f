//! tracing subscriber setup. Logs go to stderr; stdout is reserved for records.

use tracing_subscriber::EnvFilter;

/// Filter directive for the given verbosity. `RUST_LOG` takes precedence when set.
fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "cambridge_scrape=info,warn",
        1 => "cambridge_scrape=debug,info",
        2 => "cambridge_scrape=trace,debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(verbose: u8, quiet: bool) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose, quiet)))
        .map_err(|e| format!("Invalid log filter: {}", e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| format!("Cannot initialize logging: {}", e))
}
