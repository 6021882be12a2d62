//! Tracing setup for the `rover` binary.
//!
//! Logs go to stderr so stdout stays clean for `--json` output. `RUST_LOG`
//! overrides the default filter.

use tracing_subscriber::EnvFilter;

/// Default filter directive for the given verbosity.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { "rover=debug,info" } else { "rover=info,warn" }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)))
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(verbose: bool, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}
