use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const DEFAULT_FILTER: &str = "warn,parley=info,parley_chat=info,parley_llm=info";

/// Installs the global subscriber. Logs go to stderr so stdout stays a clean transcript.
pub fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,parley=debug,parley_chat=debug,parley_llm=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(verbose),
        )
        .init();
}
