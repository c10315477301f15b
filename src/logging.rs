// src/logging.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Our events use short targets (`ingest`, `publish`, ...) rather than module paths.
pub const DEFAULT_FILTER: &str =
    "m365_scout=info,scout_prune=info,config=info,ingest=info,dedup=info,summarize=info,publish=info,digest=info,pipeline=info,store=info,lock=info,warn";

/// Install the global subscriber.
/// `RUST_LOG` wins; otherwise [`DEFAULT_FILTER`]. `SCOUT_LOG_FORMAT=json`
/// switches to JSON lines for log shippers.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("SCOUT_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}
