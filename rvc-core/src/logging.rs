//! Process-wide logger setup, driven by config with an `RUST_LOG` fallback.

use crate::config::Config;

/// Installs an `env_logger` instance once at process start. `config`'s
/// `log_filter` takes precedence over `RUST_LOG`; if neither is set the
/// default level is `info`.
pub fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    match &config.log_filter {
        Some(filter) => {
            builder.parse_filters(filter);
        }
        None => {
            builder.parse_env(env_logger::Env::default().default_filter_or("info"));
        }
    }
    // Safe to call more than once in tests; env_logger ignores the error.
    let _ = builder.try_init();
}
