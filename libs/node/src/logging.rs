use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Install the global fmt subscriber
///
/// `RUST_LOG` takes precedence over `default_directive`. Returns false when a
/// subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .try_init()
        .is_ok()
}

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "debug,hyper=info",
        Environment::Staging | Environment::Production => "info",
    }
}
