//! Configuration sources, lowest precedence first.

pub mod global_file;
pub mod workspace_file;

use config::Environment;

/// Environment overrides: `NEXA__RUNTIME__THROTTLE_LIMIT=20` sets `runtime.throttle_limit`.
pub fn environment() -> Environment {
    Environment::with_prefix("NEXA")
        .separator("__")
        .try_parsing(true)
}
