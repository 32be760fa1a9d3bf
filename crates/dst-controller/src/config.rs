//! Controller configuration: a loadable config layering defaults, an
//! optional TOML file, and environment variables — scoped down to the
//! handful of knobs this harness actually has.

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Settings for one controller run: where it listens, how long it waits
/// for a shim's ack before a `step` times out, and the seed for its
/// deterministic RNG (delay sampling, drop/repeat coin flips, reordering
/// selection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub bind_addr: String,
    pub ack_timeout_secs: f64,
    pub seed: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:10000".to_string(),
            ack_timeout_secs: 5.0,
            seed: 0,
        }
    }
}

impl ControllerConfig {
    /// Layers defaults, an optional `dst-controller.toml` in the current
    /// directory, and `DST_*` environment variables (highest precedence).
    /// No per-user XDG config tier — this harness has no per-user
    /// settings worth persisting outside the project.
    pub fn load() -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let raw = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).map_err(ControllerError::Config)?)
            .add_source(config::File::with_name("dst-controller").required(false))
            .add_source(config::Environment::with_prefix("DST").separator("__"))
            .build()
            .map_err(ControllerError::Config)?;
        raw.try_deserialize().map_err(ControllerError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_loopback_with_a_five_second_ack_timeout() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.bind_addr, "127.0.0.1:10000");
        assert_eq!(cfg.ack_timeout_secs, 5.0);
        assert_eq!(cfg.seed, 0);
    }
}
