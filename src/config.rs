//! Runtime-tunable knobs, loaded the way `lgn-config` loads its
//! configuration: layered sources built with the `config` crate, with
//! environment variables (here, the `FRAME_SHM_` prefix) taking the last
//! and therefore highest-priority layer.
//!
//! There's no equivalent of `lgn-config`'s generic `get::<T>(key)` API here:
//! this crate only has a handful of knobs, all of which matter to callers
//! by name, so a typed struct with named accessors is simpler than a
//! string-keyed lookup.

use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::Result;

const ENV_PREFIX: &str = "FRAME_SHM";
const DEFAULT_FILENAME: &str = "frame-shm.toml";

fn default_mailslot_reopen_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
struct Tunables {
    #[serde(default = "default_mailslot_reopen_backoff_ms")]
    mailslot_reopen_backoff_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self { mailslot_reopen_backoff_ms: default_mailslot_reopen_backoff_ms() }
    }
}

/// Process-wide configuration, loaded once and cached for the life of the
/// process.
pub struct RelayConfig {
    tunables: Tunables,
}

/// The global, lazily-loaded configuration. Reading it never fails at the
/// call site: a missing or malformed configuration source falls back to
/// built-in defaults, logged rather than propagated, since a producer or
/// consumer shouldn't fail to start over a typo in an optional config file.
pub static CONFIG: Lazy<RelayConfig> = Lazy::new(|| {
    RelayConfig::load().unwrap_or_else(|e| {
        log::warn!("failed to load configuration, using defaults: {e}");
        RelayConfig { tunables: Tunables::default() }
    })
});

impl RelayConfig {
    /// Loads configuration from, in increasing priority: a `frame-shm.toml`
    /// next to the current executable, a `frame-shm.toml` in the current
    /// working directory, and `FRAME_SHM_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let path = dir.join(DEFAULT_FILENAME);
                builder = builder.add_source(config::File::from(path).required(false));
            }
        }
        if let Ok(cwd) = std::env::current_dir() {
            let path = cwd.join(DEFAULT_FILENAME);
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));

        let config = builder.build()?;
        let tunables = config.try_deserialize().unwrap_or_default();

        Ok(Self { tunables })
    }

    /// How long to wait after a failed mailslot open before
    /// [`crate::MailslotClient`] will retry opening it.
    pub fn mailslot_reopen_backoff(&self) -> Duration {
        Duration::from_millis(self.tunables.mailslot_reopen_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_one_second_backoff() {
        let config = RelayConfig { tunables: Tunables::default() };
        assert_eq!(config.mailslot_reopen_backoff(), Duration::from_secs(1));
    }
}
