//! State server configuration.

use serde::Deserialize;

/// Settings for a [`StateServer`](crate::StateServer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateServerConfig {
    /// First doid handed out by `DispenseId` and anonymous generates.
    /// `0` is never dispensed.
    pub first_doid: u32,

    /// Name reported in answers to `QueryChannel` probes.
    pub name: String,
}

impl Default for StateServerConfig {
    fn default() -> Self {
        Self {
            first_doid: 1,
            name: "stateserver".to_string(),
        }
    }
}
