//! # Instancing Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! pool_increment = 128
//! max_instance_count = 1048576
//! sync_batch_size = 32
//! quality_max_lod = 1
//!
//! [activation]
//! enabled = true
//! enable_threshold = 16
//! disable_threshold = 4
//! cooldown_frames = 30
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{InstancingError, InstancingResult};

/// Default pool growth increment.
pub const DEFAULT_POOL_INCREMENT: usize = 128;

/// Default hard cap on instances in one buffer.
pub const DEFAULT_MAX_INSTANCE_COUNT: usize = 1 << 20;

/// Default number of entries per transform-sync batch.
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 32;

/// Top-level configuration of the instancing core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstancingConfig {
    /// Pool arrays grow and shrink in multiples of this many entries.
    pub pool_increment: usize,
    /// Hard maximum element count of any buffer.
    pub max_instance_count: usize,
    /// Entries per transform-sync batch.
    pub sync_batch_size: usize,
    /// GPU buffers are not shrunk unless they exceed the need by this many elements.
    pub buffer_shrink_hysteresis: usize,
    /// Quality-mandated maximum LOD (0 = full detail allowed).
    pub quality_max_lod: u8,
    /// Keep the previous frame's transforms in a second GPU region.
    pub double_buffer_transforms: bool,
    /// Automatic group activation by instance count.
    pub activation: ActivationConfig,
}

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            pool_increment: DEFAULT_POOL_INCREMENT,
            max_instance_count: DEFAULT_MAX_INSTANCE_COUNT,
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            buffer_shrink_hysteresis: 2 * DEFAULT_POOL_INCREMENT,
            quality_max_lod: 0,
            double_buffer_transforms: false,
            activation: ActivationConfig::default(),
        }
    }
}

/// Hysteresis band plus cooldown for auto enabling/disabling groups.
///
/// A group deactivates when its instance count drops below
/// `disable_threshold` and reactivates when it reaches `enable_threshold`.
/// After any toggle, at least `cooldown_frames` must pass before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationConfig {
    /// Master switch. When off, every group stays active.
    pub enabled: bool,
    /// Count at or above which an inactive group turns on.
    pub enable_threshold: usize,
    /// Count below which an active group turns off.
    pub disable_threshold: usize,
    /// Minimum frames between two toggles.
    pub cooldown_frames: u32,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enable_threshold: 1,
            disable_threshold: 1,
            cooldown_frames: 60,
        }
    }
}

impl InstancingConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidConfig`] on parse or validation failure.
    pub fn from_toml_str(text: &str) -> InstancingResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| InstancingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> InstancingResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            InstancingError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> InstancingResult<()> {
        if self.pool_increment == 0 {
            return Err(InstancingError::InvalidConfig(
                "pool_increment must be greater than zero".to_string(),
            ));
        }
        if self.sync_batch_size == 0 {
            return Err(InstancingError::InvalidConfig(
                "sync_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_instance_count < self.pool_increment {
            return Err(InstancingError::InvalidConfig(format!(
                "max_instance_count ({}) is smaller than pool_increment ({})",
                self.max_instance_count, self.pool_increment
            )));
        }
        if self.activation.disable_threshold > self.activation.enable_threshold {
            return Err(InstancingError::InvalidConfig(format!(
                "activation.disable_threshold ({}) exceeds enable_threshold ({})",
                self.activation.disable_threshold, self.activation.enable_threshold
            )));
        }
        Ok(())
    }
}
