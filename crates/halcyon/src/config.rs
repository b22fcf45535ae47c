//! # Engine Configuration
//!
//! Loaded once at startup. Every field has a default, so a TOML file only
//! names what it changes:
//!
//! ```toml
//! slot_count = 2
//! initial_entities = 4096
//! background_upload = true
//! ```

use std::path::Path;

use halcyon_render::{ExtractionReserve, RendererConfig};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Slot counts the engine accepts.
pub const SLOT_COUNTS: std::ops::RangeInclusive<usize> = 2..=3;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Slots per render state: 2 (double) or 3 (triple buffering).
    pub slot_count: usize,
    /// Point lights reserved up front.
    pub initial_lights: usize,
    /// Entities reserved up front.
    pub initial_entities: usize,
    /// Voxel grids reserved up front.
    pub initial_voxel_grids: usize,
    /// Indirect draw commands reserved up front.
    pub initial_draw_commands: usize,
    /// Persistently mapped entity buffer instead of a staged one.
    pub persistent_entities: bool,
    /// Upload entities from the background upload context.
    pub background_upload: bool,
    /// Update and render cadence. `0` runs unpaced.
    pub target_fps: u32,
    /// Render frames slower than this are reported.
    pub frame_budget_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            initial_lights: 64,
            initial_entities: 1024,
            initial_voxel_grids: 8,
            initial_draw_commands: 64,
            persistent_entities: false,
            background_upload: false,
            target_fps: 60,
            frame_budget_us: 16_666,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] on syntax errors, unknown keys or invalid values.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`EngineError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] naming the first bad field.
    pub fn validate(&self) -> EngineResult<()> {
        if !SLOT_COUNTS.contains(&self.slot_count) {
            return Err(EngineError::Config(format!(
                "slot_count must be 2 or 3, got {}",
                self.slot_count
            )));
        }
        if self.frame_budget_us == 0 {
            return Err(EngineError::Config("frame_budget_us must be positive".into()));
        }
        if self.persistent_entities && self.background_upload {
            return Err(EngineError::Config(
                "persistent_entities and background_upload are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Renderer sizing derived from this configuration.
    #[must_use]
    pub const fn renderer(&self) -> RendererConfig {
        RendererConfig {
            initial_lights: self.initial_lights,
            initial_entities: self.initial_entities,
            initial_voxel_grids: self.initial_voxel_grids,
            initial_draw_commands: self.initial_draw_commands,
            persistent_entities: self.persistent_entities,
            background_upload: self.background_upload,
        }
    }

    /// Extraction reservations derived from this configuration.
    #[must_use]
    pub const fn reserve(&self) -> ExtractionReserve {
        ExtractionReserve {
            lights: self.initial_lights,
            grids: self.initial_voxel_grids,
            entities: self.initial_entities,
        }
    }

    /// Pause between ticks, `None` when unpaced.
    #[must_use]
    pub fn frame_interval(&self) -> Option<std::time::Duration> {
        (self.target_fps > 0)
            .then(|| std::time::Duration::from_secs(1) / self.target_fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config =
            EngineConfig::from_toml_str("slot_count = 2\nbackground_upload = true\n").unwrap();
        assert_eq!(config.slot_count, 2);
        assert!(config.background_upload);
        assert_eq!(config.initial_entities, EngineConfig::default().initial_entities);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for text in [
            "slot_count = 4",
            "slot_count = 1",
            "frame_budget_us = 0",
            "persistent_entities = true\nbackground_upload = true",
            "unknown_key = 1",
            "slot_count = \"two\"",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(text), Err(EngineError::Config(_))),
                "{text} was accepted"
            );
        }
    }

    #[test]
    fn test_unpaced_has_no_interval() {
        let config = EngineConfig {
            target_fps: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.frame_interval(), None);
        assert!(EngineConfig::default().frame_interval().is_some());
    }
}
