//! Renderer configuration.
//!
//! Defaults match a phone-sized viewer: 256px tiles, 120 cached tiles and
//! 120 thumbnails, one preloaded row or column.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::layout::SwipeAxis;

/// Env var that turns on per-tile render timing logs.
const RENDER_TIMING_ENV: &str = "PAGETILE_RENDER_TIMING";

/// Check if per-tile timing instrumentation is enabled via env var.
pub fn render_timing_enabled() -> bool {
    std::env::var(RENDER_TIMING_ENV).is_ok_and(|v| v == "1" || v == "true")
}

/// Tunables shared by the cache, the pass planner and the render worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum number of non-thumbnail tiles kept across both generations.
    pub cache_capacity: usize,
    /// Maximum number of resident thumbnails.
    pub thumbnail_capacity: usize,
    /// Target tile edge in device pixels.
    pub part_size: f32,
    /// Thumbnail size as a fraction of the fitted page size.
    pub thumbnail_ratio: f32,
    /// Number of extra rows (or columns) preloaded past the viewport.
    pub preload_count: usize,
    /// Upper bound on tiles enumerated in one scheduling pass.
    pub max_tiles_per_pass: usize,
    /// Render ARGB8888 instead of RGB565.
    pub best_quality: bool,
    /// Ask the engine to draw annotations.
    pub annotation_rendering: bool,
    /// ARGB fill for pages that could not be opened.
    pub invalid_page_color: u32,
    /// Gap between pages, in unscaled pixels.
    pub spacing_px: f32,
    /// Axis along which pages are laid out.
    pub swipe_axis: SwipeAxis,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 120,
            thumbnail_capacity: 120,
            part_size: 256.0,
            thumbnail_ratio: 0.3,
            preload_count: 1,
            max_tiles_per_pass: 120,
            best_quality: false,
            annotation_rendering: false,
            invalid_page_color: 0xFFFF_FFFF,
            spacing_px: 0.0,
            swipe_axis: SwipeAxis::Vertical,
        }
    }
}

impl RenderConfig {
    /// Load and validate a JSON config file. Missing keys take defaults.
    pub fn load(path: &Path) -> RenderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RenderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.cache_capacity == 0 {
            return Err(RenderError::Config("cache_capacity must be positive".into()));
        }
        if self.thumbnail_capacity == 0 {
            return Err(RenderError::Config(
                "thumbnail_capacity must be positive".into(),
            ));
        }
        if self.max_tiles_per_pass == 0 {
            return Err(RenderError::Config(
                "max_tiles_per_pass must be positive".into(),
            ));
        }
        if !(self.part_size.is_finite() && self.part_size > 0.0) {
            return Err(RenderError::Config("part_size must be positive".into()));
        }
        if !(self.thumbnail_ratio > 0.0 && self.thumbnail_ratio <= 1.0) {
            return Err(RenderError::Config(
                "thumbnail_ratio must be in (0, 1]".into(),
            ));
        }
        if !(self.spacing_px.is_finite() && self.spacing_px >= 0.0) {
            return Err(RenderError::Config("spacing_px must be >= 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_capacity, 120);
        assert_eq!(config.part_size, 256.0);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("render.json");
        fs::write(
            &path,
            r#"{"cache_capacity": 32, "best_quality": true, "swipe_axis": "horizontal"}"#,
        )
        .unwrap();

        let config = RenderConfig::load(&path).unwrap();
        assert_eq!(config.cache_capacity, 32);
        assert!(config.best_quality);
        assert_eq!(config.swipe_axis, SwipeAxis::Horizontal);
        assert_eq!(config.thumbnail_capacity, 120);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("render.json");
        fs::write(&path, r#"{"thumbnail_ratio": 1.5}"#).unwrap();

        let result = RenderConfig::load(&path);
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RenderConfig::load(Path::new("/nonexistent/render.json"));
        assert!(matches!(result, Err(RenderError::Io(_))));
    }

    #[test]
    fn test_load_malformed_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("render.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(RenderConfig::load(&path), Err(RenderError::Json(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = RenderConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
