//! Edit state definitions
//!
//! Per-artifact edit parameters. Filters, text overlays and audio settings
//! only affect the preview; trim and crop produce a new artifact.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

// =============================================================================
// Destructive Parameters
// =============================================================================

/// Range of an artifact to keep, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TrimRange {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Requires `start < end <= duration`. Never clamps.
    pub fn validate(&self, duration_ms: u64) -> AppResult<()> {
        if self.start_ms >= self.end_ms {
            return Err(AppError::InvalidEditParameters(format!(
                "trim start {}ms must be before end {}ms",
                self.start_ms, self.end_ms
            )));
        }
        if self.end_ms > duration_ms {
            return Err(AppError::InvalidEditParameters(format!(
                "trim end {}ms is past the artifact duration {}ms",
                self.end_ms, duration_ms
            )));
        }
        Ok(())
    }

    /// Covers the whole artifact
    pub fn is_full(&self, duration_ms: u64) -> bool {
        self.start_ms == 0 && self.end_ms >= duration_ms
    }

    pub fn start_secs(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    pub fn end_secs(&self) -> f64 {
        self.end_ms as f64 / 1000.0
    }
}

/// Crop rectangle in percent of the source frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for CropRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        }
    }
}

impl CropRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn validate(&self) -> AppResult<()> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AppError::InvalidEditParameters(format!(
                "crop values must be finite and non-negative: {:?}",
                self
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(AppError::InvalidEditParameters("crop area is empty".to_string()));
        }
        if self.x + self.width > 100.0 || self.y + self.height > 100.0 {
            return Err(AppError::InvalidEditParameters(format!(
                "crop {:?} extends outside the frame",
                self
            )));
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        *self == Self::default()
    }

    /// Pixel rectangle `(x, y, width, height)` for a frame size.
    /// Dimensions are rounded down to even values for yuv420p encoders.
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> (u32, u32, u32, u32) {
        let px = |pct: f64, total: u32| ((pct / 100.0) * total as f64).floor() as u32;
        let x = px(self.x, frame_w).min(frame_w.saturating_sub(1));
        let y = px(self.y, frame_h).min(frame_h.saturating_sub(1));
        let w = (px(self.width, frame_w).min(frame_w - x) & !1).max(2);
        let h = (px(self.height, frame_h).min(frame_h - y) & !1).max(2);
        (x, y, w, h)
    }
}

// =============================================================================
// Preview Parameters
// =============================================================================

/// Visual filters, as CSS-style percentages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    /// 100 = unchanged
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    /// Blur radius in pixels
    pub blur: f64,
    /// 0 = none, 100 = full sepia
    pub sepia: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            blur: 0.0,
            sepia: 0.0,
        }
    }
}

impl FilterSettings {
    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            ("brightness", self.brightness, 0.0, 200.0),
            ("contrast", self.contrast, 0.0, 200.0),
            ("saturation", self.saturation, 0.0, 200.0),
            ("blur", self.blur, 0.0, 20.0),
            ("sepia", self.sepia, 0.0, 100.0),
        ];
        for (name, value, min, max) in checks {
            if !value.is_finite() || value < min || value > max {
                return Err(AppError::InvalidEditParameters(format!(
                    "{} must be within {}..={}, got {}",
                    name, min, max, value
                )));
            }
        }
        Ok(())
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Position of a text overlay's anchor in percent of the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextPosition {
    pub x: f64,
    pub y: f64,
}

/// Interval during which an overlay is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleInterval {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl VisibleInterval {
    pub fn contains(&self, at_ms: u64) -> bool {
        at_ms >= self.start_ms && at_ms < self.end_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub id: Uuid,
    pub text: String,
    pub position: TextPosition,
    pub font_size: u32,
    /// `#rrggbb`
    pub color: String,
    /// Always visible when absent
    pub visible: Option<VisibleInterval>,
}

impl TextOverlay {
    pub fn new(text: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            position: TextPosition { x, y },
            font_size: 32,
            color: "#ffffff".to_string(),
            visible: None,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.text.trim().is_empty() {
            return Err(AppError::InvalidEditParameters("overlay text is empty".to_string()));
        }
        if !(8..=200).contains(&self.font_size) {
            return Err(AppError::InvalidEditParameters(format!(
                "font size {} outside 8..=200",
                self.font_size
            )));
        }
        let in_frame = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !in_frame(self.position.x) || !in_frame(self.position.y) {
            return Err(AppError::InvalidEditParameters(format!(
                "overlay position {:?} outside the frame",
                self.position
            )));
        }
        if parse_hex_color(&self.color).is_none() {
            return Err(AppError::InvalidEditParameters(format!(
                "invalid overlay color {}",
                self.color
            )));
        }
        if let Some(interval) = self.visible {
            if interval.start_ms >= interval.end_ms {
                return Err(AppError::InvalidEditParameters(
                    "overlay interval ends before it starts".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_visible_at(&self, at_ms: u64) -> bool {
        self.visible.map_or(true, |interval| interval.contains(at_ms))
    }
}

/// Parse `#rrggbb` into RGB components
pub fn parse_hex_color(color: &str) -> Option<[u8; 3]> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Playback volume and fades
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    /// 1.0 = unchanged
    pub volume: f64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            fade_in_ms: 0,
            fade_out_ms: 0,
        }
    }
}

impl AudioSettings {
    pub fn validate(&self) -> AppResult<()> {
        if !self.volume.is_finite() || !(0.0..=2.0).contains(&self.volume) {
            return Err(AppError::InvalidEditParameters(format!(
                "volume must be within 0..=2, got {}",
                self.volume
            )));
        }
        Ok(())
    }
}

/// Edit parameters for the artifact currently in the edit surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditState {
    pub trim_range: Option<TrimRange>,
    pub crop_rect: Option<CropRect>,
    pub filters: FilterSettings,
    pub text_overlays: Vec<TextOverlay>,
    pub audio: AudioSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_range_is_never_clamped() {
        assert!(TrimRange::new(0, 1000).validate(1000).is_ok());
        assert!(matches!(
            TrimRange::new(500, 500).validate(1000),
            Err(AppError::InvalidEditParameters(_))
        ));
        assert!(TrimRange::new(600, 400).validate(1000).is_err());
        assert!(TrimRange::new(0, 1001).validate(1000).is_err());
    }

    #[test]
    fn test_crop_validation_and_pixels() {
        assert!(CropRect::new(10.0, 10.0, 50.0, 50.0).validate().is_ok());
        assert!(CropRect::new(60.0, 0.0, 50.0, 50.0).validate().is_err());
        assert!(CropRect::new(0.0, 0.0, 0.0, 50.0).validate().is_err());
        assert!(CropRect::new(f64::NAN, 0.0, 10.0, 10.0).validate().is_err());

        let (x, y, w, h) = CropRect::new(25.0, 50.0, 50.0, 50.0).to_pixels(1280, 720);
        assert_eq!((x, y, w, h), (320, 360, 640, 360));
    }

    #[test]
    fn test_filter_ranges() {
        assert!(FilterSettings::default().validate().is_ok());
        assert!(FilterSettings::default().is_identity());
        let bad = FilterSettings {
            blur: 25.0,
            ..FilterSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_text_overlay_validation() {
        let mut overlay = TextOverlay::new("Hello", 50.0, 90.0);
        assert!(overlay.validate().is_ok());

        overlay.color = "white".to_string();
        assert!(overlay.validate().is_err());

        overlay.color = "#00ff7f".to_string();
        overlay.visible = Some(VisibleInterval {
            start_ms: 1000,
            end_ms: 2000,
        });
        assert!(overlay.validate().is_ok());
        assert!(!overlay.is_visible_at(999));
        assert!(overlay.is_visible_at(1000));
        assert!(!overlay.is_visible_at(2000));
    }

    #[test]
    fn test_hex_color() {
        assert_eq!(parse_hex_color("#ff8000"), Some([255, 128, 0]));
        assert_eq!(parse_hex_color("ff8000"), None);
        assert_eq!(parse_hex_color("#ff80"), None);
    }
}
