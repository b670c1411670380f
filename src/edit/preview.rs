//! Preview rendering
//!
//! Non-destructive edits are rendered here, either as a CSS filter string
//! for hosts that draw with CSS or directly on RGBA frames.

use serde::Serialize;

use super::types::{AudioSettings, EditState, FilterSettings, TextOverlay};
use crate::capture::traits::VideoFrame;

/// What the host needs to redraw the preview
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewState {
    pub css_filter: String,
    pub text_overlays: Vec<TextOverlay>,
    pub audio: AudioSettings,
    /// Bumped on every change
    pub revision: u64,
}

impl PreviewState {
    pub fn from_edit_state(state: &EditState, revision: u64) -> Self {
        Self {
            css_filter: css_filter(&state.filters),
            text_overlays: state.text_overlays.clone(),
            audio: state.audio,
            revision,
        }
    }
}

/// CSS `filter` value, e.g. `brightness(110%) contrast(100%) ...`
pub fn css_filter(filters: &FilterSettings) -> String {
    format!(
        "brightness({}%) contrast({}%) saturate({}%) blur({}px) sepia({}%)",
        filters.brightness, filters.contrast, filters.saturation, filters.blur, filters.sepia
    )
}

/// Overlays shown at `at_ms`, in draw order
pub fn visible_overlays(overlays: &[TextOverlay], at_ms: u64) -> Vec<&TextOverlay> {
    overlays.iter().filter(|o| o.is_visible_at(at_ms)).collect()
}

/// Playback gain at `at_ms`, including fades
pub fn gain_at(audio: &AudioSettings, at_ms: u64, duration_ms: u64) -> f64 {
    let mut gain = audio.volume;
    if audio.fade_in_ms > 0 && at_ms < audio.fade_in_ms {
        gain *= at_ms as f64 / audio.fade_in_ms as f64;
    }
    if audio.fade_out_ms > 0 {
        let remaining = duration_ms.saturating_sub(at_ms);
        if remaining < audio.fade_out_ms {
            gain *= remaining as f64 / audio.fade_out_ms as f64;
        }
    }
    gain.clamp(0.0, 2.0)
}

/// Apply visual filters to a frame, in CSS order
pub fn apply_filters(frame: &VideoFrame, filters: &FilterSettings) -> VideoFrame {
    if filters.is_identity() {
        return frame.clone();
    }

    let brightness = (filters.brightness / 100.0) as f32;
    let contrast = (filters.contrast / 100.0) as f32;
    let saturation = (filters.saturation / 100.0) as f32;
    let sepia = (filters.sepia / 100.0) as f32;

    let mut data = frame.data.to_vec();
    for px in data.chunks_exact_mut(4) {
        let mut rgb = [px[0] as f32, px[1] as f32, px[2] as f32];

        for c in rgb.iter_mut() {
            *c *= brightness;
            *c = (*c - 128.0) * contrast + 128.0;
        }

        // Rec. 709 luma weights, as used by CSS saturate()
        let luma = 0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2];
        for c in rgb.iter_mut() {
            *c = luma + (*c - luma) * saturation;
        }

        if sepia > 0.0 {
            let [r, g, b] = rgb;
            let toned = [
                0.393 * r + 0.769 * g + 0.189 * b,
                0.349 * r + 0.686 * g + 0.168 * b,
                0.272 * r + 0.534 * g + 0.131 * b,
            ];
            for (c, t) in rgb.iter_mut().zip(toned) {
                *c = *c * (1.0 - sepia) + t * sepia;
            }
        }

        for (dst, c) in px.iter_mut().zip(rgb) {
            *dst = c.round().clamp(0.0, 255.0) as u8;
        }
    }

    let radius = filters.blur.round() as u32;
    if radius > 0 {
        data = box_blur(&data, frame.width, frame.height, radius);
    }

    VideoFrame::new(frame.width, frame.height, data)
}

/// Separable box blur over RGB, alpha untouched
fn box_blur(data: &[u8], width: u32, height: u32, radius: u32) -> Vec<u8> {
    let (w, h, r) = (width as i64, height as i64, radius as i64);
    let idx = |x: i64, y: i64| ((y * w + x) * 4) as usize;

    let pass = |src: &[u8], horizontal: bool| -> Vec<u8> {
        let mut out = src.to_vec();
        for y in 0..h {
            for x in 0..w {
                let mut sum = [0u32; 3];
                let mut count = 0u32;
                for d in -r..=r {
                    let (sx, sy) = if horizontal { (x + d, y) } else { (x, y + d) };
                    if sx < 0 || sy < 0 || sx >= w || sy >= h {
                        continue;
                    }
                    let i = idx(sx, sy);
                    for c in 0..3 {
                        sum[c] += src[i + c] as u32;
                    }
                    count += 1;
                }
                let o = idx(x, y);
                for c in 0..3 {
                    out[o + c] = (sum[c] / count.max(1)) as u8;
                }
            }
        }
        out
    };

    let horizontal = pass(data, true);
    pass(&horizontal, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::types::{TextOverlay, VisibleInterval};

    #[test]
    fn test_css_filter_string() {
        let filters = FilterSettings {
            brightness: 120.0,
            sepia: 50.0,
            ..FilterSettings::default()
        };
        assert_eq!(
            css_filter(&filters),
            "brightness(120%) contrast(100%) saturate(100%) blur(0px) sepia(50%)"
        );
    }

    #[test]
    fn test_identity_filters_leave_frame_untouched() {
        let frame = VideoFrame::solid(4, 4, [10, 20, 30, 255]);
        let out = apply_filters(&frame, &FilterSettings::default());
        assert_eq!(out.data, frame.data);
    }

    #[test]
    fn test_brightness_and_saturation() {
        let frame = VideoFrame::solid(2, 2, [100, 50, 200, 255]);

        let brighter = apply_filters(
            &frame,
            &FilterSettings {
                brightness: 150.0,
                ..FilterSettings::default()
            },
        );
        assert_eq!(brighter.pixel(0, 0), Some([150, 75, 255, 255]));

        let grey = apply_filters(
            &frame,
            &FilterSettings {
                saturation: 0.0,
                ..FilterSettings::default()
            },
        );
        let [r, g, b, a] = grey.pixel(1, 1).unwrap();
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_blur_spreads_edges() {
        let mut data = VideoFrame::solid(5, 1, [0, 0, 0, 255]).data.to_vec();
        data[8..11].copy_from_slice(&[255, 255, 255]);
        let frame = VideoFrame::new(5, 1, data);

        let blurred = apply_filters(
            &frame,
            &FilterSettings {
                blur: 1.0,
                ..FilterSettings::default()
            },
        );

        assert_eq!(blurred.pixel(1, 0), Some([85, 85, 85, 255]));
        assert_eq!(blurred.pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_gain_fades() {
        let audio = AudioSettings {
            volume: 1.0,
            fade_in_ms: 1000,
            fade_out_ms: 2000,
        };
        assert_eq!(gain_at(&audio, 0, 10_000), 0.0);
        assert_eq!(gain_at(&audio, 500, 10_000), 0.5);
        assert_eq!(gain_at(&audio, 5_000, 10_000), 1.0);
        assert_eq!(gain_at(&audio, 9_000, 10_000), 0.5);
    }

    #[test]
    fn test_visible_overlays() {
        let always = TextOverlay::new("title", 50.0, 10.0);
        let mut later = TextOverlay::new("outro", 50.0, 90.0);
        later.visible = Some(VisibleInterval {
            start_ms: 5_000,
            end_ms: 6_000,
        });
        let overlays = vec![always, later];

        assert_eq!(visible_overlays(&overlays, 1_000).len(), 1);
        assert_eq!(visible_overlays(&overlays, 5_500).len(), 2);
    }
}
