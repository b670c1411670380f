//! Thumbnail generation

use crate::capture::traits::VideoFrame;
use crate::utils::error::{AppError, AppResult, ConversionStage};

/// Maximum thumbnail width in pixels
pub const THUMBNAIL_WIDTH: u32 = 320;

/// Representative frame time: 10% into the recording
pub fn sample_time_ms(duration_ms: u64) -> u64 {
    duration_ms / 10
}

/// Reject frames whose pixel buffer is shorter than their dimensions claim
fn check_frame(frame: &VideoFrame) -> AppResult<()> {
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.width == 0 || frame.height == 0 || frame.data.len() < expected {
        return Err(AppError::conversion(
            ConversionStage::FrameSample,
            format!(
                "sampled frame is {}x{} but carries {} of {} bytes",
                frame.width,
                frame.height,
                frame.data.len(),
                expected
            ),
        ));
    }
    Ok(())
}

/// Downscale to at most `max_width`, keeping the aspect ratio
pub fn downscale(frame: &VideoFrame, max_width: u32) -> AppResult<VideoFrame> {
    check_frame(frame)?;
    if frame.width <= max_width {
        return Ok(frame.clone());
    }
    let width = max_width;
    let height = ((frame.height as u64 * width as u64) / frame.width as u64).max(1) as u32;

    let mut data = vec![0u8; (width * height * 4) as usize];
    for y in 0..height {
        let sy = (y as u64 * frame.height as u64 / height as u64) as u32;
        for x in 0..width {
            let sx = (x as u64 * frame.width as u64 / width as u64) as u32;
            let src = ((sy * frame.width + sx) * 4) as usize;
            let dst = ((y * width + x) * 4) as usize;
            data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
        }
    }
    Ok(VideoFrame::new(width, height, data))
}

/// Encode an RGBA frame as PNG
pub fn encode_png(frame: &VideoFrame) -> AppResult<Vec<u8>> {
    check_frame(frame)?;
    let fail = |e: png::EncodingError| AppError::conversion(ConversionStage::FrameSample, e.to_string());

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(fail)?;
        let len = (frame.width * frame.height * 4) as usize;
        writer.write_image_data(&frame.data[..len]).map_err(fail)?;
        writer.finish().map_err(fail)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_time() {
        assert_eq!(sample_time_ms(10_000), 1_000);
        assert_eq!(sample_time_ms(0), 0);
    }

    #[test]
    fn test_downscale_keeps_aspect() {
        let frame = VideoFrame::solid(640, 360, [1, 2, 3, 255]);
        let small = downscale(&frame, 320).unwrap();
        assert_eq!((small.width, small.height), (320, 180));
        assert_eq!(small.pixel(319, 179), Some([1, 2, 3, 255]));

        let tiny = VideoFrame::solid(16, 9, [0, 0, 0, 255]);
        assert_eq!(downscale(&tiny, 320).unwrap().width, 16);
    }

    #[test]
    fn test_truncated_frame_is_a_sampling_error() {
        let short = VideoFrame {
            width: 640,
            height: 360,
            data: vec![0u8; 100].into(),
        };

        let err = downscale(&short, 320).unwrap_err();
        assert!(matches!(
            err,
            AppError::ConversionFailure {
                stage: ConversionStage::FrameSample,
                ..
            }
        ));
        assert!(encode_png(&short).is_err());

        let empty = VideoFrame {
            width: 0,
            height: 0,
            data: Vec::<u8>::new().into(),
        };
        assert!(downscale(&empty, 320).is_err());
    }

    #[test]
    fn test_png_decodes_back() {
        let frame = VideoFrame::solid(8, 4, [10, 20, 30, 255]);
        let bytes = encode_png(&frame).unwrap();

        let decoder = png::Decoder::new(bytes.as_slice());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();

        assert_eq!((info.width, info.height), (8, 4));
        assert_eq!(&buf[..4], &[10, 20, 30, 255]);
    }
}
