//! Frame preprocessing: luminance conversion followed by a separable
//! 5-tap binomial blur (an integer approximation of a small Gaussian).
//!
//! Borders are handled by replicating the edge pixel, so a uniform image
//! stays exactly uniform and produces no gradient at the frame boundary.

use crewsafe_hal::{CameraFrame, PixelFormat};
use crewsafe_types::SafetyError;

/// Binomial kernel `[1 4 6 4 1] / 16`.
const BLUR_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Smallest frame the 3×3 gradient operator can work on.
const MIN_DIMENSION: usize = 3;

/// Row-major luminance image, samples in `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayFrame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Build a frame by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }
}

/// Convert a raw [`CameraFrame`] to luminance and smooth it.
///
/// # Errors
///
/// Returns [`SafetyError::CorruptFrame`] when the byte length does not match
/// the advertised dimensions, or when the frame is smaller than 3×3.
pub fn preprocess(frame: &CameraFrame) -> Result<GrayFrame, SafetyError> {
    let gray = to_luminance(frame)?;
    Ok(blur(&gray))
}

/// ITU-R BT.601 luminance for RGB24, passthrough for Gray8.
pub fn to_luminance(frame: &CameraFrame) -> Result<GrayFrame, SafetyError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w < MIN_DIMENSION || h < MIN_DIMENSION {
        return Err(SafetyError::CorruptFrame(format!(
            "frame {w}x{h} is smaller than {MIN_DIMENSION}x{MIN_DIMENSION}"
        )));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(SafetyError::CorruptFrame(format!(
            "expected {} bytes for {w}x{h} {:?}, got {}",
            frame.expected_len(),
            frame.format,
            frame.data.len()
        )));
    }

    let data = match frame.format {
        PixelFormat::Gray8 => frame.data.iter().map(|&b| b as f32).collect(),
        PixelFormat::Rgb24 => frame
            .data
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .collect(),
    };
    Ok(GrayFrame {
        width: w,
        height: h,
        data,
    })
}

/// Separable binomial blur with replicated borders.
pub fn blur(src: &GrayFrame) -> GrayFrame {
    let (w, h) = (src.width, src.height);
    let radius = BLUR_KERNEL.len() / 2;

    let mut horizontal = GrayFrame::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in BLUR_KERNEL.iter().enumerate() {
                let xx = (x + k).saturating_sub(radius).min(w - 1);
                acc += weight * src.get(xx, y);
            }
            horizontal.set(x, y, acc);
        }
    }

    let mut out = GrayFrame::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in BLUR_KERNEL.iter().enumerate() {
                let yy = (y + k).saturating_sub(radius).min(h - 1);
                acc += weight * horizontal.get(x, yy);
            }
            out.set(x, y, acc);
        }
    }
    out
}
