//! Generic `Camera` trait and supporting types for image-capture hardware.

use std::time::Instant;

use crewsafe_types::SafetyError;

/// Pixel layout of a [`CameraFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Interleaved 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// 8-bit luminance, 1 byte per pixel.
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub format: PixelFormat,
    /// Raw pixel data, row-major.
    pub data: Vec<u8>,
    /// Monotonic capture time, used for hysteresis ordering.
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Byte length implied by the frame's dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::SensorUnavailable`] if the frame cannot be
    /// captured (e.g. the device is disconnected or the buffer is empty).
    fn capture(&mut self) -> Result<CameraFrame, SafetyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        id: String,
    }

    impl Camera for MockCamera {
        fn id(&self) -> &str {
            &self.id
        }

        fn capture(&mut self) -> Result<CameraFrame, SafetyError> {
            Ok(CameraFrame {
                width: 2,
                height: 2,
                format: PixelFormat::Rgb24,
                data: vec![0u8; 4 * 3],
                captured_at: Instant::now(),
            })
        }
    }

    #[test]
    fn mock_camera_capture() {
        let mut cam = MockCamera {
            id: "front_rgb".to_string(),
        };
        assert_eq!(cam.id(), "front_rgb");
        let frame = cam.capture().unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.data.len(), frame.expected_len());
    }

    #[test]
    fn gray_frames_use_one_byte_per_pixel() {
        let frame = CameraFrame {
            width: 640,
            height: 480,
            format: PixelFormat::Gray8,
            data: Vec::new(),
            captured_at: Instant::now(),
        };
        assert_eq!(frame.expected_len(), 640 * 480);
    }
}
