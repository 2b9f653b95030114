//! Frame storage and distribution
//!
//! The mirroring callback publishes into a single-slot `FrameBuffer`; the
//! relay loop takes from it and stores into `CurrentFrame`, which every
//! matcher loop reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array3;

use super::VisionError;

/// A decoded video frame in BGR order, shaped `(height, width, 3)`
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<u8>,
}

impl Frame {
    /// Build a frame from tightly packed BGR bytes
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VisionError> {
        let pixels = Array3::from_shape_vec((height as usize, width as usize, 3), data)
            .map_err(|_| VisionError::InvalidFrameData)?;
        Ok(Self { pixels })
    }

    /// Build a frame from tightly packed RGBA bytes, dropping alpha
    pub fn from_rgba(width: u32, height: u32, data: &[u8]) -> Result<Self, VisionError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(VisionError::InvalidFrameData);
        }

        let bgr = data
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        Self::from_bgr(width, height, bgr)
    }

    /// Convert an RGB image into a BGR frame
    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
            image.get_pixel(x as u32, y as u32)[2 - c]
        });
        Self { pixels }
    }

    /// Convert back into an RGB image for encoding
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let [b, g, r] = self.pixel(x, y);
            Rgb([r, g, b])
        })
    }

    /// Shrink by an integer `factor` with a triangle filter
    pub fn downscale(&self, factor: u32) -> Result<Frame, VisionError> {
        if factor <= 1 {
            return Ok(self.clone());
        }
        let width = (self.width() / factor).max(1);
        let height = (self.height() / factor).max(1);

        // The filter treats channels alike, so BGR passes through unchanged
        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        let buffer = RgbImage::from_raw(self.width(), self.height(), raw)
            .ok_or(VisionError::InvalidFrameData)?;
        let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
        Frame::from_bgr(width, height, resized.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.pixels.dim().1 as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.dim().0 as u32
    }

    /// BGR pixel at `(x, y)`; panics when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let (x, y) = (x as usize, y as usize);
        [
            self.pixels[[y, x, 0]],
            self.pixels[[y, x, 1]],
            self.pixels[[y, x, 2]],
        ]
    }

    /// Raw `(height, width, 3)` array
    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }
}

/// Receives every published frame for on-screen display
pub trait FrameSink: Send + Sync {
    fn render(&self, frame: &Frame);
}

/// Single-slot, most-recent-wins staging buffer
///
/// `publish` never waits for a consumer: an unread frame is replaced and
/// counted as dropped.
pub struct FrameBuffer {
    slot: Mutex<Option<Frame>>,
    ready: Condvar,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store a frame, replacing any unread one
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        drop(slot);
        self.ready.notify_all();
    }

    /// Block until a frame is available and take it
    pub fn take(&self) -> Frame {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(frame) = slot.take() {
                return frame;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `take`, but gives up after `timeout`
    pub fn take_timeout(&self, timeout: Duration) -> Option<Frame> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }

    /// Take a frame if one is waiting
    pub fn try_take(&self) -> Option<Frame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Frames published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames replaced before anyone took them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared read-mostly slot holding the latest relayed frame
pub struct CurrentFrame {
    frame: RwLock<Option<Arc<Frame>>>,
    sequence: AtomicU64,
}

impl CurrentFrame {
    pub fn new() -> Self {
        Self {
            frame: RwLock::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    /// Replace the current frame
    pub fn store(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.frame.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        self.sequence.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recent frame, if any has arrived
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of frames stored so far
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Default for CurrentFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_bgr(width, height, vec![value; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn test_frame_dimensions() {
        let frame = solid(4, 2, 9);
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixel(3, 1), [9, 9, 9]);
    }

    #[test]
    fn test_invalid_frame_data() {
        assert!(Frame::from_bgr(10, 10, vec![0; 100]).is_err());
        assert!(Frame::from_rgba(10, 10, &[0; 100]).is_err());
    }

    #[test]
    fn test_rgb_round_trip_swaps_channels() {
        let image = RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 200]));
        let frame = Frame::from_rgb_image(&image);

        // BGR storage
        assert_eq!(frame.pixel(2, 1), [200, 20, 20]);
        assert_eq!(frame.to_rgb_image(), image);
    }

    #[test]
    fn test_downscale_keeps_channel_order() {
        let frame = Frame::from_bgr(8, 4, [10u8, 20, 30].repeat(32)).unwrap();
        let small = frame.downscale(4).unwrap();

        assert_eq!((small.width(), small.height()), (2, 1));
        assert_eq!(small.pixel(1, 0), [10, 20, 30]);
        assert_eq!(frame.downscale(1).unwrap(), frame);
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let frame = Frame::from_rgba(1, 1, &[10, 20, 30, 255]).unwrap();
        assert_eq!(frame.pixel(0, 0), [30, 20, 10]);
    }

    #[test]
    fn test_latest_publish_wins() {
        let buffer = FrameBuffer::new();
        for value in 0..5 {
            buffer.publish(solid(2, 2, value));
        }

        assert_eq!(buffer.take().pixel(0, 0), [4, 4, 4]);
        assert_eq!(buffer.published(), 5);
        assert_eq!(buffer.dropped(), 4);
        assert!(buffer.try_take().is_none());
    }

    #[test]
    fn test_take_timeout_empty() {
        let buffer = FrameBuffer::new();
        assert!(buffer.take_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_take_blocks_until_publish() {
        let buffer = Arc::new(FrameBuffer::new());
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.publish(solid(2, 2, 7));
            })
        };

        let frame = buffer.take();
        assert_eq!(frame.pixel(1, 1), [7, 7, 7]);
        producer.join().unwrap();
    }

    #[test]
    fn test_current_frame_slot() {
        let current = CurrentFrame::new();
        assert!(current.latest().is_none());

        current.store(solid(2, 2, 1));
        current.store(solid(2, 2, 2));

        assert_eq!(current.latest().unwrap().pixel(0, 0), [2, 2, 2]);
        assert_eq!(current.sequence(), 2);
    }
}
