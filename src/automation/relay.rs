//! Frame relay
//!
//! The only consumer of the `FrameBuffer`. Moves each delivered frame into
//! the shared `CurrentFrame` slot the matcher loops read.

use std::sync::Arc;
use std::time::Duration;

use super::PeriodicTask;
use crate::vision::{CurrentFrame, FrameBuffer};

pub struct FrameRelay {
    buffer: Arc<FrameBuffer>,
    frames: Arc<CurrentFrame>,
    /// Longest wait for a frame before re-checking the alive flag
    wait: Duration,
}

impl FrameRelay {
    pub fn new(buffer: Arc<FrameBuffer>, frames: Arc<CurrentFrame>, wait: Duration) -> Self {
        Self {
            buffer,
            frames,
            wait,
        }
    }

    /// Relay one frame if one arrives within the wait; returns whether it did
    pub fn relay(&self) -> bool {
        match self.buffer.take_timeout(self.wait) {
            Some(frame) => {
                self.frames.store(frame);
                true
            }
            None => false,
        }
    }
}

impl PeriodicTask for FrameRelay {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn interval(&self) -> Duration {
        // Blocking on the buffer is the pause
        Duration::ZERO
    }

    fn tick(&mut self) {
        if self.relay() {
            log::trace!("relayed frame {}", self.frames.sequence());
        }
    }
}
