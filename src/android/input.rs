//! Touch sequencing and coordinate handling
//!
//! Turns screen positions into the down/up and drag commands sent to the
//! device.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::device::{DeviceControl, DeviceError, Keycode, ScreenPowerMode, TouchAction};
use crate::automation::Clock;

/// A position in native device pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Synthetic pointer identifier
///
/// Every logical finger gets its own id so that a held movement drag and an
/// ability tap reach the device as two separate gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointerId(pub i64);

impl PointerId {
    /// Clicks forwarded from the operator window
    pub const OPERATOR: PointerId = PointerId(-2);
    /// Joystick drag
    pub const MOVEMENT: PointerId = PointerId(1);
    /// Menu navigation taps
    pub const MENU: PointerId = PointerId(2);
    /// Skill upgrade taps
    pub const SKILL: PointerId = PointerId(3);
    /// Attack burst taps
    pub const ATTACK: PointerId = PointerId(4);
    /// Surrender sequence taps
    pub const BATTLE: PointerId = PointerId(5);
}

/// Ratio between the operator window and the native device resolution
///
/// `ratio = displayed / max(native_width, native_height)`, applied the same
/// way in both directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScale {
    /// Longest displayed side
    pub max_width: u32,
    /// Native device width
    pub native_width: u32,
    /// Native device height
    pub native_height: u32,
}

impl DisplayScale {
    pub fn new(max_width: u32, native_width: u32, native_height: u32) -> Self {
        Self {
            max_width,
            native_width,
            native_height,
        }
    }

    /// Displayed pixels per native pixel
    pub fn ratio(&self) -> f32 {
        let longest = self.native_width.max(self.native_height);
        if longest == 0 || self.max_width == 0 {
            return 1.0;
        }
        self.max_width as f32 / longest as f32
    }

    /// Map a position in the operator window to device pixels
    pub fn to_device(&self, x: f32, y: f32) -> Point {
        let ratio = self.ratio();
        Point::new((x / ratio).round() as i32, (y / ratio).round() as i32)
    }

    /// Map a device position into the operator window
    pub fn to_display(&self, point: Point) -> (f32, f32) {
        let ratio = self.ratio();
        (point.x as f32 * ratio, point.y as f32 * ratio)
    }
}

/// Issues tap, swipe and key sequences on the device
pub struct ActionDispatcher {
    device: Arc<dyn DeviceControl>,
    clock: Arc<dyn Clock>,
    /// How long a tap keeps the pointer down
    tap_hold: Duration,
}

impl ActionDispatcher {
    /// Create a dispatcher with the default 100ms tap hold
    pub fn new(device: Arc<dyn DeviceControl>, clock: Arc<dyn Clock>) -> Self {
        Self {
            device,
            clock,
            tap_hold: Duration::from_millis(100),
        }
    }

    /// Set the tap hold duration
    pub fn with_tap_hold(mut self, hold: Duration) -> Self {
        self.tap_hold = hold;
        self
    }

    /// Press and release at `point` under `pointer`
    pub fn tap(&self, point: Point, pointer: PointerId) -> Result<(), DeviceError> {
        log::debug!("tap ({}, {}) pointer {}", point.x, point.y, pointer.0);
        self.device.touch(point, TouchAction::Down, pointer)?;
        self.clock.sleep(self.tap_hold);
        self.device.touch(point, TouchAction::Up, pointer)
    }

    /// Drag from `start` to `end` in one continuous gesture
    pub fn swipe(&self, start: Point, end: Point, pointer: PointerId) -> Result<(), DeviceError> {
        log::trace!(
            "swipe ({}, {}) -> ({}, {}) pointer {}",
            start.x,
            start.y,
            end.x,
            end.y,
            pointer.0
        );
        self.device.swipe(start, end, pointer)
    }

    /// Send a single raw touch event
    pub fn touch(
        &self,
        point: Point,
        action: TouchAction,
        pointer: PointerId,
    ) -> Result<(), DeviceError> {
        self.device.touch(point, action, pointer)
    }

    /// Press and release a key
    pub fn press_key(&self, code: Keycode) -> Result<(), DeviceError> {
        self.device.keycode(code, TouchAction::Down)?;
        self.device.keycode(code, TouchAction::Up)
    }

    /// Home button
    pub fn home(&self) -> Result<(), DeviceError> {
        self.press_key(Keycode::HOME)
    }

    /// Back button (wakes the screen when it is off)
    pub fn back(&self) -> Result<(), DeviceError> {
        self.device.back_or_turn_screen_on(TouchAction::Down)?;
        self.device.back_or_turn_screen_on(TouchAction::Up)
    }

    /// Turn the device display on or off
    pub fn set_screen_power(&self, mode: ScreenPowerMode) -> Result<(), DeviceError> {
        self.device.set_screen_power_mode(mode)
    }
}
