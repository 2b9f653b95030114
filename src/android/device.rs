//! Device control boundary
//!
//! The mirroring client is a black box to the automation core: it accepts
//! touch, key and screen power commands. `CommandQueue` is the in-process
//! implementation a host drains, either over JNI or from the desktop binary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::input::{Point, PointerId};

/// Touch/key action codes understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchAction {
    Down,
    Up,
    Move,
}

impl TouchAction {
    /// Android `MotionEvent` action code
    pub fn code(self) -> i32 {
        match self {
            TouchAction::Down => 0,
            TouchAction::Up => 1,
            TouchAction::Move => 2,
        }
    }

    /// Parse an Android action code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TouchAction::Down),
            1 => Some(TouchAction::Up),
            2 => Some(TouchAction::Move),
            _ => None,
        }
    }
}

/// Android key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keycode(pub i32);

impl Keycode {
    pub const HOME: Keycode = Keycode(3);
    pub const BACK: Keycode = Keycode(4);
    pub const TAB: Keycode = Keycode(61);
    pub const SPACE: Keycode = Keycode(62);
    pub const ENTER: Keycode = Keycode(66);
    pub const DEL: Keycode = Keycode(67);
    pub const SHIFT_LEFT: Keycode = Keycode(59);
    pub const CTRL_LEFT: Keycode = Keycode(113);
}

/// Map a typed character to an Android key code
///
/// Digits map to `KEYCODE_0..KEYCODE_9`, letters of either case to
/// `KEYCODE_A..KEYCODE_Z`.
pub fn map_ascii_key(c: char) -> Option<Keycode> {
    match c {
        '0'..='9' => Some(Keycode(c as i32 - '0' as i32 + 7)),
        'a'..='z' => Some(Keycode(c as i32 - 'a' as i32 + 29)),
        'A'..='Z' => Some(Keycode(c as i32 - 'A' as i32 + 29)),
        ' ' => Some(Keycode::SPACE),
        '\n' => Some(Keycode::ENTER),
        '\t' => Some(Keycode::TAB),
        _ => None,
    }
}

/// Display power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenPowerMode {
    Off,
    Normal,
}

/// A single command sent to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Touch {
        point: Point,
        action: TouchAction,
        pointer: PointerId,
    },
    Swipe {
        start: Point,
        end: Point,
        pointer: PointerId,
    },
    Keycode {
        code: Keycode,
        action: TouchAction,
    },
    BackOrScreenOn {
        action: TouchAction,
    },
    ScreenPower {
        mode: ScreenPowerMode,
    },
}

/// Device control errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Mirroring session is closed")]
    SessionClosed,
    #[error("Device rejected command: {0}")]
    Rejected(String),
}

/// Commands the mirroring client accepts
pub trait DeviceControl: Send + Sync {
    /// Send a single touch event
    fn touch(
        &self,
        point: Point,
        action: TouchAction,
        pointer: PointerId,
    ) -> Result<(), DeviceError>;

    /// Send one continuous drag from `start` to `end`
    fn swipe(&self, start: Point, end: Point, pointer: PointerId) -> Result<(), DeviceError>;

    /// Send a key event
    fn keycode(&self, code: Keycode, action: TouchAction) -> Result<(), DeviceError>;

    /// Press back, or wake the screen when it is off
    fn back_or_turn_screen_on(&self, action: TouchAction) -> Result<(), DeviceError>;

    /// Turn the device display on or off without ending the session
    fn set_screen_power_mode(&self, mode: ScreenPowerMode) -> Result<(), DeviceError>;
}

/// Bounded FIFO of device commands waiting for the host
///
/// When full the oldest command is dropped; the automation never waits on
/// the host.
pub struct CommandQueue {
    commands: Mutex<VecDeque<ControlCommand>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl CommandQueue {
    /// Default number of pending commands kept
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a queue holding at most `capacity` commands
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, command: ControlCommand) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::SessionClosed);
        }

        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if commands.len() >= self.capacity {
            commands.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("Command queue full, dropped oldest ({} total)", dropped);
        }
        commands.push_back(command);
        Ok(())
    }

    /// Take the oldest pending command
    pub fn pop(&self) -> Option<ControlCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Take every pending command in order
    pub fn drain(&self) -> Vec<ControlCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reject all further commands
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceControl for CommandQueue {
    fn touch(
        &self,
        point: Point,
        action: TouchAction,
        pointer: PointerId,
    ) -> Result<(), DeviceError> {
        self.push(ControlCommand::Touch {
            point,
            action,
            pointer,
        })
    }

    fn swipe(&self, start: Point, end: Point, pointer: PointerId) -> Result<(), DeviceError> {
        self.push(ControlCommand::Swipe {
            start,
            end,
            pointer,
        })
    }

    fn keycode(&self, code: Keycode, action: TouchAction) -> Result<(), DeviceError> {
        self.push(ControlCommand::Keycode { code, action })
    }

    fn back_or_turn_screen_on(&self, action: TouchAction) -> Result<(), DeviceError> {
        self.push(ControlCommand::BackOrScreenOn { action })
    }

    fn set_screen_power_mode(&self, mode: ScreenPowerMode) -> Result<(), DeviceError> {
        self.push(ControlCommand::ScreenPower { mode })
    }
}
