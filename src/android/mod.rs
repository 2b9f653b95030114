//! Android device boundary
//!
//! Device command types, touch sequencing, and the JNI bindings used when a
//! JVM host owns the mirroring session.

pub mod bridge;
pub mod device;
pub mod input;

pub use device::*;
pub use input::*;
