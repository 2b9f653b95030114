//! Vision and image processing module
//!
//! Frame distribution from the mirroring callback to the matcher loops,
//! template matching, and screenshot capture.

pub mod frame;
pub mod matcher;
pub mod screenshot;

pub use frame::{CurrentFrame, Frame, FrameBuffer, FrameSink};
pub use matcher::{MatchResult, Template, TemplateDir, TemplateMatcher, TemplateSource};
pub use screenshot::save_screenshot;

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to load template {name}: {reason}")]
    TemplateLoad { name: String, reason: String },
    #[error("Template has no pixels")]
    EmptyTemplate,
    #[error("Template {template:?} does not fit in frame {frame:?}")]
    SizeMismatch {
        template: (u32, u32),
        frame: (u32, u32),
    },
    #[error("Invalid frame data")]
    InvalidFrameData,
    #[error("No frame has been received yet")]
    NoFrame,
    #[error("Failed to write screenshot: {0}")]
    Screenshot(String),
}
