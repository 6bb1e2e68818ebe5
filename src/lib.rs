//! Captures a camera at several resolutions and writes one PNG per resolution
//! into a `<root>/<group>/<label>/` tree.
//!
//! - [`capture`]: the per-resolution pipeline, path helpers, color handling
//!   and a CPU camera.
//! - [`image_grab`]: a headless Bevy camera that renders on the GPU and reads
//!   frames back through a render-graph copy node.
//! - [`session`]: capture groups, and the capture / list / delete actions.

pub mod capture;
pub mod cli;
pub mod image_grab;
pub mod scene;
pub mod session;

pub use capture::{
    CameraSource, CaptureError, CaptureRequest, CapturedImage, ColorSpace, OutputLayout,
    RenderCamera, ResolutionTarget, capture, sanitize_filename_segment, sanitize_path_segment,
};
pub use session::{CaptureGroup, CaptureSession, SessionError};
