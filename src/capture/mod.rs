//! Per-resolution offscreen capture.
//!
//! One [`capture`] call takes a camera, points it at a freshly allocated
//! offscreen buffer of the requested size, renders one frame, reads it back,
//! fixes up the color space, and writes a PNG to the path [`OutputLayout`]
//! computes for the `(group, label, file name)` triple.
//!
//! The camera's render destination is held by a [`TargetBinding`] for the
//! duration of the render, and is put back when the binding drops, whether the
//! capture succeeded or not.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bevy::log::debug;
use image::{DynamicImage, ImageFormat, RgbaImage};
use thiserror::Error;

pub mod color;
pub mod layout;
pub mod sanitize;
pub mod software;

pub use color::ColorSpace;
pub use layout::OutputLayout;
pub use sanitize::{sanitize_filename_segment, sanitize_path_segment};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no camera available to capture from")]
    NoCameraAvailable,

    #[error("invalid capture target {label:?}: {width}x{height}")]
    InvalidTarget {
        label: String,
        width: u32,
        height: u32,
    },

    #[error("could not allocate a {width}x{height} offscreen buffer: {reason}")]
    AllocationFailure {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One capture variant, e.g. a device display size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTarget {
    label: String,
    width: u32,
    height: u32,
}

impl ResolutionTarget {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    /// Unlabelled target, used for the native viewport size.
    pub fn base(width: u32, height: u32) -> Self {
        Self::new("", width, height)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidTarget {
                label: self.label.clone(),
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// A PNG written by one successful [`capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub group: String,
    pub label: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Everything a single capture needs besides the camera and the output root.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest<'a> {
    pub group: &'a str,
    pub target: &'a ResolutionTarget,
    /// Already filesystem safe, usually `yyMMdd_HHmmss.png`. Used verbatim.
    pub shared_file_name: &'a str,
}

/// A camera that can be redirected into offscreen buffers and read back.
pub trait RenderCamera {
    /// Where the camera renders to: the default surface or an offscreen buffer.
    type Target: Clone;

    /// The currently bound destination.
    fn target(&self) -> Self::Target;

    fn set_target(&mut self, target: Self::Target);

    /// Creates an offscreen buffer of exactly `width` x `height`.
    fn allocate(&mut self, width: u32, height: u32) -> Result<Self::Target, CaptureError>;

    /// Frees a buffer returned by [`RenderCamera::allocate`].
    fn release(&mut self, target: Self::Target);

    /// Renders one frame into the bound destination, blocking until done.
    fn render(&mut self) -> Result<(), CaptureError>;

    /// Reads the whole of `target` back as RGBA8, top row first.
    fn read_pixels(&mut self, target: &Self::Target) -> Result<RgbaImage, CaptureError>;

    fn color_space(&self) -> ColorSpace;
}

/// Something that may hold a camera to capture from.
pub trait CameraSource {
    type Camera: RenderCamera;

    fn main_camera(&mut self) -> Option<&mut Self::Camera>;
}

impl<C: RenderCamera> CameraSource for Option<C> {
    type Camera = C;

    fn main_camera(&mut self) -> Option<&mut C> {
        self.as_mut()
    }
}

/// Exclusive hold on a camera's render destination.
///
/// Acquiring allocates an offscreen buffer and binds it; dropping restores the
/// previous destination and releases the buffer.
pub struct TargetBinding<'a, C: RenderCamera> {
    camera: &'a mut C,
    previous: Option<C::Target>,
    offscreen: Option<C::Target>,
}

impl<'a, C: RenderCamera> TargetBinding<'a, C> {
    pub fn acquire(camera: &'a mut C, width: u32, height: u32) -> Result<Self, CaptureError> {
        let offscreen = camera.allocate(width, height)?;
        let previous = camera.target();
        camera.set_target(offscreen.clone());
        Ok(Self {
            camera,
            previous: Some(previous),
            offscreen: Some(offscreen),
        })
    }

    pub fn render(&mut self) -> Result<(), CaptureError> {
        self.camera.render()
    }

    pub fn read_pixels(&mut self) -> Result<RgbaImage, CaptureError> {
        match &self.offscreen {
            Some(target) => self.camera.read_pixels(target),
            None => Err(CaptureError::Readback("offscreen buffer already released".into())),
        }
    }
}

impl<C: RenderCamera> Drop for TargetBinding<'_, C> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.camera.set_target(previous);
        }
        if let Some(offscreen) = self.offscreen.take() {
            self.camera.release(offscreen);
        }
    }
}

/// Renders, reads back and writes one `(group, target)` variant.
pub fn capture<S: CameraSource>(
    source: &mut S,
    request: &CaptureRequest<'_>,
    layout: &OutputLayout,
) -> Result<CapturedImage, CaptureError> {
    let target = request.target;
    target.validate()?;
    let camera = source
        .main_camera()
        .ok_or(CaptureError::NoCameraAvailable)?;

    let path = layout.image_path(request.group, target.label(), request.shared_file_name);

    let mut frame = {
        let mut binding = TargetBinding::acquire(&mut *camera, target.width(), target.height())?;
        binding.render()?;
        binding.read_pixels()?
    };

    if frame.dimensions() != (target.width(), target.height()) {
        return Err(CaptureError::Readback(format!(
            "expected {}x{}, got {}x{}",
            target.width(),
            target.height(),
            frame.width(),
            frame.height()
        )));
    }

    color::correct_for_png(&mut frame, camera.color_space());
    let png = encode_png(frame)?;
    write_png(&path, &png)?;

    debug!("wrote {} ({} bytes)", path.display(), png.len());
    Ok(CapturedImage {
        group: request.group.to_string(),
        label: target.label().to_string(),
        path,
        width: target.width(),
        height: target.height(),
    })
}

fn encode_png(frame: RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(frame).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn write_png(path: &Path, png: &[u8]) -> Result<(), CaptureError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| CaptureError::io(dir, e))?;
    }
    fs::write(path, png).map_err(|e| CaptureError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::software::{SoftwareCamera, SoftwareTarget};
    use super::*;

    #[test]
    fn binding_restores_previous_target_on_drop() {
        let mut camera = SoftwareCamera::default();
        assert_eq!(camera.target(), SoftwareTarget::Screen);
        {
            let binding = TargetBinding::acquire(&mut camera, 4, 4).unwrap();
            assert!(matches!(binding.camera.target(), SoftwareTarget::Offscreen(_)));
        }
        assert_eq!(camera.target(), SoftwareTarget::Screen);
        assert_eq!(camera.live_buffers(), 0);
    }

    #[test]
    fn failed_allocation_leaves_binding_untouched() {
        let mut camera = SoftwareCamera::default().with_max_dimension(8);
        let err = TargetBinding::acquire(&mut camera, 9, 4).err().unwrap();
        assert!(matches!(err, CaptureError::AllocationFailure { width: 9, .. }));
        assert_eq!(camera.target(), SoftwareTarget::Screen);
        assert_eq!(camera.live_buffers(), 0);
    }

    #[test]
    fn zero_sized_target_is_rejected() {
        let err = ResolutionTarget::new("flat", 10, 0).validate().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidTarget { height: 0, .. }));
    }
}
