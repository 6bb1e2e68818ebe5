//! CPU camera that paints a procedural scene.
//!
//! Used when no GPU adapter is around, and by the tests: it honours the same
//! allocate / bind / render / read back contract as the Bevy camera.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use super::color::{ColorSpace, linear_to_srgb};
use super::{CameraSource, CaptureError, RenderCamera};

/// Largest edge the software camera will allocate by default.
pub const DEFAULT_MAX_DIMENSION: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftwareTarget {
    /// The "screen": rendering here has no readable result.
    Screen,
    Offscreen(u64),
}

/// Linear RGBA shading for a pixel at `(x, y)` in a `width` x `height` frame.
pub type Shader = fn(x: u32, y: u32, width: u32, height: u32) -> [f32; 4];

/// Horizontal red ramp, vertical green ramp, constant blue.
pub fn gradient(x: u32, y: u32, width: u32, height: u32) -> [f32; 4] {
    let u = if width > 1 { x as f32 / (width - 1) as f32 } else { 0.0 };
    let v = if height > 1 { y as f32 / (height - 1) as f32 } else { 0.0 };
    [u, v, 0.25, 1.0]
}

/// One allocated offscreen buffer. The frame is handed out on readback, and a
/// later render fills a new one.
struct Offscreen {
    width: u32,
    height: u32,
    frame: Option<RgbaImage>,
}

pub struct SoftwareCamera {
    target: SoftwareTarget,
    color_space: ColorSpace,
    max_dimension: u32,
    shader: Shader,
    buffers: HashMap<u64, Offscreen>,
    next_id: u64,
}

impl Default for SoftwareCamera {
    fn default() -> Self {
        Self {
            target: SoftwareTarget::Screen,
            color_space: ColorSpace::Gamma,
            max_dimension: DEFAULT_MAX_DIMENSION,
            shader: gradient,
            buffers: HashMap::new(),
            next_id: 0,
        }
    }
}

impl SoftwareCamera {
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_shader(mut self, shader: Shader) -> Self {
        self.shader = shader;
        self
    }

    /// Offscreen buffers allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn to_byte(&self, c: f32) -> u8 {
        let c = match self.color_space {
            ColorSpace::Linear => c.clamp(0.0, 1.0),
            ColorSpace::Gamma => linear_to_srgb(c),
        };
        (c * 255.0).round() as u8
    }
}

/// Zeroed RGBA8 frame, or `AllocationFailure` if it does not fit in memory.
fn try_alloc_frame(width: u32, height: u32) -> Result<RgbaImage, CaptureError> {
    let failure = |reason: String| CaptureError::AllocationFailure {
        width,
        height,
        reason,
    };
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| failure("frame size overflows the address space".into()))?;

    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| failure(e.to_string()))?;
    data.resize(len, 0);
    RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| failure("frame buffer has the wrong length".into()))
}

impl RenderCamera for SoftwareCamera {
    type Target = SoftwareTarget;

    fn target(&self) -> SoftwareTarget {
        self.target
    }

    fn set_target(&mut self, target: SoftwareTarget) {
        self.target = target;
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<SoftwareTarget, CaptureError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(CaptureError::AllocationFailure {
                width,
                height,
                reason: format!("exceeds maximum dimension {}", self.max_dimension),
            });
        }
        let frame = try_alloc_frame(width, height)?;
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(
            id,
            Offscreen {
                width,
                height,
                frame: Some(frame),
            },
        );
        Ok(SoftwareTarget::Offscreen(id))
    }

    fn release(&mut self, target: SoftwareTarget) {
        if let SoftwareTarget::Offscreen(id) = target {
            self.buffers.remove(&id);
        }
    }

    fn render(&mut self) -> Result<(), CaptureError> {
        let SoftwareTarget::Offscreen(id) = self.target else {
            return Ok(());
        };
        let Some(offscreen) = self.buffers.get_mut(&id) else {
            return Err(CaptureError::Readback(format!("buffer {id} is not allocated")));
        };
        let mut frame = match offscreen.frame.take() {
            Some(frame) => frame,
            None => try_alloc_frame(offscreen.width, offscreen.height)?,
        };
        let (width, height) = frame.dimensions();
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            let [r, g, b, a] = (self.shader)(x, y, width, height);
            *pixel = Rgba([
                self.to_byte(r),
                self.to_byte(g),
                self.to_byte(b),
                (a.clamp(0.0, 1.0) * 255.0).round() as u8,
            ]);
        }
        if let Some(offscreen) = self.buffers.get_mut(&id) {
            offscreen.frame = Some(frame);
        }
        Ok(())
    }

    /// Hands the rendered frame over without copying it; reading the same
    /// buffer again needs another render.
    fn read_pixels(&mut self, target: &SoftwareTarget) -> Result<RgbaImage, CaptureError> {
        match target {
            SoftwareTarget::Offscreen(id) => {
                let offscreen = self.buffers.get_mut(id).ok_or_else(|| {
                    CaptureError::Readback(format!("buffer {id} is not allocated"))
                })?;
                offscreen.frame.take().ok_or_else(|| {
                    CaptureError::Readback(format!("buffer {id} was already read back"))
                })
            }
            SoftwareTarget::Screen => Err(CaptureError::Readback(
                "the screen target cannot be read back".into(),
            )),
        }
    }

    fn color_space(&self) -> ColorSpace {
        self.color_space
    }
}

impl CameraSource for SoftwareCamera {
    type Camera = Self;

    fn main_camera(&mut self) -> Option<&mut Self> {
        Some(self)
    }
}
