//! Headless Bevy app driven one frame at a time.
//!
//! It follows these steps for every capture:
//!
//! 1. Allocate a gpu render-target image and an `ImageCopier` for it
//! 2. Point the scene camera's `RenderTarget` at the image
//! 3. Run `App::update` until the pre-roll frames are through; each frame the
//!    `ImageCopyDriver` node copies the image into a mappable buffer
//! 4. Take the last buffer sent over the channel and strip the row padding
//! 5. Put the previous `RenderTarget` back and drop the image and its copier

use std::collections::HashMap;
use std::sync::Arc;

use bevy::{
    app::PluginsState,
    camera::RenderTarget,
    log::LogPlugin,
    prelude::*,
    render::{
        RenderPlugin,
        render_resource::{Extent3d, TextureFormat, TextureUsages, WgpuLimits},
        renderer::{
            RenderAdapter, RenderAdapterInfo, RenderDevice, RenderInstance, RenderQueue,
            WgpuWrapper,
        },
        settings::RenderResources,
    },
    tasks::block_on,
    window::ExitCondition,
};
use image::RgbaImage;

use super::image_copy::{
    ImageCopier, ImageCopyPlugin, MainWorldReceiver, Readback, padded_bytes_per_row,
    strip_row_padding,
};
use crate::capture::{CameraSource, CaptureError, ColorSpace, RenderCamera};
use crate::scene::{self, SceneController, SceneState, advance_pre_roll};

/// Frames a render may take beyond its pre-roll before it is treated as stuck.
const RENDER_FRAME_SLACK: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct HeadlessConfig {
    /// `Linear` renders into `Rgba8Unorm`, `Gamma` into `Rgba8UnormSrgb`.
    pub color_space: ColorSpace,
    /// Frames rendered before a readback is kept. Should be big enough for the
    /// scene's assets to load; the bigger it is, the slower every capture.
    pub pre_roll_frames: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Gamma,
            pre_roll_frames: 40,
        }
    }
}

pub struct HeadlessCamera {
    app: App,
    config: HeadlessConfig,
    copiers: HashMap<AssetId<Image>, Entity>,
    latest: Option<Readback>,
}

/// Opens an adapter and device for the render plugin.
///
/// Left to itself `RenderPlugin` panics on a host without a usable adapter, so
/// the request happens here where it can fail with `NoCameraAvailable`.
fn request_render_resources() -> Result<RenderResources, CaptureError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());

    let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::from_env()
            .unwrap_or(wgpu::PowerPreference::HighPerformance),
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .map_err(|e| {
        warn!("no gpu adapter: {e}");
        CaptureError::NoCameraAvailable
    })?;
    let adapter_info = adapter.get_info();
    info!("{adapter_info:?}");

    let mut features = adapter.features() - wgpu::Features::all_experimental_mask();
    if adapter_info.device_type == wgpu::DeviceType::DiscreteGpu {
        // Slow across the PCI-E bus
        features.remove(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS);
    }
    let (device, queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("screen_grabber"),
        required_features: features,
        required_limits: adapter.limits(),
        ..Default::default()
    }))
    .map_err(|e| {
        warn!("could not open {}: {e}", adapter_info.name);
        CaptureError::NoCameraAvailable
    })?;

    Ok(RenderResources(
        RenderDevice::from(device),
        RenderQueue(Arc::new(WgpuWrapper::new(queue))),
        RenderAdapterInfo(WgpuWrapper::new(adapter_info)),
        RenderAdapter(Arc::new(WgpuWrapper::new(adapter))),
        RenderInstance(Arc::new(WgpuWrapper::new(instance))),
    ))
}

/// Rejects targets whose texture or readback buffer exceeds the device limits.
///
/// wgpu reports oversized resources through its uncaptured error handler,
/// which panics, so they have to be caught before creation.
fn check_device_limits(width: u32, height: u32, limits: &WgpuLimits) -> Result<(), CaptureError> {
    let max = limits.max_texture_dimension_2d;
    if width > max || height > max {
        return Err(CaptureError::AllocationFailure {
            width,
            height,
            reason: format!("device limit is {max}x{max}"),
        });
    }

    let buffer_size = padded_bytes_per_row(width) as u64 * height as u64;
    if buffer_size > limits.max_buffer_size {
        return Err(CaptureError::AllocationFailure {
            width,
            height,
            reason: format!(
                "readback buffer of {buffer_size} bytes exceeds the device limit of {}",
                limits.max_buffer_size
            ),
        });
    }
    Ok(())
}

impl HeadlessCamera {
    /// Builds the app and runs its startup frame.
    ///
    /// Fails with `NoCameraAvailable` when no gpu adapter can be opened.
    /// Logging is left to the caller; the app's own `LogPlugin` is disabled.
    pub fn new(config: HeadlessConfig) -> Result<Self, CaptureError> {
        let render_resources = request_render_resources()?;

        let mut app = App::new();
        app.init_resource::<SceneController>()
            .insert_resource(ClearColor(Color::srgb_u8(0, 0, 0)))
            .add_plugins(
                DefaultPlugins
                    .set(ImagePlugin::default_nearest())
                    .set(RenderPlugin {
                        render_creation: render_resources.into(),
                        ..default()
                    })
                    // No window is ever created, the app is stepped by hand.
                    .set(WindowPlugin {
                        primary_window: None,
                        exit_condition: ExitCondition::DontExit,
                        ..default()
                    })
                    .disable::<LogPlugin>(),
            )
            .add_plugins(ImageCopyPlugin)
            .add_systems(Startup, scene::setup)
            .add_systems(PostUpdate, advance_pre_roll);

        // What the default runner does before its first update
        while matches!(app.plugins_state(), PluginsState::Adding) {
            bevy::tasks::tick_global_task_pools_on_main_thread();
        }
        app.finish();
        app.cleanup();
        app.update();

        Ok(Self {
            app,
            config,
            copiers: HashMap::new(),
            latest: None,
        })
    }

    fn camera_entity(&self) -> Option<Entity> {
        let world = self.app.world();
        world
            .get_resource::<SceneController>()
            .and_then(|controller| controller.camera)
            .filter(|entity| world.get_entity(*entity).is_ok())
    }

    fn texture_format(&self) -> TextureFormat {
        match self.config.color_space {
            ColorSpace::Gamma => TextureFormat::Rgba8UnormSrgb,
            ColorSpace::Linear => TextureFormat::Rgba8Unorm,
        }
    }

    /// Keeps only the newest readback so pre-roll frames don't pile up.
    fn drain_readbacks(&mut self) {
        let Some(receiver) = self.app.world().get_resource::<MainWorldReceiver>() else {
            return;
        };
        while let Ok(readback) = receiver.try_recv() {
            self.latest = Some(readback);
        }
    }
}

impl RenderCamera for HeadlessCamera {
    type Target = RenderTarget;

    fn target(&self) -> RenderTarget {
        self.camera_entity()
            .and_then(|entity| self.app.world().get::<RenderTarget>(entity))
            .cloned()
            .unwrap_or_default()
    }

    fn set_target(&mut self, target: RenderTarget) {
        let Some(entity) = self.camera_entity() else {
            return;
        };
        if let Ok(mut camera) = self.app.world_mut().get_entity_mut(entity) {
            camera.insert(target);
        }
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<RenderTarget, CaptureError> {
        let Some(render_device) = self.app.world().get_resource::<RenderDevice>().cloned() else {
            return Err(CaptureError::AllocationFailure {
                width,
                height,
                reason: "no render device".into(),
            });
        };
        check_device_limits(width, height, &render_device.limits())?;

        let size = Extent3d {
            width,
            height,
            ..Default::default()
        };

        // This is the texture that will be rendered to.
        let mut render_target_image =
            Image::new_target_texture(width, height, self.texture_format(), None);
        render_target_image.texture_descriptor.usage |= TextureUsages::COPY_SRC;
        let handle = self
            .app
            .world_mut()
            .resource_mut::<Assets<Image>>()
            .add(render_target_image);

        let copier = self
            .app
            .world_mut()
            .spawn(ImageCopier::new(handle.clone(), size, &render_device))
            .id();
        self.copiers.insert(handle.id(), copier);

        debug!("allocated {width}x{height} render target {:?}", handle.id());
        Ok(RenderTarget::Image(handle.into()))
    }

    fn release(&mut self, target: RenderTarget) {
        let RenderTarget::Image(image_target) = target else {
            return;
        };
        let id = image_target.handle.id();
        if let Some(copier) = self.copiers.remove(&id) {
            self.app.world_mut().despawn(copier);
        }
        self.app.world_mut().resource_mut::<Assets<Image>>().remove(id);
        if self.latest.as_ref().is_some_and(|r| r.image == id) {
            self.latest = None;
        }
    }

    fn render(&mut self) -> Result<(), CaptureError> {
        self.drain_readbacks();
        self.latest = None;
        self.app
            .world_mut()
            .resource_mut::<SceneController>()
            .start_render(self.config.pre_roll_frames);

        for _ in 0..=self.config.pre_roll_frames + RENDER_FRAME_SLACK {
            self.app.update();
            self.drain_readbacks();

            let mut controller = self.app.world_mut().resource_mut::<SceneController>();
            if controller.is_ready() {
                controller.state = SceneState::Idle;
                return Ok(());
            }
        }

        self.app.world_mut().resource_mut::<SceneController>().state = SceneState::Idle;
        Err(CaptureError::Readback(format!(
            "scene not ready after {} frames",
            self.config.pre_roll_frames + RENDER_FRAME_SLACK
        )))
    }

    fn read_pixels(&mut self, target: &RenderTarget) -> Result<RgbaImage, CaptureError> {
        let RenderTarget::Image(image_target) = target else {
            return Err(CaptureError::Readback(
                "only image render targets can be read back".into(),
            ));
        };
        let id = image_target.handle.id();
        let (width, height) = self
            .app
            .world()
            .resource::<Assets<Image>>()
            .get(id)
            .map(|image| (image.width(), image.height()))
            .ok_or_else(|| CaptureError::Readback(format!("render target {id:?} is gone")))?;

        let readback = match self.latest.take() {
            Some(readback) if readback.image == id => readback,
            other => {
                self.latest = other;
                return Err(CaptureError::Readback(format!(
                    "no frame was copied out of {id:?}"
                )));
            }
        };

        let data = strip_row_padding(&readback.data, width, height, padded_bytes_per_row(width));
        RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            CaptureError::Readback(format!(
                "readback of {id:?} is shorter than {width}x{height} rgba"
            ))
        })
    }

    fn color_space(&self) -> ColorSpace {
        self.config.color_space
    }
}

impl CameraSource for HeadlessCamera {
    type Camera = Self;

    fn main_camera(&mut self) -> Option<&mut Self> {
        if self.camera_entity().is_some() {
            Some(self)
        } else {
            None
        }
    }
}
