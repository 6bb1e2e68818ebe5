use bevy::{
    app::Plugin,
    prelude::*,
    render::{
        Extract, Render, RenderApp, RenderSystems,
        render_asset::RenderAssets,
        render_graph::{self, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel},
        render_resource::{
            Buffer, BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Extent3d, MapMode,
            PollType, TexelCopyBufferInfo, TexelCopyBufferLayout,
        },
        renderer::{RenderContext, RenderDevice, RenderQueue},
        texture::GpuImage,
    },
};

use crossbeam_channel::{Receiver, Sender};

// Main world and render world talk over a channel. Rendering is not pipelined
// here, so data sent by the render world during `App::update` is already in
// the channel when `update` returns.
//
// Every message carries the id of the image it was copied from, so a readback
// can skip frames of buffers that were released in the meantime.

/// Pixels copied out of one render target, rows padded to wgpu's copy alignment.
pub struct Readback {
    pub image: AssetId<Image>,
    pub data: Vec<u8>,
}

/// This will receive any data sent from the render world
#[derive(Resource, Deref)]
pub struct MainWorldReceiver(Receiver<Readback>);

/// This will send any data to the main world
#[derive(Resource, Deref)]
struct RenderWorldSender(Sender<Readback>);

/// Plugin for Render world part of work
pub struct ImageCopyPlugin;

impl Plugin for ImageCopyPlugin {
    fn build(&self, app: &mut App) {
        let (s, r) = crossbeam_channel::unbounded();

        let render_app = app
            .insert_resource(MainWorldReceiver(r))
            .sub_app_mut(RenderApp);

        let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
        graph.add_node(ImageCopy, ImageCopyDriver);
        graph.add_node_edge(bevy::render::graph::CameraDriverLabel, ImageCopy);

        render_app
            .insert_resource(RenderWorldSender(s))
            // Make ImageCopiers accessible in RenderWorld system and plugin
            .add_systems(ExtractSchedule, image_copy_extract)
            // Receives image data from buffer to channel
            // so we need to run it after the render graph is done
            .add_systems(
                Render,
                receive_image_from_buffer.after(RenderSystems::Render),
            );
    }
}

/// `ImageCopier` aggregator in `RenderWorld`
#[derive(Clone, Default, Resource, Deref, DerefMut)]
struct ImageCopiers(pub Vec<ImageCopier>);

/// Used by `ImageCopyDriver` for copying from render target to buffer
#[derive(Clone, Component)]
pub struct ImageCopier {
    buffer: Buffer,
    src_image: Handle<Image>,
}

impl ImageCopier {
    pub fn new(src_image: Handle<Image>, size: Extent3d, render_device: &RenderDevice) -> Self {
        let padded_bytes_per_row = padded_bytes_per_row(size.width);

        let cpu_buffer = render_device.create_buffer(&BufferDescriptor {
            label: Some("screen_grabber_readback"),
            size: padded_bytes_per_row as u64 * size.height as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        ImageCopier {
            buffer: cpu_buffer,
            src_image,
        }
    }
}

/// Bytes per buffer row for an RGBA8 image `width` pixels wide.
pub fn padded_bytes_per_row(width: u32) -> usize {
    RenderDevice::align_copy_bytes_per_row(width as usize * 4)
}

/// Drops the alignment padding wgpu adds to every row of a texture copy.
pub fn strip_row_padding(data: &[u8], width: u32, height: u32, padded_row: usize) -> Vec<u8> {
    let row_bytes = width as usize * 4;
    if row_bytes == padded_row {
        return data[..data.len().min(row_bytes * height as usize)].to_vec();
    }
    data.chunks(padded_row)
        .take(height as usize)
        .flat_map(|row| &row[..row_bytes.min(row.len())])
        .copied()
        .collect()
}

/// Extracting `ImageCopier`s into render world, because `ImageCopyDriver` accesses them
fn image_copy_extract(mut commands: Commands, image_copiers: Extract<Query<&ImageCopier>>) {
    commands.insert_resource(ImageCopiers(
        image_copiers.iter().cloned().collect::<Vec<ImageCopier>>(),
    ));
}

/// runs in render world after Render stage to send image from buffer via channel (receiver is in main world)
fn receive_image_from_buffer(
    image_copiers: Res<ImageCopiers>,
    render_device: Res<RenderDevice>,
    sender: Res<RenderWorldSender>,
) {
    for image_copier in image_copiers.0.iter() {
        let buffer_slice = image_copier.buffer.slice(..);

        // WebGPU only lets one of GPU and CPU touch a buffer at a time, so it has
        // to be mapped first. The map callback fires during `poll`, so once a
        // waiting poll returns its result is already in the channel.
        let (s, r) = crossbeam_channel::bounded(1);

        buffer_slice.map_async(MapMode::Read, move |r| {
            // The receiver only goes away if this system bailed out already
            let _ = s.send(r);
        });

        // This blocks until the gpu is done executing everything
        let state = match render_device.poll(PollType::wait_indefinitely()) {
            Err(e) => {
                error!("failed to poll render device for readback: {e}");
                MapState::Pending
            }
            Ok(_) => match r.try_recv() {
                Ok(Ok(())) => MapState::Mapped,
                Ok(Err(e)) => {
                    error!("failed to map readback buffer: {e}");
                    MapState::Failed
                }
                Err(e) => {
                    error!("readback map callback did not fire: {e}");
                    MapState::Pending
                }
            },
        };

        if state == MapState::Mapped {
            // This could fail on app exit, if Main world clears resources (including receiver) while Render world still renders
            let _ = sender.send(Readback {
                image: image_copier.src_image.id(),
                data: buffer_slice.get_mapped_range().to_vec(),
            });
        }

        // All `BufferView`s are dropped by now.
        // Unmap so that we can copy to the staging buffer in the next iteration.
        if state.holds_mapping() {
            image_copier.buffer.unmap();
        }
    }
}

/// Where a readback buffer's map request ended up after the poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Mapped,
    /// The map was rejected; the buffer is left unmapped.
    Failed,
    /// Still waiting on the gpu. Unmapping aborts the request.
    Pending,
}

impl MapState {
    /// A mapped or pending buffer can't be copied into until it is unmapped.
    fn holds_mapping(self) -> bool {
        matches!(self, MapState::Mapped | MapState::Pending)
    }
}

/// `RenderGraph` label for `ImageCopyDriver`
#[derive(Debug, PartialEq, Eq, Clone, Hash, RenderLabel)]
struct ImageCopy;

/// `RenderGraph` node
#[derive(Default)]
struct ImageCopyDriver;

// Copies image content from render target to buffer
impl render_graph::Node for ImageCopyDriver {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let Some(image_copiers) = world.get_resource::<ImageCopiers>() else {
            return Ok(());
        };
        let Some(gpu_images) = world.get_resource::<RenderAssets<GpuImage>>() else {
            return Ok(());
        };
        let render_queue = world.resource::<RenderQueue>();

        for image_copier in image_copiers.iter() {
            // Freshly allocated targets are only uploaded on the next extract
            let Some(src_image) = gpu_images.get(&image_copier.src_image) else {
                continue;
            };

            let mut encoder = render_context
                .render_device()
                .create_command_encoder(&CommandEncoderDescriptor::default());

            let block_dimensions = src_image.texture_format.block_dimensions();
            let Some(block_size) = src_image.texture_format.block_copy_size(None) else {
                continue;
            };

            // copy_texture_to_buffer copies whole rows aligned to
            // wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, so the buffer can be wider than the image
            let padded_bytes_per_row = RenderDevice::align_copy_bytes_per_row(
                (src_image.size.width as usize / block_dimensions.0 as usize) * block_size as usize,
            );

            encoder.copy_texture_to_buffer(
                src_image.texture.as_image_copy(),
                TexelCopyBufferInfo {
                    buffer: &image_copier.buffer,
                    layout: TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_bytes_per_row as u32),
                        rows_per_image: None,
                    },
                },
                src_image.size,
            );

            render_queue.submit(std::iter::once(encoder.finish()));
        }

        Ok(())
    }
}
