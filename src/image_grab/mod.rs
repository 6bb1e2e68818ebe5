mod camera;
mod image_copy;

pub use camera::{HeadlessCamera, HeadlessConfig};
pub use image_copy::{ImageCopyPlugin, MainWorldReceiver, Readback};
