use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};

use crate::capture::ColorSpace;

/// Command line configuration for the screen grabber.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "Renders a camera at the viewport size and at every enabled device group's \
                  display sizes, and keeps the PNGs in <output-root>/<group>/<label>/."
)]
pub struct AppArgs {
    /// Directory captures are written into.
    #[arg(long, default_value = "Assets/Screenshots")]
    pub output_root: PathBuf,
    /// Renderer used for captures.
    #[arg(long, value_enum, default_value_t = Backend::Gpu)]
    pub backend: Backend,
    /// Color space the renderer works in; linear output is sRGB encoded before saving.
    #[arg(long, value_enum, default_value_t = ColorSpaceArg::Gamma)]
    pub color_space: ColorSpaceArg,
    /// Size of the base capture, as WIDTHxHEIGHT.
    #[arg(long, default_value = "1920x1080")]
    pub viewport: Viewport,
    /// Frames rendered before a GPU readback is kept.
    #[arg(long, default_value_t = 40)]
    pub pre_roll_frames: u32,
    /// Log filter, same syntax as RUST_LOG.
    #[arg(long, default_value = "info,wgpu=error,naga=warn")]
    pub log_filter: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture the base group plus every group named with --group.
    Capture {
        /// Extra group to capture, may be repeated.
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// List captures in the base folder and their per-group files.
    List,
    /// Delete one capture from every group/target folder.
    Delete {
        /// Shared file name of the capture, e.g. 240101_120000.png
        file_name: String,
    },
    /// Print the configured capture groups.
    Groups,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Headless Bevy renderer.
    Gpu,
    /// Procedural CPU camera, no GPU needed.
    Software,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpaceArg {
    Gamma,
    Linear,
}

impl From<ColorSpaceArg> for ColorSpace {
    fn from(arg: ColorSpaceArg) -> Self {
        match arg {
            ColorSpaceArg::Gamma => ColorSpace::Gamma,
            ColorSpaceArg::Linear => ColorSpace::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Viewport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
        let height: u32 = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("viewport must be non-empty, got {width}x{height}"));
        }
        Ok(Viewport { width, height })
    }
}
