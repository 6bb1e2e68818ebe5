//! Multi-resolution screen grabber.
//!
//! `capture` renders the scene camera once per enabled `(group, target)`:
//!
//! 1. Render from camera to an offscreen render target of the target's size
//! 2. Copy the target back to the cpu (`image_grab` for the GPU backend)
//! 3. sRGB encode the pixels if the renderer works in linear space
//! 4. Save to `<output-root>/<group>/<label>/<label><yyMMdd_HHmmss>.png`
//!
//! Every target of one run shares the timestamped file name, which is what
//! `list` and `delete` key on.

use std::process::ExitCode;

use bevy::log::{
    error, info,
    tracing_subscriber::{EnvFilter, fmt},
};
use chrono::Local;
use clap::Parser;

use screen_grabber::{
    capture::{ColorSpace, OutputLayout, software::SoftwareCamera},
    cli::{AppArgs, Backend, Command},
    image_grab::{HeadlessCamera, HeadlessConfig},
    session::{CaptureSession, SessionError, shared_file_name},
};

fn main() -> ExitCode {
    let args = AppArgs::parse();
    init_logging(&args.log_filter);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the global tracing subscriber once, for both backends.
///
/// `RUST_LOG` takes precedence over `--log-filter`, as with Bevy's `LogPlugin`.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::builder().parse_lossy(filter));
    if let Err(e) = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("could not install the log subscriber: {e}");
    }
}

fn run(args: AppArgs) -> Result<ExitCode, SessionError> {
    let viewport = (args.viewport.width, args.viewport.height);
    let mut session = CaptureSession::new(OutputLayout::new(&args.output_root), viewport);

    match args.command {
        Command::Groups => {
            for group in session.groups() {
                let state = if group.enabled() { "always" } else { "optional" };
                println!("{} ({state})", group.name());
                for target in group.targets() {
                    let label = if target.label().is_empty() { "<viewport>" } else { target.label() };
                    println!("  {label}: {}x{}", target.width(), target.height());
                }
            }
        }
        Command::List => {
            for set in session.list_captures()? {
                println!("{}", set.file_name);
                for variant in &set.variants {
                    println!("  {}", variant.display());
                }
            }
        }
        Command::Delete { file_name } => {
            let removed = session.delete_capture(&file_name)?;
            info!("deleted {} file(s) for {file_name}", removed.len());
        }
        Command::Capture { groups } => {
            for name in &groups {
                session.set_enabled(name, true);
            }
            let file_name = shared_file_name(&Local::now());
            let color_space: ColorSpace = args.color_space.into();

            let report = match args.backend {
                Backend::Gpu => {
                    let config = HeadlessConfig {
                        color_space,
                        pre_roll_frames: args.pre_roll_frames,
                    };
                    let mut camera = match HeadlessCamera::new(config) {
                        Ok(camera) => camera,
                        Err(e) => {
                            error!("gpu backend unavailable: {e}; try --backend software");
                            return Ok(ExitCode::FAILURE);
                        }
                    };
                    session.capture_enabled(&mut camera, viewport, &file_name)
                }
                Backend::Software => {
                    let mut camera = SoftwareCamera::default().with_color_space(color_space);
                    session.capture_enabled(&mut camera, viewport, &file_name)
                }
            };

            let failed = report.failures().count();
            info!(
                "{} of {} capture(s) written as {}",
                report.outcomes.len() - failed,
                report.outcomes.len(),
                report.shared_file_name
            );
            if !report.all_succeeded() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
