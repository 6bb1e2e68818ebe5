//! Capture groups and the actions run over them: capture every enabled
//! group, browse what is on disk, delete a capture across all variants.

use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bevy::log::{error, info, warn};
use chrono::{DateTime, TimeZone};
use thiserror::Error;

use crate::capture::{
    CameraSource, CaptureError, CaptureRequest, CapturedImage, OutputLayout, ResolutionTarget,
    sanitize_filename_segment,
};

mod groups;

pub use groups::{BASE_GROUP, CaptureGroup, default_groups};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0:?} is not a plain capture file name")]
    InvalidFileName(String),

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File name shared by every variant of one capture action.
pub fn shared_file_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{}.png", now.format("%y%m%d_%H%M%S"))
}

/// Result of capturing one `(group, target)` pair.
#[derive(Debug)]
pub struct TargetOutcome {
    pub group: String,
    pub label: String,
    pub path: PathBuf,
    pub result: Result<CapturedImage, CaptureError>,
}

#[derive(Debug)]
pub struct CaptureReport {
    pub shared_file_name: String,
    pub outcomes: Vec<TargetOutcome>,
}

impl CaptureReport {
    pub fn captured(&self) -> impl Iterator<Item = &CapturedImage> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// One capture action as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSet {
    pub file_name: String,
    /// Existing files for every configured group/target, in group order.
    pub variants: Vec<PathBuf>,
}

pub struct CaptureSession {
    layout: OutputLayout,
    groups: Vec<CaptureGroup>,
}

impl CaptureSession {
    /// Session with the built-in groups, the base one sized to `viewport`.
    pub fn new(layout: OutputLayout, viewport: (u32, u32)) -> Self {
        Self::with_groups(layout, default_groups(viewport.0, viewport.1))
    }

    /// The first group is treated as the base group and forced on.
    pub fn with_groups(layout: OutputLayout, mut groups: Vec<CaptureGroup>) -> Self {
        if let Some(first) = groups.first_mut() {
            *first = first.clone().with_enabled(true);
        }
        Self { layout, groups }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn groups(&self) -> &[CaptureGroup] {
        &self.groups
    }

    /// Turns a group on or off. Returns false for unknown names and the base group.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(index) = self.groups.iter().position(|g| g.name() == name) else {
            warn!("no capture group named {name:?}");
            return false;
        };
        if index == 0 {
            warn!("{name:?} always captures and cannot be toggled");
            return false;
        }
        self.groups[index] = self.groups[index].clone().with_enabled(enabled);
        true
    }

    /// Rebuilds the base group at the current viewport size.
    pub fn sync_viewport(&mut self, width: u32, height: u32) {
        if let Some(first) = self.groups.first_mut() {
            let name = first.name().to_string();
            *first = CaptureGroup::new(name, vec![ResolutionTarget::base(width, height)])
                .with_enabled(true);
        }
    }

    /// Captures every target of every enabled group, one after another.
    ///
    /// A failing target is logged and recorded; the remaining ones still run.
    pub fn capture_enabled<S: CameraSource>(
        &mut self,
        source: &mut S,
        viewport: (u32, u32),
        shared_file_name: &str,
    ) -> CaptureReport {
        self.sync_viewport(viewport.0, viewport.1);

        let mut outcomes = Vec::new();
        for group in self.groups.iter().filter(|g| g.enabled()) {
            for target in group.targets() {
                let request = CaptureRequest {
                    group: group.name(),
                    target,
                    shared_file_name,
                };
                let path = self
                    .layout
                    .image_path(group.name(), target.label(), shared_file_name);
                let result = crate::capture::capture(source, &request, &self.layout);
                match &result {
                    Ok(image) => info!(
                        "captured {}/{} {}x{} -> {}",
                        image.group,
                        image.label,
                        image.width,
                        image.height,
                        image.path.display()
                    ),
                    Err(e) => error!(
                        "capture of {}/{} ({}x{}) to {} failed: {e}",
                        group.name(),
                        target.label(),
                        target.width(),
                        target.height(),
                        path.display()
                    ),
                }
                outcomes.push(TargetOutcome {
                    group: group.name().to_string(),
                    label: target.label().to_string(),
                    path,
                    result,
                });
            }
        }

        CaptureReport {
            shared_file_name: shared_file_name.to_string(),
            outcomes,
        }
    }

    /// Capture actions found in the base group's folder, oldest name first.
    pub fn list_captures(&self) -> Result<Vec<CaptureSet>, SessionError> {
        let Some(base) = self.groups.first() else {
            return Ok(Vec::new());
        };
        let dir = self.layout.target_dir(base.name(), "");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SessionError::Io { path: dir, source }),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SessionError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_png = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
            if !is_png || !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|file_name| CaptureSet {
                variants: self
                    .variant_paths(&file_name)
                    .filter(|p| p.is_file())
                    .collect(),
                file_name,
            })
            .collect())
    }

    /// Deletes every group/target variant of one capture action.
    ///
    /// Every configured group is visited, enabled or not. Missing files are skipped.
    pub fn delete_capture(&self, shared_file_name: &str) -> Result<Vec<PathBuf>, SessionError> {
        if !is_plain_file_name(shared_file_name) {
            return Err(SessionError::InvalidFileName(shared_file_name.to_string()));
        }

        let mut removed = Vec::new();
        for path in self.variant_paths(shared_file_name) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("deleted {}", path.display());
                    removed.push(path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    fn variant_paths<'a>(&'a self, shared_file_name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        self.groups.iter().flat_map(move |group| {
            group.targets().iter().map(move |target| {
                self.layout
                    .image_path(group.name(), target.label(), shared_file_name)
            })
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && sanitize_filename_segment(name) == name
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}
