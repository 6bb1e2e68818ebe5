use crate::capture::ResolutionTarget;

/// Name of the group that always captures the current viewport.
pub const BASE_GROUP: &str = "base";

/// A named bundle of resolutions captured together.
///
/// Values are never edited in place: toggling produces a new group that
/// replaces the old one in the session's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureGroup {
    name: String,
    enabled: bool,
    targets: Vec<ResolutionTarget>,
}

impl CaptureGroup {
    pub fn new(name: impl Into<String>, targets: Vec<ResolutionTarget>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            targets,
        }
    }

    /// The viewport-sized group, always enabled.
    pub fn base(width: u32, height: u32) -> Self {
        Self::new(BASE_GROUP, vec![ResolutionTarget::base(width, height)]).with_enabled(true)
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn targets(&self) -> &[ResolutionTarget] {
        &self.targets
    }
}

/// Built-in groups: the viewport, then the App Store device sizes.
pub fn default_groups(viewport_width: u32, viewport_height: u32) -> Vec<CaptureGroup> {
    vec![
        CaptureGroup::base(viewport_width, viewport_height),
        CaptureGroup::new(
            "iPhone",
            vec![
                ResolutionTarget::new("6.5Display", 1284, 2778),
                ResolutionTarget::new("5.5Display", 1242, 2208),
            ],
        ),
        CaptureGroup::new("iPad", vec![ResolutionTarget::new("12.9Display", 2048, 2732)]),
    ]
}
