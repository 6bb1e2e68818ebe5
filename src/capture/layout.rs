use std::path::{Path, PathBuf};

use super::sanitize::{sanitize_filename_segment, sanitize_path_segment};

/// Where captures land on disk.
///
/// Capture, browsing and deletion all go through these methods so the three
/// always agree on the file a `(group, label, file name)` triple maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<group>/<label>/`, with an empty label collapsing onto the group folder.
    pub fn target_dir(&self, group: &str, label: &str) -> PathBuf {
        let dir = self.root.join(sanitize_path_segment(group));
        let label = sanitize_filename_segment(label);
        if label.is_empty() {
            dir
        } else {
            dir.join(label)
        }
    }

    /// `<root>/<group>/<label>/<label><shared_file_name>`.
    ///
    /// `shared_file_name` is expected to be safe already and is used verbatim.
    pub fn image_path(&self, group: &str, label: &str, shared_file_name: &str) -> PathBuf {
        let prefix = sanitize_filename_segment(label);
        self.target_dir(group, label)
            .join(format!("{prefix}{shared_file_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_follows_group_label_layout() {
        let layout = OutputLayout::new("Assets/Screenshots");
        assert_eq!(
            layout.image_path("iPhone", "6.5Display", "240101_120000.png"),
            PathBuf::from("Assets/Screenshots/iPhone/6.5Display/6.5Display240101_120000.png")
        );
    }

    #[test]
    fn empty_label_lands_in_group_folder() {
        let layout = OutputLayout::new("shots");
        assert_eq!(
            layout.image_path("base", "", "240101_120000.png"),
            PathBuf::from("shots/base/240101_120000.png")
        );
    }

    #[test]
    fn identical_inputs_give_identical_paths() {
        let a = OutputLayout::new("out").image_path("iPad", "12.9Display", "x.png");
        let b = OutputLayout::new("out").image_path("iPad", "12.9Display", "x.png");
        assert_eq!(a.to_string_lossy(), b.to_string_lossy());
    }

    #[test]
    fn group_and_label_are_sanitized() {
        let layout = OutputLayout::new("out");
        assert_eq!(
            layout.image_path("a|b", "c:d", "x.png"),
            PathBuf::from("out/a_b/c_d/c_dx.png")
        );
    }
}
