//! Filesystem-safe path and filename components.
//!
//! Both sanitizers swap every invalid character for [`SUBSTITUTE`] and keep
//! everything else, so the output has exactly as many characters as the input.
//! The invalid sets are the Windows ones and are applied on every platform, so
//! a capture tree written on Linux can be copied to a Windows machine as is.

/// Character written in place of every invalid one.
pub const SUBSTITUTE: char = '_';

/// Characters that may not appear anywhere in a path.
const INVALID_PATH_CHARS: &[char] = &['"', '<', '>', '|'];

/// Characters that may not appear in a bare file name, on top of the path set.
const INVALID_FILENAME_CHARS: &[char] = &[':', '*', '?', '\\', '/'];

fn is_invalid_path_char(c: char) -> bool {
    c < '\u{20}' || INVALID_PATH_CHARS.contains(&c)
}

fn is_invalid_filename_char(c: char) -> bool {
    is_invalid_path_char(c) || INVALID_FILENAME_CHARS.contains(&c)
}

fn replace_invalid(s: &str, invalid: impl Fn(char) -> bool) -> String {
    s.chars()
        .map(|c| if invalid(c) { SUBSTITUTE } else { c })
        .collect()
}

/// Replaces characters that are invalid anywhere in a path.
///
/// Separators are kept, so a group name like `"phones/large"` still nests.
pub fn sanitize_path_segment(s: &str) -> String {
    replace_invalid(s, is_invalid_path_char)
}

/// Replaces characters that are invalid in a single file name, separators included.
pub fn sanitize_filename_segment(s: &str) -> String {
    replace_invalid(s, is_invalid_filename_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "iPhone",
        "6.5Display",
        "a<b>c|d\"e",
        "tab\there\nnewline",
        "dir/with\\slashes",
        "what?*:",
        "ünïcödé 表示",
        "\u{0}\u{1f}",
    ];

    #[test]
    fn sanitizers_are_idempotent() {
        for s in SAMPLES {
            let path = sanitize_path_segment(s);
            assert_eq!(sanitize_path_segment(&path), path, "path sanitizer on {s:?}");
            let file = sanitize_filename_segment(s);
            assert_eq!(sanitize_filename_segment(&file), file, "filename sanitizer on {s:?}");
        }
    }

    #[test]
    fn empty_string_maps_to_empty_string() {
        assert_eq!(sanitize_path_segment(""), "");
        assert_eq!(sanitize_filename_segment(""), "");
    }

    #[test]
    fn only_invalid_characters_become_substitutes() {
        assert_eq!(sanitize_path_segment("<>|\""), "____");
        assert_eq!(sanitize_filename_segment("/\\:*?"), "_____");
        assert_eq!(sanitize_filename_segment("\u{0}\u{7}"), "__");
    }

    #[test]
    fn safe_strings_pass_through() {
        assert_eq!(sanitize_path_segment("6.5Display"), "6.5Display");
        assert_eq!(sanitize_filename_segment("12.9Display"), "12.9Display");
        assert_eq!(sanitize_filename_segment("ünïcödé 表示"), "ünïcödé 表示");
    }

    #[test]
    fn separators_differ_between_rule_sets() {
        assert_eq!(sanitize_path_segment("phones/large"), "phones/large");
        assert_eq!(sanitize_filename_segment("phones/large"), "phones_large");
    }

    #[test]
    fn character_count_is_preserved() {
        for s in SAMPLES {
            assert_eq!(sanitize_path_segment(s).chars().count(), s.chars().count());
            assert_eq!(sanitize_filename_segment(s).chars().count(), s.chars().count());
        }
    }
}
