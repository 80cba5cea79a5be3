// src/constants.rs

/// Filename prefix for toolset definition files inside a definition root.
pub const DEFINITION_FILE_PREFIX: &str = "toolset.";

/// Filename suffix for toolset definition files.
pub const DEFINITION_FILE_SUFFIX: &str = ".json";

/// The name of the persistent registry snapshot (inside the storage directory).
pub const DETECTED_TOOLSETS_FILENAME: &str = "detected-toolsets.json";

/// Fixed-point iteration bound for nested template rendering.
pub const MAX_RENDER_ITERATIONS: u32 = 8;

/// Walk depth used for large search roots (install trees, `locations`).
pub const DEEP_SEARCH_DEPTH: usize = 10;

/// Sentinel joining list values rendered into a string slot; the merger
/// splits on it so list-valued resolutions survive string render sites.
pub const LIST_SENTINEL: char = '\u{0007}';

/// Extensions treated as executable on Windows when a finder does not
/// receive an explicit extension list.
pub const WINDOWS_EXECUTABLE_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat"];
