//! Which files are considered a taint source: either an explicit list of
//! literal paths, or the `*` wildcard meaning "every file" (spec.md §4.1).

/// Upper bound on the number of literal paths `--file-filter` accepts
/// (spec.md's "ordered list of up to `MAX_FILE_FILTER` patterns"), matching
/// the original's fixed-size `filter_list[MAX_FILE_FILTER][MAX_PATH]`.
pub const MAX_FILE_FILTER: usize = 16;

/// Parsed `--file-filter` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    /// No file taints anything.
    None,
    /// Every opened file is a taint source.
    All,
    /// Only these exact paths (after `~` expansion) taint.
    Paths(Vec<String>),
}

impl Default for FileFilter {
    fn default() -> Self {
        FileFilter::None
    }
}

impl FileFilter {
    /// Parse a comma-separated list from the CLI/config. `*` alone means
    /// "all files"; `~` at the start of an entry expands to `home`. Patterns
    /// past [`MAX_FILE_FILTER`] are dropped and logged rather than rejected
    /// outright, matching the rest of this engine's "report and carry on"
    /// approach to configuration overruns.
    pub fn parse(raw: &str, home: Option<&str>) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return FileFilter::None;
        }
        if raw == "*" {
            return FileFilter::All;
        }
        let mut paths: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| expand_home(s, home))
            .collect();
        if paths.len() > MAX_FILE_FILTER {
            log::warn!(
                "--file-filter lists {} patterns, more than MAX_FILE_FILTER ({MAX_FILE_FILTER}); dropping the rest",
                paths.len(),
            );
            paths.truncate(MAX_FILE_FILTER);
        }
        FileFilter::Paths(paths)
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            FileFilter::None => false,
            FileFilter::All => true,
            FileFilter::Paths(paths) => paths.iter().any(|p| p == path),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FileFilter::All)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FileFilter::None)
    }
}

fn expand_home(path: &str, home: Option<&str>) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}
