use std::path::{Path, PathBuf};

use log::trace;

/// Resolves SQL script files that ship alongside an upgrade step.
pub trait ScriptLocator {
    fn find_script(&self, relative_path: &str) -> Option<PathBuf>;
}

/// Looks a script up in an ordered list of directories. The first directory
/// holding a regular file at the relative path wins.
#[derive(Debug, Clone, Default)]
pub struct SearchPathLocator {
    search_paths: Vec<PathBuf>,
}

impl SearchPathLocator {
    pub fn new<I, P>(search_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_paths: search_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl ScriptLocator for SearchPathLocator {
    fn find_script(&self, relative_path: &str) -> Option<PathBuf> {
        let requested = Path::new(relative_path);
        if requested.is_absolute() {
            return requested.is_file().then(|| requested.to_path_buf());
        }

        self.search_paths.iter().find_map(|dir| {
            let candidate = dir.join(requested);
            trace!("Looking for script at {}", candidate.display());
            candidate.is_file().then_some(candidate)
        })
    }
}
