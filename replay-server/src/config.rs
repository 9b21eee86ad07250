//! Platform directories.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Data directory for this application, if the platform has one.
pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("tv", "exavideo", "openreplay")
}

/// Default location for rollout clips: `<data dir>/rollout`.
pub fn default_rollout_dir() -> PathBuf {
    get_project_dirs()
        .map(|dirs| dirs.data_dir().join("rollout"))
        .unwrap_or_else(|| PathBuf::from("./rollout"))
}

/// Default location of the playout process's input pipes: `<data dir>/playout`.
pub fn default_playout_dir() -> PathBuf {
    get_project_dirs()
        .map(|dirs| dirs.data_dir().join("playout"))
        .unwrap_or_else(|| PathBuf::from("./playout"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rollout_dir() {
        assert!(default_rollout_dir().ends_with("rollout"));
        assert!(default_playout_dir().ends_with("playout"));
    }
}
