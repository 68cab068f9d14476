use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub index_db_path: PathBuf,
    pub secrets_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = discover_project_root();
        let user_data_dir = discover_user_data_dir(&project_root);
        Self::with_data_dir(project_root, user_data_dir)
    }

    /// Lays out every derived path under an explicit data directory.
    pub fn with_data_dir(project_root: PathBuf, user_data_dir: PathBuf) -> Self {
        let log_dir = user_data_dir.join("logs");
        let db_path = user_data_dir.join("chat_history.db");
        let index_db_path = user_data_dir.join("vector_index.db");
        let secrets_path = user_data_dir.join("secrets.yaml");

        for dir in [&user_data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            project_root,
            user_data_dir,
            log_dir,
            db_path,
            index_db_path,
            secrets_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_project_root() -> PathBuf {
    if let Ok(root) = env::var("RAGBOT_ROOT") {
        return PathBuf::from(root);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

/// `RAGBOT_DATA_DIR`, or `data/` next to the config.
fn discover_user_data_dir(project_root: &Path) -> PathBuf {
    env::var_os("RAGBOT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| project_root.join("data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_live_under_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths =
            AppPaths::with_data_dir(dir.path().to_path_buf(), dir.path().join("data"));

        assert!(paths.log_dir.starts_with(&paths.user_data_dir));
        assert!(paths.db_path.starts_with(&paths.user_data_dir));
        assert!(paths.index_db_path.starts_with(&paths.user_data_dir));
        assert!(paths.log_dir.exists());
    }
}
