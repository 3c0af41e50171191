use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// File name of the run-history sidecar kept at the top of the source tree.
pub const SIDECAR_FILE_NAME: &str = ".backup-folder.json";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("{path} is not inside {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("{0} has no file name relative to the source root")]
    Empty(PathBuf),
    #[error("{0} contains an unsupported component")]
    UnsupportedComponent(PathBuf),
}

pub fn sidecar_path(root: &Path) -> PathBuf {
    root.join(SIDECAR_FILE_NAME)
}

/// Temporary sibling the sidecar is written to before being renamed into place.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

/// Maps a local file under `root` to its object key: the relative path with
/// `/` separators whatever the host convention is.
pub fn remote_key_for(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PathError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(path.to_path_buf()));
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty(path.to_path_buf()));
    }
    Ok(parts.join("/"))
}
