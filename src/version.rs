//! Installed versions and where their folders live

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub const VERSIONS_FOLDER: &str = "BSInstances";
pub const SHARED_FOLDER: &str = "SharedContents";
pub const MAPS_RELATIVE_FOLDER: &str = "Beat Saber_Data/CustomLevels";

/// One installed copy of the game
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BsVersion {
    #[serde(rename = "BSVersion")]
    pub bs_version: String,
    /// Custom name of a renamed or cloned installation
    #[serde(default)]
    pub name: Option<String>,
}

impl BsVersion {
    pub fn new(bs_version: impl Into<String>) -> Self {
        Self {
            bs_version: bs_version.into(),
            name: None,
        }
    }

    /// Folder name of the version inside the versions directory
    pub fn folder_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.bs_version)
    }
}

/// Layout of the installation directory
#[derive(Debug, Clone)]
pub struct InstallationLayout {
    installation_dir: PathBuf,
}

impl InstallationLayout {
    pub fn new(installation_dir: impl Into<PathBuf>) -> Self {
        Self {
            installation_dir: installation_dir.into(),
        }
    }

    pub fn installation_dir(&self) -> &Path {
        &self.installation_dir
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.installation_dir.join(VERSIONS_FOLDER)
    }

    pub fn version_path(&self, version: &BsVersion) -> PathBuf {
        self.versions_dir().join(version.folder_name())
    }

    /// Root every shared folder is linked to
    pub fn shared_dir(&self) -> PathBuf {
        self.installation_dir.join(SHARED_FOLDER)
    }

    pub fn maps_path(&self, version: &BsVersion) -> PathBuf {
        let mut path = self.version_path(version);
        path.extend(MAPS_RELATIVE_FOLDER.split('/'));
        path
    }

    /// Folder of `version` at `relative_folder`. The result always lies
    /// strictly inside the version folder.
    pub fn version_folder(&self, version: &BsVersion, relative_folder: &str) -> SyncResult<PathBuf> {
        let mut path = self.version_path(version);
        path.extend(relative_parts(relative_folder)?);
        Ok(path)
    }

    /// Turn a path chosen inside a version folder into its version-relative form
    pub fn full_path_to_relative(&self, version: &BsVersion, full_path: &Path) -> SyncResult<String> {
        let relative = full_path
            .strip_prefix(self.version_path(version))
            .map_err(|_| SyncError::InvalidFolder {
                folder: full_path.display().to_string(),
                reason: format!("not inside version {}", version.folder_name()),
            })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(SyncError::InvalidFolder {
                        folder: full_path.display().to_string(),
                        reason: "path leaves the version folder".to_string(),
                    })
                }
            }
        }

        if parts.is_empty() {
            return Err(SyncError::InvalidFolder {
                folder: full_path.display().to_string(),
                reason: "the version folder itself cannot be shared".to_string(),
            });
        }
        Ok(parts.join("/"))
    }
}

/// Split a relative folder on either separator, refusing anything that
/// could resolve outside of the folder it is joined to
pub(crate) fn relative_parts(relative_folder: &str) -> SyncResult<Vec<&str>> {
    let invalid = |reason: &str| SyncError::InvalidFolder {
        folder: relative_folder.to_string(),
        reason: reason.to_string(),
    };

    if relative_folder.starts_with(['/', '\\']) || Path::new(relative_folder).has_root() {
        return Err(invalid("must be relative"));
    }

    let mut parts = Vec::new();
    for part in relative_folder.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        if part.contains(':') {
            return Err(invalid("drive prefixes are not allowed"));
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => parts.push(part),
            _ => return Err(invalid("parent folder segments are not allowed")),
        }
    }

    if parts.is_empty() {
        return Err(invalid("names no folder"));
    }
    Ok(parts)
}
