// Copyright (C) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resolves a task's file specs to local paths under its bundle's storage
//! base directory and opens the files the transfer engine reads or writes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorCode, ServiceError};
use crate::task::config::{Action, TaskConfig};

/// In-progress-transfer suffix; stripped via atomic rename on completion.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// Resolves `path` against `base`, rejecting any component that would
/// escape it (`..`, or an absolute path supplied by the client).
///
/// Returns [`crate::error::ErrorCode::FilePath`] on rejection.
pub(crate) fn resolve_under(base: &Path, path: &str) -> Result<PathBuf, ServiceError> {
    let mut resolved = base.to_path_buf();
    let mut any_component = false;
    for component in Path::new(path).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                any_component = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::Code(ErrorCode::FilePath));
            }
        }
    }
    if !any_component {
        return Err(ServiceError::Code(ErrorCode::FilePath));
    }
    Ok(resolved)
}

/// Thread-safe handles to the files a task has open, indexed in file-spec
/// order.
pub(crate) struct Files(Vec<Arc<Mutex<File>>>);

impl Files {
    fn new(files: Vec<Arc<Mutex<File>>>) -> Self {
        Files(files)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<Arc<Mutex<File>>> {
        self.0.get(index).cloned()
    }
}

/// The open files and known sizes for one task.
pub(crate) struct AttachedFiles {
    /// Main task files, in file-spec order. For downloads these are opened
    /// against the `.tmp` path; for uploads, the source file read-only.
    pub(crate) files: Files,
    /// Resolved final (non-`.tmp`) save paths, parallel to `files`.
    pub(crate) final_paths: Vec<PathBuf>,
    /// Known sizes in bytes; `-1` for downloads until a response arrives.
    pub(crate) sizes: Vec<i64>,
}

impl AttachedFiles {
    /// Opens every file named in `config`, resolving save/source paths
    /// under `base` (the bundle's storage directory).
    pub(crate) fn open(config: &TaskConfig, base: &Path) -> Result<AttachedFiles, ServiceError> {
        let mut files = Vec::with_capacity(config.file_specs.len().max(1));
        let mut final_paths = Vec::with_capacity(config.file_specs.len().max(1));
        let mut sizes = Vec::with_capacity(config.file_specs.len().max(1));

        for spec in &config.file_specs {
            let final_path = resolve_under(base, &spec.path)?;
            match config.common_data.action {
                Action::Upload => {
                    let file = OpenOptions::new()
                        .read(true)
                        .open(&final_path)
                        .map_err(ServiceError::Io)?;
                    let size = file.metadata().map_err(ServiceError::Io)?.len();
                    files.push(Arc::new(Mutex::new(file)));
                    sizes.push(size as i64);
                }
                Action::Download => {
                    if let Some(parent) = final_path.parent() {
                        fs::create_dir_all(parent).map_err(ServiceError::Io)?;
                    }
                    if !config.common_data.overwrite && path_is_nonempty(&final_path) {
                        return Err(ServiceError::Code(ErrorCode::FileIo));
                    }
                    let tmp_path = tmp_path_for(&final_path);
                    let file = OpenOptions::new()
                        .create(true)
                        .read(true)
                        .write(true)
                        .open(&tmp_path)
                        .map_err(ServiceError::Io)?;
                    files.push(Arc::new(Mutex::new(file)));
                    sizes.push(-1);
                }
                Action::Any => unreachable!("Action::Any is a search-only wildcard"),
            }
            final_paths.push(final_path);
        }

        Ok(AttachedFiles {
            files: Files::new(files),
            final_paths,
            sizes,
        })
    }
}

fn path_is_nonempty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// The `.tmp` path a download writes to while in progress.
pub(crate) fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut s = final_path.as_os_str().to_os_string();
    s.push(TMP_SUFFIX);
    PathBuf::from(s)
}

/// Atomically renames a completed download's `.tmp` file to its final
/// path.
pub(crate) fn finalize_download(final_path: &Path) -> io::Result<()> {
    fs::rename(tmp_path_for(final_path), final_path)
}

/// Removes a download's `.tmp` file, used when a task is Stopped or
/// Removed mid-transfer.
pub(crate) fn discard_partial_download(final_path: &Path) -> io::Result<()> {
    match fs::remove_file(tmp_path_for(final_path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_escape() {
        let base = Path::new("/base/bundle");
        let result = resolve_under(base, "../../etc/passwd");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        let base = Path::new("/base/bundle");
        let result = resolve_under(base, "/etc/passwd");
        assert!(result.is_err());
    }

    #[test]
    fn joins_relative_path_under_base() {
        let base = Path::new("/base/bundle");
        let resolved = resolve_under(base, "downloads/a.bin").unwrap();
        assert_eq!(resolved, PathBuf::from("/base/bundle/downloads/a.bin"));
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let final_path = Path::new("/base/bundle/a.bin");
        assert_eq!(
            tmp_path_for(final_path),
            PathBuf::from("/base/bundle/a.bin.tmp")
        );
    }

    #[test]
    fn finalize_renames_tmp_to_final() {
        let dir = std::env::temp_dir().join(format!(
            "request_files_test_{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let final_path = dir.join("out.bin");
        fs::write(tmp_path_for(&final_path), b"hello").unwrap();

        finalize_download(&final_path).unwrap();

        assert!(final_path.exists());
        assert!(!tmp_path_for(&final_path).exists());
        fs::remove_dir_all(&dir).ok();
    }
}
