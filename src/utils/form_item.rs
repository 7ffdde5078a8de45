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

//! Upload payload building blocks: ordinary form fields and file specs.

/// A single non-file form field carried by a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormItem {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
}

/// Describes one file participating in a download or upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    /// The multipart field name under which this file is sent (uploads), or
    /// a logical label (downloads).
    pub name: String,
    /// The resolved local filesystem path this spec reads from or writes to.
    pub path: String,
    /// The file name reported to the remote peer (uploads) or suggested by
    /// it (downloads).
    pub file_name: String,
    /// The MIME type advertised for this part.
    pub mime_type: String,
    /// `true` when the caller supplied an already-open file descriptor
    /// rather than a path the service should open itself. Such descriptors
    /// are owned by the task until it reaches a terminal state.
    pub is_user_file: bool,
}

impl FileSpec {
    /// Builds a [`FileSpec`] for a path the service will open itself.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .rsplit('/')
            .next()
            .unwrap_or(&path)
            .to_string();
        FileSpec {
            name: name.into(),
            path,
            file_name,
            mime_type: "application/octet-stream".to_string(),
            is_user_file: false,
        }
    }
}
