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

//! Capability checks applied to each IPC command, independent of the
//! per-bundle ownership checks the registry applies itself.

use crate::task::config::Action;

/// A caller's identity as presented across the IPC boundary: the bundle
/// name and a coarse capability grant.
///
/// The embedding binary is responsible for populating this from whatever
/// platform identity mechanism backs the socket connection (peer
/// credentials, a signed token, etc.); the service core only consumes the
/// already-verified result.
#[derive(Clone, Debug)]
pub(crate) struct CallerIdentity {
    pub(crate) bundle: String,
    pub(crate) manager: ManagerPermission,
}

impl CallerIdentity {
    /// An identity scoped to its own bundle with no manager capability —
    /// the default for an ordinary application caller.
    pub(crate) fn for_bundle(bundle: impl Into<String>) -> Self {
        CallerIdentity {
            bundle: bundle.into(),
            manager: ManagerPermission::NoPermission,
        }
    }
}

/// The level of cross-bundle management capability a caller holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ManagerPermission {
    /// No cross-bundle visibility; operations are scoped to the caller's
    /// own bundle.
    NoPermission,
    /// May manage download tasks across every bundle.
    ManagerDownload,
    /// May manage upload tasks across every bundle.
    ManagerUpload,
    /// May manage every task regardless of action or owning bundle.
    ManagerAll,
}

impl ManagerPermission {
    /// Whether this grant covers system-wide visibility for `action`
    /// (used by `Search`'s system method and by cross-bundle `Clear`).
    pub(crate) fn covers(self, action: Action) -> bool {
        match self {
            ManagerPermission::ManagerAll => true,
            ManagerPermission::ManagerDownload => action != Action::Upload,
            ManagerPermission::ManagerUpload => action != Action::Download,
            ManagerPermission::NoPermission => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_permission_covers_nothing() {
        assert!(!ManagerPermission::NoPermission.covers(Action::Download));
    }

    #[test]
    fn download_manager_does_not_cover_upload() {
        assert!(ManagerPermission::ManagerDownload.covers(Action::Download));
        assert!(!ManagerPermission::ManagerDownload.covers(Action::Upload));
    }

    #[test]
    fn manager_all_covers_every_action() {
        assert!(ManagerPermission::ManagerAll.covers(Action::Download));
        assert!(ManagerPermission::ManagerAll.covers(Action::Upload));
    }
}
