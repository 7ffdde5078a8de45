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

//! The read-only filters applied by `Search`, shared between the task
//! manager's in-memory index and any future persisted-search path.

use crate::task::config::{Action, Mode};
use crate::task::info::{State, TaskInfo};

/// How the caller is allowed to see tasks: limited to their own bundle,
/// or (a system capability) across every bundle.
#[derive(Clone, Debug)]
pub(crate) enum SearchMethod {
    Bundle(String),
    System,
}

/// The filter predicate for `Search`.
#[derive(Clone, Debug)]
pub(crate) struct SearchFilter {
    pub(crate) method: SearchMethod,
    pub(crate) action: Action,
    pub(crate) mode: Mode,
    pub(crate) state: Option<State>,
    pub(crate) before: Option<u64>,
    pub(crate) after: Option<u64>,
}

impl SearchFilter {
    /// An unrestricted filter scoped to one bundle's own tasks.
    pub(crate) fn for_bundle(bundle: impl Into<String>) -> Self {
        SearchFilter {
            method: SearchMethod::Bundle(bundle.into()),
            action: Action::Any,
            mode: Mode::Any,
            state: None,
            before: None,
            after: None,
        }
    }

    pub(crate) fn matches(&self, info: &TaskInfo, caller_bundle: &str) -> bool {
        let bundle_ok = match &self.method {
            SearchMethod::Bundle(bundle) => info.bundle == *bundle && caller_bundle == bundle,
            SearchMethod::System => true,
        };
        if !bundle_ok {
            return false;
        }
        if self.action != Action::Any && self.action != info.common_data.action {
            return false;
        }
        if self.mode != Mode::Any && self.mode != info.common_data.mode {
            return false;
        }
        if let Some(state) = self.state {
            if state != info.state() {
                return false;
            }
        }
        if let Some(before) = self.before {
            if info.common_data.ctime > before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if info.common_data.ctime < after {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::ConfigBuilder;

    fn info_for(bundle: &str) -> TaskInfo {
        let config = ConfigBuilder::new().bundle(bundle).url("https://x").build();
        TaskInfo::new(&config, 100)
    }

    #[test]
    fn bundle_filter_rejects_other_bundles() {
        let filter = SearchFilter::for_bundle("a");
        assert!(filter.matches(&info_for("a"), "a"));
        assert!(!filter.matches(&info_for("b"), "a"));
    }

    #[test]
    fn action_filter_narrows_results() {
        let mut filter = SearchFilter::for_bundle("a");
        filter.action = Action::Upload;
        assert!(!filter.matches(&info_for("a"), "a"));
    }

    #[test]
    fn system_method_ignores_caller_bundle() {
        let mut filter = SearchFilter::for_bundle("a");
        filter.method = SearchMethod::System;
        assert!(filter.matches(&info_for("b"), "caller"));
    }
}
