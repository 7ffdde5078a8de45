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

//! Tracks which bundle is currently foreground, for the scheduler's
//! priority bonus, and notifies on bundle uninstall.

use std::collections::HashSet;
use std::sync::RwLock;

/// The foreground-bundle cache: one of the three pieces of process-wide
/// state the design notes call out as needing explicit init/teardown.
pub(crate) struct AppStateManager {
    foreground: RwLock<Option<String>>,
    backgrounded: RwLock<HashSet<String>>,
}

impl AppStateManager {
    pub(crate) fn new() -> Self {
        AppStateManager {
            foreground: RwLock::new(None),
            backgrounded: RwLock::new(HashSet::new()),
        }
    }

    /// Pushed by the embedder when `bundle` becomes the foreground app.
    pub(crate) fn set_foreground(&self, bundle: &str) {
        *self.foreground.write().unwrap() = Some(bundle.to_string());
        self.backgrounded.write().unwrap().remove(bundle);
    }

    /// Pushed by the embedder when `bundle` goes to background or
    /// terminates.
    pub(crate) fn set_backgrounded(&self, bundle: &str) {
        let mut fg = self.foreground.write().unwrap();
        if fg.as_deref() == Some(bundle) {
            *fg = None;
        }
        self.backgrounded.write().unwrap().insert(bundle.to_string());
    }

    pub(crate) fn is_foreground(&self, bundle: &str) -> bool {
        self.foreground.read().unwrap().as_deref() == Some(bundle)
    }

    pub(crate) fn is_backgrounded(&self, bundle: &str) -> bool {
        self.backgrounded.read().unwrap().contains(bundle)
    }
}

impl Default for AppStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_bundle_is_tracked() {
        let manager = AppStateManager::new();
        manager.set_foreground("com.example.a");
        assert!(manager.is_foreground("com.example.a"));
        assert!(!manager.is_foreground("com.example.b"));
    }

    #[test]
    fn backgrounding_the_foreground_bundle_clears_it() {
        let manager = AppStateManager::new();
        manager.set_foreground("com.example.a");
        manager.set_backgrounded("com.example.a");
        assert!(!manager.is_foreground("com.example.a"));
        assert!(manager.is_backgrounded("com.example.a"));
    }
}
