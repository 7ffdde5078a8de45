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

//! Tracks sustained throughput for one transfer attempt and flags a
//! sustained stall against the task's configured minimum speed.

use std::time::Instant;

use crate::task::config::MinSpeed;

/// Observes byte counts over time and reports when throughput has stayed
/// below `min_speed.speed` for at least `min_speed.duration_ms`.
pub(crate) struct SpeedLimiter {
    min_speed: MinSpeed,
    window_start: Instant,
    window_bytes: u64,
    below_since: Option<Instant>,
}

impl SpeedLimiter {
    pub(crate) fn new(min_speed: MinSpeed) -> Self {
        SpeedLimiter {
            min_speed,
            window_start: Instant::now(),
            window_bytes: 0,
            below_since: None,
        }
    }

    /// Records `bytes` transferred since the last call. Returns `true`
    /// once the sustained-low-speed window has been exceeded, in which
    /// case the caller should fail the attempt with
    /// [`crate::task::reason::Reason::LowSpeed`].
    pub(crate) fn record(&mut self, bytes: u64) -> bool {
        if self.min_speed.speed == 0 {
            return false;
        }
        self.window_bytes += bytes;

        let elapsed = self.window_start.elapsed();
        if elapsed.as_secs_f64() < 1.0 {
            return false;
        }

        let measured = (self.window_bytes as f64 / elapsed.as_secs_f64()) as u64;
        self.window_start = Instant::now();
        self.window_bytes = 0;

        if measured < self.min_speed.speed {
            let since = *self.below_since.get_or_insert_with(Instant::now);
            since.elapsed().as_millis() as u64 >= self.min_speed.duration_ms
        } else {
            self.below_since = None;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn disabled_when_speed_is_zero() {
        let mut limiter = SpeedLimiter::new(MinSpeed {
            speed: 0,
            duration_ms: 1,
        });
        assert!(!limiter.record(0));
    }

    #[test]
    fn no_measurement_within_first_second() {
        let mut limiter = SpeedLimiter::new(MinSpeed {
            speed: 1_000_000,
            duration_ms: 10,
        });
        assert!(!limiter.record(10));
    }

    #[test]
    fn flags_sustained_low_speed() {
        let mut limiter = SpeedLimiter::new(MinSpeed {
            speed: 1_000_000,
            duration_ms: 1,
        });
        limiter.window_start = Instant::now() - Duration::from_secs(2);
        assert!(limiter.record(10));
    }

    #[test]
    fn recovers_once_speed_is_sufficient() {
        let mut limiter = SpeedLimiter::new(MinSpeed {
            speed: 10,
            duration_ms: 100_000,
        });
        limiter.window_start = Instant::now() - Duration::from_secs(2);
        assert!(!limiter.record(10));
        assert!(limiter.below_since.is_none());
        sleep(Duration::from_millis(1));
    }
}
