// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Environment variable holding the transmit thread priority (0-99).
pub const PRIORITY_ENV: &str = "DMXSHOW_THREAD_PRIORITY";

/// Environment variable that opts out of SCHED_FIFO for the transmit thread.
pub const DISABLE_RT_ENV: &str = "DMXSHOW_DISABLE_RT";

/// Priority used when DMXSHOW_THREAD_PRIORITY is unset or invalid.
const DEFAULT_TRANSMIT_THREAD_PRIORITY: u8 = 60;

/// Reads DMXSHOW_THREAD_PRIORITY. Values outside 0-99 fall back to the default.
pub fn transmit_thread_priority() -> Option<ThreadPriorityValue> {
    std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|v| {
            let n = v.trim().parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .or_else(|| ThreadPriorityValue::try_from(DEFAULT_TRANSMIT_THREAD_PRIORITY).ok())
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            let v = v.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to attempt SCHED_FIFO for the transmit thread. On by default.
pub fn rt_transmit_enabled() -> bool {
    !env_flag(DISABLE_RT_ENV)
}

/// Raises the priority of the calling thread. Failures are logged and otherwise ignored;
/// frames still go out at normal priority, just with more jitter.
pub fn configure_transmit_thread_priority(priority: Option<ThreadPriorityValue>, rt: bool) {
    let Some(priority) = priority else {
        return;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise DMX transmit thread priority");
    }

    #[cfg(unix)]
    if rt {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for DMX transmit thread"),
            Err(e) => warn!(error = ?e, "Failed to set RT SCHED_FIFO for DMX transmit thread"),
        }
    }

    #[cfg(not(unix))]
    let _ = rt;
}

#[cfg(test)]
mod test {
    use serial_test::serial;

    use super::*;

    fn with_env<F: FnOnce()>(name: &str, value: Option<&str>, f: F) {
        let previous = std::env::var(name).ok();
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
        f();
        match previous {
            Some(previous) => std::env::set_var(name, previous),
            None => std::env::remove_var(name),
        }
    }

    #[test]
    #[serial]
    fn test_priority_from_env() {
        let default = ThreadPriorityValue::try_from(DEFAULT_TRANSMIT_THREAD_PRIORITY).ok();

        with_env(PRIORITY_ENV, None, || {
            assert_eq!(transmit_thread_priority(), default);
        });
        with_env(PRIORITY_ENV, Some("42"), || {
            assert_eq!(
                transmit_thread_priority(),
                ThreadPriorityValue::try_from(42u8).ok()
            );
        });
        for invalid in ["100", "-1", "loud", ""] {
            with_env(PRIORITY_ENV, Some(invalid), || {
                assert_eq!(transmit_thread_priority(), default, "{}", invalid);
            });
        }
    }

    #[test]
    #[serial]
    fn test_rt_flag() {
        with_env(DISABLE_RT_ENV, None, || assert!(rt_transmit_enabled()));
        for value in ["1", "true", "YES", "on"] {
            with_env(DISABLE_RT_ENV, Some(value), || {
                assert!(!rt_transmit_enabled(), "{}", value)
            });
        }
        with_env(DISABLE_RT_ENV, Some("0"), || assert!(rt_transmit_enabled()));
    }

    #[test]
    fn test_configure_without_priority() {
        // Each call configures the calling thread, so it is safe to repeat.
        std::thread::spawn(|| {
            configure_transmit_thread_priority(None, false);
            configure_transmit_thread_priority(None, false);
        })
        .join()
        .unwrap();
    }
}
