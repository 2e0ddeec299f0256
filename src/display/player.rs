//! Per-screen frame player.
//!
//! A worker thread sleeps until the next scheduled presentation time, then
//! drives the display driver with that entry's layer stack. Entries
//! displaced by lateness are reported as skips; `last_shown` tracks the
//! scheduled (not wall) time of the newest entry driven or skipped past.

use crate::core::clock::Clocks;
use crate::core::flag::Flag;
use crate::core::interval::TimeKey;
use crate::display::driver::{DisplayDriver, DisplayFrame};
use crate::utils::abbrev_time;
use log::{debug, error, trace, warn};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// Frames to present, keyed by monotonic-clock presentation time.
pub type Timeline = BTreeMap<TimeKey, DisplayFrame>;

/// Presenting is allowed to run this much past the frame period before a
/// slow-present warning fires.
const SLOW_PRESENT_GRACE: f64 = 0.005;

struct PlayerState {
    timeline: Timeline,
    notify: Option<Arc<Flag>>,
    shown: f64,
    shutdown: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            timeline: Timeline::new(),
            notify: None,
            // Before anything is driven, every scheduled time counts as new.
            shown: f64::NEG_INFINITY,
            shutdown: false,
        }
    }
}

struct PlayerShared {
    screen_id: u32,
    state: Mutex<PlayerState>,
    wakeup: Flag,
}

/// Handle to a per-screen player; dropping it stops the worker.
pub struct FramePlayer {
    shared: Arc<PlayerShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FramePlayer {
    pub fn start(clocks: Arc<dyn Clocks>, driver: Arc<dyn DisplayDriver>, screen_id: u32) -> Self {
        debug!("s{} Launching frame player", screen_id);
        let shared = Arc::new(PlayerShared {
            screen_id,
            state: Mutex::new(PlayerState::default()),
            wakeup: Flag::new(Arc::clone(&clocks)),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("play:s{}", screen_id))
            .spawn(move || player_worker(clocks, driver, worker_shared))
            .expect("failed to spawn player thread");

        Self { shared, worker: Some(worker) }
    }

    /// Atomically replaces the scheduled frames. The worker is only woken
    /// when the set of presentation times changes, not when merely the
    /// layer stacks were refreshed.
    pub fn set_timeline(&self, timeline: Timeline, notify: Option<Arc<Flag>>) {
        let mut st = self.lock_state();

        let same_keys = timeline.len() == st.timeline.len()
            && timeline.keys().zip(st.timeline.keys()).all(|(a, b)| a == b);

        if timeline.is_empty() {
            trace!("s{} SET empty", self.shared.screen_id);
        } else {
            trace!(
                "s{} SET {}f: {}~{} {}",
                self.shared.screen_id,
                timeline.len(),
                abbrev_time(timeline.keys().next().unwrap().0),
                abbrev_time(timeline.keys().next_back().unwrap().0),
                if same_keys { "[same]" } else { "[diff]" }
            );
        }

        st.timeline = timeline;
        st.notify = notify;
        let wake = !st.timeline.is_empty() && !same_keys;
        drop(st);
        if wake {
            self.shared.wakeup.set();
        }
    }

    /// Scheduled presentation time of the most recently driven frame.
    pub fn last_shown(&self) -> f64 {
        self.lock_state().shown
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayerState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            debug!("s{} Stopping frame player", self.shared.screen_id);
            self.lock_state().shutdown = true;
            self.shared.wakeup.set();
            let _ = worker.join();
        }
    }
}

fn player_worker(clocks: Arc<dyn Clocks>, driver: Arc<dyn DisplayDriver>, shared: Arc<PlayerShared>) {
    let screen_id = shared.screen_id;
    trace!("s{} Frame player thread running", screen_id);

    let mut st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
    while !st.shutdown {
        if st.timeline.is_empty() {
            trace!("s{} PLAY no frames, sleep", screen_id);
            drop(st);
            shared.wakeup.wait();
            st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            continue;
        }

        let now = clocks.monotonic();

        // Latest entry at or before now (if it's news), else the next
        // future entry.
        let upper = st
            .timeline
            .range((Excluded(TimeKey(now)), Unbounded))
            .next()
            .map(|(&k, _)| k.0);
        let before = st
            .timeline
            .range(..=TimeKey(now))
            .next_back()
            .map(|(&k, _)| k.0);
        let show = match before {
            Some(b) if b > st.shown => Some(b),
            _ => upper,
        };

        // Report entries displaced by lateness.
        if let Some(show_time) = show {
            let skipped: Vec<(f64, usize)> = st
                .timeline
                .range((Excluded(TimeKey(st.shown)), Excluded(TimeKey(show_time))))
                .map(|(&k, frame)| (k.0, frame.layers.len()))
                .collect();
            for (t, layer_count) in skipped {
                if layer_count > 0 {
                    warn!(
                        "s{} SKIPPED frame {}l {} ({:.3}s old)",
                        screen_id,
                        layer_count,
                        abbrev_time(t),
                        now - t
                    );
                } else {
                    trace!("s{} skip *empty* {} ({:.3}s old)", screen_id, abbrev_time(t), now - t);
                }
                st.shown = t;
            }
        }

        let Some(show_time) = show else {
            trace!("s{}  (no more frames, sleep)", screen_id);
            drop(st);
            shared.wakeup.wait();
            st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            continue;
        };

        if show_time > now {
            trace!("s{}  (waiting {:.3}s)", screen_id, show_time - now);
            drop(st);
            shared.wakeup.wait_until(show_time);
            st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            continue;
        }

        // Take the stack out of the timeline; the emptied entry stays
        // behind and is skipped over silently later.
        let frame = std::mem::take(
            st.timeline
                .get_mut(&TimeKey(show_time))
                .expect("chosen entry present"),
        );
        let layer_count = frame.layers.len();
        let expected = frame.mode.frame_period();
        drop(st);

        let start = clocks.monotonic();
        match driver.show_frame(screen_id, &frame) {
            Ok(()) => {
                let elapsed = clocks.monotonic() - start;
                if elapsed > expected + SLOW_PRESENT_GRACE {
                    warn!(
                        "s{} Slow present: took {:.3}s, expected {:.3}s",
                        screen_id, elapsed, expected
                    );
                }
            }
            Err(e) => {
                // Continue as if displayed to avoid a hot retry loop.
                error!("s{} Display: {}", screen_id, e);
            }
        }

        debug!(
            "s{} Frame {}l {} ({:.3}s old)",
            screen_id,
            layer_count,
            abbrev_time(show_time),
            now - show_time
        );

        st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
        st.shown = show_time;
        if let Some(notify) = &st.notify {
            notify.set();
        }
    }

    trace!("s{} Frame player thread ending", screen_id);
}
