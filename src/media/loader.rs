//! Per-file asynchronous frame loader.
//!
//! Each loader owns one background worker that keeps a cache of decoded,
//! uploaded frames covering the currently requested interval set of source
//! times. Decoder instances are pooled by position and reused across
//! requests: a decoder already sitting at (or shortly before) a region's
//! start reads forward; anything else seeks. Idle decoders age out.
//!
//! # Locking
//!
//! One mutex guards `{request, loaded, shutdown}`. The worker holds it for
//! bookkeeping and releases it around every blocking decode or upload call,
//! so `set_request` and `loaded` stay responsive during heavy decoding.
//! Decoder slots are owned by the worker thread and never locked.

use crate::core::clock::Clocks;
use crate::core::flag::Flag;
use crate::core::interval::{Interval, IntervalSet, TimeKey};
use crate::display::driver::{DisplayDriver, LoadedImage};
use crate::media::decoder::{DecoderFactory, MediaDecoder, MediaError, MediaFileInfo};
use crate::utils::short_filename;
use log::{debug, error, trace};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// What the loader should have decoded, plus housekeeping knobs.
#[derive(Clone)]
pub struct FrameRequest {
    /// Source-time intervals that should be covered by decoded frames.
    pub wanted: IntervalSet,
    /// Drop decoders unused for longer than this (seconds).
    pub decoder_idle_time: f64,
    /// Prefer reading forward over seeking within this many seconds.
    pub seek_scan_time: f64,
    /// Raised whenever coverage, EOF or error state changes.
    pub notify: Option<Arc<Flag>>,
}

impl Default for FrameRequest {
    fn default() -> Self {
        Self {
            wanted: IntervalSet::new(),
            decoder_idle_time: 1.0,
            seek_scan_time: 1.0,
            notify: None,
        }
    }
}

/// Snapshot of what a loader has produced so far.
#[derive(Clone, Default)]
pub struct LoadedFrames {
    /// Source intervals from which at least one frame has been produced.
    pub coverage: IntervalSet,
    /// Decoded and uploaded frames by source timestamp.
    pub frames: BTreeMap<TimeKey, Arc<LoadedImage>>,
    /// Smallest source time at which end-of-file was observed.
    pub eof: Option<f64>,
    /// Most recent fatal decode error, sticky until the request moves away.
    pub error: Option<String>,
}

impl LoadedFrames {
    /// Latest frame at or before `t`, the one that would be on screen at
    /// source time `t`.
    pub fn frame_at_or_before(&self, t: f64) -> Option<(f64, Arc<LoadedImage>)> {
        self.frames
            .range(..=TimeKey(t))
            .next_back()
            .map(|(&k, image)| (k.0, Arc::clone(image)))
    }
}

/// Everything a loader needs to run.
pub struct FrameLoaderContext {
    pub driver: Arc<dyn DisplayDriver>,
    pub clocks: Arc<dyn Clocks>,
    pub decoder_factory: DecoderFactory,
    pub filename: PathBuf,
}

/// One pooled decoder: its instance, current load assignment, and the
/// reordering and idle bookkeeping the heuristics run on. Keyed in the
/// worker's map by the source time its next frame would have.
struct DecoderSlot {
    decoder: Option<Box<dyn MediaDecoder>>,
    assignment: Interval,
    /// Largest observed gap between expected position and the returned
    /// frame's start; sizes the seek-vs-scan cutoff.
    backtrack: f64,
    use_time: f64,
}

#[derive(Default)]
struct LoaderState {
    request: FrameRequest,
    loaded: LoadedFrames,
    shutdown: bool,
}

struct LoaderShared {
    filename: PathBuf,
    state: Mutex<LoaderState>,
    wakeup: Flag,
}

/// Handle to a per-file loader; dropping it stops the worker.
pub struct FrameLoader {
    shared: Arc<LoaderShared>,
    filename: PathBuf,
    decoder_factory: DecoderFactory,
    worker: Option<thread::JoinHandle<()>>,
}

impl FrameLoader {
    /// Spawns the worker thread. It idles until the first request.
    pub fn start(cx: FrameLoaderContext) -> Self {
        let shared = Arc::new(LoaderShared {
            filename: cx.filename.clone(),
            state: Mutex::new(LoaderState::default()),
            wakeup: Flag::new(Arc::clone(&cx.clocks)),
        });

        let mut thread_name = format!("load:{}", short_filename(&cx.filename));
        thread_name.truncate(15);

        let filename = cx.filename.clone();
        let decoder_factory = Arc::clone(&cx.decoder_factory);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || loader_worker(cx, worker_shared))
            .expect("failed to spawn loader thread");

        Self {
            shared,
            filename,
            decoder_factory,
            worker: Some(worker),
        }
    }

    /// Replaces the current request atomically and wakes the worker if the
    /// wanted set changed. Frames outside the new wanted set are pruned,
    /// keeping one frame of slack on each side of every wanted interval so
    /// every instant of the range keeps a presentable predecessor.
    pub fn set_request(&self, request: FrameRequest) {
        let mut st = self.lock_state();
        if request.wanted == st.request.wanted {
            trace!("REQ {} (same)", short_filename(&self.filename));
            st.request = request; // capture options, skip wakeup
            return;
        }

        st.request = request;
        debug!(
            "REQ {} {}",
            short_filename(&self.filename),
            st.request.wanted
        );

        // Remove no-longer-wanted frames and coverage.
        let wanted = st.request.wanted.clone();
        let mut to_erase = st.loaded.coverage.clone();
        for want in wanted.iter() {
            let mut keep = want;

            if let Some(have) = st.loaded.coverage.overlap_begin(want.begin) {
                if have.begin <= want.begin && have.end > want.begin {
                    keep.begin = have.begin;
                    if let Some((&k, _)) =
                        st.loaded.frames.range(..=TimeKey(want.begin)).next_back()
                    {
                        keep.begin = keep.begin.max(k.0);
                    }
                }
            }

            if let Some(have) = st.loaded.coverage.overlap_begin(want.end) {
                if have.begin < want.end {
                    keep.end = have.end;
                    // Keep through the first frame past the interval; its
                    // image covers up to the second frame's start.
                    let mut past = st.loaded.frames.range(TimeKey(want.end)..).map(|(&k, _)| k);
                    let _first = past.next();
                    if let Some(second) = past.next() {
                        keep.end = keep.end.min(second.0);
                    }
                }
            }

            to_erase.erase(keep);
        }

        if !to_erase.is_empty() {
            let mut dropped = 0usize;
            for erase in to_erase.iter() {
                st.loaded.coverage.erase(erase);
                let doomed: Vec<TimeKey> = st
                    .loaded
                    .frames
                    .range(TimeKey(erase.begin)..TimeKey(erase.end))
                    .map(|(&k, _)| k)
                    .collect();
                dropped += doomed.len();
                for k in doomed {
                    st.loaded.frames.remove(&k);
                }
            }
            trace!(
                "  [req] del {} ({}fr), have {} ({}fr)",
                to_erase,
                dropped,
                st.loaded.coverage,
                st.loaded.frames.len()
            );
        }

        drop(st);
        self.shared.wakeup.set();
    }

    /// Cheap snapshot of coverage, frames, EOF and error state.
    pub fn loaded(&self) -> LoadedFrames {
        self.lock_state().loaded.clone()
    }

    /// Static metadata, read through a throwaway decoder.
    pub fn file_info(&self) -> Result<MediaFileInfo, MediaError> {
        let decoder = (self.decoder_factory)(&self.filename)?;
        Ok(decoder.file_info().clone())
    }

    pub fn filename(&self) -> &PathBuf {
        &self.filename
    }

    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FrameLoader {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            trace!("Stopping loader: {}", short_filename(&self.filename));
            self.lock_state().shutdown = true;
            self.shared.wakeup.set();
            let _ = worker.join();
        }
    }
}

fn loader_worker(cx: FrameLoaderContext, shared: Arc<LoaderShared>) {
    let name = short_filename(&shared.filename);
    trace!("Starting loader: {}", name);

    let mut decoders: BTreeMap<TimeKey, DecoderSlot> = BTreeMap::new();
    let mut st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
    while !st.shutdown {
        let now = cx.clocks.monotonic();
        let wanted = st.request.wanted.clone();
        debug!("LOAD {} want={}", name, wanted);

        let mut to_load = wanted.clone();
        to_load.erase(Interval::new(to_load.bounds().begin, 0.0));
        to_load.erase_all(&st.loaded.coverage);
        if let Some(eof) = st.loaded.eof {
            to_load.erase(Interval::new(eof, to_load.bounds().end));
        }

        trace!(
            "  have={} ({}fr) load={}",
            st.loaded.coverage,
            st.loaded.frames.len(),
            to_load
        );

        //
        // Assign decoders to regions of the media to load. One decoder per
        // wanted interval per round; each assignment consumes the whole
        // wanted interval containing the region's start.
        //

        let mut assigned: BTreeMap<TimeKey, DecoderSlot> = BTreeMap::new();

        // Pass 1: decoders already positioned exactly at a region start.
        for load in to_load.iter().collect::<Vec<_>>() {
            if !to_load.contains(load.begin) {
                continue; // consumed by an earlier assignment
            }
            if let Some(mut slot) = decoders.remove(&TimeKey(load.begin)) {
                let want = wanted.overlap_begin(load.begin).expect("load within wanted");
                trace!("  w={} l={}: use d@{:.3}", want, load, load.begin);
                slot.assignment = load;
                assigned.insert(TimeKey(load.begin), slot);
                to_load.erase(want);
            }
        }

        // Pass 2: recycle other decoders where possible, preferring one
        // positioned at or behind the region start.
        for load in to_load.iter().collect::<Vec<_>>() {
            if decoders.is_empty() {
                break;
            }
            if !to_load.contains(load.begin) {
                continue;
            }
            let after = decoders
                .range((Excluded(TimeKey(load.begin)), Unbounded))
                .next()
                .map(|(&k, _)| k);
            let before = decoders
                .range(..=TimeKey(load.begin))
                .next_back()
                .map(|(&k, _)| k);
            let position = match after {
                Some(a) if a.0 < load.end => a,
                _ => before.or(after).expect("decoders nonempty"),
            };

            let mut slot = decoders.remove(&position).unwrap();
            let want = wanted.overlap_begin(load.begin).expect("load within wanted");
            trace!("  w={} l={}: recycle d@{:.3}", want, load, position.0);
            slot.assignment = load;
            assigned.insert(position, slot);
            to_load.erase(want);
        }

        // Pass 3: fresh decoders for whatever remains.
        for load in to_load.iter().collect::<Vec<_>>() {
            if !to_load.contains(load.begin) {
                continue;
            }
            let want = wanted.overlap_begin(load.begin).expect("load within wanted");
            debug!("  w={} l={}: new decoder", want, load);
            assigned.insert(
                TimeKey(load.begin),
                DecoderSlot {
                    decoder: None,
                    assignment: load,
                    backtrack: 0.0,
                    use_time: now,
                },
            );
            to_load.erase(want);
        }

        // Age out decoders that sat unassigned too long.
        let idle_limit = st.request.decoder_idle_time;
        decoders.retain(|k, slot| {
            slot.use_time = slot.use_time.min(now);
            let age = now - slot.use_time;
            if age > idle_limit {
                debug!("  drop d@{:.3} ({:.3}s idle > {:.3}s)", k.0, age, idle_limit);
                false
            } else {
                trace!("  keep d@{:.3} ({:.3}s idle)", k.0, age);
                true
            }
        });

        // Nothing to do: wait for a request change.
        if assigned.is_empty() {
            debug!(
                "  WAIT {} have={} ({}fr)",
                name,
                st.loaded.coverage,
                st.loaded.frames.len()
            );
            drop(st);
            shared.wakeup.wait();
            st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            continue;
        }

        //
        // Do the actual blocking work. The lock is released around each
        // decode, so the request may change under us; every item rechecks.
        //

        let mut changes = 0usize;
        while let Some((key, mut slot)) = assigned.pop_first() {
            if st.shutdown {
                break;
            }
            let load = slot.assignment;
            if !st.request.wanted.contains(load.begin) {
                trace!("  obsolete load={}", load);
                continue;
            }
            let seek_scan_time = st.request.seek_scan_time;
            let mut position = key.0;
            drop(st);

            slot.use_time = now;
            let mut frame = None;
            let mut image: Option<Arc<LoadedImage>> = None;
            let mut failure: Option<String> = None;

            let outcome: Result<(), Box<dyn std::error::Error>> = (|| {
                if slot.decoder.is_none() {
                    trace!("  open new decoder: {}", name);
                    slot.decoder = Some((cx.decoder_factory)(&cx.filename)?);
                    position = 0.0;
                }
                let decoder = slot.decoder.as_mut().unwrap();

                // Heuristic threshold for seek vs. read-forward.
                let cutoff = load.begin - seek_scan_time.max(2.0 * slot.backtrack);
                if position < cutoff || position >= load.end {
                    debug!("  seek {:.3}s => {:.3}s", position, load.begin);
                    decoder.seek_before(load.begin)?;
                    position = load.begin;
                    slot.backtrack = 0.0;
                } else if position < load.begin {
                    trace!("  scan {:.3}s (>{:.3}s) => {:.3}s", position, cutoff, load.begin);
                }

                frame = decoder.next_frame()?;
                if let Some(f) = &frame {
                    if f.time.begin >= position {
                        image = Some(cx.driver.load_image(f.image.clone())?);
                    }
                }
                Ok(())
            })();

            if let Err(e) = outcome {
                error!("{}: {}", name, e);
                failure = Some(e.to_string());
                frame = None; // treat as EOF to avoid looping
            }

            st = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(message) = failure {
                st.loaded.error = Some(message);
                changes += 1;
            }

            match frame {
                None => {
                    let eof = position;
                    match st.loaded.eof {
                        None => {
                            debug!("  EOF {:.3}s (new)", eof);
                            st.loaded.eof = Some(eof);
                            changes += 1;
                        }
                        Some(old) if eof < old => {
                            debug!("  EOF {:.3}s < {:.3}s", eof, old);
                            st.loaded.eof = Some(eof);
                            changes += 1;
                        }
                        Some(old) => {
                            trace!("  EOF {:.3}s >= {:.3}s", eof, old);
                        }
                    }
                }
                Some(f) => {
                    let backtrack = position - f.time.begin;
                    if backtrack > slot.backtrack {
                        slot.backtrack = backtrack;
                        trace!("    backtrack {:.3}s", backtrack);
                    }

                    let begin = position.min(f.time.begin);
                    if !st.request.wanted.overlaps(Interval::new(begin, f.time.end)) {
                        trace!("    unwanted frame ignored");
                    } else if let Some(image) = image {
                        st.loaded.coverage.insert(Interval::new(begin, f.time.end));
                        st.loaded.frames.insert(TimeKey(f.time.begin), image);
                        changes += 1;
                    } else {
                        trace!("    frame lands in a wanted region but wasn't uploaded");
                    }

                    position = f.time.end;
                }
            }

            // Keep the decoder that was used, at its updated position.
            decoders.insert(TimeKey(position), slot);
        }

        debug!(
            "  LOOP {} Δ{} have={} ({}fr)",
            name,
            changes,
            st.loaded.coverage,
            st.loaded.frames.len()
        );
        if changes > 0 {
            if let Some(notify) = &st.request.notify {
                notify.set();
            }
        }
    }

    debug!("Stopped loader: {}", name);
}
