use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Result, StrataError, Timestamp};

/// Access history for one tracked frame: at most the K most recent
/// timestamps, oldest first.
#[derive(Debug)]
struct AccessState {
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl AccessState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }
}

struct ReplacerInner {
    current_timestamp: Timestamp,
    frames: HashMap<FrameId, AccessState>,
    evictable_count: usize,
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// `now - timestamps[0]` once a frame has K recorded accesses, +infinity
/// before that. Frames with fewer than K accesses therefore dominate, and
/// ties within either class go to the earliest retained timestamp.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `num_frames` frames with history
    /// depth `k`. `k` must be positive.
    pub fn new(k: usize, num_frames: usize) -> Result<Self> {
        if k == 0 {
            return Err(StrataError::InvalidK);
        }
        Ok(Self {
            k,
            replacer_size: num_frames,
            inner: Mutex::new(ReplacerInner {
                current_timestamp: 0,
                frames: HashMap::new(),
                evictable_count: 0,
            }),
        })
    }

    fn check_frame(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.replacer_size {
            return Err(StrataError::InvalidFrame(frame_id));
        }
        Ok(())
    }

    /// Evicts and forgets the frame with the largest backward k-distance.
    /// Returns None when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        let mut victim: Option<FrameId> = None;
        let mut victim_under_k = false;
        let mut victim_first_ts = Timestamp::MAX;

        for (&frame_id, state) in inner.frames.iter() {
            if !state.is_evictable {
                continue;
            }

            let under_k = state.history.len() < self.k;
            let first_ts = state.history.front().copied().unwrap_or(0);

            // Under-K frames (+inf distance) beat at-least-K frames; within a
            // class the earliest retained timestamp wins.
            let better = match (victim_under_k, under_k) {
                (false, true) => true,
                (true, false) => false,
                _ => first_ts < victim_first_ts,
            };

            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_under_k = under_k;
                victim_first_ts = first_ts;
            }
        }

        if let Some(frame_id) = victim {
            inner.frames.remove(&frame_id);
            inner.evictable_count -= 1;
        }
        victim
    }

    /// Advances the logical clock and appends a timestamp to the frame's
    /// history. A frame seen for the first time starts non-evictable.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;

        let state = inner.frames.entry(frame_id).or_insert_with(AccessState::new);
        state.history.push_back(now);
        while state.history.len() > self.k {
            state.history.pop_front();
        }
        Ok(())
    }

    /// Toggles a frame's evictable flag, adjusting the evictable count only
    /// on an actual state change. No-op for untracked frames.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut inner = self.inner.lock();
        let mut delta: isize = 0;
        if let Some(state) = inner.frames.get_mut(&frame_id) {
            if state.is_evictable != evictable {
                state.is_evictable = evictable;
                delta = if evictable { 1 } else { -1 };
            }
        }
        if delta > 0 {
            inner.evictable_count += 1;
        } else if delta < 0 {
            inner.evictable_count -= 1;
        }
        Ok(())
    }

    /// Drops a frame and its history. Untracked frames are a no-op; a
    /// tracked frame that is still pinned cannot be removed.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut inner = self.inner.lock();
        let evictable = match inner.frames.get(&frame_id) {
            None => return Ok(()),
            Some(state) => state.is_evictable,
        };
        if !evictable {
            return Err(StrataError::NonEvictable(frame_id));
        }
        inner.frames.remove(&frame_id);
        inner.evictable_count -= 1;
        Ok(())
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
