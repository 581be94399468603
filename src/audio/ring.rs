//! Pre-allocated chunk ring buffer between the decoder and the audio callback.
//!
//! The decoder thread appends interleaved f32 chunks; the cpal callback pops
//! them. All slot memory is allocated up front so neither side allocates on
//! the hot path. Every operation takes the single internal mutex; the
//! critical sections are short copies, which keeps the callback well under
//! its deadline even on the contended path.

use parking_lot::Mutex;

/// Fixed-capacity FIFO of audio chunks.
///
/// A slot holds up to `chunk_size` frames of `channels` interleaved samples.
/// `append` fails when full (the producer backs off); `pop_into` returns
/// `None` when empty (the callback fills silence).
pub struct ChunkRing {
    chunk_size: usize,
    channels: usize,
    max_chunks: usize,
    inner: Mutex<RingState>,
}

struct RingState {
    /// `max_chunks * chunk_size * channels` samples, flat.
    samples: Vec<f32>,
    /// Actual frame count stored in each slot.
    frames: Vec<usize>,
    write_idx: usize,
    read_idx: usize,
    count: usize,
}

impl ChunkRing {
    pub fn new(max_chunks: usize, chunk_size: usize, channels: usize) -> Self {
        assert!(max_chunks > 0 && chunk_size > 0 && channels > 0);
        Self {
            chunk_size,
            channels,
            max_chunks,
            inner: Mutex::new(RingState {
                samples: vec![0.0; max_chunks * chunk_size * channels],
                frames: vec![0; max_chunks],
                write_idx: 0,
                read_idx: 0,
                count: 0,
            }),
        }
    }

    fn slot_len(&self) -> usize {
        self.chunk_size * self.channels
    }

    /// Append one interleaved chunk. Returns `false` when the ring is full.
    ///
    /// Anything beyond `chunk_size` frames is dropped; the producer chunks
    /// its reads to `chunk_size` so truncation only guards against misuse.
    pub fn append(&self, chunk: &[f32]) -> bool {
        let frames = (chunk.len() / self.channels).min(self.chunk_size);
        let mut st = self.inner.lock();
        if st.count >= self.max_chunks {
            return false;
        }
        let base = st.write_idx * self.slot_len();
        let n = frames * self.channels;
        st.samples[base..base + n].copy_from_slice(&chunk[..n]);
        let write_idx = st.write_idx;
        st.frames[write_idx] = frames;
        st.write_idx = (write_idx + 1) % self.max_chunks;
        st.count += 1;
        true
    }

    /// Pop the oldest chunk into `out`, returning its frame count.
    ///
    /// `out` must hold at least `chunk_size * channels` samples. Returns
    /// `None` iff the ring is empty. Never allocates.
    pub fn pop_into(&self, out: &mut [f32]) -> Option<usize> {
        let mut st = self.inner.lock();
        if st.count == 0 {
            return None;
        }
        let frames = st.frames[st.read_idx];
        let base = st.read_idx * self.slot_len();
        let n = frames * self.channels;
        out[..n].copy_from_slice(&st.samples[base..base + n]);
        st.read_idx = (st.read_idx + 1) % self.max_chunks;
        st.count -= 1;
        Some(frames)
    }

    /// Drop all buffered chunks.
    pub fn clear(&self) {
        let mut st = self.inner.lock();
        st.write_idx = 0;
        st.read_idx = 0;
        st.count = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_chunks
    }

    /// Occupancy in `[0, 1]`, used by the reader to pace decoding.
    pub fn fill_ratio(&self) -> f32 {
        self.len() as f32 / self.max_chunks as f32
    }

    pub fn capacity(&self) -> usize {
        self.max_chunks
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(frames: usize, channels: usize, value: f32) -> Vec<f32> {
        vec![value; frames * channels]
    }

    #[test]
    fn append_rejects_when_full() {
        let ring = ChunkRing::new(2, 4, 2);
        assert!(ring.append(&chunk(4, 2, 0.1)));
        assert!(ring.append(&chunk(4, 2, 0.2)));
        assert!(!ring.append(&chunk(4, 2, 0.3)));
        assert!(ring.is_full());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn pop_is_fifo() {
        let ring = ChunkRing::new(3, 4, 1);
        ring.append(&chunk(4, 1, 1.0));
        ring.append(&chunk(4, 1, 2.0));

        let mut out = vec![0.0; 4];
        assert_eq!(ring.pop_into(&mut out), Some(4));
        assert_eq!(out[0], 1.0);
        assert_eq!(ring.pop_into(&mut out), Some(4));
        assert_eq!(out[0], 2.0);
        assert_eq!(ring.pop_into(&mut out), None);
    }

    #[test]
    fn short_chunk_preserves_frame_count() {
        let ring = ChunkRing::new(2, 8, 2);
        ring.append(&chunk(3, 2, 0.5));

        let mut out = vec![0.0; 16];
        assert_eq!(ring.pop_into(&mut out), Some(3));
    }

    #[test]
    fn oversized_chunk_is_truncated() {
        let ring = ChunkRing::new(2, 4, 1);
        ring.append(&chunk(9, 1, 0.5));

        let mut out = vec![0.0; 4];
        assert_eq!(ring.pop_into(&mut out), Some(4));
    }

    #[test]
    fn clear_resets_occupancy() {
        let ring = ChunkRing::new(4, 4, 2);
        ring.append(&chunk(4, 2, 0.1));
        ring.append(&chunk(4, 2, 0.2));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.fill_ratio(), 0.0);

        let mut out = vec![0.0; 8];
        assert_eq!(ring.pop_into(&mut out), None);
    }

    #[test]
    fn fill_ratio_tracks_count() {
        let ring = ChunkRing::new(4, 4, 1);
        ring.append(&chunk(4, 1, 0.0));
        assert!((ring.fill_ratio() - 0.25).abs() < f32::EPSILON);
        ring.append(&chunk(4, 1, 0.0));
        assert!((ring.fill_ratio() - 0.5).abs() < f32::EPSILON);
    }

    proptest! {
        /// Count stays within [0, capacity] under any op interleaving, and
        /// every successful append is matched by exactly one pop.
        #[test]
        fn occupancy_stays_bounded(ops in proptest::collection::vec(0u8..3, 1..200)) {
            let ring = ChunkRing::new(8, 4, 2);
            let mut out = vec![0.0; 8];
            let mut appended = 0usize;
            let mut popped = 0usize;

            for op in ops {
                match op {
                    0 => {
                        if ring.append(&chunk(4, 2, 0.0)) {
                            appended += 1;
                        }
                    }
                    1 => {
                        if ring.pop_into(&mut out).is_some() {
                            popped += 1;
                        }
                    }
                    _ => {
                        ring.clear();
                        popped = appended;
                    }
                }
                prop_assert!(ring.len() <= ring.capacity());
                prop_assert_eq!(ring.len(), appended - popped);
            }
        }
    }
}
