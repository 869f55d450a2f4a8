//! Overlapping-window audio chunk extraction.
//!
//! A live recording arrives as an append-only sequence of one-second media
//! fragments. This module carves that sequence into overlapping,
//! independently decodable chunks for incremental diarization: 60 second
//! windows with a 15 second overlap, so the consuming service can match
//! speaker labels across chunk boundaries by comparing the shared region.
//!
//! The very first fragment of a recording carries the container's
//! initialization segment (codec parameters). No later fragment set can be
//! decoded without it, so every chunk past the first is built by
//! prepending that cached fragment to the selected slice.

use serde::{Deserialize, Serialize};

/// Duration of each full chunk, in seconds.
pub const CHUNK_DURATION_SECS: f64 = 60.0;

/// Shared region between consecutive chunks, in seconds.
pub const OVERLAP_DURATION_SECS: f64 = 15.0;

/// Final chunks shorter than this are suppressed; sub-5s audio is not
/// meaningful for diarization.
pub const MIN_FINAL_CHUNK_SECS: f64 = 5.0;

/// Duration of each recorded media fragment, in seconds.
pub const FRAGMENT_DURATION_SECS: f64 = 1.0;

/// One extracted, self-decodable chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub index: usize,
    /// Window start within the recording, in seconds
    pub start_time: f64,
    /// Window end within the recording, in seconds
    pub end_time: f64,
    /// Start of the region shared with the previous chunk; equals
    /// `start_time` when there is no overlap (chunk 0)
    pub overlap_start_time: f64,
    pub overlap_end_time: f64,
    /// Concatenated fragment bytes, header-prepended for `index > 0`
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn duration_secs(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Append-only buffer of recorded media fragments, polled by the recording
/// scheduler for extractable chunks.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    fragments: Vec<Vec<u8>>,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one recorded fragment. The first fragment appended is cached
    /// as the container initialization segment for all later chunks.
    pub fn append_fragment(&mut self, data: Vec<u8>) {
        self.fragments.push(data);
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Recording time covered by the buffered fragments.
    pub fn buffered_secs(&self) -> f64 {
        self.fragments.len() as f64 * FRAGMENT_DURATION_SECS
    }

    /// Discard all fragments (recording finished and saved).
    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    /// Try to extract chunk `index` given `elapsed_secs` of recording.
    ///
    /// Returns `None` until a full window of audio exists beyond the
    /// overlap, or while the buffer lags behind the reported elapsed time;
    /// the caller retries on the next tick.
    pub fn try_extract_chunk(&self, index: usize, elapsed_secs: f64) -> Option<AudioChunk> {
        let (start, end) = chunk_window(index, elapsed_secs);
        if end <= start || elapsed_secs < (index as f64 + 1.0) * CHUNK_DURATION_SECS {
            return None;
        }
        self.assemble(index, start, end)
    }

    /// Extract the trailing partial chunk once recording stops.
    ///
    /// Emitted even when shorter than a full window, but suppressed below
    /// the 5 second minimum.
    pub fn extract_final_chunk(&self, index: usize, elapsed_secs: f64) -> Option<AudioChunk> {
        let (start, end) = chunk_window(index, elapsed_secs);
        if end - start < MIN_FINAL_CHUNK_SECS {
            return None;
        }
        self.assemble(index, start, end)
    }

    fn assemble(&self, index: usize, start: f64, end: f64) -> Option<AudioChunk> {
        let start_fragment = start.floor() as usize;
        let end_fragment = (end.ceil() as usize).min(self.fragments.len());
        if start_fragment >= self.fragments.len() || start_fragment >= end_fragment {
            // Buffer has not caught up with the reported elapsed time.
            return None;
        }

        let slice = &self.fragments[start_fragment..end_fragment];
        let needs_header = index > 0;
        let header_len = if needs_header { self.fragments[0].len() } else { 0 };
        let mut data =
            Vec::with_capacity(header_len + slice.iter().map(Vec::len).sum::<usize>());
        if needs_header {
            data.extend_from_slice(&self.fragments[0]);
        }
        for fragment in slice {
            data.extend_from_slice(fragment);
        }

        let (overlap_start, overlap_end) = if index > 0 {
            (start, start + OVERLAP_DURATION_SECS)
        } else {
            (start, start)
        };

        Some(AudioChunk {
            index,
            start_time: start,
            end_time: end,
            overlap_start_time: overlap_start,
            overlap_end_time: overlap_end,
            data,
        })
    }
}

/// Window bounds for chunk `index` after `elapsed_secs` of recording.
fn chunk_window(index: usize, elapsed_secs: f64) -> (f64, f64) {
    let n = index as f64;
    let start = (n * CHUNK_DURATION_SECS - OVERLAP_DURATION_SECS).max(0.0);
    let end = ((n + 1.0) * CHUNK_DURATION_SECS).min(elapsed_secs);
    (start, end)
}
