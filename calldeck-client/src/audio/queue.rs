//! Playback buffer queue crossing the real-time boundary
//!
//! The control context and the render context never share mutable memory.
//! All interaction goes through a lock-free single-producer/single-consumer
//! FIFO of [`RenderCommand`] messages: the engine pushes already-constructed
//! chunks (or a clear instruction), the render callback drains them with a
//! non-blocking try-pop at the start of each output quantum.
//!
//! FIFO delivery gives the ordering guarantee the engine relies on: a
//! `Clear` sent after an `Enqueue` is always processed after it, so "push
//! then immediately reset" reliably clears everything just enqueued.
//!
//! ## Render-side state machine (per output sample slot)
//!
//! ```text
//! current chunk?  ──no──▶ pop next from queue ──empty──▶ emit 0.0 (underrun)
//!       │yes                     │
//!       ▼                        ▼
//! emit chunk[read_index++]; at chunk end drop chunk, clear cursor
//! ```

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default command channel capacity.
///
/// The render callback drains the channel every quantum (a few ms), so this
/// only needs to absorb the control side's burstiness between quanta.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Fixed-length sequence of normalized samples, immutable once enqueued.
///
/// Produced by the sample converter, consumed exactly once by the render
/// callback, then discarded.
pub type SampleChunk = Box<[f32]>;

/// Message delivered one-way from the control context to the render context
#[derive(Debug)]
pub enum RenderCommand {
    /// Append a chunk to the tail of the playback queue
    Enqueue(SampleChunk),

    /// Drop the queue and cursor unconditionally, even mid-chunk
    Clear,
}

/// Create the one-way command channel and its render-side state.
///
/// The producer half belongs to the control context (the engine); the
/// returned [`RenderState`] owns the consumer half and moves into the
/// real-time callback.
pub fn command_channel(capacity: usize) -> (HeapProd<RenderCommand>, RenderState) {
    let rb = HeapRb::<RenderCommand>::new(capacity);
    let (prod, cons) = rb.split();
    (prod, RenderState::new(cons))
}

/// Render-context half of the playback queue.
///
/// Runs on the real-time audio thread: no blocking waits, no locks, no
/// allocation in steady state. Starvation degrades to silence rather than
/// glitching or halting.
pub struct RenderState {
    /// Consumer half of the one-way command channel
    commands: HeapCons<RenderCommand>,

    /// Chunks accepted but not yet started
    queue: VecDeque<SampleChunk>,

    /// Chunk currently being read, if any
    current: Option<SampleChunk>,

    /// Next sample index within `current`
    read_index: usize,

    /// Count of output quanta that hit an underrun (shared with the engine)
    underruns: Arc<AtomicU64>,
}

impl RenderState {
    fn new(commands: HeapCons<RenderCommand>) -> Self {
        Self {
            commands,
            queue: VecDeque::new(),
            current: None,
            read_index: 0,
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the shared underrun counter, for the control side.
    pub fn underruns_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.underruns)
    }

    /// Drain all pending commands, in send order.
    fn drain_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                RenderCommand::Enqueue(chunk) => self.queue.push_back(chunk),
                RenderCommand::Clear => {
                    self.queue.clear();
                    self.current = None;
                    self.read_index = 0;
                }
            }
        }
    }

    /// Emit the next sample, or None on underrun.
    fn try_next_sample(&mut self) -> Option<f32> {
        loop {
            if let Some(chunk) = self.current.as_ref() {
                if self.read_index < chunk.len() {
                    let sample = chunk[self.read_index];
                    self.read_index += 1;
                    if self.read_index == chunk.len() {
                        // Chunk exhausted: drop it and clear the cursor
                        self.current = None;
                        self.read_index = 0;
                    }
                    return Some(sample);
                }
                // Zero-length chunk: discard and keep going
                self.current = None;
                self.read_index = 0;
            }

            match self.queue.pop_front() {
                Some(chunk) => {
                    self.current = Some(chunk);
                    self.read_index = 0;
                }
                None => return None,
            }
        }
    }

    /// Emit the next sample, falling back to silence on underrun.
    pub fn next_sample(&mut self) -> f32 {
        self.try_next_sample().unwrap_or(0.0)
    }

    /// Fill one output quantum.
    ///
    /// Drains pending commands once, then writes one mono sample per frame,
    /// duplicated across all `channels` slots of the interleaved buffer.
    /// Called from the real-time audio callback.
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();

        let mut starved = false;
        for frame in out.chunks_mut(channels.max(1)) {
            let sample = match self.try_next_sample() {
                Some(s) => s,
                None => {
                    starved = true;
                    0.0
                }
            };
            for slot in frame {
                *slot = sample;
            }
        }

        if starved {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total samples currently buffered (queued chunks plus the remainder of
    /// the current chunk). Does not count commands still in the channel.
    pub fn buffered_samples(&self) -> usize {
        let current = self
            .current
            .as_ref()
            .map(|c| c.len() - self.read_index)
            .unwrap_or(0);
        current + self.queue.iter().map(|c| c.len()).sum::<usize>()
    }
}
