//! Playback engine facade
//!
//! Owns the lifecycle of the conversion, queue, and output pieces and
//! exposes the three operations the rest of the application uses:
//! `init()`, `push(raw_bytes)`, `reset()`.
//!
//! The cpal `Stream` is not Send, so `init()` creates the device on a
//! dedicated audio thread that just keeps it alive; the stream's real-time
//! callback runs independently once started. The engine talks to the render
//! context exclusively through the one-way command channel.

use crate::audio::convert::pcm16_to_f32;
use crate::audio::output::AudioOutput;
use crate::audio::queue::{command_channel, RenderCommand, SampleChunk, DEFAULT_COMMAND_CAPACITY};
use crate::error::{Error, Result};
use ringbuf::{traits::*, HeapProd};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Playback engine for streamed speech-synthesis audio.
///
/// All operations run in the control context. `push` and `reset` never
/// return errors; a device failure is surfaced once through `init()`'s
/// result, after which pushes are no-ops until a later `init()` succeeds.
pub struct PlaybackEngine {
    /// Producer half of the command channel (Some once init succeeded)
    commands: Option<HeapProd<RenderCommand>>,

    /// Chunks converted but not yet transferred to the render queue
    pending: VecDeque<SampleChunk>,

    /// Clear instruction not yet delivered (channel was full during reset);
    /// must go down the channel before any pending chunk
    clear_pending: bool,

    /// Requested output buffer size in frames (None = device default)
    buffer_size: Option<u32>,

    /// Underrun counter shared with the render state
    underruns: Option<Arc<AtomicU64>>,

    /// Device stream error flag, set by the audio thread's error callback
    stream_error: Option<Arc<AtomicBool>>,

    /// Dropping this tells the audio thread to release the stream
    shutdown: Option<mpsc::Sender<()>>,

    /// Audio thread keeping the non-Send stream alive
    audio_thread: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create an uninitialized engine.
    ///
    /// No device is touched until [`init`](Self::init) is called.
    pub fn new(buffer_size: Option<u32>) -> Self {
        Self {
            commands: None,
            pending: VecDeque::new(),
            clear_pending: false,
            buffer_size,
            underruns: None,
            stream_error: None,
            shutdown: None,
            audio_thread: None,
        }
    }

    /// Acquire the output device and install the render callback.
    ///
    /// Idempotent: once setup has succeeded, further calls return Ok without
    /// re-initializing. After a failure the engine stays inert (pushes are
    /// no-ops) and `init()` may be called again to retry.
    ///
    /// Chunks left pending from an earlier session are flushed to the render
    /// queue as soon as setup completes; none are dropped.
    pub fn init(&mut self) -> Result<()> {
        if self.commands.is_some() {
            debug!("Playback engine already initialized");
            return Ok(());
        }

        // Clear out a previous (failed or shut down) audio thread
        self.teardown_audio_thread();

        let (prod, render) = command_channel(DEFAULT_COMMAND_CAPACITY);
        let underruns = render.underruns_handle();

        // The stream must be created and kept alive on its own thread; the
        // handshake channel reports the setup outcome back to this call.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<AtomicBool>>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let buffer_size = self.buffer_size;

        let handle = std::thread::spawn(move || {
            let mut output = match AudioOutput::new(buffer_size) {
                Ok(output) => output,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let error_flag = output.error_flag();
            if let Err(e) = output.start(render) {
                let _ = ready_tx.send(Err(e));
                return;
            }
            let _ = ready_tx.send(Ok(error_flag));

            // Park until the engine shuts down; the stream keeps rendering
            // on the device's schedule for as long as `output` lives.
            let _ = shutdown_rx.recv();
            info!("Audio output thread stopping");
        });

        match ready_rx.recv() {
            Ok(Ok(error_flag)) => {
                self.commands = Some(prod);
                self.underruns = Some(underruns);
                self.stream_error = Some(error_flag);
                self.shutdown = Some(shutdown_tx);
                self.audio_thread = Some(handle);
                self.flush_pending();
                info!("Playback engine initialized");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                warn!("Playback engine initialization failed: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Internal(
                    "audio thread exited without reporting setup outcome".to_string(),
                ))
            }
        }
    }

    /// Convert raw PCM16 bytes and queue them for rendering.
    ///
    /// No-op (with a debug log) until `init()` has completed. Converted
    /// chunks join the pending list and the whole list is transferred to
    /// the render queue in one batch, in arrival order; anything the
    /// channel cannot take right now stays pending for the next call.
    pub fn push(&mut self, raw_bytes: &[u8]) {
        if self.commands.is_none() {
            debug!("Playback engine not initialized; dropping {} bytes", raw_bytes.len());
            return;
        }

        let samples = pcm16_to_f32(raw_bytes);
        if samples.is_empty() {
            return;
        }

        self.pending.push_back(samples.into_boxed_slice());
        self.flush_pending();
    }

    /// Clear all buffered audio, local and render-side.
    ///
    /// Safe to call at any time, including before `init()`, and never
    /// blocks. The clear instruction travels down the same FIFO as the
    /// chunks, so it also wipes anything pushed immediately before it. If
    /// the channel is momentarily full the clear is held and delivered
    /// ahead of anything else on the next `push()` or [`flush`](Self::flush).
    pub fn reset(&mut self) {
        self.pending.clear();

        if self.commands.is_none() {
            return;
        }

        self.clear_pending = true;
        self.flush_pending();
    }

    /// Retry transferring anything held back by a full command channel.
    ///
    /// The render callback drains the channel every quantum, so a host that
    /// saw chunks stay pending (channel saturated) can call this once the
    /// next quantum has passed. `push()` does the same implicitly.
    pub fn flush(&mut self) {
        self.flush_pending();
    }

    /// Transfer a deferred clear and then pending chunks, in arrival order.
    fn flush_pending(&mut self) {
        let Some(prod) = self.commands.as_mut() else {
            return;
        };

        if self.clear_pending {
            match prod.try_push(RenderCommand::Clear) {
                Ok(()) => {
                    self.clear_pending = false;
                    debug!("Playback queue clear requested");
                }
                Err(_) => {
                    // Nothing may overtake the clear
                    warn!("Command channel full; clear instruction held");
                    return;
                }
            }
        }

        while let Some(chunk) = self.pending.pop_front() {
            match prod.try_push(RenderCommand::Enqueue(chunk)) {
                Ok(()) => {}
                Err(RenderCommand::Enqueue(chunk)) => {
                    // Channel full: keep the chunk (and everything after it)
                    // pending so nothing is dropped or reordered
                    self.pending.push_front(chunk);
                    warn!(
                        "Command channel full; {} chunks held pending",
                        self.pending.len()
                    );
                    break;
                }
                Err(RenderCommand::Clear) => unreachable!("pushed command returned unchanged"),
            }
        }
    }

    /// Whether `init()` has completed successfully.
    pub fn is_ready(&self) -> bool {
        self.commands.is_some()
    }

    /// Chunks held locally, not yet transferred to the render queue.
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    /// Output quanta that hit an underrun since init.
    pub fn underrun_count(&self) -> u64 {
        self.underruns
            .as_ref()
            .map(|u| u.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Whether the device stream has reported an error since init.
    ///
    /// A host observing this can call `init()` again after tearing the
    /// engine down; playback of future pushes is otherwise unaffected.
    pub fn has_stream_error(&self) -> bool {
        self.stream_error
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Release the device and stop the audio thread.
    fn teardown_audio_thread(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.commands.take();
        self.teardown_audio_thread();
    }
}
