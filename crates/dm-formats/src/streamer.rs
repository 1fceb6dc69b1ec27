//! Background thread filling a [`SampleBuffer`] with the window the viewer
//! is looking at.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use dm_core::buffer::SampleBuffer;
use dm_core::traits::SampleSource;
use flume::{Receiver, Sender};

use crate::error::FormatError;

/// Window requested by the viewer: first sample and first displayed channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    /// First sample of the window.
    pub sample: u64,
    /// Source channel shown in the first buffer row.
    pub first_channel: usize,
}

/// Commands accepted by the streamer thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCommand {
    /// Load the window at this cursor.
    Position(Cursor),
    /// Exit the thread.
    Stop,
}

#[derive(Default)]
struct Loaded {
    sample: AtomicU64,
    first_channel: AtomicUsize,
    generation: AtomicU64,
}

/// Owner side of a running streamer.
pub struct StreamerHandle {
    tx: Sender<StreamCommand>,
    loaded: Arc<Loaded>,
    thread: Option<JoinHandle<()>>,
}

impl StreamerHandle {
    /// Ask for the window at `cursor`. Requests are coalesced by the thread.
    pub fn request(&self, cursor: Cursor) {
        if self.tx.send(StreamCommand::Position(cursor)).is_err() {
            log::warn!("streamer is gone, dropping request for sample {}", cursor.sample);
        }
    }

    /// Cursor of the window currently in the buffer.
    #[must_use]
    pub fn loaded(&self) -> Cursor {
        Cursor {
            sample: self.loaded.sample.load(Ordering::Acquire),
            first_channel: self.loaded.first_channel.load(Ordering::Acquire),
        }
    }

    /// Number of windows written so far. Changes whenever the buffer does.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.loaded.generation.load(Ordering::Acquire)
    }

    /// Whether the thread is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and wait for it.
    ///
    /// # Errors
    /// `StreamerStopped` if the thread had already exited.
    pub fn stop(&mut self) -> Result<(), FormatError> {
        let Some(thread) = self.thread.take() else {
            return Err(FormatError::StreamerStopped);
        };
        if thread.is_finished() {
            let _ = thread.join();
            return Err(FormatError::StreamerStopped);
        }
        let _ = self.tx.send(StreamCommand::Stop);
        if thread.join().is_err() {
            log::error!("streamer thread panicked");
        }
        Ok(())
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(StreamCommand::Stop);
            let _ = thread.join();
        }
    }
}

/// Start a thread that loads windows of `source` into `buffer` on request.
///
/// The window length is `buffer.n_samples()`; buffer row `i` receives source
/// channel `first_channel + i`, or zeros past the last channel.
///
/// # Errors
/// Returns an error if the thread cannot be spawned.
pub fn spawn_streamer(
    source: Box<dyn SampleSource>,
    buffer: SampleBuffer<f32>,
) -> Result<StreamerHandle, FormatError> {
    let (tx, rx) = flume::unbounded();
    let loaded = Arc::new(Loaded::default());
    let shared = Arc::clone(&loaded);
    let thread = std::thread::Builder::new()
        .name("dm_streamer".into())
        .spawn(move || streamer_loop(source, &buffer, &rx, &shared))?;
    Ok(StreamerHandle {
        tx,
        loaded,
        thread: Some(thread),
    })
}

/// Latest queued cursor after `first`, or `None` if a stop was queued.
fn coalesce(first: Cursor, rx: &Receiver<StreamCommand>) -> Option<Cursor> {
    let mut latest = first;
    for cmd in rx.try_iter() {
        match cmd {
            StreamCommand::Position(c) => latest = c,
            StreamCommand::Stop => return None,
        }
    }
    Some(latest)
}

fn streamer_loop(
    mut source: Box<dyn SampleSource>,
    buffer: &SampleBuffer<f32>,
    rx: &Receiver<StreamCommand>,
    loaded: &Loaded,
) {
    let window = buffer.n_samples();
    let rows = buffer.n_channels();
    let n_src = source.meta().n_channels;
    let mut scratch = vec![0.0f32; n_src * window];
    let mut block = vec![0.0f32; rows * window];
    let mut last: Option<Cursor> = None;

    log::debug!("streamer started: {rows} rows of {window} samples, {n_src} source channels");
    while let Ok(cmd) = rx.recv() {
        let cursor = match cmd {
            StreamCommand::Stop => break,
            StreamCommand::Position(c) => match coalesce(c, rx) {
                Some(c) => c,
                None => break,
            },
        };
        if last == Some(cursor) {
            continue;
        }

        if let Err(e) = source.read_window(cursor.sample, window, &mut scratch) {
            log::warn!("streamer: reading sample {}: {e:#}", cursor.sample);
            continue;
        }
        block.fill(0.0);
        for (row, dst) in block.chunks_exact_mut(window).enumerate() {
            let ch = cursor.first_channel + row;
            if ch < n_src {
                dst.copy_from_slice(&scratch[ch * window..(ch + 1) * window]);
            }
        }
        if let Err(e) = buffer.put_channels(&block, 0, window) {
            log::error!("streamer: {e}");
            continue;
        }

        loaded.sample.store(cursor.sample, Ordering::Release);
        loaded
            .first_channel
            .store(cursor.first_channel, Ordering::Release);
        loaded.generation.fetch_add(1, Ordering::AcqRel);
        last = Some(cursor);
        log::trace!("streamer: loaded {cursor:?}");
    }
    log::debug!("streamer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::dat::DatSource;
    use crate::dat::tests::write_dat;

    fn wait_for(handle: &StreamerHandle, generation: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.generation() < generation {
            assert!(Instant::now() < deadline, "streamer did not load");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn start(dir: &std::path::Path) -> (StreamerHandle, SampleBuffer<f32>) {
        let path = dir.join("x.dat");
        write_dat(&path, 3, 20);
        let source = DatSource::open(&path, 3, 30_000.0, 1.0).unwrap();
        let buffer = SampleBuffer::<f32>::new(2, 4).unwrap();
        let handle = spawn_streamer(Box::new(source), buffer.share()).unwrap();
        (handle, buffer)
    }

    #[test]
    fn loads_requested_window_and_channels() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, buffer) = start(dir.path());
        let cursor = Cursor {
            sample: 5,
            first_channel: 2,
        };
        handle.request(cursor);
        wait_for(&handle, 1);
        assert_eq!(handle.loaded(), cursor);

        let mut out = Vec::new();
        buffer.get_data(0, 4, &mut out).unwrap();
        assert_eq!(&out[0..4], &[52.0, 62.0, 72.0, 82.0]);
        assert_eq!(&out[4..8], &[0.0; 4]);
        handle.stop().unwrap();
    }

    #[test]
    fn unchanged_cursor_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, _buffer) = start(dir.path());
        let a = Cursor::default();
        let b = Cursor {
            sample: 4,
            first_channel: 0,
        };
        handle.request(a);
        wait_for(&handle, 1);
        handle.request(a);
        handle.request(b);
        wait_for(&handle, 2);
        assert_eq!(handle.loaded(), b);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.generation(), 2);
        handle.stop().unwrap();
    }

    #[test]
    fn second_stop_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, _buffer) = start(dir.path());
        assert!(handle.is_alive());
        handle.stop().unwrap();
        assert!(!handle.is_alive());
        assert!(matches!(handle.stop(), Err(FormatError::StreamerStopped)));
    }
}
