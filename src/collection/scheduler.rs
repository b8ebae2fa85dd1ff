//! Background compaction scheduling: a dedicated thread that drains a
//! request channel and runs [`Collection::compact`] whenever asked to, so a
//! caller on the write path never blocks on compaction itself.
//!
//! The collection and its compactor thread share an `Arc<Mutex<Collection>>`
//! -- compaction takes the same lock a writer would, so it composes with the
//! collection's existing read-write lock ordering rather than sidestepping
//! it.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::collection::collection::Collection;
use crate::collection::compactor::CompactionConfig;
use crate::error::Result;

/// A request to compact, with the config to use.
struct CompactionRequest(CompactionConfig);

/// Owns the background compaction thread for one collection. Dropping the
/// scheduler signals the thread to exit after it finishes any in-flight
/// pass.
pub struct CompactionScheduler {
    sender: Sender<CompactionRequest>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionScheduler {
    /// Spawn the background thread. The channel is bounded to 1: a
    /// compaction request already queued makes a second one redundant, so
    /// `request()` drops the new one rather than piling up work.
    pub fn spawn(collection: Arc<Mutex<Collection>>) -> Self {
        let (sender, receiver) = bounded::<CompactionRequest>(1);
        let handle = std::thread::Builder::new()
            .name("compactor".into())
            .spawn(move || {
                while let Ok(CompactionRequest(config)) = receiver.recv() {
                    let mut guard = match collection.lock() {
                        Ok(g) => g,
                        Err(_) => break, // the collection mutex was poisoned; stop compacting.
                    };
                    if guard.is_stopping() {
                        break;
                    }
                    if let Err(e) = guard.compact(&config) {
                        tracing::warn!(error = %e, "compactor: pass failed");
                    }
                }
            })
            .expect("failed to spawn compactor thread");

        Self { sender, handle: Some(handle) }
    }

    /// Ask the background thread to run a compaction pass with `config`.
    /// Non-blocking: if a request is already queued, this one is dropped
    /// silently (the queued pass will pick up the same dead bytes).
    pub fn request(&self, config: CompactionConfig) {
        let _ = self.sender.try_send(CompactionRequest(config));
    }

    /// Stop accepting new requests and wait for the thread to exit.
    pub fn shutdown(mut self) -> Result<()> {
        drop(self.sender.clone());
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| {
                crate::error::StorageError::IllegalState("compactor thread panicked".into())
            })?;
        }
        Ok(())
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        let _ = self.join();
    }
}
