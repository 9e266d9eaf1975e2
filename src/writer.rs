//! Deferred writer - background write-back of mutated objects
//!
//! One worker thread receives objects over a crossbeam channel. The first
//! object queued opens a debounce window; every further request for a
//! handle already waiting is coalesced, since the write snapshots whatever
//! state the handle holds at write time. Distinct handles are never folded
//! together, even when they carry the same UUID. When the window closes the
//! pending objects are written in the order they were first queued; an
//! object whose placement target was only written later in the same batch
//! gets one more write at the end.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::object::{DefaultObject, SyncState};
use crate::sync::GraphSynchronizer;
use crate::{Error, Result};

/// Timing and retry settings of the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// How long to wait after the first queued object before writing
    pub debounce: Duration,
    /// Retries for a transient storage failure
    pub max_retries: u32,
    /// First retry delay; doubles on each retry
    pub retry_backoff: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// An object whose write-back was given up on
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub uuid: Uuid,
    pub type_code: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Write requests received
    pub scheduled: u64,
    /// Rows written
    pub written: u64,
    /// Requests folded into an already pending write
    pub coalesced: u64,
    /// Objects dead-lettered
    pub failed: u64,
}

enum WriteCommand {
    Sync(DefaultObject),
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    written: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the writer thread; clones share the same thread
#[derive(Clone)]
pub struct SyncWriter {
    tx: Sender<WriteCommand>,
    counters: Arc<Counters>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncWriter {
    /// Start the writer thread and attach it to `sync`, so that objects the
    /// synchronizer rehydrates write back through it.
    pub fn spawn(sync: Arc<GraphSynchronizer>, config: WriterConfig) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let counters = Arc::new(Counters::default());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let worker = Worker {
            sync: Arc::clone(&sync),
            rx,
            config,
            counters: Arc::clone(&counters),
            dead_letters: Arc::clone(&dead_letters),
        };
        let handle = thread::Builder::new()
            .name("campusgraph-writer".to_string())
            .spawn(move || worker.run())?;

        let writer = Self {
            tx,
            counters,
            dead_letters,
            handle: Arc::new(Mutex::new(Some(handle))),
        };
        sync.attach_writer(writer.clone());
        Ok(writer)
    }

    /// Queue `object` for write-back
    pub fn schedule(&self, object: DefaultObject) {
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        let uuid = object.uuid();
        if self.tx.send(WriteCommand::Sync(object)).is_err() {
            warn!(%uuid, "writer is stopped; change will not be persisted");
        }
    }

    /// Block until everything queued so far is written or dead-lettered
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.tx
            .send(WriteCommand::Flush(ack_tx))
            .map_err(|_| Error::WriterClosed)?;
        ack_rx.recv().map_err(|_| Error::WriterClosed)
    }

    /// Write out pending objects and stop the thread. Later calls are no-ops.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.tx.send(WriteCommand::Shutdown).is_err() {
            debug!("writer already stopped");
        }
        if handle.join().is_err() {
            error!("writer thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Objects whose write-back failed for good
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }
}

impl std::fmt::Debug for SyncWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWriter")
            .field("stats", &self.stats())
            .finish()
    }
}

struct Worker {
    sync: Arc<GraphSynchronizer>,
    rx: Receiver<WriteCommand>,
    config: WriterConfig,
    counters: Arc<Counters>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

#[derive(Default)]
struct Pending {
    order: Vec<DefaultObject>,
    queued: HashSet<usize>,
}

impl Pending {
    /// Returns `false` when the handle was already waiting
    fn push(&mut self, object: DefaultObject) -> bool {
        if self.queued.insert(object.handle_key()) {
            self.order.push(object);
            true
        } else {
            false
        }
    }

    fn take(&mut self) -> Vec<DefaultObject> {
        self.queued.clear();
        std::mem::take(&mut self.order)
    }
}

impl Worker {
    fn run(self) {
        let mut pending = Pending::default();
        let mut deadline: Option<Instant> = None;

        loop {
            let received = match deadline {
                Some(at) => self.rx.recv_deadline(at),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(WriteCommand::Sync(object)) => {
                    self.enqueue(&mut pending, object);
                    deadline.get_or_insert_with(|| Instant::now() + self.config.debounce);
                }
                Ok(WriteCommand::Flush(ack)) => {
                    self.write_all(pending.take());
                    deadline = None;
                    let _ = ack.send(());
                }
                Ok(WriteCommand::Shutdown) => {
                    let mut acks = Vec::new();
                    while let Ok(command) = self.rx.try_recv() {
                        match command {
                            WriteCommand::Sync(object) => self.enqueue(&mut pending, object),
                            WriteCommand::Flush(ack) => acks.push(ack),
                            WriteCommand::Shutdown => {}
                        }
                    }
                    self.write_all(pending.take());
                    for ack in acks {
                        let _ = ack.send(());
                    }
                    debug!("writer stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.write_all(pending.take());
                    deadline = None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.write_all(pending.take());
                    return;
                }
            }
        }
    }

    fn enqueue(&self, pending: &mut Pending, object: DefaultObject) {
        if !pending.push(object) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write_all(&self, objects: Vec<DefaultObject>) {
        if objects.is_empty() {
            return;
        }
        debug!(count = objects.len(), "writing pending objects");
        let mut unplaced = Vec::new();
        for object in objects {
            if self.write_with_retry(&object) && object.sync_state() == SyncState::Stale {
                unplaced.push(object);
            }
        }
        for object in &unplaced {
            self.write_with_retry(object);
        }
    }

    /// Returns `true` once a row was written
    fn write_with_retry(&self, object: &DefaultObject) -> bool {
        let mut attempt = 0u32;
        loop {
            match self.sync.write_object(object) {
                Ok(_) => {
                    self.counters.written.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(uuid = %object.uuid(), error = %e, attempt, "write failed, retrying in {:?}", delay);
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(uuid = %object.uuid(), type_code = object.type_code(), error = %e, "giving up on write-back");
                    self.dead_letters.lock().push(DeadLetter {
                        uuid: object.uuid(),
                        type_code: object.type_code().to_string(),
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeClass, default_registry};
    use crate::storage::SqliteStore;
    use crate::{Attributes, DefaultObject};

    fn setup(debounce: Duration) -> (Arc<GraphSynchronizer>, SyncWriter) {
        let store = SqliteStore::open_in_memory().unwrap();
        let sync = Arc::new(GraphSynchronizer::new(store, default_registry()));
        sync.register_class_type::<DefaultObject>().unwrap();
        let config = WriterConfig {
            debounce,
            ..Default::default()
        };
        let writer = SyncWriter::spawn(Arc::clone(&sync), config).unwrap();
        (sync, writer)
    }

    #[test]
    fn test_flush_coalesces_rapid_sets() {
        let (sync, writer) = setup(Duration::from_secs(5));

        let obj = DefaultObject::create("counter", Attributes::new(), &writer).unwrap();
        for i in 0..5 {
            obj.set_attribute("count", i).unwrap();
        }
        writer.flush().unwrap();

        let stats = writer.stats();
        assert_eq!(stats.scheduled, 6);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.coalesced, 5);

        let node = sync.get_node_by_uuid(&obj.uuid()).unwrap().unwrap();
        assert_eq!(node.get_attribute("count"), Some(&serde_json::json!(4)));
        writer.shutdown();
    }

    #[test]
    fn test_debounce_writes_without_flush() {
        let (sync, writer) = setup(Duration::from_millis(20));

        let obj = DefaultObject::create("lamp", Attributes::new(), &writer).unwrap();
        let mut found = false;
        for _ in 0..100 {
            if sync.get_node_by_uuid(&obj.uuid()).unwrap().is_some() {
                found = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(found);
        writer.shutdown();
    }

    #[test]
    fn test_unresolvable_type_is_dead_lettered() {
        let (_sync, writer) = setup(Duration::from_millis(10));

        let obj = DefaultObject::construct_as(
            "ghost",
            "campusgraph::object::DefaultObject",
            Attributes::new(),
            "boo",
            Attributes::new(),
            Some(writer.clone()),
        )
        .unwrap();
        writer.flush().unwrap();

        let letters = writer.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].uuid, obj.uuid());
        assert_eq!(writer.stats().failed, 1);
        writer.shutdown();
    }

    #[test]
    fn test_distinct_handles_are_not_coalesced() {
        let (sync, writer) = setup(Duration::from_secs(5));

        let obj = DefaultObject::create("desk", Attributes::new(), &writer).unwrap();
        writer.flush().unwrap();
        let node = sync.get_node_by_uuid(&obj.uuid()).unwrap().unwrap();
        let before = writer.stats();

        let typeclass = DefaultObject::CLASS.typeclass();
        let a = DefaultObject::from_node(&node, &typeclass, Some(writer.clone()));
        let b = DefaultObject::from_node(&node, &typeclass, Some(writer.clone()));
        a.set_attribute("x", 1).unwrap();
        b.set_attribute("y", 2).unwrap();
        writer.flush().unwrap();

        let after = writer.stats();
        assert_eq!(after.coalesced, before.coalesced);
        assert_eq!(after.written, before.written + 2);
        assert_eq!(a.sync_state(), SyncState::Synced);
        assert_eq!(b.sync_state(), SyncState::Synced);

        let row = sync.get_node_by_uuid(&obj.uuid()).unwrap().unwrap();
        assert_eq!(row.get_attribute("y"), Some(&serde_json::json!(2)));
        writer.shutdown();
    }

    #[test]
    fn test_placement_target_later_in_batch() {
        let (sync, writer) = setup(Duration::from_secs(5));

        let key = DefaultObject::create("key", Attributes::new(), &writer).unwrap();
        let hall = DefaultObject::create("hall", Attributes::new(), &writer).unwrap();
        assert!(key.move_to(&hall));
        writer.flush().unwrap();

        let hall_row = sync.get_node_by_uuid(&hall.uuid()).unwrap().unwrap();
        let key_row = sync.get_node_by_uuid(&key.uuid()).unwrap().unwrap();
        assert_eq!(key_row.location_id, Some(hall_row.id));
        assert_eq!(key.sync_state(), SyncState::Synced);
        writer.shutdown();
    }

    #[test]
    fn test_shutdown_drains_and_closes() {
        let (sync, writer) = setup(Duration::from_secs(5));

        let obj = DefaultObject::create("chair", Attributes::new(), &writer).unwrap();
        writer.shutdown();

        assert!(sync.get_node_by_uuid(&obj.uuid()).unwrap().is_some());
        assert!(!writer.is_running());
        assert!(matches!(writer.flush(), Err(Error::WriterClosed)));
        writer.shutdown();
    }
}
