//! services/dispatch.rs
//! Partitioned consumer loop.
//!
//! One worker thread per partition; an event is pinned to a partition by
//! the hash of its partition key (district id when present). Handlers run
//! to completion before the next message on the same partition, so
//! surge-window updates and routing decisions stay in arrival order per
//! district, while distinct districts proceed in parallel.

use crossbeam_channel::{Sender, unbounded};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::events::InboundEvent;
use crate::services::pipeline::EventPipeline;

pub struct Dispatcher {
    senders: Vec<Sender<InboundEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` partition loops over the shared pipeline.
    pub fn spawn(pipeline: Arc<EventPipeline>, workers: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for partition in 0..workers {
            let (tx, rx) = unbounded::<InboundEvent>();
            let pipeline = Arc::clone(&pipeline);
            let handle = std::thread::spawn(move || {
                for event in rx.iter() {
                    pipeline.handle(event);
                }
                tracing::debug!(partition, "partition worker drained");
            });
            senders.push(tx);
            handles.push(handle);
        }
        Self {
            senders,
            workers: handles,
        }
    }

    /// Route a raw broker envelope to its partition. Malformed payloads are
    /// logged and dropped; the consumer advances either way.
    pub fn dispatch_raw(&self, raw: serde_json::Value) {
        match InboundEvent::from_json(raw) {
            Ok(event) => self.dispatch(event),
            Err(err) => tracing::warn!(%err, "dropping malformed event"),
        }
    }

    pub fn dispatch(&self, event: InboundEvent) {
        let partition = partition_for(event.partition_key(), self.senders.len());
        if self.senders[partition].send(event).is_err() {
            tracing::error!(partition, "partition worker gone; event dropped");
        }
    }

    /// Close all partitions and wait for in-flight handlers to finish.
    pub fn shutdown(mut self) {
        self.senders.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}
