//! In-process partitioned log with consumer-group offsets

use super::{BusError, BusMessage, Consumer, Offset, OutboundRecord, Producer};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct BusState {
    /// topic -> partitions -> records, offset = index
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> next offset to deliver after a restart
    committed: HashMap<(String, String, u32), u64>,
}

impl BusState {
    fn partitions_mut(&mut self, topic: &str, count: u32) -> &mut Vec<Vec<StoredRecord>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count as usize])
    }
}

/// Shared in-memory bus
///
/// Records with the same key always land in the same partition and are
/// delivered in append order. Uncommitted records are redelivered to the
/// next consumer created for the same group.
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    partitions: u32,
}

impl MemoryBus {
    /// Create a bus whose topics have `partitions` partitions each
    pub fn new(partitions: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            notify: Arc::new(Notify::new()),
            partitions: partitions.max(1),
        }
    }

    /// Partitions per topic
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Publishing handle
    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer { bus: self.clone() }
    }

    /// Subscribe `group` to `topic`, resuming from the group's committed offsets
    pub async fn consumer(&self, group: &str, topic: &str) -> MemoryConsumer {
        let mut state = self.state.lock().await;
        state.partitions_mut(topic, self.partitions);

        let positions = (0..self.partitions)
            .map(|p| {
                state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), p))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();

        tracing::debug!(group, topic, "Consumer subscribed");

        MemoryConsumer {
            bus: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            positions,
            next_partition: 0,
        }
    }

    fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }

    /// Committed offset of `group` on one partition
    pub async fn committed(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.state
            .lock()
            .await
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Total committed offsets of `group` across all partitions of `topic`
    pub async fn committed_total(&self, group: &str, topic: &str) -> u64 {
        let mut total = 0;
        for p in 0..self.partitions {
            total += self.committed(group, topic, p).await;
        }
        total
    }

    /// Records appended to `topic` so far
    pub async fn topic_len(&self, topic: &str) -> u64 {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|parts| parts.iter().map(|p| p.len() as u64).sum())
            .unwrap_or(0)
    }

    /// Records in `topic` not yet committed by `group`
    pub async fn lag(&self, group: &str, topic: &str) -> u64 {
        let len = self.topic_len(topic).await;
        len.saturating_sub(self.committed_total(group, topic).await)
    }
}

/// Producer handle for [`MemoryBus`]
#[derive(Clone)]
pub struct MemoryProducer {
    bus: MemoryBus,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn produce(&self, record: OutboundRecord) -> Result<(), BusError> {
        let partition = self.bus.partition_for(&record.key);
        {
            let mut state = self.bus.state.lock().await;
            let partitions = state.partitions_mut(&record.topic, self.bus.partitions);
            partitions[partition as usize].push(StoredRecord {
                key: record.key,
                payload: record.payload,
                timestamp_ms: record.timestamp_ms,
            });
        }
        self.bus.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer handle for [`MemoryBus`]
pub struct MemoryConsumer {
    bus: MemoryBus,
    group: String,
    topic: String,
    /// Next offset to read, per partition
    positions: Vec<u64>,
    next_partition: usize,
}

impl MemoryConsumer {
    /// Consumer group name
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Round-robin over partitions for the next unread record
    async fn try_next(&mut self) -> Option<BusMessage> {
        let state = self.bus.state.lock().await;
        let partitions = state.topics.get(&self.topic)?;
        let count = self.positions.len();

        for i in 0..count {
            let p = (self.next_partition + i) % count;
            let position = self.positions[p];
            if let Some(record) = partitions.get(p).and_then(|part| part.get(position as usize)) {
                self.positions[p] += 1;
                self.next_partition = (p + 1) % count;
                return Some(BusMessage {
                    topic: self.topic.clone(),
                    partition: p as u32,
                    offset: position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    timestamp_ms: record.timestamp_ms,
                });
            }
        }

        None
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        let deadline = Instant::now() + timeout;
        let notify = self.bus.notify.clone();

        loop {
            // Register interest before checking so a concurrent produce
            // cannot slip between the check and the wait.
            let notified = notify.notified();

            if let Some(message) = self.try_next().await {
                return Ok(Some(message));
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, offsets: &[Offset]) -> Result<(), BusError> {
        let mut state = self.bus.state.lock().await;

        for offset in offsets {
            if offset.topic != self.topic {
                return Err(BusError::NotSubscribed(offset.topic.clone()));
            }
            let committed = state
                .committed
                .entry((self.group.clone(), self.topic.clone(), offset.partition))
                .or_insert(0);
            *committed = (*committed).max(offset.offset + 1);
        }

        Ok(())
    }
}
