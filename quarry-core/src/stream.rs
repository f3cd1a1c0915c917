//! Change-stream subscriptions.
//!
//! Every backend owns a [`ChangeBroadcaster`]: an explicit list of subscriber handles.
//! [`ChangeBroadcaster::publish`] fans a change document out to every live subscriber
//! whose namespace matches. Each [`ChangeStream`] buffers what it receives in a private
//! FIFO until the consumer pulls it with [`ChangeStream::next`].
//!
//! Buffering is unbounded; a consumer that never drains its stream keeps every change
//! in memory. Closing a stream deregisters it but keeps already-buffered changes
//! retrievable. An `invalidate` event closes every stream on its namespace once it is
//! buffered. Dropping a stream releases its buffer; the broadcaster prunes the dead
//! handle on the next publish.

use bson::Document;
use mea::rwlock::RwLock;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::{debug, trace};

use crate::{
    change::{ChangeDocument, OperationType},
    namespace::Namespace,
};

type Buffer = RwLock<VecDeque<ChangeDocument>>;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    namespace: Namespace,
    buffer: Weak<Buffer>,
    closed: Arc<AtomicBool>,
}

#[derive(Debug)]
struct BroadcasterState {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Default for BroadcasterState {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

/// Fans change documents out to change-stream subscribers.
///
/// Cloning a broadcaster yields another handle to the same subscriber list.
#[derive(Debug, Default, Clone)]
pub struct ChangeBroadcaster {
    state: Arc<BroadcasterState>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscription for `namespace`.
    ///
    /// `pipeline` is recorded on the stream but only namespace matching is applied.
    pub async fn subscribe(&self, namespace: Namespace, pipeline: Vec<Document>) -> ChangeStream {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer = Arc::new(Buffer::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));

        self.state
            .subscribers
            .write()
            .await
            .push(Subscriber {
                id,
                namespace: namespace.clone(),
                buffer: Arc::downgrade(&buffer),
                closed: closed.clone(),
            });

        debug!(subscription = id, namespace = %namespace, "change stream opened");

        ChangeStream {
            id,
            namespace,
            pipeline,
            buffer,
            broadcaster: self.clone(),
            closed,
        }
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: u64) {
        self.state
            .subscribers
            .write()
            .await
            .retain(|subscriber| subscriber.id != id);
    }

    /// Appends `change` to the buffer of every live subscriber on its namespace.
    ///
    /// An `invalidate` change is the last one those subscribers receive: their streams
    /// are closed and deregistered after buffering it.
    pub async fn publish(&self, change: &ChangeDocument) {
        let invalidates = change.operation_type == OperationType::Invalidate;
        let mut subscribers = self.state.subscribers.write().await;
        subscribers.retain(|subscriber| subscriber.buffer.strong_count() > 0);

        for subscriber in subscribers.iter() {
            if subscriber.namespace != change.ns {
                continue;
            }
            if let Some(buffer) = subscriber.buffer.upgrade() {
                buffer.write().await.push_back(change.clone());
                trace!(
                    subscription = subscriber.id,
                    operation = ?change.operation_type,
                    "change buffered"
                );
            }
            if invalidates {
                subscriber.closed.store(true, Ordering::Release);
            }
        }

        if invalidates {
            subscribers.retain(|subscriber| subscriber.namespace != change.ns);
            debug!(namespace = %change.ns, "change streams invalidated");
        }
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.state
            .subscribers
            .read()
            .await
            .iter()
            .filter(|subscriber| subscriber.buffer.strong_count() > 0)
            .count()
    }
}

/// A buffered feed of change documents for one namespace.
#[derive(Debug)]
pub struct ChangeStream {
    id: u64,
    namespace: Namespace,
    pipeline: Vec<Document>,
    buffer: Arc<Buffer>,
    broadcaster: ChangeBroadcaster,
    closed: Arc<AtomicBool>,
}

impl ChangeStream {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The pipeline this stream was opened with.
    pub fn pipeline(&self) -> &[Document] {
        &self.pipeline
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pops the oldest buffered change, or `None` if the buffer is empty.
    pub async fn next(&self) -> Option<ChangeDocument> {
        self.buffer.write().await.pop_front()
    }

    /// True when at least one change is buffered.
    pub async fn has_next(&self) -> bool {
        !self.buffer.read().await.is_empty()
    }

    /// Stops delivery of future changes. Buffered changes stay retrievable.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.broadcaster.unsubscribe(self.id).await;
        debug!(subscription = self.id, namespace = %self.namespace, "change stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn insert(namespace: &Namespace, id: i32) -> ChangeDocument {
        ChangeDocument::with_full_document(OperationType::Insert, namespace, &doc! { "_id": id })
    }

    #[tokio::test]
    async fn delivers_only_matching_namespace() {
        let broadcaster = ChangeBroadcaster::new();
        let items = Namespace::new("db", "items");
        let other = Namespace::new("db", "other");
        let stream = broadcaster.subscribe(items.clone(), Vec::new()).await;

        broadcaster.publish(&insert(&other, 1)).await;
        assert!(!stream.has_next().await);

        broadcaster.publish(&insert(&items, 2)).await;
        assert!(stream.has_next().await);
        assert_eq!(
            stream.next().await.and_then(|change| change.document_key),
            Some(doc! { "_id": 2 })
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_stream_keeps_buffered_changes() {
        let broadcaster = ChangeBroadcaster::new();
        let items = Namespace::new("db", "items");
        let stream = broadcaster.subscribe(items.clone(), Vec::new()).await;

        broadcaster.publish(&insert(&items, 1)).await;
        broadcaster.publish(&insert(&items, 2)).await;
        stream.close().await;
        broadcaster.publish(&insert(&items, 3)).await;

        assert!(stream.is_closed());
        assert_eq!(stream.next().await.and_then(|c| c.document_key), Some(doc! { "_id": 1 }));
        assert_eq!(stream.next().await.and_then(|c| c.document_key), Some(doc! { "_id": 2 }));
        assert!(stream.next().await.is_none());
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_streams_are_pruned() {
        let broadcaster = ChangeBroadcaster::new();
        let items = Namespace::new("db", "items");

        let stream = broadcaster.subscribe(items.clone(), vec![doc! { "$match": {} }]).await;
        assert_eq!(stream.pipeline().len(), 1);
        assert_eq!(broadcaster.subscriber_count().await, 1);

        drop(stream);
        broadcaster.publish(&insert(&items, 1)).await;

        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn invalidate_closes_streams_on_its_namespace() {
        let broadcaster = ChangeBroadcaster::new();
        let items = Namespace::new("db", "items");
        let other = Namespace::new("db", "other");
        let stream = broadcaster.subscribe(items.clone(), Vec::new()).await;
        let bystander = broadcaster.subscribe(other.clone(), Vec::new()).await;

        broadcaster.publish(&ChangeDocument::invalidate(&items)).await;
        broadcaster.publish(&insert(&items, 1)).await;

        assert!(stream.is_closed());
        assert!(!bystander.is_closed());
        assert_eq!(
            stream.next().await.map(|change| change.operation_type),
            Some(OperationType::Invalidate)
        );
        assert!(stream.next().await.is_none());
        assert_eq!(broadcaster.subscriber_count().await, 1);
    }
}
