//! Streaming slots: multi-item transient queues alongside value slots.
//!
//! A slot declared as a channel publishes a [`Channel`] handle the moment
//! the producer opens it, so downstream vertices start consuming while the
//! producer is still publishing. Items arrive in publication order; each
//! consumer iterates the shared log with its own cursor. Dropping the
//! publisher closes the stream. Mutable subscription hands out write guards
//! per item and requires the dependency to be declared mutable, mirroring
//! the single-mutable-reader rule for value slots. Forwarding an externally
//! owned channel behaves identically because the handle is the value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::engine::dependency::Dependency;
use crate::engine::lock;
use crate::engine::slot::Slot;
use crate::engine::value::SlotValue;

/// Read access to one published item.
pub type ItemRef<T> = OwnedRwLockReadGuard<T>;

/// Write access to one published item, available to mutable consumers.
pub type ItemMut<T> = OwnedRwLockWriteGuard<T>;

struct ChannelInner<T> {
    items: StdMutex<Vec<Arc<RwLock<T>>>>,
    closed: AtomicBool,
    notify: Notify,
}

/// Cheap-clone handle over a shared in-order item log. The handle itself is
/// the slot value, so aliasing a channel across slots shares the queue.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T: Send + Sync + 'static> Channel<T> {
    pub fn new() -> Self {
        Channel {
            inner: Arc::new(ChannelInner {
                items: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn publish(&self, item: T) {
        lock(&self.inner.items).push(Arc::new(RwLock::new(item)));
        self.inner.notify.notify_waiters();
    }

    /// Marks end-of-stream; consumers drain the remaining items and then
    /// observe `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> ChannelConsumer<T> {
        ChannelConsumer {
            channel: self.clone(),
            cursor: 0,
        }
    }

    fn item_at(&self, cursor: usize) -> Option<Arc<RwLock<T>>> {
        lock(&self.inner.items).get(cursor).cloned()
    }
}

impl<T: Send + Sync + 'static> Default for Channel<T> {
    fn default() -> Self {
        Channel::new()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

/// Scoped producer handle; dropping it closes the stream.
pub struct ChannelPublisher<T: Send + Sync + 'static> {
    channel: Option<Channel<T>>,
}

impl<T: Send + Sync + 'static> ChannelPublisher<T> {
    fn new(channel: Channel<T>) -> Self {
        ChannelPublisher {
            channel: Some(channel),
        }
    }

    pub fn publish(&self, item: T) {
        if let Some(channel) = &self.channel {
            channel.publish(item);
        }
    }

    /// Closes the stream now instead of at drop.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

impl<T: Send + Sync + 'static> Drop for ChannelPublisher<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-order consumer over a channel; every consumer sees every item.
pub struct ChannelConsumer<T> {
    channel: Channel<T>,
    cursor: usize,
}

impl<T: Send + Sync + 'static> ChannelConsumer<T> {
    /// Next item in publication order; `None` once the stream is closed and
    /// drained.
    pub async fn next(&mut self) -> Option<ItemRef<T>> {
        loop {
            let notified = self.channel.inner.notify.notified();
            tokio::pin!(notified);
            // Register before the check so a publish between the check and
            // the await cannot be lost.
            notified.as_mut().enable();
            if let Some(item) = self.channel.item_at(self.cursor) {
                self.cursor += 1;
                return Some(item.read_owned().await);
            }
            if self.channel.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

/// Consumer handing out mutable item guards; obtained through a mutable
/// dependency declaration.
pub struct MutableChannelConsumer<T> {
    channel: Channel<T>,
    cursor: usize,
}

impl<T: Send + Sync + 'static> MutableChannelConsumer<T> {
    pub async fn next(&mut self) -> Option<ItemMut<T>> {
        loop {
            let notified = self.channel.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.channel.item_at(self.cursor) {
                self.cursor += 1;
                return Some(item.write_owned().await);
            }
            if self.channel.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

/// Producer-side handle bound to a slot, from [`Slot::declare_channel`].
pub struct OutputChannel<T: SlotValue> {
    slot: Option<Arc<Slot>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: SlotValue> OutputChannel<T> {
    /// Opens the stream: publishes the slot immediately (its value is the
    /// channel handle) and returns the publisher. `None` when another
    /// committer already claimed the slot.
    pub fn open(&self) -> Option<ChannelPublisher<T>> {
        let slot = self.slot.as_ref()?;
        let mut committer = slot.emit::<Channel<T>>();
        if !committer.valid() {
            return None;
        }
        let channel = committer.get().map(|guard| guard.clone())?;
        Some(ChannelPublisher::new(channel))
    }

    /// Publishes an externally owned channel instead of a fresh one; the
    /// caller keeps publishing through its own handle.
    pub fn forward(&self, channel: &Channel<T>) -> bool {
        let slot = match &self.slot {
            Some(slot) => slot,
            None => return false,
        };
        let mut committer = slot.emit::<Channel<T>>();
        if !committer.valid() {
            return false;
        }
        committer.set(channel.clone());
        true
    }

    pub fn valid(&self) -> bool {
        self.slot.is_some()
    }
}

/// Consumer-side handle bound to a dependency, from
/// [`Dependency::declare_channel`].
pub struct InputChannel<T: SlotValue> {
    dependency: Option<Arc<Dependency>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: SlotValue> InputChannel<T> {
    /// Subscribes once the dependency resolved; `None` while unresolved or
    /// when the producer published nothing.
    pub fn subscribe(&self) -> Option<ChannelConsumer<T>> {
        let dependency = self.dependency.as_ref()?;
        let channel = dependency.value::<Channel<T>>()?;
        Some(channel.subscribe())
    }

    pub fn valid(&self) -> bool {
        self.dependency.is_some()
    }
}

/// Mutable consumer-side handle, from
/// [`Dependency::declare_mutable_channel`].
pub struct MutableInputChannel<T: SlotValue> {
    dependency: Option<Arc<Dependency>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: SlotValue> MutableInputChannel<T> {
    pub fn subscribe(&self) -> Option<MutableChannelConsumer<T>> {
        let dependency = self.dependency.as_ref()?;
        if !dependency.is_mutable() {
            return None;
        }
        let channel = dependency.value::<Channel<T>>()?;
        Some(MutableChannelConsumer {
            channel: channel.clone(),
            cursor: 0,
        })
    }

    pub fn valid(&self) -> bool {
        self.dependency.is_some()
    }
}

impl Slot {
    /// Declares this slot as a stream of `T`; its value type becomes
    /// [`Channel<T>`].
    pub fn declare_channel<T: SlotValue>(self: &Arc<Self>) -> OutputChannel<T> {
        let output = self.declare_type::<Channel<T>>();
        OutputChannel {
            slot: output.slot().cloned(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl Dependency {
    /// Declares the target as a stream of `T` consumed read-only.
    pub fn declare_channel<T: SlotValue>(self: &Arc<Self>) -> InputChannel<T> {
        let valid = self.declare_type::<Channel<T>>();
        InputChannel {
            dependency: valid.then(|| self.clone()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Declares the target as a stream of `T` with mutable item access;
    /// implies a mutable dependency.
    pub fn declare_mutable_channel<T: SlotValue>(self: &Arc<Self>) -> MutableInputChannel<T> {
        self.declare_mutable(true);
        let valid = self.declare_type::<Channel<T>>();
        MutableInputChannel {
            dependency: valid.then(|| self.clone()),
            _marker: std::marker::PhantomData,
        }
    }
}
