// SPDX-License-Identifier: MIT OR Apache-2.0

//! Closable Event Stream Channel
//!
//! [`Stream`] is the conduit used for the raw input feed, for every execution
//! unit's private inbox and for match output. It is a crossbeam channel with an
//! explicit end-of-stream marker:
//!
//! - producers call [`Stream::add_item`] until someone calls [`Stream::close`]
//! - consumers block in [`Stream::get_item`] (or iterate) until an item arrives
//!   or the stream is closed and drained
//! - [`Stream::duplicate`] forks a closed, read-only copy of the buffered items
//!
//! Cloning a `Stream` clones the handle, not the contents.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use crate::core::error::{CepError, CepResult};

enum Item<T> {
    Data(T),
    End,
}

/// Bounded or unbounded closable stream.
pub struct Stream<T> {
    name: Arc<str>,
    sender: Sender<Item<T>>,
    receiver: Receiver<Item<T>>,
    // One token per buffered data item of a bounded stream. Producers wait
    // here, never while holding `closed`.
    permits: Option<(Sender<()>, Receiver<()>)>,
    // Orders sends against close/duplicate. Held only for non-blocking work.
    closed: Arc<Mutex<bool>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            permits: self.permits.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Stream<T> {
    /// Create an unbounded stream
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        Self::from_channel(name.into(), sender, receiver, None)
    }

    /// Create a stream holding at most `capacity` items; producers block when full.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Data never takes the extra slot: the end marker always fits.
        let (sender, receiver) = bounded(capacity + 1);
        Self::from_channel(name.into(), sender, receiver, Some(bounded(capacity)))
    }

    /// Create a closed stream pre-filled with `items`.
    pub fn from_items(name: impl Into<String>, items: impl IntoIterator<Item = T>) -> Self {
        let stream = Self::new(name);
        for item in items {
            // Fresh unbounded stream: cannot be closed or full yet
            let _ = stream.sender.send(Item::Data(item));
        }
        stream.close();
        stream
    }

    fn from_channel(
        name: String,
        sender: Sender<Item<T>>,
        receiver: Receiver<Item<T>>,
        permits: Option<(Sender<()>, Receiver<()>)>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            sender,
            receiver,
            permits,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item, blocking while a bounded stream is full.
    pub fn add_item(&self, item: T) -> CepResult<()> {
        if self.is_closed() {
            return Err(CepError::stream_closed(self.name.as_ref()));
        }
        if let Some((acquire, _)) = &self.permits {
            acquire
                .send(())
                .map_err(|_| CepError::stream_closed(self.name.as_ref()))?;
        }
        let closed = self.closed.lock().unwrap();
        if *closed {
            drop(closed);
            self.release_permit();
            return Err(CepError::stream_closed(self.name.as_ref()));
        }
        // Holding a permit, so the data slots are not all taken.
        match self.sender.try_send(Item::Data(item)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                drop(closed);
                self.release_permit();
                Err(CepError::stream_closed(self.name.as_ref()))
            }
        }
    }

    /// Mark the end of the stream. Idempotent and never blocks on a full
    /// stream.
    pub fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            let _ = self.sender.try_send(Item::End);
        }
    }

    fn release_permit(&self) {
        if let Some((_, release)) = &self.permits {
            let _ = release.try_recv();
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Number of buffered items not yet consumed.
    pub fn len(&self) -> usize {
        let marker = usize::from(self.is_closed());
        self.receiver.len().saturating_sub(marker)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking read. Returns `None` once the stream is closed and drained.
    pub fn get_item(&self) -> Option<T> {
        match self.receiver.recv() {
            Ok(Item::Data(item)) => {
                self.release_permit();
                Some(item)
            }
            Ok(Item::End) => {
                self.rearm_end_marker();
                None
            }
            Err(_) => None,
        }
    }

    /// Non-blocking read. `None` if nothing is buffered right now.
    pub fn try_get_item(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(Item::Data(item)) => {
                self.release_permit();
                Some(item)
            }
            Ok(Item::End) => {
                self.rearm_end_marker();
                None
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    // The end marker is the last item, so the channel is empty here and the
    // send cannot block. Putting it back lets every consumer observe the end.
    fn rearm_end_marker(&self) {
        let _ = self.sender.try_send(Item::End);
    }

    pub fn iter(&self) -> StreamIter<'_, T> {
        StreamIter { stream: self }
    }
}

impl<T: Clone> Stream<T> {
    /// Fork a read-only copy of everything currently buffered. The copy is
    /// closed; this stream keeps its items and its open/closed state.
    pub fn duplicate(&self) -> Stream<T> {
        let _guard = self.closed.lock().unwrap();
        let buffered: Vec<Item<T>> = self.receiver.try_iter().collect();
        let copy = Stream::new(format!("{}-duplicate", self.name));
        for item in &buffered {
            if let Item::Data(data) = item {
                let _ = copy.sender.send(Item::Data(data.clone()));
            }
        }
        copy.close();
        // Producers are excluded by the guard and the permits still count
        // these items, so everything fits back.
        for item in buffered {
            let _ = self.sender.try_send(item);
        }
        copy
    }
}

/// Blocking iterator over a stream.
pub struct StreamIter<'a, T> {
    stream: &'a Stream<T>,
}

impl<T> Iterator for StreamIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.stream.get_item()
    }
}

impl<'a, T> IntoIterator for &'a Stream<T> {
    type Item = T;
    type IntoIter = StreamIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
