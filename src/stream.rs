use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

/// Unbounded stream of engine events. The stream ends when the producer
/// goes away (disconnect, notifications disabled, session eviction).
/// Dropping the stream unsubscribes.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct EventStream<T>(mpsc::UnboundedReceiver<T>);

impl<T> EventStream<T> {
    /// Creates a new stream and its sender.
    #[inline]
    pub(crate) fn new() -> (Subscriber<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Subscriber(tx), Self(rx))
    }

    /// Returns a future that resolves to the next event or [`None`] once the
    /// stream has ended. This future is cancel safe.
    #[inline(always)]
    pub fn next(&mut self) -> NextEvent<'_, T> {
        NextEvent(self)
    }

    /// Returns the next event if one is ready.
    #[inline]
    pub fn try_next(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }
}

impl<T> futures_core::Stream for EventStream<T> {
    type Item = T;

    #[inline]
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.0.poll_recv(cx)
    }
}

/// Next event future.
#[derive(Debug)]
#[repr(transparent)]
pub struct NextEvent<'a, T>(&'a mut EventStream<T>);

impl<T> Future for NextEvent<'_, T> {
    type Output = Option<T>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0 .0.poll_recv(cx)
    }
}

/// Sending side of an [`EventStream`].
#[derive(Debug)]
pub(crate) struct Subscriber<T>(mpsc::UnboundedSender<T>);

impl<T> Subscriber<T> {
    /// Sends an event. Returns `false` if the stream was dropped.
    #[inline]
    pub fn send(&self, v: T) -> bool {
        self.0.send(v).is_ok()
    }
}

/// Set of subscribers receiving copies of the same events.
#[derive(Debug)]
pub(crate) struct Subscribers<T>(Vec<Subscriber<T>>);

impl<T> Default for Subscribers<T> {
    #[inline]
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Clone> Subscribers<T> {
    /// Adds a new subscriber and returns its stream. If `first` is given, it
    /// is delivered to the new subscriber before any other event.
    pub fn subscribe(&mut self, first: Option<T>) -> EventStream<T> {
        let (tx, rx) = EventStream::new();
        if let Some(v) = first {
            tx.send(v);
        }
        self.0.push(tx);
        rx
    }

    /// Sends `v` to all subscribers, removing the ones that have gone away.
    pub fn send(&mut self, v: &T) {
        self.0.retain(|s| s.send(v.clone()));
    }

    /// Ends all streams.
    #[inline]
    pub fn close(&mut self) {
        self.0.clear();
    }

    /// Returns whether there are no live subscribers.
    #[inline]
    pub fn is_empty(&mut self) -> bool {
        self.0.retain(|s| !s.0.is_closed());
        self.0.is_empty()
    }
}
