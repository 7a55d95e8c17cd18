//! Bounded delivery channel for fetch/decode completion events.
//!
//! A thin wrapper over `crossbeam_channel` so callers depend on this module's
//! name rather than the channel crate directly; kept intentionally small
//! since the core only ever needs `send`/`recv`/`try_recv`.

use crossbeam_channel::{bounded, Receiver as CbReceiver, Sender as CbSender};

pub struct Sender<T> {
    inner: CbSender<T>,
}

pub struct Receiver<T> {
    inner: CbReceiver<T>,
}

pub fn channel<T>(bound: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = bounded(bound);
    (Sender { inner: tx }, Receiver { inner: rx })
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Sender<T> {
    pub fn send(&self, item: T) -> Result<(), ()> {
        self.inner.send(item).map_err(|_| ())
    }
}

impl<T> Receiver<T> {
    pub fn recv(&self) -> Result<T, ()> {
        self.inner.recv().map_err(|_| ())
    }

    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.inner.try_iter()
    }
}
