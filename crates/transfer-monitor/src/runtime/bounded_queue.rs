use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Live and high-water depth of a queue; shared by both ends.
#[derive(Clone, Debug, Default)]
pub struct QueueGauge {
    depth: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
}

impl QueueGauge {
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    fn pushed(&self) {
        let now = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(now, Ordering::Relaxed);
    }

    fn popped(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
    gauge: QueueGauge,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gauge: self.gauge.clone(),
        }
    }
}

#[derive(Debug)]
pub struct QueueReceiver<T> {
    inner: mpsc::Receiver<T>,
    gauge: QueueGauge,
}

pub fn bounded<T>(capacity: usize) -> Result<(QueueSender<T>, QueueReceiver<T>, QueueGauge)> {
    if capacity == 0 {
        return Err(Error::ConfigInvalid(
            "bounded queue capacity must be >= 1".to_string(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    let gauge = QueueGauge::default();
    Ok((
        QueueSender {
            inner: tx,
            gauge: gauge.clone(),
        },
        QueueReceiver {
            inner: rx,
            gauge: gauge.clone(),
        },
        gauge,
    ))
}

impl<T> QueueSender<T> {
    /// Waits for capacity. Fails only when the receiving stage is gone.
    pub async fn send(&self, item: T) -> core::result::Result<(), mpsc::error::SendError<T>> {
        // The gauge is bumped while holding the permit so the receiver can
        // never observe the item before it is counted.
        match self.inner.reserve().await {
            Ok(permit) => {
                self.gauge.pushed();
                permit.send(item);
                Ok(())
            }
            Err(_) => Err(mpsc::error::SendError(item)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> QueueReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.inner.recv().await;
        if item.is_some() {
            self.gauge.popped();
        }
        item
    }
}
