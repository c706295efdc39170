use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a [`Bus`](super::Bus).
#[derive(Debug, Default)]
pub struct BusStats {
    /// Messages queued on a port
    delivered: AtomicUsize,
    /// Messages dropped on a full queue
    overruns: AtomicUsize,
    /// Unicasts to an unbound port
    unreachable: AtomicUsize,
    /// Group loss notifications
    loss_notifications: AtomicUsize,
}

impl BusStats {
    #[inline]
    pub(crate) fn increment_delivered(&self) {
        self.add_delivered(1);
    }

    #[inline]
    pub(crate) fn add_delivered(&self, n: usize) {
        self.delivered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_overruns(&self) {
        self.add_overruns(1);
    }

    #[inline]
    pub(crate) fn add_overruns(&self, n: usize) {
        self.overruns.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_unreachable(&self) {
        self.unreachable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_loss_notifications(&self) {
        self.loss_notifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unreachable(&self) -> usize {
        self.unreachable.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loss_notifications(&self) -> usize {
        self.loss_notifications.load(Ordering::Relaxed)
    }
}
