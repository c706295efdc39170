use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a [`Generator`](super::Generator), shared with its timer tasks.
#[derive(Debug, Default)]
pub struct GeneratorStats {
    /// Requests executed
    requests: AtomicUsize,
    /// Requests answered with an error
    rejected: AtomicUsize,
    /// Build attempts
    attempted: AtomicUsize,
    /// Messages handed to the delivery substrate
    delivered: AtomicUsize,
    /// Messages the delivery substrate refused
    undeliverable: AtomicUsize,
    /// Messages lost to build failures
    lost: AtomicUsize,
    /// Group loss notifications sent
    loss_notifications: AtomicUsize,
    /// Deferred sends registered
    scheduled: AtomicUsize,
    /// Deferred sends fired
    fired: AtomicUsize,
}

impl GeneratorStats {
    #[inline]
    pub(crate) fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_undeliverable(&self) {
        self.undeliverable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_loss_notifications(&self) {
        self.loss_notifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn attempted(&self) -> usize {
        self.attempted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn undeliverable(&self) -> usize {
        self.undeliverable.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lost(&self) -> usize {
        self.lost.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loss_notifications(&self) -> usize {
        self.loss_notifications.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::Relaxed)
    }
}
