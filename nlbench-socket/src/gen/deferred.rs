use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use nix::errno::Errno;
use rand::{Rng, RngCore};
use tokio::{runtime::Handle, time::Instant};
use tracing::{trace, warn};

use nlbench_wire::{MsgType, Target, GRP};

use super::{GenError, Generator, Shared};
use crate::bus::deliver;

/// Draws a send delay uniformly from `[0, window)` seconds, in whole ticks of `1 / hz` seconds.
/// A zero window yields no delay.
pub fn jitter<R: RngCore + ?Sized>(rng: &mut R, window: u32, hz: u32) -> Duration {
    let hz = u64::from(hz.max(1));
    if window == 0 {
        return Duration::ZERO;
    }

    let ticks = rng.gen_range(0..u64::from(window) * hz);
    Duration::from_secs(ticks / hz) + Duration::from_nanos(ticks % hz * 1_000_000_000 / hz)
}

/// Bounds the number of pending deferred sends.
#[derive(Debug)]
pub(crate) struct TimerBudget {
    pending: AtomicUsize,
    max: usize,
}

impl TimerBudget {
    pub(crate) fn new(max: usize) -> Arc<Self> {
        Arc::new(Self { pending: AtomicUsize::new(0), max })
    }

    /// Takes a permit, or returns `None` if the budget is used up.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<TimerPermit> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max).then_some(n + 1))
            .ok()?;

        Some(TimerPermit { budget: Arc::clone(self) })
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// A slot in the [`TimerBudget`], returned on drop.
#[derive(Debug)]
pub(crate) struct TimerPermit {
    budget: Arc<TimerBudget>,
}

impl Drop for TimerPermit {
    fn drop(&mut self) {
        self.budget.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One deferred message.
///
/// Registering moves it into its timer task, and firing consumes it, so it goes from scheduled
/// to fired to released exactly once. Its permit is released with it, also when the runtime
/// drops the task before the timer fires.
#[derive(Debug)]
struct ScheduledSend {
    msg_type: MsgType,
    size: u32,
    target: Target,
    deadline: Instant,
    _permit: TimerPermit,
}

impl ScheduledSend {
    fn register(self, runtime: &Handle, shared: Arc<Shared>) {
        runtime.spawn(async move {
            tokio::time::sleep_until(self.deadline).await;
            self.fire(&shared);
        });
    }

    fn fire(self, shared: &Shared) {
        let stats = &shared.stats;
        stats.increment_fired();
        stats.increment_attempted();

        match shared.builder.build(self.msg_type as u16, self.size) {
            Ok(msg) => match deliver(&*shared.delivery, msg, self.target) {
                Ok(()) => stats.increment_delivered(),
                Err(e) => {
                    trace!(err = %e, target = ?self.target, "deferred delivery failed");
                    stats.increment_undeliverable();
                }
            },
            Err(e) => {
                trace!(err = %e, "failed to build deferred message");
                stats.increment_lost();

                if let Target::Multicast { group } = self.target {
                    shared.delivery.notify_group_loss(group, Errno::ENOBUFS);
                    stats.increment_loss_notifications();
                }
            }
        }
    }
}

impl Generator {
    /// Schedules `count` messages of `size` bytes to port `pid`, each after its own random delay
    /// within `window` seconds.
    pub fn unicast_interrupt(
        &self,
        count: u32,
        size: u32,
        window: u32,
        pid: u32,
    ) -> Result<u32, GenError> {
        self.check_size(size)?;
        self.schedule(MsgType::UnicastInterrupt, Target::Unicast { pid }, count, size, window)
    }

    /// Schedules `count` messages of `size` bytes to the benchmark group, each after its own
    /// random delay within `window` seconds.
    pub fn multicast_interrupt(
        &self,
        count: u32,
        size: u32,
        window: u32,
    ) -> Result<u32, GenError> {
        self.check_size(size)?;
        let target = Target::Multicast { group: GRP };
        self.schedule(MsgType::MulticastInterrupt, target, count, size, window)
    }

    /// Registers one timer per message. Running out of permits aborts the remaining
    /// registrations, timers already registered still fire.
    fn schedule(
        &self,
        msg_type: MsgType,
        target: Target,
        count: u32,
        size: u32,
        window: u32,
    ) -> Result<u32, GenError> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(count, "no runtime to run timers on");
            return Err(GenError::NoRuntime);
        };
        let now = Instant::now();

        for scheduled in 0..count {
            let Some(permit) = self.timers.try_acquire() else {
                let pending = self.timers.pending();
                warn!(scheduled, count, pending, "timer budget exhausted");
                return Err(GenError::OutOfMemory { scheduled });
            };

            let delay = jitter(&mut *self.rng.lock(), window, self.options.hz);
            let deadline = now + delay;
            let send = ScheduledSend { msg_type, size, target, deadline, _permit: permit };
            send.register(&runtime, Arc::clone(&self.shared));

            self.shared.stats.increment_scheduled();
        }

        trace!(subtype = msg_type.name(), count, window, "scheduled");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use nlbench_wire::ControlRequest;

    use super::*;
    use crate::{
        gen::testing::{FlakyBuilder, Recorder},
        GeneratorOptions, Outcome,
    };

    #[test]
    fn jitter_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(1);
        for window in [1, 2, 10] {
            for _ in 0..1000 {
                assert!(jitter(&mut rng, window, 1000) < Duration::from_secs(window.into()));
            }
        }
        assert_eq!(jitter(&mut rng, 0, 1000), Duration::ZERO);
    }

    #[test]
    fn jitter_mean_is_half_the_window() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples = 100_000u32;

        let total: Duration = (0..samples).map(|_| jitter(&mut rng, 10, 1000)).sum();
        let mean = total.as_secs_f64() / f64::from(samples);
        assert!((mean - 5.0).abs() < 0.1, "mean delay {mean}s");
    }

    #[test]
    fn jitter_covers_windows_beyond_32_bit_ticks() {
        let mut rng = StdRng::seed_from_u64(42);
        let window = 10_000_000u32;
        let samples = 100_000u32;

        let mut max = Duration::ZERO;
        let mut total = Duration::ZERO;
        for _ in 0..samples {
            let delay = jitter(&mut rng, window, 1000);
            max = max.max(delay);
            total += delay;
        }

        let mean = total.as_secs_f64() / f64::from(samples);
        assert!((mean - 5_000_000.0).abs() < 50_000.0, "mean delay {mean}s");
        assert!(max > Duration::from_secs(9_000_000), "max delay {max:?}");
        assert!(max < Duration::from_secs(window.into()));
    }

    #[test]
    fn jitter_is_quantized_to_ticks() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let delay = jitter(&mut rng, 5, 100);
            assert_eq!(delay.as_nanos() % 10_000_000, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_fires_immediately() {
        let recorder = Recorder::default();
        let gen = Generator::new(recorder.clone());
        let start = Instant::now();

        assert_eq!(gen.multicast_interrupt(5, 16, 0).unwrap(), 5);
        assert_eq!(gen.pending_timers(), 5);

        tokio::time::sleep(Duration::from_millis(1)).await;

        let deliveries = recorder.deliveries();
        assert_eq!(deliveries.len(), 5);
        assert!(deliveries.iter().all(|d| d.at <= start + Duration::from_millis(1)));
        assert_eq!(gen.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unicast_interrupt_scenario() {
        let recorder = Recorder::default();
        let gen = Generator::with_options(recorder.clone(), GeneratorOptions::default().seed(7));
        let start = Instant::now();

        let request = ControlRequest::unicast_interrupt(3, 64, 2, 1234);
        assert_eq!(gen.execute(&request).unwrap(), Outcome::Scheduled(3));
        assert_eq!(gen.stats().scheduled(), 3);
        assert!(recorder.deliveries().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;

        let deliveries = recorder.deliveries();
        assert_eq!(deliveries.len(), 3);
        for delivered in deliveries {
            assert_eq!(delivered.target, Target::Unicast { pid: 1234 });
            assert_eq!(delivered.msg.msg_type(), MsgType::UnicastInterrupt as u16);
            assert_eq!(delivered.msg.header().payload_len(), 64);
            assert!(delivered.at >= start && delivered.at <= start + Duration::from_secs(2));
        }
        assert_eq!(gen.stats().fired(), 3);
        assert_eq!(gen.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_aborts_scheduling() {
        let recorder = Recorder::default();
        let options = GeneratorOptions::default().max_pending_timers(2);
        let gen = Generator::with_options(recorder.clone(), options);

        let err = gen.multicast_interrupt(5, 8, 1).unwrap_err();
        assert!(matches!(err, GenError::OutOfMemory { scheduled: 2 }));
        assert_eq!(err.errno(), Errno::ENOMEM);
        assert_eq!(gen.pending_timers(), 2);

        // Timers registered before the failure still fire.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.deliveries().len(), 2);
        assert_eq!(gen.pending_timers(), 0);

        // The budget is available again.
        assert_eq!(gen.multicast_interrupt(2, 8, 1).unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_build_failures() {
        let recorder = Recorder::default();
        let gen = Generator::with_builder(
            recorder.clone(),
            FlakyBuilder::failing_every(1),
            Default::default(),
        );

        gen.unicast_interrupt(2, 8, 1, 5).unwrap();
        gen.multicast_interrupt(3, 8, 1).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(recorder.deliveries().is_empty());
        // Only the multicast sends notify the group.
        assert_eq!(recorder.losses(), vec![(GRP, Errno::ENOBUFS); 3]);
        assert_eq!(gen.stats().lost(), 5);
        assert_eq!(gen.pending_timers(), 0);
    }

    #[test]
    fn scheduling_without_runtime_is_rejected() {
        let recorder = Recorder::default();
        let gen = Generator::new(recorder.clone());

        let err = gen.multicast_interrupt(1, 8, 0).unwrap_err();
        assert!(matches!(err, GenError::NoRuntime));
        assert_eq!(gen.pending_timers(), 0);
        assert_eq!(gen.stats().scheduled(), 0);

        let request = ControlRequest::unicast_interrupt(2, 8, 1, 3).to_message(9);
        let reply = gen.handle_message(&request, 3).unwrap();
        let status = nlbench_wire::ErrorMessage::from_message(&reply).unwrap();
        assert_eq!(status.errno(), Some(Errno::EAGAIN));
        assert_eq!(gen.pending_timers(), 0);

        // Immediate sends do not need a runtime.
        assert!(gen.multicast_process(1, 8).is_ok());
        assert_eq!(recorder.deliveries().len(), 1);
    }

    #[test]
    fn runtime_teardown_releases_permits() {
        let gen = Generator::new(Recorder::default());
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();

        rt.block_on(async { gen.multicast_interrupt(4, 8, 60).unwrap() });
        assert_eq!(gen.pending_timers(), 4);

        drop(rt);
        assert_eq!(gen.pending_timers(), 0);
        assert_eq!(gen.stats().fired(), 0);
    }
}
