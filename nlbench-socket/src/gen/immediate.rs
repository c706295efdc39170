use nix::errno::Errno;
use tracing::{debug, trace};

use nlbench_wire::{MsgType, Target, GRP};

use super::{GenError, Generator, LossNotification};
use crate::bus::deliver;

/// What happened to an immediate batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages the batch tried to build.
    pub attempted: u32,
    /// Messages accepted by the delivery substrate.
    pub delivered: u32,
    /// Messages built but refused by the delivery substrate.
    pub undeliverable: u32,
    /// Messages that could not be built.
    pub lost: u32,
}

impl Generator {
    /// Builds and delivers `count` messages of `size` bytes to port `pid`, in order.
    pub fn unicast_process(
        &self,
        count: u32,
        size: u32,
        pid: u32,
    ) -> Result<BatchReport, GenError> {
        self.check_size(size)?;
        Ok(self.run_batch(MsgType::UnicastProcess, Target::Unicast { pid }, count, size))
    }

    /// Builds and delivers `count` messages of `size` bytes to the benchmark group, in order.
    pub fn multicast_process(&self, count: u32, size: u32) -> Result<BatchReport, GenError> {
        self.check_size(size)?;
        let target = Target::Multicast { group: GRP };
        Ok(self.run_batch(MsgType::MulticastProcess, target, count, size))
    }

    /// Runs the whole batch. A message that cannot be built is counted and skipped, a multicast
    /// batch also tells the group about it.
    fn run_batch(&self, msg_type: MsgType, target: Target, count: u32, size: u32) -> BatchReport {
        let stats = &self.shared.stats;
        let mut report = BatchReport::default();
        let per_failure = self.options.loss_notification == LossNotification::PerFailure;
        let mut notified = false;

        for _ in 0..count {
            report.attempted += 1;
            stats.increment_attempted();

            let msg = match self.shared.builder.build(msg_type as u16, size) {
                Ok(msg) => msg,
                Err(e) => {
                    trace!(err = %e, "failed to build message");
                    report.lost += 1;
                    stats.increment_lost();

                    if let Target::Multicast { group } = target {
                        if per_failure || !notified {
                            self.shared.delivery.notify_group_loss(group, Errno::ENOBUFS);
                            stats.increment_loss_notifications();
                            notified = true;
                        }
                    }

                    continue;
                }
            };

            match deliver(&*self.shared.delivery, msg, target) {
                Ok(()) => {
                    report.delivered += 1;
                    stats.increment_delivered();
                }
                Err(e) => {
                    trace!(err = %e, ?target, "delivery failed");
                    report.undeliverable += 1;
                    stats.increment_undeliverable();
                }
            }
        }

        debug!(subtype = msg_type.name(), ?target, ?report, "batch done");
        report
    }
}
