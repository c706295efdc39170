use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nix::errno::Errno;

use nlbench::{
    wire::{Message, NLMSG_GOODSIZE},
    Bus, Delivery, DeliveryError, Generator,
};

const BATCH: u32 = 1_000;

/// Accepts and drops everything, so only generation is measured.
struct Discard;

impl Delivery for Discard {
    fn deliver_to_one(&self, _msg: Message, _pid: u32) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn deliver_to_group(&self, _msg: Message, _group: u32) -> Result<usize, DeliveryError> {
        Ok(1)
    }

    fn notify_group_loss(&self, _group: u32, _reason: Errno) {}
}

fn immediate(c: &mut Criterion) {
    let generator = Generator::new(Discard);
    let mut group = c.benchmark_group("multicast_process");

    for size in [64, 512, NLMSG_GOODSIZE] {
        group.throughput(Throughput::Elements(BATCH as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| generator.multicast_process(BATCH, size).unwrap());
        });
    }

    group.finish();
}

fn bus_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_fanout");

    for members in [1, 8, 32] {
        let bus = Bus::new();
        let mut ports: Vec<_> = (0..members).map(|_| bus.bind(None).unwrap()).collect();
        for port in &ports {
            port.join(nlbench::wire::GRP).unwrap();
        }
        let generator = Generator::new(bus.clone());

        group.throughput(Throughput::Elements(u64::from(members) * 64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                generator.multicast_process(64, 256).unwrap();
                // Drain so the next iteration does not overrun.
                for port in &mut ports {
                    while port.try_recv().is_some() {}
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, immediate, bus_fanout);
criterion_main!(benches);
