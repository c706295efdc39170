//! Joins the benchmark group and prints per-second receive statistics.

use std::time::Duration;

use futures::StreamExt;
use nix::errno::Errno;

use nlbench::{
    well_known_path,
    wire::{GRP, NETLINK_BENCHMARK},
    Client, Event, Ipc,
};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut client =
        Client::connect(&mut Ipc::new(), well_known_path(NETLINK_BENCHMARK)).await.unwrap();
    client.join_group(GRP).await.unwrap();
    println!("Joined group {GRP} as port {:?}", client.port_id());

    let (mut messages, mut bytes, mut losses) = (0u64, 0u64, 0u64);
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = client.next() => match event {
                Some(Ok(Event::Message(msg))) => {
                    messages += 1;
                    bytes += msg.size() as u64;
                }
                Some(Ok(Event::Loss(Errno::ENOBUFS))) => losses += 1,
                Some(Ok(Event::Loss(errno))) => println!("unexpected error: {errno}"),
                Some(Err(e)) => {
                    eprintln!("receive failed: {e}");
                    break;
                }
                None => break,
            },
            _ = interval.tick() => {
                println!("{messages} msg/s, {bytes} B/s, {losses} ENOBUFS");
                (messages, bytes, losses) = (0, 0, 0);
            }
        }
    }
}
