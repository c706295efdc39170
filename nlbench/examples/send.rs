//! Asks a running server for traffic.
//!
//! Usage: `send [subtype] [count] [size] [window]`, e.g. `send unicast-interrupt 100 64 2`.
//! Unicast subtypes target the sender's own port.

use futures::StreamExt;

use nlbench::{
    well_known_path,
    wire::{ControlRequest, MsgType, NETLINK_BENCHMARK},
    Client, Event, Ipc,
};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = std::env::args().skip(1);
    let subtype: MsgType =
        args.next().as_deref().unwrap_or("unicast-process").parse().unwrap();
    let count: u32 = args.next().map_or(10, |arg| arg.parse().unwrap());
    let size: u32 = args.next().map_or(64, |arg| arg.parse().unwrap());
    let window: u32 = args.next().map_or(1, |arg| arg.parse().unwrap());

    let mut client =
        Client::connect(&mut Ipc::new(), well_known_path(NETLINK_BENCHMARK)).await.unwrap();
    client.ping().await.unwrap();
    let pid = client.port_id().unwrap();

    let request = match subtype {
        MsgType::UnicastProcess => ControlRequest::unicast_process(count, size, pid),
        MsgType::UnicastInterrupt => ControlRequest::unicast_interrupt(count, size, window, pid),
        MsgType::MulticastProcess => ControlRequest::multicast_process(count, size),
        MsgType::MulticastInterrupt => ControlRequest::multicast_interrupt(count, size, window),
    };

    if let Err(e) = client.request(&request).await {
        eprintln!("{} request failed: {e} ({})", subtype.name(), e.errno());
        std::process::exit(1);
    }
    println!("{} request accepted", subtype.name());

    if subtype.is_unicast() {
        let mut received = 0;
        while received < count {
            match client.next().await {
                Some(Ok(Event::Message(_))) => received += 1,
                Some(Ok(Event::Loss(errno))) => println!("loss: {errno}"),
                Some(Err(e)) => panic!("{e}"),
                None => break,
            }
        }
        println!("received {received}/{count}");
    }
}
