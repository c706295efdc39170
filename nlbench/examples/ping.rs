use std::time::Duration;

use nlbench::{well_known_path, wire::NETLINK_BENCHMARK, Client, Ipc};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut client =
        Client::connect(&mut Ipc::new(), well_known_path(NETLINK_BENCHMARK)).await.unwrap();

    for _ in 0..5 {
        let rtt = client.ping().await.unwrap();
        println!("reply from port {:?}: time={rtt:?}", client.port_id());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
