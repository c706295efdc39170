use std::{path::PathBuf, time::Duration};

use futures::StreamExt;
use tokio::time::Instant;

use nlbench_socket::{Client, Event, Listener};
use nlbench_transport::Ipc;
use nlbench_wire::{ControlRequest, MsgType, GRP};

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nlbench-it-{name}-{}.sock", std::process::id()))
}

#[tokio::test]
async fn unicast_interrupt_over_ipc() {
    let _ = tracing_subscriber::fmt::try_init();

    let path = socket_path("unicast");
    let mut listener = Listener::new(Ipc::new());
    listener.bind(path.clone()).await.unwrap();

    let mut client = Client::connect(&mut Ipc::new(), path).await.unwrap();
    client.ping().await.unwrap();
    let pid = client.port_id().unwrap();

    let start = Instant::now();
    client.request(&ControlRequest::unicast_interrupt(3, 64, 1, pid)).await.unwrap();

    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(3), client.next())
            .await
            .expect("deferred send never fired")
            .unwrap()
            .unwrap();

        let Event::Message(msg) = event else { panic!("unexpected {event:?}") };
        assert_eq!(msg.msg_type(), MsgType::UnicastInterrupt as u16);
        assert_eq!(msg.payload().len(), 64);
    }

    // Every delay is drawn from a one second window.
    assert!(start.elapsed() < Duration::from_millis(1500));
    assert_eq!(listener.generator().pending_timers(), 0);
}

#[tokio::test]
async fn multicast_interrupt_with_zero_window() {
    let path = socket_path("multicast");
    let mut listener = Listener::new(Ipc::new());
    listener.bind(path.clone()).await.unwrap();

    let mut member = Client::connect(&mut Ipc::new(), path).await.unwrap();
    member.join_group(GRP).await.unwrap();
    member.request(&ControlRequest::multicast_interrupt(4, 16, 0)).await.unwrap();

    let events: Vec<_> = member.by_ref().take(4).collect().await;
    for event in events {
        let Event::Message(msg) = event.unwrap() else { panic!("expected a message") };
        assert_eq!(msg.msg_type(), MsgType::MulticastInterrupt as u16);
    }
    assert_eq!(listener.generator().stats().fired(), 4);
}
