use std::time::Duration;

use futures::StreamExt;
use nix::errno::Errno;

use nlbench_socket::{Client, Event, Listener, ListenerOptions};
use nlbench_transport::Tcp;
use nlbench_wire::ControlRequest;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_reader_sees_enobufs() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = ListenerOptions::default().port_buffer_size(4);
    let mut listener = Listener::with_options(Tcp::default(), options, Default::default());
    listener.bind("127.0.0.1:0").await.unwrap();
    let addr = *listener.local_addr().unwrap();

    let mut sender = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    let mut reader = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    reader.ping().await.unwrap();
    let pid = reader.port_id().unwrap();

    // The reader does not read while the batch runs, so its port overflows.
    sender.request(&ControlRequest::unicast_process(20_000, 2048, pid)).await.unwrap();
    assert!(listener.bus().stats().overruns() > 0);

    let loss = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = reader.next().await {
            if let Event::Loss(errno) = event.unwrap() {
                return Some(errno);
            }
        }
        None
    })
    .await
    .expect("no loss reported");

    assert_eq!(loss, Some(Errno::ENOBUFS));
}
