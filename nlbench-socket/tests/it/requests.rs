use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use nix::errno::Errno;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use nlbench_socket::{Client, ClientError, Event, Listener};
use nlbench_transport::Tcp;
use nlbench_wire::{
    put_attr_u32, AttrId, Codec, ControlRequest, ErrorMessage, Message, MsgType, GRP,
    NLMSG_ERROR, NLM_F_ACK, NLM_F_REQUEST,
};

async fn listener() -> (Listener<Tcp, SocketAddr>, SocketAddr) {
    let _ = tracing_subscriber::fmt::try_init();

    let mut listener = Listener::new(Tcp::default());
    listener.bind("127.0.0.1:0").await.unwrap();
    let addr = *listener.local_addr().unwrap();

    (listener, addr)
}

async fn next_message(client: &mut Client<TcpStream>) -> Message {
    let event = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for traffic")
        .expect("connection closed")
        .unwrap();

    match event {
        Event::Message(msg) => msg,
        Event::Loss(errno) => panic!("unexpected loss: {errno}"),
    }
}

#[tokio::test]
async fn unicast_process_to_self() {
    let (_listener, addr) = listener().await;

    let mut client = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    client.ping().await.unwrap();
    let pid = client.port_id().unwrap();

    client.request(&ControlRequest::unicast_process(10, 64, pid)).await.unwrap();

    for _ in 0..10 {
        let msg = next_message(&mut client).await;
        assert_eq!(msg.msg_type(), MsgType::UnicastProcess as u16);
        assert_eq!(msg.header().payload_len(), 64);
    }
}

#[tokio::test]
async fn multicast_reaches_group_members_only() {
    let (listener, addr) = listener().await;

    let mut member = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    let mut outsider = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    member.join_group(GRP).await.unwrap();
    outsider.ping().await.unwrap();

    outsider.request(&ControlRequest::multicast_process(5, 32)).await.unwrap();

    for _ in 0..5 {
        assert_eq!(next_message(&mut member).await.msg_type(), MsgType::MulticastProcess as u16);
    }
    assert!(tokio::time::timeout(Duration::from_millis(100), outsider.next()).await.is_err());

    member.leave_group(GRP).await.unwrap();
    assert_eq!(listener.bus().group_size(GRP), 0);
}

#[tokio::test]
async fn oversized_request_is_rejected() {
    let (listener, addr) = listener().await;

    let mut client = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    client.join_group(GRP).await.unwrap();

    let err = client.request(&ControlRequest::multicast_process(5, 3777)).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(Errno::E2BIG)));
    assert_eq!(listener.generator().stats().attempted(), 0);
    assert_eq!(listener.stats().failed_requests(), 1);

    // The session survives a rejected request.
    client.ping().await.unwrap();
}

#[tokio::test]
async fn invalid_group_is_rejected() {
    let (_listener, addr) = listener().await;

    let mut client = Client::connect(&mut Tcp::default(), addr).await.unwrap();
    let err = client.join_group(0).await.unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);
}

#[tokio::test]
async fn server_revalidates_required_attributes() {
    let (_listener, addr) = listener().await;

    // Bypass the client-side check with a hand-built request that lacks PID.
    let mut conn = Framed::new(TcpStream::connect(addr).await.unwrap(), Codec::new());
    let mut attrs = bytes::BytesMut::new();
    put_attr_u32(&mut attrs, AttrId::Num, 3);
    put_attr_u32(&mut attrs, AttrId::Size, 8);
    let request =
        Message::new(MsgType::UnicastProcess as u16, NLM_F_REQUEST, attrs.freeze()).with_seq(99);
    conn.send(request.clone()).await.unwrap();

    let reply = conn.next().await.unwrap().unwrap();
    assert_eq!(reply.msg_type(), NLMSG_ERROR);
    assert_eq!(reply.header().seq, 99);

    let record = ErrorMessage::from_message(&reply).unwrap();
    assert_eq!(record.errno(), Some(Errno::EINVAL));
    assert_eq!(record.request, *request.header());
    assert_eq!(record.echo, *request.payload());
}

#[tokio::test]
async fn replies_follow_request_order() {
    let (_listener, addr) = listener().await;

    let mut conn = Framed::new(TcpStream::connect(addr).await.unwrap(), Codec::new());
    let flags = NLM_F_REQUEST | NLM_F_ACK;

    // A slow batch followed by quick ones.
    conn.feed(ControlRequest::multicast_process(20_000, 1024).to_message(1)).await.unwrap();
    conn.feed(Message::new(30, flags, Bytes::new()).with_seq(2)).await.unwrap();
    conn.feed(ControlRequest::multicast_process(1, 1).to_message(3)).await.unwrap();
    conn.flush().await.unwrap();

    let mut seqs = Vec::new();
    for _ in 0..3 {
        let reply = conn.next().await.unwrap().unwrap();
        let record = ErrorMessage::from_message(&reply).unwrap();
        seqs.push((reply.header().seq, record.errno()));
    }
    assert_eq!(seqs, vec![(1, None), (2, Some(Errno::EOPNOTSUPP)), (3, None)]);
}
