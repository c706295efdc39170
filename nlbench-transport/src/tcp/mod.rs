use futures::future::BoxFuture;
use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::net::{TcpListener, TcpStream};

use crate::{async_error, PeerAddress, Transport};

#[derive(Debug, Default)]
pub struct Config {
    /// Keeps Nagle's algorithm enabled on every stream. Off by default, so streams are
    /// created with `TCP_NODELAY` set.
    pub delay: bool,
}

/// A TCP transport. Useful for driving the generator from another host.
#[derive(Debug, Default)]
pub struct Tcp {
    config: Config,
    listener: Option<TcpListener>,
}

impl Tcp {
    pub const fn new(config: Config) -> Self {
        Self { config, listener: None }
    }
}

impl PeerAddress<SocketAddr> for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer_addr()
    }
}

#[async_trait::async_trait]
impl Transport<SocketAddr> for Tcp {
    type Io = TcpStream;

    type Error = io::Error;

    type Connect = BoxFuture<'static, Result<Self::Io, Self::Error>>;
    type Accept = BoxFuture<'static, Result<Self::Io, Self::Error>>;

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Self::Error> {
        let listener = TcpListener::bind(addr).await?;

        self.listener = Some(listener);

        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr) -> Self::Connect {
        let nodelay = !self.config.delay;
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(nodelay)?;

            Ok(stream)
        })
    }

    fn poll_accept(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Accept> {
        let this = self.get_mut();

        let Some(ref listener) = this.listener else {
            return Poll::Ready(async_error(io::ErrorKind::NotConnected.into()));
        };

        match listener.poll_accept(cx) {
            Poll::Ready(Ok((io, addr))) => {
                tracing::debug!(%addr, "accepted connection");

                let nodelay = !this.config.delay;
                Poll::Ready(Box::pin(async move {
                    io.set_nodelay(nodelay)?;
                    Ok(io)
                }))
            }
            Poll::Ready(Err(e)) => Poll::Ready(async_error(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
