use std::{
    io,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{UnixListener, UnixStream},
};
use tracing::debug;

use crate::{async_error, PeerAddress, Transport};

/// An IPC transport using Unix domain sockets. This is the closest thing to a netlink socket:
/// the control channel is bound to a well-known path on the local host, see
/// [`well_known_path`](crate::well_known_path).
#[derive(Debug, Default)]
pub struct Ipc {
    listener: Option<UnixListener>,
    path: Option<PathBuf>,
}

impl Ipc {
    pub const fn new() -> Self {
        Self { listener: None, path: None }
    }
}

impl Drop for Ipc {
    fn drop(&mut self) {
        // Release the well-known path together with the listener.
        if let (Some(_), Some(path)) = (self.listener.take(), self.path.as_ref()) {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[derive(Debug)]
pub struct IpcStream {
    peer: PathBuf,
    stream: UnixStream,
}

impl IpcStream {
    pub async fn connect(peer: PathBuf) -> io::Result<Self> {
        let stream = UnixStream::connect(&peer).await?;
        Ok(Self { peer, stream })
    }
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl PeerAddress<PathBuf> for IpcStream {
    fn peer_addr(&self) -> io::Result<PathBuf> {
        Ok(self.peer.clone())
    }
}

#[async_trait::async_trait]
impl Transport<PathBuf> for Ipc {
    type Io = IpcStream;

    type Error = io::Error;

    type Connect = BoxFuture<'static, Result<Self::Io, Self::Error>>;
    type Accept = BoxFuture<'static, Result<Self::Io, Self::Error>>;

    fn local_addr(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    async fn bind(&mut self, addr: PathBuf) -> Result<(), Self::Error> {
        if addr.exists() {
            debug!(?addr, "socket file already exists, removing");
            std::fs::remove_file(&addr).map_err(|e| {
                io::Error::other(format!("failed to remove existing socket file, {e:?}"))
            })?;
        }

        let listener = UnixListener::bind(&addr)?;
        self.listener = Some(listener);
        self.path = Some(addr);
        Ok(())
    }

    fn connect(&mut self, addr: PathBuf) -> Self::Connect {
        Box::pin(async move { IpcStream::connect(addr).await })
    }

    fn poll_accept(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Accept> {
        let this = self.get_mut();

        let (Some(listener), Some(path)) = (this.listener.as_ref(), this.path.as_ref()) else {
            return Poll::Ready(async_error(io::ErrorKind::NotConnected.into()));
        };

        match listener.poll_accept(cx) {
            Poll::Ready(Ok((io, _addr))) => {
                debug!("accepted IPC connection");
                // Unix peers are unnamed, report the listener path instead.
                let stream = IpcStream { peer: path.clone(), stream: io };
                Poll::Ready(Box::pin(async move { Ok(stream) }))
            }
            Poll::Ready(Err(e)) => Poll::Ready(async_error(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
