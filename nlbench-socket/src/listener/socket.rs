use std::{marker::PhantomData, net::SocketAddr, path::PathBuf, sync::Arc};

use futures::stream::FuturesUnordered;
use tokio::{
    net::{lookup_host, ToSocketAddrs},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn, Instrument};

use nlbench_transport::{well_known_path, Address, Transport};
use nlbench_wire::NETLINK_BENCHMARK;

use super::{driver::ListenerDriver, ListenerError, ListenerOptions, ListenerStats, SocketState};
use crate::{Bus, Generator, GeneratorOptions};

/// The control channel. Accepts connections on a transport, binds every connection to a port
/// on the bus and lets the generator handle its requests.
///
/// A listener is bound once. Dropping it, or calling [`Listener::shutdown`], releases the
/// endpoint and closes every session. Deferred sends that are still pending keep running.
pub struct Listener<T: Transport<A>, A: Address> {
    /// The listener options, shared with the driver.
    options: Arc<ListenerOptions>,
    /// The listener state, shared with the driver.
    state: Arc<SocketState>,
    /// The bus sessions bind their ports on.
    bus: Bus,
    /// The generator handling requests.
    generator: Arc<Generator>,
    /// The transport used by this listener. This value is temporary and will be moved
    /// to the driver task once the listener is bound.
    transport: Option<T>,
    /// The local address this listener is bound to.
    local_addr: Option<A>,
    /// Internal task representing a running [`ListenerDriver`].
    driver_task: Option<JoinHandle<()>>,
}

impl<T> Listener<T, SocketAddr>
where
    T: Transport<SocketAddr>,
{
    /// Binds the listener to the given socket address.
    pub async fn bind(&mut self, addr: impl ToSocketAddrs) -> Result<(), ListenerError> {
        let addrs = lookup_host(addr).await?;
        self.try_bind(addrs.collect()).await
    }
}

impl<T> Listener<T, PathBuf>
where
    T: Transport<PathBuf>,
{
    /// Binds the listener to the given path.
    pub async fn bind(&mut self, path: impl Into<PathBuf>) -> Result<(), ListenerError> {
        self.try_bind(vec![path.into()]).await
    }

    /// Binds the listener to the well-known path of the benchmark unit.
    pub async fn bind_well_known(&mut self) -> Result<(), ListenerError> {
        self.bind(well_known_path(NETLINK_BENCHMARK)).await
    }
}

impl<T, A> Listener<T, A>
where
    T: Transport<A>,
    A: Address,
{
    /// Creates a new listener with a fresh bus and a default generator.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ListenerOptions::default(), GeneratorOptions::default())
    }

    /// Creates a new listener with a fresh bus and a generator with the given options.
    pub fn with_options(
        transport: T,
        options: ListenerOptions,
        generator_options: GeneratorOptions,
    ) -> Self {
        let bus = Bus::new();
        let generator = Generator::with_options(bus.clone(), generator_options);
        Self::with_generator(transport, options, bus, Arc::new(generator))
    }

    /// Creates a new listener around an existing bus and generator. The generator should deliver
    /// into `bus`, otherwise sessions never see its output.
    pub fn with_generator(
        transport: T,
        options: ListenerOptions,
        bus: Bus,
        generator: Arc<Generator>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            state: Arc::new(SocketState::default()),
            bus,
            generator,
            transport: Some(transport),
            local_addr: None,
            driver_task: None,
        }
    }

    /// Binds the listener to the first address that works. This spawns the listener driver
    /// task.
    pub async fn try_bind(&mut self, addresses: Vec<A>) -> Result<(), ListenerError> {
        let Some(mut transport) = self.transport.take() else {
            return Err(ListenerError::AlreadyBound);
        };

        for addr in addresses {
            match transport.bind(addr.clone()).await {
                Ok(_) => break,
                Err(e) => {
                    warn!(err = ?e, ?addr, "failed to bind");
                    continue;
                }
            }
        }

        let Some(local_addr) = transport.local_addr() else {
            self.transport = Some(transport);
            return Err(ListenerError::NoValidEndpoints);
        };

        let span = tracing::info_span!(parent: None, "listener", ?local_addr);

        span.in_scope(|| {
            debug!("listening");
        });

        let driver = ListenerDriver {
            transport,
            state: Arc::clone(&self.state),
            options: Arc::clone(&self.options),
            bus: self.bus.clone(),
            generator: Arc::clone(&self.generator),
            conn_tasks: FuturesUnordered::new(),
            sessions: JoinSet::new(),
            span: span.clone(),
            _marker: PhantomData,
        };

        self.driver_task = Some(tokio::spawn(driver.instrument(span)));
        self.local_addr = Some(local_addr);

        Ok(())
    }

    /// Returns the statistics for this listener.
    pub fn stats(&self) -> &ListenerStats {
        &self.state.stats
    }

    /// Returns the local address this listener is bound to. `None` if it is not bound.
    pub fn local_addr(&self) -> Option<&A> {
        self.local_addr.as_ref()
    }

    /// Returns the bus that sessions bind their ports on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns the generator handling requests.
    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    /// Stops accepting connections, closes every session and releases the endpoint.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.driver_task.take() {
            task.abort();
            debug!(local_addr = ?self.local_addr, "listener shut down");
        }
    }
}

impl<T: Transport<A>, A: Address> Drop for Listener<T, A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use nlbench_transport::{Ipc, Tcp};
    use nlbench_wire::{ControlRequest, GRP, MsgType};

    use super::*;
    use crate::{Client, Event};

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn binds_once() {
        let mut listener = Listener::new(Tcp::default());
        listener.bind(localhost()).await.unwrap();
        assert!(listener.local_addr().is_some());

        assert!(matches!(listener.bind(localhost()).await, Err(ListenerError::AlreadyBound)));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let path = std::env::temp_dir().join("nlbench-missing-dir").join("nested").join("x.sock");
        let mut listener = Listener::new(Ipc::new());

        assert!(matches!(listener.bind(path).await, Err(ListenerError::NoValidEndpoints)));
        assert!(listener.local_addr().is_none());
    }

    #[tokio::test]
    async fn sessions_are_counted_and_bound() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut listener = Listener::new(Tcp::default());
        listener.bind(localhost()).await.unwrap();
        let addr = *listener.local_addr().unwrap();

        let mut a = Client::connect(&mut Tcp::default(), addr).await.unwrap();
        let mut b = Client::connect(&mut Tcp::default(), addr).await.unwrap();
        a.ping().await.unwrap();
        b.ping().await.unwrap();

        assert_eq!(listener.stats().active_clients(), 2);
        assert_eq!(listener.bus().port_count(), 2);
        assert_ne!(a.port_id(), b.port_id());

        drop(a);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.stats().active_clients(), 1);
        assert_eq!(listener.bus().port_count(), 1);
    }

    #[tokio::test]
    async fn max_clients_rejects_connections() {
        let options = ListenerOptions::default().max_clients(1);
        let mut listener = Listener::with_options(Tcp::default(), options, Default::default());
        listener.bind(localhost()).await.unwrap();
        let addr = *listener.local_addr().unwrap();

        let mut first = Client::connect(&mut Tcp::default(), addr).await.unwrap();
        first.ping().await.unwrap();

        let mut second = Client::connect(&mut Tcp::default(), addr).await.unwrap();
        assert!(second.ping().await.is_err());
        assert_eq!(listener.stats().active_clients(), 1);
    }

    #[tokio::test]
    async fn multicast_reaches_session() {
        let mut listener = Listener::new(Tcp::default());
        listener.bind(localhost()).await.unwrap();
        let addr = *listener.local_addr().unwrap();

        let mut client = Client::connect(&mut Tcp::default(), addr).await.unwrap();
        client.join_group(GRP).await.unwrap();
        client.request(&ControlRequest::multicast_process(3, 100)).await.unwrap();

        for _ in 0..3 {
            let Event::Message(msg) = client.next().await.unwrap().unwrap() else {
                panic!("expected a message");
            };
            assert_eq!(msg.msg_type(), MsgType::MulticastProcess as u16);
            assert_eq!(msg.payload().len(), 100);
        }
        assert_eq!(listener.generator().stats().delivered(), 3);
    }

    #[tokio::test]
    async fn shutdown_releases_endpoint() {
        let name = format!("nlbench-listener-{}.sock", std::process::id());
        let path = std::env::temp_dir().join(name);

        let mut listener = Listener::new(Ipc::new());
        listener.bind(path.clone()).await.unwrap();
        let mut client = Client::connect(&mut Ipc::new(), path.clone()).await.unwrap();
        client.ping().await.unwrap();

        listener.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!path.exists());
        assert!(client.ping().await.is_err());
    }
}
