//! Multicast Broadcast
//!
//! LAN discovery carrier. Payloads are framed with a size-bearing header,
//! split into MTU-sized datagrams and sent to every configured multicast
//! address. Listeners reassemble datagrams per source address and hand the
//! completed payload to every mounted [`BroadcastHandler`].

mod packet;
mod reassembly;

use crate::config::{AppSettings, ConfigListener};
use crate::error::FabricError;
use crate::runtime::{
    BoxError, Capabilities, ExtensionType, Initialize, Module, Ready, Registry, Shutdown,
};
use crate::utils::Signal;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

pub use packet::{fragment, pack_buffer, parse_packet_buffer, Fragment, HEADER_SIZE, MAX_PAYLOAD};
pub use reassembly::{Reassembler, REASSEMBLY_TIMEOUT};

/// MTU assumed when no interface reports one.
pub const DEFAULT_MTU: usize = 1500;

/// Delay before a failed listener is restarted.
pub const RETRY_DELAY: Duration = Duration::from_secs(6);

/// Errors from the broadcast carrier.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("mtu too small: {0}")]
    MtuTooSmall(usize),

    #[error("invalid broadcast address: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives every reassembled broadcast payload.
#[async_trait]
pub trait BroadcastHandler: Send + Sync {
    async fn serve_broadcast(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError>;
}

/// Sending side of the broadcast carrier, as seen by other modules.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Fan `payload` out to every mounted [`BroadcastHandler`].
    async fn serve(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError>;

    /// Send `payload` to every configured multicast address.
    async fn deliver(&self, payload: &[u8]) -> Result<(), BroadcastError>;
}

/// Module running the multicast listeners and delivering announcements.
pub struct BroadcastModule {
    registry: OnceLock<Arc<Registry>>,
    addresses: RwLock<Vec<String>>,
    signal: Signal<bool>,
    mtu: usize,
}

impl BroadcastModule {
    pub fn new() -> Self {
        Self::with_mtu(interface_mtu())
    }

    pub fn with_mtu(mtu: usize) -> Self {
        Self {
            registry: OnceLock::new(),
            addresses: RwLock::new(Vec::new()),
            signal: Signal::new(),
            mtu,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Configured multicast addresses.
    pub fn addresses(&self) -> Vec<String> {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the address set; listeners restart on the next signal round.
    pub fn set_addresses(&self, addresses: Vec<String>) {
        let mut current = self.addresses.write().unwrap_or_else(PoisonError::into_inner);
        if *current == addresses {
            return;
        }
        debug!(addresses = ?addresses, "Broadcast addresses changed");
        *current = addresses;
        drop(current);
        self.signal.raise(true);
    }
}

impl Default for BroadcastModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcaster for BroadcastModule {
    async fn serve(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError> {
        let registry = self.registry.get().ok_or(FabricError::Unavailable)?;
        serve_handlers(registry, payload, source).await
    }

    async fn deliver(&self, payload: &[u8]) -> Result<(), BroadcastError> {
        if payload.is_empty() {
            return Ok(());
        }
        let blocks = fragment(payload, self.mtu)?;

        let mut sockets = Vec::new();
        for address in self.addresses() {
            let addr = resolve(&address).await?;
            let local: SocketAddr = match addr {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(addr).await?;
            sockets.push(socket);
        }

        for block in &blocks {
            for socket in &sockets {
                socket.send(block).await?;
            }
        }
        trace!(
            bytes = payload.len(),
            datagrams = blocks.len(),
            targets = sockets.len(),
            "Broadcast delivered"
        );
        Ok(())
    }
}

async fn serve_handlers(registry: &Registry, payload: &[u8], source: IpAddr) -> Result<(), FabricError> {
    for handler in registry.modules::<dyn BroadcastHandler>() {
        handler.serve_broadcast(payload, source).await?;
    }
    Ok(())
}

async fn resolve(address: &str) -> Result<SocketAddr, BroadcastError> {
    tokio::net::lookup_host(address)
        .await?
        .next()
        .ok_or_else(|| BroadcastError::InvalidAddress(address.to_string()))
}

/// Bind a receiving socket; multicast groups are joined on every interface.
async fn bind_listener(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    match addr.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, addr.port())).await?;
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            Ok(socket)
        }
        IpAddr::V6(group) if group.is_multicast() => {
            let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, addr.port())).await?;
            socket.join_multicast_v6(&group, 0)?;
            Ok(socket)
        }
        _ => UdpSocket::bind(addr).await,
    }
}

/// Receiving half of a listener socket.
#[async_trait]
trait DatagramSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Bind `address` and serve it until the socket fails.
async fn listen_and_serve(
    address: &str,
    registry: &Arc<Registry>,
    mtu: usize,
) -> Result<(), BroadcastError> {
    let addr = resolve(address).await?;
    let socket = bind_listener(addr).await?;
    info!(addr = %addr, "Broadcast listener started");
    receive_loop(&socket, registry, mtu).await
}

/// Reassemble datagrams and hand completed payloads to the handlers.
///
/// Returns on the first receive error; the supervisor rebinds.
async fn receive_loop(
    socket: &dyn DatagramSource,
    registry: &Arc<Registry>,
    mtu: usize,
) -> Result<(), BroadcastError> {
    let reassembler = Reassembler::new();
    let mut buf = vec![0u8; mtu];
    loop {
        let (len, source) = socket.recv_datagram(&mut buf).await?;
        let Some(payload) = reassembler.push(source, &buf[..len]) else {
            continue;
        };

        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_handlers(&registry, &payload, source.ip()).await {
                debug!(source = %source, error = %e, "Broadcast payload rejected");
            }
        });
    }
}

/// Keep one listener alive, retrying after [`RETRY_DELAY`].
async fn supervise(address: String, registry: Arc<Registry>, mtu: usize) {
    loop {
        if let Err(e) = listen_and_serve(&address, &registry, mtu).await {
            warn!(address = %address, error = %e, "Broadcast listener failed, retrying");
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Smallest MTU across local interfaces, capped to the largest datagram.
pub fn interface_mtu() -> usize {
    mtu_from_sysfs(Path::new("/sys/class/net")).unwrap_or(DEFAULT_MTU)
}

fn mtu_from_sysfs(root: &Path) -> Option<usize> {
    let entries = std::fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("mtu")).ok())
        .filter_map(|mtu| mtu.trim().parse::<usize>().ok())
        .map(|mtu| mtu.min(u16::MAX as usize))
        .min()
}

impl ConfigListener for BroadcastModule {
    fn on_config_updated(&self, settings: &Arc<AppSettings>) {
        self.set_addresses(settings.broadcast_addresses());
    }
}

impl Module for BroadcastModule {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn engine_types(&self) -> Vec<ExtensionType> {
        vec![
            ExtensionType::of::<dyn BroadcastHandler>(),
            ExtensionType::of::<dyn Broadcaster>(),
        ]
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn Initialize>(self.clone())
            .add::<dyn Ready>(self.clone())
            .add::<dyn ConfigListener>(self.clone())
            .add::<dyn Broadcaster>(self);
    }
}

impl Initialize for BroadcastModule {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError> {
        let _ = self.registry.set(registry.clone());
        Ok(())
    }
}

#[async_trait]
impl Ready for BroadcastModule {
    async fn ready(&self, mut shutdown: Shutdown) -> Result<(), BoxError> {
        let registry = self.registry.get().cloned().ok_or(FabricError::Unavailable)?;
        let mut listeners = JoinSet::new();

        loop {
            let restart = tokio::select! {
                restart = self.signal.recv() => restart,
                _ = shutdown.wait() => false,
            };

            listeners.abort_all();
            while listeners.join_next().await.is_some() {}
            if !restart {
                break;
            }

            let addresses = self.addresses();
            info!(count = addresses.len(), mtu = self.mtu, "Starting broadcast listeners");
            for address in addresses {
                listeners.spawn(supervise(address, registry.clone(), self.mtu));
            }
        }

        debug!("Broadcast stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::Engine;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Recorder {
        tx: mpsc::UnboundedSender<(Vec<u8>, IpAddr)>,
    }

    #[async_trait]
    impl BroadcastHandler for Recorder {
        async fn serve_broadcast(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError> {
            let _ = self.tx.send((payload.to_vec(), source));
            Ok(())
        }
    }

    impl Module for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
            caps.add::<dyn BroadcastHandler>(self);
        }
    }

    /// Yields its queued datagrams, then fails every receive.
    struct Scripted {
        datagrams: Mutex<VecDeque<Vec<u8>>>,
        receives: Mutex<usize>,
    }

    #[async_trait]
    impl DatagramSource for Scripted {
        async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
            *self.receives.lock().unwrap() += 1;
            match self.datagrams.lock().unwrap().pop_front() {
                Some(datagram) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok((datagram.len(), "127.0.0.1:4000".parse().unwrap()))
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NetworkDown,
                    "interface down",
                )),
            }
        }
    }

    async fn recording_engine(
        settings: AppSettings,
    ) -> (Engine, Arc<BroadcastModule>, mpsc::UnboundedReceiver<(Vec<u8>, IpAddr)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broadcast = Arc::new(BroadcastModule::with_mtu(DEFAULT_MTU));
        let mut engine = Engine::new();
        engine.mount(Arc::new(AppConfig::new(settings))).unwrap();
        engine.mount(broadcast.clone()).unwrap();
        engine.mount(Arc::new(Recorder { tx })).unwrap();
        engine.bootstrap().await.unwrap();
        (engine, broadcast, rx)
    }

    /// Deliver `payload` until the recorder sees it.
    async fn deliver_until_received(
        broadcast: &BroadcastModule,
        rx: &mut mpsc::UnboundedReceiver<(Vec<u8>, IpAddr)>,
        payload: &[u8],
    ) {
        timeout(Duration::from_secs(5), async {
            loop {
                broadcast.deliver(payload).await.unwrap();
                if let Ok(Some((got, _))) = timeout(Duration::from_millis(100), rx.recv()).await {
                    if got == payload {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap();
    }

    fn free_port() -> u16 {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[test]
    fn test_mtu_from_sysfs() {
        let dir = TempDir::new().unwrap();
        for (name, mtu) in [("eth0", "1500\n"), ("lo", "65536\n"), ("wg0", "1420\n")] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("mtu"), mtu).unwrap();
        }
        assert_eq!(mtu_from_sysfs(dir.path()), Some(1420));

        let empty = TempDir::new().unwrap();
        assert_eq!(mtu_from_sysfs(empty.path()), None);
        assert_eq!(mtu_from_sysfs(&empty.path().join("missing")), None);
    }

    #[tokio::test]
    async fn test_deliver_fragments_to_every_address() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let module = BroadcastModule::with_mtu(64);
        module.set_addresses(vec![
            a.local_addr().unwrap().to_string(),
            b.local_addr().unwrap().to_string(),
        ]);

        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        module.deliver(&payload).await.unwrap();

        for socket in [&a, &b] {
            let reassembler = Reassembler::new();
            let mut buf = [0u8; 64];
            let received = timeout(Duration::from_secs(2), async {
                loop {
                    let (len, source) = socket.recv_from(&mut buf).await.unwrap();
                    assert!(len <= 64);
                    if let Some(done) = reassembler.push(source, &buf[..len]) {
                        return done;
                    }
                }
            })
            .await
            .unwrap();
            assert_eq!(received, payload);
        }
    }

    #[tokio::test]
    async fn test_deliver_rejects_large_payload() {
        let module = BroadcastModule::with_mtu(DEFAULT_MTU);
        module.set_addresses(vec!["127.0.0.1:9".to_string()]);
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            module.deliver(&payload).await,
            Err(BroadcastError::TooLarge(_))
        ));
        // Nothing to send is not an error.
        module.deliver(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_before_init_is_unavailable() {
        let module = BroadcastModule::with_mtu(DEFAULT_MTU);
        let result = module.serve(b"x", IpAddr::V4(Ipv4Addr::LOCALHOST)).await;
        assert!(matches!(result, Err(FabricError::Unavailable)));
    }

    #[tokio::test]
    async fn test_listener_reassembles_and_fans_out() {
        let port = free_port();
        let mut settings = AppSettings::new();
        settings.broadcast.address = Some(vec![format!("127.0.0.1:{}", port)]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let broadcast = Arc::new(BroadcastModule::with_mtu(DEFAULT_MTU));
        let mut engine = Engine::new();
        engine.mount(Arc::new(AppConfig::new(settings))).unwrap();
        engine.mount(broadcast.clone()).unwrap();
        engine.mount(Arc::new(Recorder { tx })).unwrap();
        engine.bootstrap().await.unwrap();

        // Two fragments from one source: size 10, then a continuation.
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = format!("127.0.0.1:{}", port);
        let mut head = vec![0u8];
        head.extend_from_slice(&(u16::MAX ^ 10).to_be_bytes());
        head.extend_from_slice(&10u16.to_be_bytes());
        head.extend_from_slice(b"abcd");
        let mut tail = vec![0u8; HEADER_SIZE];
        tail.extend_from_slice(b"efghij");

        let (payload, source) = timeout(Duration::from_secs(5), async {
            loop {
                sender.send_to(&head, &target).await.unwrap();
                sender.send_to(&tail, &target).await.unwrap();
                if let Ok(Some(got)) = timeout(Duration::from_millis(100), rx.recv()).await {
                    return got;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(payload, b"abcdefghij");
        assert_eq!(source, IpAddr::V4(Ipv4Addr::LOCALHOST));

        // Delivery through the module reaches the same listener.
        broadcast.deliver(b"announce").await.unwrap();
        timeout(Duration::from_secs(2), async {
            while let Some((payload, _)) = rx.recv().await {
                if payload == b"announce" {
                    break;
                }
            }
        })
        .await
        .unwrap();

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_error_ends_listener() {
        let mut settings = AppSettings::new();
        settings.broadcast.address = Some(Vec::new());
        let (mut engine, broadcast, mut rx) = recording_engine(settings).await;
        let registry = broadcast.registry.get().cloned().unwrap();

        let socket = Scripted {
            datagrams: Mutex::new(VecDeque::from([pack_buffer(b"last").unwrap()])),
            receives: Mutex::new(0),
        };
        let result = timeout(
            Duration::from_secs(2),
            receive_loop(&socket, &registry, DEFAULT_MTU),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(BroadcastError::Io(_))));
        assert_eq!(*socket.receives.lock().unwrap(), 2);

        // Payloads completed before the failure still reach the handlers.
        let (payload, _) = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"last");

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_listeners_follow_address_changes() {
        let old_port = free_port();
        let mut settings = AppSettings::new();
        settings.broadcast.address = Some(vec![format!("127.0.0.1:{}", old_port)]);
        let config = Arc::new(AppConfig::new(settings.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let broadcast = Arc::new(BroadcastModule::with_mtu(DEFAULT_MTU));
        let mut engine = Engine::new();
        engine.mount(config.clone()).unwrap();
        engine.mount(broadcast.clone()).unwrap();
        engine.mount(Arc::new(Recorder { tx })).unwrap();
        engine.bootstrap().await.unwrap();

        deliver_until_received(&broadcast, &mut rx, b"before").await;
        assert!(std::net::UdpSocket::bind(("127.0.0.1", old_port)).is_err());

        let new_port = free_port();
        settings.broadcast.address = Some(vec![format!("127.0.0.1:{}", new_port)]);
        config.update(settings);
        assert_eq!(
            broadcast.addresses(),
            vec![format!("127.0.0.1:{}", new_port)]
        );

        deliver_until_received(&broadcast, &mut rx, b"after").await;
        // The stale listener is gone once the new one serves.
        assert!(std::net::UdpSocket::bind(("127.0.0.1", old_port)).is_ok());

        engine.shutdown().await.unwrap();
    }
}
