use std::{
    io::{self, Cursor},
    net::Ipv4Addr,
    sync::Arc,
    time::Duration,
};

use async_listen::ListenExt;
use async_std::{
    net::{TcpListener, ToSocketAddrs},
    task,
};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite, StreamExt};

use crate::{
    client::portmapper::PortMapperClient,
    common::{
        onc_rpc::prelude::*,
        portmapper::{
            xdr::Mapping, PMAPPROC_DUMP, PMAPPROC_GETPORT, PMAPPROC_NULL, PMAPPROC_SET,
            PMAPPROC_UNSET, PORTMAPPER_PROG, PORTMAPPER_VERS,
        },
        xdr::prelude::*,
    },
};

pub use crate::common::portmapper::{PORTMAPPER_PORT, PORTMAPPER_PROT_TCP, PORTMAPPER_PROT_UDP};

pub mod prelude {
    pub use super::{PortmapBinding, StaticPortMap, StaticPortMapBuilder, PORTMAPPER_PORT};
    pub use crate::common::portmapper::{xdr::Mapping, PORTMAPPER_PROT_TCP, PORTMAPPER_PROT_UDP};
}

/// Marker for any bidirectional async stream usable as an RPC transport,
/// so the rpcbind discovery below can hand back a TCP or UNIX socket
/// connection through the same handle.
trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

/// Outcome of [connect_system_portmapper]/[PortmapBinding]'s discovery: either
/// a real rpcbind/portmap daemon answered, or none was reachable and this
/// process must serve its own.
enum SystemPortmapper {
    Client(PortMapperClient<std::pin::Pin<Box<dyn AsyncDuplex>>>),
    None,
}

/// Locate a system rpcbind/portmap daemon the way the reference
/// implementation does: a UNIX domain socket at `/var/run/rpcbind.sock`
/// first (the common rpcbind layout on Linux), then plain TCP to
/// `127.0.0.1:111`.
async fn connect_system_portmapper() -> SystemPortmapper {
    #[cfg(unix)]
    {
        use async_std::os::unix::net::UnixStream;
        if let Ok(stream) = UnixStream::connect("/var/run/rpcbind.sock").await {
            log::debug!("Found rpcbind at /var/run/rpcbind.sock");
            return SystemPortmapper::Client(PortMapperClient::new(Box::pin(stream)));
        }
    }
    if let Ok(stream) =
        async_std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, PORTMAPPER_PORT)).await
    {
        log::debug!("Found rpcbind at 127.0.0.1:{}", PORTMAPPER_PORT);
        return SystemPortmapper::Client(PortMapperClient::new(Box::pin(stream)));
    }
    SystemPortmapper::None
}

/// Where a program/version ended up being advertised after
/// [register_with_system_or_builtin].
pub enum PortmapBinding {
    /// Registered with an external rpcbind/portmap daemon found on this host.
    Registered,
    /// No external daemon was reachable; the returned minimal portmapper
    /// must still be bound and served by the caller.
    BuiltIn(Arc<StaticPortMap>),
}

/// Register `mappings` with whatever portmapper this host offers: prefer a
/// real rpcbind/portmap daemon (UNIX socket, then TCP), and fall back to
/// this process's own minimal, fixed-table portmapper otherwise. Both
/// DEVICE_CORE and DEVICE_ASYNC should be passed even though only CORE is
/// strictly required, since common vendor VISA stacks look up both.
pub async fn register_with_system_or_builtin(mappings: Vec<Mapping>) -> PortmapBinding {
    if let SystemPortmapper::Client(mut client) = connect_system_portmapper().await {
        let mut all_ok = true;
        for mapping in &mappings {
            match client.set(*mapping).await {
                Ok(true) => {}
                _ => {
                    all_ok = false;
                    break;
                }
            }
        }
        if all_ok {
            return PortmapBinding::Registered;
        }
        log::warn!("rpcbind found but registration failed, falling back to built-in portmapper");
    }

    let mut builder = StaticPortMapBuilder::new();
    for mapping in mappings {
        builder = builder.set(mapping);
    }
    PortmapBinding::BuiltIn(builder.build())
}

/// Builder for a minimal [StaticPortMap], used as a fallback when no system
/// rpcbind/portmap daemon is available to register with.
pub struct StaticPortMapBuilder {
    mappings: Vec<Mapping>,
}

impl StaticPortMapBuilder {
    pub fn new() -> Self {
        Self {
            mappings: vec![Mapping::new(
                PORTMAPPER_PROG,
                PORTMAPPER_VERS,
                PORTMAPPER_PROT_TCP,
                PORTMAPPER_PORT,
            )],
        }
    }

    /// Add a mapping to the static table.
    pub fn set(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> Arc<StaticPortMap> {
        Arc::new(StaticPortMap {
            mappings: self.mappings,
        })
    }
}

impl Default for StaticPortMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal portmapper serving a fixed, immutable table of mappings.
///
/// Only `null`, `getport` and `dump` are implemented; `set`/`unset`/`callit`
/// answer `PROC_UNAVAIL` since the table cannot be changed at runtime. TCP
/// only, matching the rest of this server's transports.
pub struct StaticPortMap {
    mappings: Vec<Mapping>,
}

impl StaticPortMap {
    /// Build directly from a fixed list of mappings.
    pub fn new(mappings: impl IntoIterator<Item = Mapping>) -> Arc<Self> {
        Arc::new(Self {
            mappings: mappings.into_iter().collect(),
        })
    }

    pub async fn bind(self: Arc<Self>, addrs: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addrs).await?;
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::info!("Portmapper listening on {}", listener.local_addr()?);
        let mut incoming = listener
            .incoming()
            .log_warnings(|warn| log::warn!("Listening error: {}", warn))
            .handle_errors(Duration::from_millis(100))
            .backpressure(10);

        while let Some((token, stream)) = incoming.next().await {
            let peer = stream.peer_addr()?;
            log::debug!("Accepted from: {}", peer);

            let s = self.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_tcp_stream(stream).await {
                    log::debug!("Error processing client: {}", err)
                }
                drop(token);
            });
        }
        log::info!("Stopped");
        Ok(())
    }
}

#[async_trait]
impl RpcService for StaticPortMap {
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError>
    where
        Self: Sync,
    {
        if prog != PORTMAPPER_PROG {
            return Err(RpcError::ProgUnavail);
        }
        if vers != PORTMAPPER_VERS {
            return Err(RpcError::ProgMissmatch(MissmatchInfo {
                low: PORTMAPPER_VERS,
                high: PORTMAPPER_VERS,
            }));
        }
        match proc {
            PMAPPROC_NULL => Ok(()),
            PMAPPROC_GETPORT => {
                let mut mapping = Mapping::default();
                mapping.read_xdr(args)?;
                let port = self
                    .mappings
                    .iter()
                    .find(|m| {
                        m.prog == mapping.prog && m.vers == mapping.vers && m.prot == mapping.prot
                    })
                    .map_or(0u32, |m| m.port);
                port.write_xdr(ret)?;
                Ok(())
            }
            PMAPPROC_DUMP => {
                for mapping in self.mappings.iter() {
                    true.write_xdr(ret)?;
                    mapping.write_xdr(ret)?;
                }
                false.write_xdr(ret)?;
                Ok(())
            }
            PMAPPROC_SET | PMAPPROC_UNSET => Err(RpcError::ProcUnavail),
            _ => Err(RpcError::ProcUnavail),
        }
    }
}
