use std::{io, net::IpAddr};

use crate::common::{
    portmapper::{xdr::Mapping, PORTMAPPER_PORT, PORTMAPPER_PROT_TCP},
    vxi11::{
        xdr::{CreateLinkParms, CreateLinkResp, DeviceErrorCode},
        DEVICE_CORE, DEVICE_CORE_VERSION,
    },
};

pub mod portmapper;
pub mod vxi11;

use portmapper::PortMapperClient;
use vxi11::Vxi11CoreClient;

/// Error returned by the high level [connect] helper: either an RPC-level
/// transport failure or a VXI-11 `device_error` reported by the instrument.
#[derive(Debug)]
pub(crate) enum VxiClientError {
    Rpc(crate::common::onc_rpc::RpcError),
    Device(DeviceErrorCode),
}

impl From<crate::common::onc_rpc::RpcError> for VxiClientError {
    fn from(rpc: crate::common::onc_rpc::RpcError) -> Self {
        Self::Rpc(rpc)
    }
}

impl From<io::Error> for VxiClientError {
    fn from(io: io::Error) -> Self {
        Self::Rpc(crate::common::onc_rpc::RpcError::from(io))
    }
}

/// Look up the core channel's port via the portmapper at `addr` and
/// establish a link to `device` (e.g. `"inst0"`).
///
/// Returns the connected core client and the link response (carrying the
/// link id, the abort channel's port and the negotiated max receive size).
pub(crate) async fn connect(
    addr: IpAddr,
    client_id: i32,
    lock_device: bool,
    lock_timeout: u32,
    device: String,
) -> Result<(Vxi11CoreClient, CreateLinkResp), VxiClientError> {
    let mut portmap = PortMapperClient::connect_tcp((addr, PORTMAPPER_PORT)).await?;
    let core_port = portmap
        .getport(Mapping::new(
            DEVICE_CORE,
            DEVICE_CORE_VERSION,
            PORTMAPPER_PROT_TCP,
            0,
        ))
        .await?;
    log::debug!("Core channel @ port {}", core_port);

    let mut core_client = Vxi11CoreClient::connect((addr, core_port)).await?;

    let link_resp = core_client
        .create_link(CreateLinkParms {
            client_id,
            lock_device,
            lock_timeout,
            device,
        })
        .await?;

    if link_resp.error == DeviceErrorCode::NoError {
        Ok((core_client, link_resp))
    } else {
        log::error!("Create link returned error: {:?}", link_resp.error);
        Err(VxiClientError::Device(link_resp.error))
    }
}
