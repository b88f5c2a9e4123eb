use std::{io, net::Ipv4Addr};

use async_std::net::TcpStream;

use crate::common::{
    onc_rpc::prelude::*,
    vxi11::{xdr, DEVICE_INTR_SRQ},
    xdr::prelude::*,
};

/// RPC client half of the SRQ back-channel: connects to the endpoint a
/// client handed us in `create_intr_chan` and fires `device_intr_srq`
/// without waiting on a reply. TCP only; VXI-11 UDP transport is unsupported.
pub(crate) struct VxiSrqClient {
    client: RpcClient,
}

impl VxiSrqClient {
    pub(crate) async fn device_intr_srq(&mut self, handle: &[u8]) -> Result<(), RpcError> {
        let args = xdr::DeviceSrqParms::new(handle.to_vec());
        self.client.call_no_reply(DEVICE_INTR_SRQ, args).await
    }
}

impl VxiSrqClient {
    pub(crate) async fn new(
        host_addr: u32,
        host_port: u16,
        prog_num: u32,
        prog_vers: u32,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect((Ipv4Addr::from(host_addr), host_port)).await?;
        let client = RpcClient::new(stream, prog_num, prog_vers);
        Ok(Self { client })
    }
}
