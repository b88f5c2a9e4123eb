use async_std::net::TcpListener;
use lxi_vxi11::{client::portmapper::prelude::*, server::portmapper::prelude::*};

async fn spawn_static_portmap() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let portmap = StaticPortMapBuilder::new()
        .set(Mapping::new(395183, 1, PORTMAPPER_PROT_TCP, 4322))
        .build();

    async_std::task::spawn(portmap.serve(listener));
    addr
}

#[async_std::test]
async fn portmap_tcp_getport_registered() {
    let addr = spawn_static_portmap().await;
    let mut client = PortMapperClient::connect_tcp(addr).await.unwrap();

    let port = client
        .getport(Mapping::new(395183, 1, PORTMAPPER_PROT_TCP, 0))
        .await
        .unwrap();

    assert_eq!(port, 4322);
}

#[async_std::test]
async fn portmap_tcp_getport_unregistered_is_zero() {
    let addr = spawn_static_portmap().await;
    let mut client = PortMapperClient::connect_tcp(addr).await.unwrap();

    let port = client
        .getport(Mapping::new(0xDEADBEEF, 1, PORTMAPPER_PROT_TCP, 0))
        .await
        .unwrap();

    assert_eq!(port, 0);
}

#[async_std::test]
async fn portmap_tcp_set_unset_unavailable() {
    // The built-in portmapper serves a fixed table; SET/UNSET are optional
    // and this implementation does not support runtime registration.
    let addr = spawn_static_portmap().await;
    let mut client = PortMapperClient::connect_tcp(addr).await.unwrap();

    let res = client
        .set(Mapping::new(0xDEADBEEF, 1, PORTMAPPER_PROT_TCP, 12345))
        .await;
    assert!(res.is_err());
}

#[async_std::test]
#[ignore = "requires a system rpcbind/portmap listening on 127.0.0.1:111"]
async fn portmap_system_rpcbind_null() {
    let mut client = PortMapperClient::connect_tcp((std::net::Ipv4Addr::LOCALHOST, PORTMAPPER_PORT))
        .await
        .unwrap();
    client
        .null(Mapping::new(PORTMAPPER_PROG, PORTMAPPER_VERS, PORTMAPPER_PROT_TCP, 0))
        .await
        .unwrap();
}
