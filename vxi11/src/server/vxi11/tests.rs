//! End-to-end exercises of the core/async channel pair against an in-process
//! server, covering the scenarios a real VISA client would drive.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_std::{net::TcpListener, task};
use futures::{channel::mpsc, lock::Mutex, StreamExt};
use lxi_device::{
    lock::SharedLock,
    status::Sender as StatusSender,
    util::{SimpleDevice, TimeDevice},
    Device,
};

use crate::client::vxi11::{Vxi11AsyncClient, Vxi11CoreClient, VxiIntrServer};
use crate::common::vxi11::xdr::{
    CreateLinkParms, DeviceAddrFamily, DeviceEnableSrqParms, DeviceErrorCode, DeviceFlags,
    DeviceLockParms, DeviceReadParms, DeviceRemoteFunc, DeviceWriteParms,
};
use crate::common::xdr::prelude::Opaque;

use super::prelude::*;

const WAITLOCK: DeviceFlags = DeviceFlags(0x01);
const END: DeviceFlags = DeviceFlags(0x08);

async fn spawn_server<DEV>(device: Arc<Mutex<DEV>>) -> (SocketAddr, SocketAddr, StatusSender)
where
    DEV: Device + Send + 'static,
{
    let shared = SharedLock::new();
    let status = StatusSender::new();
    let (core, asyn) = VxiServerBuilder::new().build(shared, device, status.clone());

    let core_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let core_addr = core_listener.local_addr().unwrap();
    task::spawn(core.serve(core_listener));

    let async_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let async_addr = async_listener.local_addr().unwrap();
    task::spawn(asyn.serve(async_listener));

    (core_addr, async_addr, status)
}

fn create_link_parms(client_id: i32, device: &str) -> CreateLinkParms {
    CreateLinkParms {
        client_id,
        lock_device: false,
        lock_timeout: 0,
        device: device.to_string(),
    }
}

#[async_std::test]
async fn time_adapter_answers_idn() {
    let (core_addr, _async_addr, _status) = spawn_server(TimeDevice::new_arc("inst0")).await;
    let mut client = Vxi11CoreClient::connect(core_addr).await.unwrap();

    let link = client.create_link(create_link_parms(1, "inst0")).await.unwrap();
    assert_eq!(link.error, DeviceErrorCode::NoError);

    let write = client
        .device_write(DeviceWriteParms {
            lid: link.lid,
            io_timeout: 1000,
            lock_timeout: 0,
            flags: END,
            data: Opaque(b"*IDN?\n".to_vec()),
        })
        .await
        .unwrap();
    assert_eq!(write.error, DeviceErrorCode::NoError);
    assert_eq!(write.size, 6);

    let read = client
        .device_read(DeviceReadParms {
            lid: link.lid,
            request_size: 1024,
            io_timeout: 1000,
            lock_timeout: 0,
            flags: DeviceFlags(0),
            term_char: 0,
        })
        .await
        .unwrap();
    assert_eq!(read.error, DeviceErrorCode::NoError);
    assert_eq!(read.reason & 0x4, 0x4, "END reason bit should be set");
    assert_eq!(&read.data.0, b"TIME_SERVER,0,inst0\n");
}

#[async_std::test]
async fn time_adapter_answers_time_query() {
    let (core_addr, _async_addr, _status) = spawn_server(TimeDevice::new_arc("inst0")).await;
    let mut client = Vxi11CoreClient::connect(core_addr).await.unwrap();

    let link = client.create_link(create_link_parms(1, "inst0")).await.unwrap();
    assert_eq!(link.error, DeviceErrorCode::NoError);

    client
        .device_write(DeviceWriteParms {
            lid: link.lid,
            io_timeout: 1000,
            lock_timeout: 0,
            flags: END,
            data: Opaque(b"TIME?\n".to_vec()),
        })
        .await
        .unwrap();

    let read = client
        .device_read(DeviceReadParms {
            lid: link.lid,
            request_size: 1024,
            io_timeout: 1000,
            lock_timeout: 0,
            flags: DeviceFlags(0),
            term_char: 0,
        })
        .await
        .unwrap();
    assert_eq!(read.error, DeviceErrorCode::NoError);
    assert_eq!(read.reason & 0x4, 0x4);

    let text = std::str::from_utf8(&read.data.0).expect("time reply must be ascii");
    let re_ok = text.len() == 15
        && text.as_bytes()[2] == b':'
        && text.as_bytes()[5] == b':'
        && text[9..].starts_with(" +0000")
        && text[0..2].parse::<u8>().map_or(false, |h| h < 24)
        && text[3..5].parse::<u8>().map_or(false, |m| m < 60)
        && text[6..8].parse::<u8>().map_or(false, |s| s < 60);
    assert!(re_ok, "unexpected TIME? reply: {:?}", text);
}

#[async_std::test]
async fn lock_contention_times_out_then_succeeds_after_release() {
    let (core_addr, _async_addr, _status) = spawn_server(SimpleDevice::new_arc()).await;

    let mut conn_a = Vxi11CoreClient::connect(core_addr).await.unwrap();
    let link_a = conn_a.create_link(create_link_parms(1, "inst0")).await.unwrap();
    assert_eq!(link_a.error, DeviceErrorCode::NoError);

    let mut conn_b = Vxi11CoreClient::connect(core_addr).await.unwrap();
    let link_b = conn_b.create_link(create_link_parms(2, "inst0")).await.unwrap();
    assert_eq!(link_b.error, DeviceErrorCode::NoError);

    let lock_a = conn_a
        .device_lock(DeviceLockParms {
            lid: link_a.lid,
            flags: WAITLOCK,
            lock_timeout: 1000,
        })
        .await
        .unwrap();
    assert_eq!(lock_a.error, DeviceErrorCode::NoError);

    // B polls without waiting: contended immediately.
    let lock_b_poll = conn_b
        .device_lock(DeviceLockParms {
            lid: link_b.lid,
            flags: DeviceFlags(0),
            lock_timeout: 0,
        })
        .await
        .unwrap();
    assert_eq!(lock_b_poll.error, DeviceErrorCode::DeviceLockedByAnotherLink);

    // B waits with a bounded timeout and comes back empty-handed near that bound.
    let started = Instant::now();
    let lock_b_wait = conn_b
        .device_lock(DeviceLockParms {
            lid: link_b.lid,
            flags: WAITLOCK,
            lock_timeout: 200,
        })
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert_eq!(lock_b_wait.error, DeviceErrorCode::DeviceLockedByAnotherLink);
    assert!(elapsed >= Duration::from_millis(180), "timed out too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2000), "timed out too late: {:?}", elapsed);

    let unlock_a = conn_a.device_unlock(link_a.lid).await.unwrap();
    assert_eq!(unlock_a.error, DeviceErrorCode::NoError);

    let lock_b_final = conn_b
        .device_lock(DeviceLockParms {
            lid: link_b.lid,
            flags: WAITLOCK,
            lock_timeout: 1000,
        })
        .await
        .unwrap();
    assert_eq!(lock_b_final.error, DeviceErrorCode::NoError);
}

#[async_std::test]
async fn srq_round_trip_reaches_client_handle() {
    let (core_addr, _async_addr, mut status) = spawn_server(SimpleDevice::new_arc()).await;

    let mut conn = Vxi11CoreClient::connect(core_addr).await.unwrap();
    let link = conn.create_link(create_link_parms(1, "inst0")).await.unwrap();
    assert_eq!(link.error, DeviceErrorCode::NoError);

    let intr_server = Arc::new(VxiIntrServer::new());
    let intr_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let intr_addr = intr_listener.local_addr().unwrap();
    task::spawn(intr_server.clone().serve_tcp(intr_listener));

    let (tx, mut rx) = mpsc::channel(1);
    intr_server.attach_listener(b"COOKIE".to_vec(), tx).await;

    let chan = conn
        .create_intr_chan(DeviceRemoteFunc {
            host_addr: 0x7F000001,
            host_port: intr_addr.port(),
            prog_num: DEVICE_INTR,
            prog_vers: DEVICE_INTR_VERSION,
            prog_family: DeviceAddrFamily::Tcp,
        })
        .await
        .unwrap();
    assert_eq!(chan.error, DeviceErrorCode::NoError);

    let enable = conn
        .device_enable_srq(DeviceEnableSrqParms {
            lid: link.lid,
            enable: true,
            handle: Opaque(b"COOKIE".to_vec()),
        })
        .await
        .unwrap();
    assert_eq!(enable.error, DeviceErrorCode::NoError);

    status.send_status(0);

    let notified = async_std::future::timeout(Duration::from_secs(1), rx.next()).await;
    assert!(notified.is_ok(), "srq was not delivered within 1s");
}

#[async_std::test]
async fn abort_unblocks_a_read_waiting_on_the_lock() {
    let (core_addr, async_addr, _status) = spawn_server(SimpleDevice::new_arc()).await;

    let mut conn_a = Vxi11CoreClient::connect(core_addr).await.unwrap();
    let mut parms_a = create_link_parms(1, "inst0");
    parms_a.lock_device = true;
    parms_a.lock_timeout = 1000;
    let link_a = conn_a.create_link(parms_a).await.unwrap();
    assert_eq!(link_a.error, DeviceErrorCode::NoError);

    let mut conn_b = Vxi11CoreClient::connect(core_addr).await.unwrap();
    let link_b = conn_b.create_link(create_link_parms(2, "inst0")).await.unwrap();
    assert_eq!(link_b.error, DeviceErrorCode::NoError);

    let read_handle = task::spawn(async move {
        conn_b
            .device_read(DeviceReadParms {
                lid: link_b.lid,
                request_size: 1024,
                io_timeout: 5000,
                lock_timeout: 5000,
                flags: WAITLOCK,
                term_char: 0,
            })
            .await
    });

    // Give the read a moment to block on the still-held exclusive lock.
    task::sleep(Duration::from_millis(100)).await;

    let mut abort_client = Vxi11AsyncClient::connect(async_addr).await.unwrap();
    let abort_resp = abort_client.device_abort(link_b.lid).await.unwrap();
    assert_eq!(abort_resp.error, DeviceErrorCode::NoError);

    let read = read_handle.await.unwrap();
    assert_eq!(read.error, DeviceErrorCode::Abort);
    assert!(read.data.is_empty());
}
