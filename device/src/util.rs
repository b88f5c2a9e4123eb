use alloc::{sync::Arc, vec::Vec};
use futures::lock::Mutex;

use crate::{Device, DeviceError};

pub struct EchoDevice;

impl EchoDevice {
    pub fn new_arc() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self))
    }
}

impl Device for EchoDevice {
    fn execute(&mut self, cmd: &Vec<u8>) -> Vec<u8> {
        cmd.clone()
    }

    fn get_status(&mut self) -> Result<u8, DeviceError> {
        Ok(0)
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

pub struct SimpleDevice;

impl SimpleDevice {
    pub fn new_arc() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self))
    }
}

impl Device for SimpleDevice {
    fn execute(&mut self, cmd: &Vec<u8>) -> Vec<u8> {
        match cmd.as_slice() {
            x if x.eq_ignore_ascii_case(b"*IDN?") => b"Cyberdyne systems,T800 Model 101,A9012.C,V2.4".to_vec(),
            x if x.eq_ignore_ascii_case(b"EVENT") => b"".to_vec(),
            x if x.eq_ignore_ascii_case(b"QUERY?") => b"RESPONSE".to_vec(),
            _ => cmd.clone(),
        }
    }

    fn get_status(&mut self) -> Result<u8, DeviceError> {
        Ok(0)
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Reference "time server" adapter: answers `*IDN?` with its own identity
/// and `TIME?` with the current UTC time, everything else is an error string.
///
/// Not a protocol requirement by itself - used to exercise a server end to
/// end without a real instrument attached.
pub struct TimeDevice {
    name: Vec<u8>,
}

impl TimeDevice {
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into() }
    }

    pub fn new_arc(name: impl Into<Vec<u8>>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(name)))
    }

    fn now_hms_utc() -> (u8, u8, u8) {
        let secs = duration_since_epoch_secs();
        let hh = (secs / 3600) % 24;
        let mm = (secs / 60) % 60;
        let ss = secs % 60;
        (hh as u8, mm as u8, ss as u8)
    }
}

#[cfg(feature = "std")]
fn duration_since_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(not(feature = "std"))]
fn duration_since_epoch_secs() -> u64 {
    0
}

impl Device for TimeDevice {
    fn execute(&mut self, cmd: &Vec<u8>) -> Vec<u8> {
        let lower: Vec<u8> = cmd.iter().map(u8::to_ascii_lowercase).collect();
        if lower.starts_with(b"*idn?") {
            let mut resp = b"TIME_SERVER,0,".to_vec();
            resp.extend_from_slice(&self.name);
            resp.push(b'\n');
            resp
        } else if lower.starts_with(b"time?") {
            let (hh, mm, ss) = Self::now_hms_utc();
            alloc::format!("{:02}:{:02}:{:02} +0000", hh, mm, ss).into_bytes()
        } else {
            b"INVALID_QUERY\n".to_vec()
        }
    }

    fn get_status(&mut self) -> Result<u8, DeviceError> {
        Ok(0)
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
