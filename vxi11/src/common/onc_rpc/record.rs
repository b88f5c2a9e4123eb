use std::io::{Error, ErrorKind, Result};

use byteorder::{ByteOrder, NetworkEndian};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one RFC 1831 record-marked RPC message.
///
/// Only single-fragment records are accepted: a fragment header with the
/// last-fragment bit clear is a fatal protocol error on this connection,
/// since cross-fragment reassembly is out of scope.
pub(crate) async fn read_record<RD>(reader: &mut RD, maxlen: usize) -> Result<Vec<u8>>
where
    RD: AsyncRead + Unpin,
{
    let mut fragment_header = [0u8; 4];
    reader.read_exact(&mut fragment_header).await?;
    let fragment_word = NetworkEndian::read_u32(&fragment_header[..]);

    if fragment_word & 0x80000000 == 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "multi-fragment RPC records are not supported",
        ));
    }

    let len = (fragment_word & 0x7FFFFFFF) as usize;
    if len > maxlen {
        return Err(ErrorKind::OutOfMemory.into());
    }

    let mut buf = Vec::new();
    buf.try_reserve(len)
        .map_err(|_| Error::from(ErrorKind::OutOfMemory))?;
    reader.take(len as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

pub(crate) async fn write_record<WR>(writer: &mut WR, record: Vec<u8>) -> Result<()>
where
    WR: AsyncWrite + Unpin,
{
    // Write header
    let fragment_len: u32 = 0x80000000 | (record.len() & 0x7FFFFFFF) as u32;
    let mut fragment_header = [0u8; 4];
    NetworkEndian::write_u32(&mut fragment_header, fragment_len);
    writer.write_all(&fragment_header).await?;

    // Write record
    writer.write_all(record.as_slice()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::io::Cursor;

    #[async_std::test]
    async fn single_fragment_round_trip() {
        let mut cursor = Cursor::new(b"\x80\x00\x00\x04\x01\x02\x03\x04".to_vec());
        let rec = super::read_record(&mut cursor, 10).await.unwrap();

        assert_eq!(rec[..], [1, 2, 3, 4]);
    }

    #[async_std::test]
    async fn rejects_non_last_fragment() {
        let mut cursor = Cursor::new(b"\x00\x00\x00\x02\x01\x02\x80\x00\x00\x02\x03\x04".to_vec());
        let res = super::read_record(&mut cursor, 10).await;

        assert!(res.is_err());
    }

    #[async_std::test]
    async fn round_trip_varying_sizes() {
        for len in [0usize, 1, 3, 4, 5, 1024, 65536] {
            let data = vec![0xABu8; len];
            let mut buf = Vec::new();
            super::write_record(&mut buf, data.clone()).await.unwrap();

            assert_eq!(buf.len(), 4 + len);

            let mut cursor = Cursor::new(buf);
            let rec = super::read_record(&mut cursor, 1024 * 1024).await.unwrap();
            assert_eq!(rec, data);
        }
    }

    #[async_std::test]
    async fn rejects_oversized_record() {
        let mut buf = Vec::new();
        super::write_record(&mut buf, vec![0u8; 100]).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let res = super::read_record(&mut cursor, 10).await;
        assert!(res.is_err());
    }
}
