use crc32c::{Crc32cReader, Crc32cWriter};
use std::io::{self, Read, Write};

use crate::error::{LogError, Result};

/// One checksummed frame in the log: a single LSN's worth of opaque payload
/// bytes: a fixed header, the payload, then a trailing CRC32C over
/// header+payload.
///
/// Each `Frame` carries exactly one WAL entry — group-level batching is not
/// part of this engine's scope, and keeping one entry per frame keeps
/// `AppendEntry`'s returned LSN unambiguous.
pub struct Frame {
    pub lsn: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub const HEADER_LEN: usize = 8 /* lsn */ + 4 /* len */;
    pub const TRAILER_LEN: usize = 4 /* crc32c */;

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len() + Self::TRAILER_LEN
    }

    pub fn write<W: Write>(&self, out: W) -> io::Result<()> {
        let mut out = Crc32cWriter::new(out);
        out.write_all(&self.lsn.to_le_bytes())?;
        out.write_all(&(self.payload.len() as u32).to_le_bytes())?;
        out.write_all(&self.payload)?;
        let crc = out.crc32c();
        let mut out = out.into_inner();
        out.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    /// Reads one frame, or `Ok(None)` at a clean EOF (i.e. zero bytes read
    /// for the header — a torn write mid-header is treated as an IO error).
    pub fn decode<R: Read>(reader: R) -> Result<Option<Self>> {
        let mut reader = Crc32cReader::new(reader);
        let mut lsn_buf = [0u8; 8];
        match read_exact_or_eof(&mut reader, &mut lsn_buf)? {
            false => return Ok(None),
            true => {}
        }
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).map_err(LogError::Io)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).map_err(LogError::Io)?;
        let computed = reader.crc32c();
        let mut inner = reader.into_inner();
        let mut crc_buf = [0u8; 4];
        inner.read_exact(&mut crc_buf).map_err(LogError::Io)?;
        let stored = u32::from_le_bytes(crc_buf);
        if stored != computed {
            return Err(LogError::ChecksumMismatch { offset: 0 });
        }
        Ok(Some(Frame {
            lsn: u64::from_le_bytes(lsn_buf),
            payload,
        }))
    }
}

fn read_exact_or_eof<R: Read>(mut r: R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(false)
                } else {
                    Err(LogError::Corrupt("truncated frame header".into()))
                }
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LogError::Io(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = Frame {
            lsn: 7,
            payload: b"hello wal".to_vec(),
        };
        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        let decoded = Frame::decode(&mut buf.as_slice()).unwrap().unwrap();
        assert_eq!(decoded.lsn, 7);
        assert_eq!(decoded.payload, b"hello wal");
    }

    #[test]
    fn bitflip_is_detected() {
        let frame = Frame {
            lsn: 1,
            payload: vec![1u8; 64],
        };
        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[Frame::HEADER_LEN] ^= 0xff;
        let _ = last;
        let err = Frame::decode(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, LogError::ChecksumMismatch { .. }));
    }

    #[test]
    fn clean_eof_returns_none() {
        let buf: Vec<u8> = Vec::new();
        assert!(Frame::decode(&mut buf.as_slice()).unwrap().is_none());
    }
}
