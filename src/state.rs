//! Ordered binary primitives for heap state records.
//!
//! Records are sequential little-endian fields with no padding: strings are a
//! u32 byte length followed by UTF-8 bytes, integers are fixed-width, byte
//! blocks are raw. Readers must consume fields in exactly the order writers
//! produced them.

use std::io::{self, Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("unexpected end of state stream")]
    UnexpectedEof,
    #[error("state string is not valid utf-8")]
    InvalidUtf8,
    #[error("state string of {0} bytes exceeds the u32 length prefix")]
    StringTooLong(usize),
    #[error("state stream i/o failure")]
    Io(#[from] io::Error),
}

fn read_failure(err: io::Error) -> StateError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        StateError::UnexpectedEof
    } else {
        StateError::Io(err)
    }
}

/// Writes state fields to an underlying byte sink.
#[derive(Debug)]
pub struct StateWriter<W: Write> {
    inner: W,
}

impl<W: Write> StateWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), StateError> {
        let bytes = value.as_bytes();
        let len =
            u32::try_from(bytes.len()).map_err(|_| StateError::StringTooLong(bytes.len()))?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), StateError> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StateError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads state fields from an underlying byte source.
#[derive(Debug)]
pub struct StateReader<R: Read> {
    inner: R,
}

impl<R: Read> StateReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_str(&mut self) -> Result<String, StateError> {
        let mut len = [0u8; 4];
        self.inner.read_exact(&mut len).map_err(read_failure)?;
        let bytes = self.read_bytes(u32::from_le_bytes(len) as usize)?;
        String::from_utf8(bytes).map_err(|_| StateError::InvalidUtf8)
    }

    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf).map_err(read_failure)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StateError> {
        let mut bytes = vec![0u8; len];
        self.inner.read_exact(&mut bytes).map_err(read_failure)?;
        Ok(bytes)
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), StateError> {
        self.inner.read_exact(buf).map_err(read_failure)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
