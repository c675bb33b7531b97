//! Packet framing over a byte stream with sequence-id tracking.

use std::io::{Read, Write};

use sqlbridge_core::error::{ConnectionError, ConnectionErrorKind, Error};

use crate::protocol::{MAX_PAYLOAD_LEN, PacketHeader, writer};

/// Reads and writes whole payloads, reassembling split packets.
#[derive(Debug)]
pub struct PacketStream<S> {
    inner: S,
    sequence_id: u8,
}

impl<S: Read + Write> PacketStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            sequence_id: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Every command starts a new exchange at sequence id 0.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Read one logical payload.
    pub fn read_payload(&mut self) -> Result<Vec<u8>, Error> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; PacketHeader::SIZE];
            self.inner
                .read_exact(&mut header)
                .map_err(|e| lost("Failed to read packet header", e))?;
            let header = PacketHeader::from_bytes(header);
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            self.inner
                .read_exact(&mut payload[start..])
                .map_err(|e| lost("Failed to read packet payload", e))?;

            if len < MAX_PAYLOAD_LEN {
                return Ok(payload);
            }
        }
    }

    /// Write one logical payload, splitting it as needed.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (bytes, next) = writer::frame(payload, self.sequence_id);
        self.sequence_id = next;
        self.inner
            .write_all(&bytes)
            .and_then(|()| self.inner.flush())
            .map_err(|e| lost("Failed to write packet", e))
    }
}

fn lost(context: &str, err: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{}: {}", context, err),
        source: Some(Box::new(err)),
    })
}
