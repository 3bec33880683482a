//! RTP header decoding and payload type rewriting.
//!
//! Implements the RFC 3550 fixed header. Only the fixed 12 bytes are
//! re-encoded; CSRCs, header extensions and the payload stay in place.

use crate::error::RelayError;

const FIXED_HEADER_LEN: usize = 12;

/// RTP fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (always 2)
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// Payload type (0-127)
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Decode and validate the header of a complete packet.
    ///
    /// Checks the version and that the CSRC list, extension and padding all
    /// fit inside `data`.
    pub fn decode(data: &[u8]) -> Result<Self, RelayError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(RelayError::Packet(format!(
                "{} bytes is shorter than the fixed header",
                data.len()
            )));
        }

        let byte0 = data[0];
        let version = (byte0 >> 6) & 0x03;
        if version != 2 {
            return Err(RelayError::Packet(format!("unsupported version {}", version)));
        }

        let header = RtpHeader {
            version,
            padding: (byte0 & 0x20) != 0,
            extension: (byte0 & 0x10) != 0,
            csrc_count: byte0 & 0x0F,
            marker: (data[1] & 0x80) != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        };

        let mut offset = header.header_size();
        if header.extension {
            if data.len() < offset + 4 {
                return Err(RelayError::Packet("truncated header extension".to_string()));
            }
            // Extension length is in 32-bit words
            let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
        }
        if offset > data.len() {
            return Err(RelayError::Packet("header runs past end of packet".to_string()));
        }
        if header.padding {
            let pad = data[data.len() - 1] as usize;
            if pad == 0 || offset + pad > data.len() {
                return Err(RelayError::Packet(format!("invalid padding length {}", pad)));
            }
        }

        Ok(header)
    }

    /// Fixed header plus CSRC list
    pub fn header_size(&self) -> usize {
        FIXED_HEADER_LEN + self.csrc_count as usize * 4
    }

    /// Encode the fixed header into the first 12 bytes of `buffer`.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, RelayError> {
        if buffer.len() < FIXED_HEADER_LEN {
            return Err(RelayError::Packet("buffer too small for header".to_string()));
        }

        let byte0 = (self.version << 6)
            | if self.padding { 0x20 } else { 0 }
            | if self.extension { 0x10 } else { 0 }
            | (self.csrc_count & 0x0F);
        let byte1 = if self.marker { 0x80 } else { 0 } | (self.payload_type & 0x7F);

        buffer[0] = byte0;
        buffer[1] = byte1;
        buffer[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buffer[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        Ok(FIXED_HEADER_LEN)
    }
}

/// Decode `packet`, stamp `payload_type` on it and re-encode it in place.
/// Returns the packet length.
pub fn rewrite_payload_type(packet: &mut [u8], payload_type: u8) -> Result<usize, RelayError> {
    let mut header = RtpHeader::decode(packet)?;
    header.payload_type = payload_type;
    header.encode(packet)?;
    Ok(packet.len())
}
