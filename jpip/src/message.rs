use log::{debug, trace};
use std::fmt;

use crate::databin::DatabinClass;
use crate::session::Arrival;
use crate::SessionError;

// A VBAS longer than this cannot fit 64 bits.
const MAX_VBAS_BYTES: usize = 9;

/// ISO/IEC 15444-9 Table D.3 - End-of-response reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfResponseReason {
    ImageDone,
    WindowDone,
    WindowChange,
    ByteLimitReached,
    QualityLimitReached,
    SessionLimitReached,
    ResponseLimitReached,
    NonSpecified,
    Reserved(u8),
}

impl EndOfResponseReason {
    pub fn new(value: u8) -> EndOfResponseReason {
        match value {
            1 => EndOfResponseReason::ImageDone,
            2 => EndOfResponseReason::WindowDone,
            3 => EndOfResponseReason::WindowChange,
            4 => EndOfResponseReason::ByteLimitReached,
            5 => EndOfResponseReason::QualityLimitReached,
            6 => EndOfResponseReason::SessionLimitReached,
            7 => EndOfResponseReason::ResponseLimitReached,
            0xFF => EndOfResponseReason::NonSpecified,
            other => EndOfResponseReason::Reserved(other),
        }
    }
}

impl fmt::Display for EndOfResponseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EndOfResponseReason::ImageDone => write!(f, "image done"),
            EndOfResponseReason::WindowDone => write!(f, "window done"),
            EndOfResponseReason::WindowChange => write!(f, "window change"),
            EndOfResponseReason::ByteLimitReached => write!(f, "byte limit reached"),
            EndOfResponseReason::QualityLimitReached => write!(f, "quality limit reached"),
            EndOfResponseReason::SessionLimitReached => write!(f, "session limit reached"),
            EndOfResponseReason::ResponseLimitReached => write!(f, "response limit reached"),
            EndOfResponseReason::NonSpecified => write!(f, "non-specified"),
            EndOfResponseReason::Reserved(value) => write!(f, "reserved reason {}", value),
        }
    }
}

/// One message of a JPP-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    Databin {
        arrival: Arrival<'a>,
        /// Aux value of extended classes.
        aux: Option<u64>,
    },
    EndOfResponse {
        reason: EndOfResponseReason,
        body: &'a [u8],
    },
}

/// Decodes the messages of a JPP-stream (ISO/IEC 15444-9 A.2).
///
/// Stops after the first malformed message.
#[derive(Debug)]
pub struct MessageDecoder<'a> {
    bytes: &'a [u8],
    offset: usize,
    // Class and codestream of the previous message, used when a header leaves them out.
    class_id: u64,
    codestream: u64,
}

impl<'a> MessageDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        MessageDecoder {
            bytes,
            offset: 0,
            class_id: 0,
            codestream: 0,
        }
    }

    /// Offset of the next message.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn malformed(&self, offset: usize, reason: &'static str) -> SessionError {
        SessionError::MalformedMessage {
            offset: offset as u64,
            reason,
        }
    }

    fn read_byte(&mut self) -> Result<u8, SessionError> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or_else(|| self.malformed(self.offset, "truncated message header"))?;
        self.offset += 1;
        Ok(byte)
    }

    // A.2.1 - variable-length byte-aligned segment
    fn read_vbas(&mut self) -> Result<u64, SessionError> {
        let start = self.offset;
        let mut value = 0u64;
        for _ in 0..MAX_VBAS_BYTES {
            let byte = self.read_byte()?;
            value = (value << 7) | (byte & 0x7F) as u64;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.malformed(start, "VBAS too long"))
    }

    fn read_body(&mut self, length: u64) -> Result<&'a [u8], SessionError> {
        let start = self.offset;
        let end = usize::try_from(length)
            .ok()
            .and_then(|length| start.checked_add(length))
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.malformed(start, "truncated message body"))?;
        self.offset = end;
        Ok(&self.bytes[start..end])
    }

    fn decode(&mut self) -> Result<Message<'a>, SessionError> {
        let start = self.offset;
        let first = self.read_byte()?;

        // A.3 - End of response
        if first == 0x00 {
            let reason = EndOfResponseReason::new(self.read_byte()?);
            let length = self.read_vbas()?;
            let body = self.read_body(length)?;
            debug!("end of response at {}: {}", start, reason);
            return Ok(Message::EndOfResponse { reason, body });
        }

        // A.2.2 - Bin-ID: continuation, 2 indicator bits, completeness, 4 bits of in-class id
        let indicator = (first >> 5) & 0b11;
        let is_last = first & 0b0001_0000 != 0;
        let mut in_class_id = (first & 0b0000_1111) as u64;
        if indicator == 0 {
            return Err(self.malformed(start, "prohibited Bin-ID indicator"));
        }
        let mut byte = first;
        let mut length = 1;
        while byte & 0x80 != 0 {
            if length == MAX_VBAS_BYTES {
                return Err(self.malformed(start, "VBAS too long"));
            }
            byte = self.read_byte()?;
            in_class_id = (in_class_id << 7) | (byte & 0x7F) as u64;
            length += 1;
        }

        if indicator >= 2 {
            self.class_id = self.read_vbas()?;
        }
        if indicator == 3 {
            self.codestream = self.read_vbas()?;
        }
        let offset = self.read_vbas()?;
        let length = self.read_vbas()?;
        let aux = if DatabinClass::is_extended(self.class_id) {
            Some(self.read_vbas()?)
        } else {
            None
        };
        let bytes = self.read_body(length)?;
        trace!(
            "message at {}: class {} id {} offset {} length {}{}",
            start,
            self.class_id,
            in_class_id,
            offset,
            length,
            if is_last { ", last" } else { "" }
        );

        Ok(Message::Databin {
            arrival: Arrival {
                class_id: self.class_id,
                in_class_id,
                offset,
                bytes,
                is_last_byte: is_last,
                codestream_index: self.codestream,
            },
            aux,
        })
    }
}

impl<'a> Iterator for MessageDecoder<'a> {
    type Item = Result<Message<'a>, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let result = self.decode();
        if result.is_err() {
            self.offset = self.bytes.len();
        }
        Some(result)
    }
}
