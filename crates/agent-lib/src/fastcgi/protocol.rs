//! FastCGI record encoding
//!
//! Just enough of the FastCGI 1.0 protocol for a single RESPONDER request:
//! BEGIN_REQUEST, PARAMS, STDIN out; STDOUT, STDERR, END_REQUEST in.

use super::FastCgiError;

/// Size of a record header in bytes
pub const HEADER_LEN: usize = 8;

/// Protocol version written in every header
pub const VERSION_1: u8 = 1;

/// Largest content a single record can carry
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Role requested in BEGIN_REQUEST
pub const ROLE_RESPONDER: u16 = 1;

/// Record types used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
}

impl RecordType {
    pub fn as_u8(self) -> u8 {
        match self {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType => 11,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, FastCgiError> {
        Ok(match value {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            other => return Err(FastCgiError::UnknownRecordType(other)),
        })
    }
}

/// Record header: version, type, request id, content and padding length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_len: u16,
    pub padding_len: u8,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_len.to_be_bytes();
        [
            VERSION_1,
            self.record_type.as_u8(),
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_len,
            0,
        ]
    }

    pub fn from_bytes(data: &[u8; HEADER_LEN]) -> Result<Self, FastCgiError> {
        if data[0] != VERSION_1 {
            return Err(FastCgiError::UnsupportedVersion(data[0]));
        }

        Ok(Self {
            record_type: RecordType::from_u8(data[1])?,
            request_id: u16::from_be_bytes([data[2], data[3]]),
            content_len: u16::from_be_bytes([data[4], data[5]]),
            padding_len: data[6],
        })
    }

    /// Bytes following the header: content plus padding
    pub fn body_len(&self) -> usize {
        self.content_len as usize + self.padding_len as usize
    }
}

/// Append one or more records carrying `content` to `buf`.
///
/// Content longer than a record allows is split; empty content writes a
/// single empty record (the stream terminator).
pub fn write_stream(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    if content.is_empty() {
        write_record(buf, record_type, request_id, &[]);
        return;
    }

    for chunk in content.chunks(MAX_CONTENT_LEN) {
        write_record(buf, record_type, request_id, chunk);
    }
}

fn write_record(buf: &mut Vec<u8>, record_type: RecordType, request_id: u16, content: &[u8]) {
    // Pad to an 8-byte boundary
    let padding_len = ((8 - content.len() % 8) % 8) as u8;
    let header = RecordHeader {
        record_type,
        request_id,
        content_len: content.len() as u16,
        padding_len,
    };

    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(content);
    buf.extend(std::iter::repeat(0u8).take(padding_len as usize));
}

/// BEGIN_REQUEST body for the responder role without keep-alive
pub fn begin_request_body(role: u16) -> [u8; 8] {
    let role = role.to_be_bytes();
    [role[0], role[1], 0, 0, 0, 0, 0, 0]
}

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

/// Encode name-value pairs for a PARAMS stream
pub fn encode_params<'a, I>(params: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut buf = Vec::new();
    for (name, value) in params {
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

/// Decode a PARAMS stream back into pairs
pub fn decode_params(mut data: &[u8]) -> Result<Vec<(String, String)>, FastCgiError> {
    fn read_length(data: &mut &[u8]) -> Result<usize, FastCgiError> {
        let first = *data.first().ok_or(FastCgiError::Truncated)?;
        if first & 0x80 == 0 {
            *data = &data[1..];
            return Ok(first as usize);
        }
        if data.len() < 4 {
            return Err(FastCgiError::Truncated);
        }
        let len = u32::from_be_bytes([first & 0x7f, data[1], data[2], data[3]]);
        *data = &data[4..];
        Ok(len as usize)
    }

    let mut pairs = Vec::new();
    while !data.is_empty() {
        let name_len = read_length(&mut data)?;
        let value_len = read_length(&mut data)?;
        if data.len() < name_len + value_len {
            return Err(FastCgiError::Truncated);
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&data[name_len..name_len + value_len]).into_owned();
        data = &data[name_len + value_len..];
        pairs.push((name, value));
    }
    Ok(pairs)
}

/// END_REQUEST body: application status and protocol status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    pub const REQUEST_COMPLETE: u8 = 0;

    pub fn from_bytes(content: &[u8]) -> Result<Self, FastCgiError> {
        if content.len() < 8 {
            return Err(FastCgiError::Truncated);
        }
        Ok(Self {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: content[4],
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let status = self.app_status.to_be_bytes();
        [
            status[0],
            status[1],
            status[2],
            status[3],
            self.protocol_status,
            0,
            0,
            0,
        ]
    }
}
