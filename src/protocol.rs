use crate::binary::{ByteReader, ByteWriter};
use crate::codec;
use crate::debug;
use crate::error::{Result, ShareError};
use crate::values::PayloadValue;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One-byte message tag. Discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Unknown = 0,
    PropertyChanged = 1,
    Command = 2,
    Spawn = 3,
    Despawn = 4,
    Ping = 5,
    Pong = 6,
}

impl MessageType {
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    pub fn from_tag(tag: u8) -> Result<MessageType> {
        match tag {
            0 => Ok(MessageType::Unknown),
            1 => Ok(MessageType::PropertyChanged),
            2 => Ok(MessageType::Command),
            3 => Ok(MessageType::Spawn),
            4 => Ok(MessageType::Despawn),
            5 => Ok(MessageType::Ping),
            6 => Ok(MessageType::Pong),
            other => Err(ShareError::UnknownMessageType(other)),
        }
    }
}

/// Wire envelope: `[message type][data type][payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub message_type: MessageType,
    pub data: PayloadValue,
}

impl ProtocolMessage {
    pub fn new(message_type: MessageType, data: PayloadValue) -> Self {
        Self { message_type, data }
    }

    /// Wraps a value into an envelope. A value that is already a wrapped
    /// message is returned unchanged, so wrapping is idempotent.
    pub fn wrap(message_type: MessageType, value: PayloadValue) -> ProtocolMessage {
        match value {
            PayloadValue::Message(message) => *message,
            data => ProtocolMessage { message_type, data },
        }
    }

    /// Inverse of `wrap`: peels one envelope level off a `Message` payload.
    pub fn unwrap(self) -> PayloadValue {
        self.data
    }

    pub fn byte_size(&self) -> usize {
        1 + codec::byte_size(&self.data)
    }
}

/// Unwraps a `Message` payload to its inner data; any other value is
/// returned unchanged, so unwrapping is idempotent too.
pub fn unwrap_value(value: PayloadValue) -> PayloadValue {
    match value {
        PayloadValue::Message(message) => message.data,
        other => other,
    }
}

pub fn encode_message(message: &ProtocolMessage) -> Result<Bytes> {
    let size = message.byte_size();
    let mut buffer = vec![0u8; size];
    let mut writer = ByteWriter::new(&mut buffer);
    writer.write_u8(message.message_type.tag())?;
    codec::encode_value(&message.data, &mut writer)?;
    debug::log_message("Encoded", message);
    Ok(Bytes::from(buffer))
}

pub fn decode_message(data: &[u8]) -> Result<ProtocolMessage> {
    let mut reader = ByteReader::new(data);
    let message_type = MessageType::from_tag(reader.read_u8()?)?;
    let data = codec::decode_value(&mut reader)?;
    let message = ProtocolMessage { message_type, data };
    debug::log_message("Decoded", &message);
    Ok(message)
}

/// Stream form: u32 LE length frame followed by the encoded message.
pub fn write_message<W: Write>(message: &ProtocolMessage, writer: &mut W) -> Result<()> {
    let data = encode_message(message)?;
    let mut framed = BytesMut::with_capacity(4 + data.len());
    framed.put_u32_le(data.len() as u32);
    framed.put(data);
    writer.write_all(&framed)?;
    Ok(())
}

pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<ProtocolMessage>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;

    Ok(Some(decode_message(&buffer)?))
}

const KEY_SEPARATOR: char = '.';
const ESCAPE_CHAR: char = '-';

/// Joins an encoded object key and a property name into one flat key.
///
/// `.` is the field separator, so a property name containing one is escaped
/// to `-` first. The escape is lossy and logged as a diagnostic.
pub fn encode_property_key(object_key: &str, property: &str) -> String {
    let property = if property.contains(KEY_SEPARATOR) {
        debug::trace_property_escape(property);
        property.replace(KEY_SEPARATOR, &ESCAPE_CHAR.to_string())
    } else {
        property.to_string()
    };
    format!("{}{}{}", object_key, KEY_SEPARATOR, property)
}

/// Splits a flat key back into (object key, property name).
///
/// The object key is itself dot-delimited, so the split is on the last `.`.
pub fn decode_property_key(key: &str) -> Result<(&str, &str)> {
    match key.rsplit_once(KEY_SEPARATOR) {
        Some((object_key, property)) if !object_key.is_empty() && !property.is_empty() => {
            Ok((object_key, property))
        }
        _ => Err(ShareError::InvalidPropertyKey(key.to_string())),
    }
}
