use crate::binary::{self, ByteReader, ByteWriter};
use crate::error::{Result, ShareError};
use crate::protocol::{MessageType, ProtocolMessage};
use crate::values::{DataType, PayloadValue};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Encoded size of a value's payload, excluding the one-byte type tag.
pub fn payload_size(value: &PayloadValue) -> usize {
    match value {
        PayloadValue::Boolean(_) => binary::BOOL_SIZE,
        PayloadValue::Short(_) => binary::SHORT_SIZE,
        PayloadValue::Int(_) => binary::INT_SIZE,
        PayloadValue::Long(_) => binary::LONG_SIZE,
        PayloadValue::Float(_) => binary::FLOAT_SIZE,
        PayloadValue::String(s) => binary::string_size(s),
        PayloadValue::Guid(_) => binary::GUID_SIZE,
        PayloadValue::DateTime(_) => binary::DATETIME_SIZE,
        PayloadValue::TimeSpan(_) => binary::TIMESPAN_SIZE,
        PayloadValue::Color(_) => binary::COLOR_SIZE,
        PayloadValue::Transform(_) => 1 + binary::VECTOR3_SIZE + binary::QUATERNION_SIZE + binary::VECTOR3_SIZE,
        PayloadValue::Command(c) => {
            binary::string_size(&c.target) + binary::string_size(&c.command) + binary::string_size(&c.sender)
        }
        PayloadValue::AnchorPose(a) => binary::string_size(&a.anchor_id) + binary::POSE_SIZE,
        PayloadValue::PingRequest(p) => binary::string_size(&p.sender) + binary::DATETIME_SIZE,
        PayloadValue::PingResponse(p) => binary::string_size(&p.sender) + 2 * binary::DATETIME_SIZE,
        PayloadValue::AvatarPose(a) => {
            let mut size = binary::POSE_SIZE + 2 * binary::BOOL_SIZE;
            if a.left_hand.is_some() {
                size += binary::POSE_SIZE;
            }
            if a.right_hand.is_some() {
                size += binary::POSE_SIZE;
            }
            size
        }
        PayloadValue::Generic(bytes) => binary::bytes_size(bytes),
        PayloadValue::Message(message) => 1 + byte_size(&message.data),
    }
}

/// Full encoded size: one tag byte plus the payload.
pub fn byte_size(value: &PayloadValue) -> usize {
    1 + payload_size(value)
}

/// Writes the type tag followed by the payload in its fixed layout.
pub fn encode_value(value: &PayloadValue, writer: &mut ByteWriter) -> Result<()> {
    writer.write_u8(value.data_type().tag())?;
    match value {
        PayloadValue::Boolean(v) => writer.write_bool(*v),
        PayloadValue::Short(v) => writer.write_i16(*v),
        PayloadValue::Int(v) => writer.write_i32(*v),
        PayloadValue::Long(v) => writer.write_i64(*v),
        PayloadValue::Float(v) => writer.write_f32(*v),
        PayloadValue::String(v) => writer.write_string(v),
        PayloadValue::Guid(v) => writer.write_guid(v),
        PayloadValue::DateTime(v) => writer.write_datetime(v),
        PayloadValue::TimeSpan(v) => writer.write_timespan(v),
        PayloadValue::Color(v) => writer.write_color(v),
        PayloadValue::Transform(v) => {
            writer.write_u8(v.flags)?;
            writer.write_vector3(&v.position)?;
            writer.write_quaternion(&v.rotation)?;
            writer.write_vector3(&v.scale)
        }
        PayloadValue::Command(v) => {
            writer.write_string(&v.target)?;
            writer.write_string(&v.command)?;
            writer.write_string(&v.sender)
        }
        PayloadValue::AnchorPose(v) => {
            writer.write_string(&v.anchor_id)?;
            writer.write_pose(&v.fallback)
        }
        PayloadValue::PingRequest(v) => {
            writer.write_string(&v.sender)?;
            writer.write_datetime(&v.sent_at)
        }
        PayloadValue::PingResponse(v) => {
            writer.write_string(&v.sender)?;
            writer.write_datetime(&v.sent_at)?;
            writer.write_datetime(&v.received_at)
        }
        PayloadValue::AvatarPose(v) => {
            writer.write_pose(&v.head)?;
            writer.write_bool(v.left_hand.is_some())?;
            if let Some(hand) = &v.left_hand {
                writer.write_pose(hand)?;
            }
            writer.write_bool(v.right_hand.is_some())?;
            if let Some(hand) = &v.right_hand {
                writer.write_pose(hand)?;
            }
            Ok(())
        }
        PayloadValue::Generic(bytes) => writer.write_bytes(bytes),
        PayloadValue::Message(message) => {
            writer.write_u8(message.message_type.tag())?;
            encode_value(&message.data, writer)
        }
    }
}

/// Reads a tag byte and the corresponding payload. An unregistered tag is a
/// decode error the caller drops; it must never take the process down.
pub fn decode_value(reader: &mut ByteReader) -> Result<PayloadValue> {
    let tag = reader.read_u8()?;
    let data_type = DataType::from_tag(tag).ok_or(ShareError::UnknownDataType(tag))?;

    match data_type {
        DataType::Boolean => Ok(PayloadValue::Boolean(reader.read_bool()?)),
        DataType::Short => Ok(PayloadValue::Short(reader.read_i16()?)),
        DataType::Int => Ok(PayloadValue::Int(reader.read_i32()?)),
        DataType::Long => Ok(PayloadValue::Long(reader.read_i64()?)),
        DataType::Float => Ok(PayloadValue::Float(reader.read_f32()?)),
        DataType::String => Ok(PayloadValue::String(reader.read_string()?)),
        DataType::Guid => Ok(PayloadValue::Guid(reader.read_guid()?)),
        DataType::DateTime => Ok(PayloadValue::DateTime(reader.read_datetime()?)),
        DataType::TimeSpan => Ok(PayloadValue::TimeSpan(reader.read_timespan()?)),
        DataType::Color => Ok(PayloadValue::Color(reader.read_color()?)),
        DataType::Transform => {
            let flags = reader.read_u8()?;
            let position = reader.read_vector3()?;
            let rotation = reader.read_quaternion()?;
            let scale = reader.read_vector3()?;
            Ok(PayloadValue::Transform(crate::values::TransformUpdate {
                flags,
                position,
                rotation,
                scale,
            }))
        }
        DataType::Command => Ok(PayloadValue::Command(crate::values::CommandMessage {
            target: reader.read_string()?,
            command: reader.read_string()?,
            sender: reader.read_string()?,
        })),
        DataType::AnchorPose => Ok(PayloadValue::AnchorPose(crate::values::AnchorPose {
            anchor_id: reader.read_string()?,
            fallback: reader.read_pose()?,
        })),
        DataType::PingRequest => Ok(PayloadValue::PingRequest(crate::values::PingRequest {
            sender: reader.read_string()?,
            sent_at: reader.read_datetime()?,
        })),
        DataType::PingResponse => Ok(PayloadValue::PingResponse(crate::values::PingResponse {
            sender: reader.read_string()?,
            sent_at: reader.read_datetime()?,
            received_at: reader.read_datetime()?,
        })),
        DataType::AvatarPose => {
            let head = reader.read_pose()?;
            let left_hand = if reader.read_bool()? {
                Some(reader.read_pose()?)
            } else {
                None
            };
            let right_hand = if reader.read_bool()? {
                Some(reader.read_pose()?)
            } else {
                None
            };
            Ok(PayloadValue::AvatarPose(crate::values::AvatarPose {
                head,
                left_hand,
                right_hand,
            }))
        }
        DataType::Generic => Ok(PayloadValue::Generic(reader.read_bytes()?)),
        DataType::Message => {
            let message_type = MessageType::from_tag(reader.read_u8()?)?;
            let data = decode_value(reader)?;
            Ok(PayloadValue::Message(Box::new(ProtocolMessage {
                message_type,
                data,
            })))
        }
        DataType::Unknown => Err(ShareError::UnknownDataType(tag)),
    }
}

/// Human-readable transmission form: `"{dataTypeInt}:{text}"`.
///
/// Primitives render plainly (Rust formatting is locale-invariant);
/// composites render as JSON.
pub fn value_to_string(value: &PayloadValue) -> String {
    let tag = value.data_type().tag();
    let text = match value {
        PayloadValue::Boolean(v) => v.to_string(),
        PayloadValue::Short(v) => v.to_string(),
        PayloadValue::Int(v) => v.to_string(),
        PayloadValue::Long(v) => v.to_string(),
        PayloadValue::Float(v) => v.to_string(),
        PayloadValue::String(v) => v.clone(),
        PayloadValue::Guid(v) => v.to_string(),
        PayloadValue::DateTime(v) => v.to_rfc3339(),
        PayloadValue::TimeSpan(v) => v.num_microseconds().unwrap_or(i64::MAX).to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    format!("{}:{}", tag, text)
}

pub fn value_from_string(encoded: &str) -> Result<PayloadValue> {
    let (tag_text, text) = encoded
        .split_once(':')
        .ok_or_else(|| ShareError::InvalidValueString(encoded.to_string()))?;

    let tag: u8 = tag_text
        .parse()
        .map_err(|_| ShareError::InvalidValueString(encoded.to_string()))?;
    let data_type = DataType::from_tag(tag).ok_or(ShareError::UnknownDataType(tag))?;

    let parse_err = || ShareError::InvalidValueString(encoded.to_string());

    match data_type {
        DataType::Boolean => Ok(PayloadValue::Boolean(text.parse().map_err(|_| parse_err())?)),
        DataType::Short => Ok(PayloadValue::Short(text.parse().map_err(|_| parse_err())?)),
        DataType::Int => Ok(PayloadValue::Int(text.parse().map_err(|_| parse_err())?)),
        DataType::Long => Ok(PayloadValue::Long(text.parse().map_err(|_| parse_err())?)),
        DataType::Float => Ok(PayloadValue::Float(text.parse().map_err(|_| parse_err())?)),
        DataType::String => Ok(PayloadValue::String(text.to_string())),
        DataType::Guid => Ok(PayloadValue::Guid(
            Uuid::parse_str(text).map_err(|_| parse_err())?,
        )),
        DataType::DateTime => {
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| parse_err())?;
            Ok(PayloadValue::DateTime(parsed.with_timezone(&Utc)))
        }
        DataType::TimeSpan => {
            let micros: i64 = text.parse().map_err(|_| parse_err())?;
            Ok(PayloadValue::TimeSpan(Duration::microseconds(micros)))
        }
        DataType::Unknown => Err(ShareError::UnknownDataType(tag)),
        _ => {
            let value: PayloadValue = serde_json::from_str(text)?;
            if value.data_type() != data_type {
                return Err(parse_err());
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::*;
    use chrono::TimeZone;

    fn round_trip(value: PayloadValue) {
        let size = byte_size(&value);
        let mut buffer = vec![0u8; size];
        let mut writer = ByteWriter::new(&mut buffer);
        encode_value(&value, &mut writer).unwrap();
        assert_eq!(writer.offset(), size, "byte_size must match bytes written");

        let mut reader = ByteReader::new(&buffer);
        let decoded = decode_value(&mut reader).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_primitive_round_trips() {
        round_trip(PayloadValue::Boolean(true));
        round_trip(PayloadValue::Boolean(false));
        round_trip(PayloadValue::Short(i16::MIN));
        round_trip(PayloadValue::Int(-1));
        round_trip(PayloadValue::Long(i64::MAX));
        round_trip(PayloadValue::Float(3.5));
        round_trip(PayloadValue::Float(-0.0));
        round_trip(PayloadValue::String(String::new()));
        round_trip(PayloadValue::String("x".repeat(2000)));
        round_trip(PayloadValue::Guid(Uuid::nil()));
        round_trip(PayloadValue::Guid(Uuid::max()));
        round_trip(PayloadValue::TimeSpan(Duration::microseconds(i64::MIN + 1)));
        round_trip(PayloadValue::DateTime(Utc.timestamp_micros(0).unwrap()));
        round_trip(PayloadValue::Color(ColorRgba::new(0.1, 0.2, 0.3, 1.0)));
    }

    #[test]
    fn test_composite_round_trips() {
        round_trip(PayloadValue::Transform(TransformUpdate::full(
            Vector3::new(-2.0, 0.0, 9.5),
            Quaternion::new(0.5, 0.5, 0.5, 0.5),
            Vector3::ONE,
        )));
        round_trip(PayloadValue::Command(CommandMessage {
            target: "player-2".to_string(),
            command: "reset".to_string(),
            sender: "host".to_string(),
        }));
        round_trip(PayloadValue::AnchorPose(AnchorPose {
            anchor_id: "anchor-17".to_string(),
            fallback: Pose::new(Vector3::new(1.0, 2.0, 3.0), Quaternion::new(0.0, 0.7, 0.0, 0.7)),
        }));
        round_trip(PayloadValue::PingRequest(PingRequest {
            sender: "a".to_string(),
            sent_at: Utc.timestamp_micros(1_700_000_000_000_000).unwrap(),
        }));
        round_trip(PayloadValue::PingResponse(PingResponse {
            sender: "b".to_string(),
            sent_at: Utc.timestamp_micros(1_700_000_000_000_000).unwrap(),
            received_at: Utc.timestamp_micros(1_700_000_000_250_000).unwrap(),
        }));
        round_trip(PayloadValue::AvatarPose(AvatarPose {
            head: Pose::new(Vector3::new(0.0, 1.7, 0.0), Quaternion::IDENTITY),
            left_hand: Some(Pose::default()),
            right_hand: None,
        }));
        round_trip(PayloadValue::Generic(vec![0, 1, 2, 254, 255]));
    }

    #[test]
    fn test_nested_message_round_trip() {
        let inner = ProtocolMessage {
            message_type: MessageType::Command,
            data: PayloadValue::Int(42),
        };
        round_trip(PayloadValue::Message(Box::new(inner)));
    }

    #[test]
    fn test_unknown_tag_is_decode_error() {
        let buffer = [99u8, 0, 0, 0];
        let mut reader = ByteReader::new(&buffer);
        match decode_value(&mut reader) {
            Err(ShareError::UnknownDataType(99)) => {}
            other => panic!("expected UnknownDataType, got {:?}", other),
        }
    }

    #[test]
    fn test_string_form_round_trips() {
        let values = vec![
            PayloadValue::Boolean(true),
            PayloadValue::Short(-7),
            PayloadValue::Int(123456),
            PayloadValue::Long(-1),
            PayloadValue::Float(2.25),
            PayloadValue::String("status: ok".to_string()),
            PayloadValue::Guid(Uuid::new_v4()),
            PayloadValue::DateTime(Utc.timestamp_micros(1_700_000_000_000_000).unwrap()),
            PayloadValue::TimeSpan(Duration::microseconds(-42)),
            PayloadValue::Color(ColorRgba::new(1.0, 0.0, 0.0, 1.0)),
        ];

        for value in values {
            let text = value_to_string(&value);
            let decoded = value_from_string(&text).unwrap();
            assert_eq!(decoded, value, "string form failed for {}", text);
        }
    }

    #[test]
    fn test_string_form_tag_prefix() {
        assert_eq!(value_to_string(&PayloadValue::Float(3.5)), "4:3.5");
        assert_eq!(
            value_to_string(&PayloadValue::String("hi".to_string())),
            "5:hi"
        );
    }

    #[test]
    fn test_malformed_string_form_rejected() {
        assert!(value_from_string("not-a-value").is_err());
        assert!(value_from_string("999:true").is_err());
        assert!(value_from_string("4:not-a-float").is_err());
    }
}
