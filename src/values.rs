use crate::protocol::ProtocolMessage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vector3 = Vector3 { x: 1.0, y: 1.0, z: 1.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub rotation: Quaternion,
}

impl Pose {
    pub fn new(position: Vector3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorRgba {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

pub const TRANSFORM_POSITION: u8 = 1 << 0;
pub const TRANSFORM_ROTATION: u8 = 1 << 1;
pub const TRANSFORM_SCALE: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    pub flags: u8,
    pub position: Vector3,
    pub rotation: Quaternion,
    pub scale: Vector3,
}

impl TransformUpdate {
    pub fn full(position: Vector3, rotation: Quaternion, scale: Vector3) -> Self {
        Self {
            flags: TRANSFORM_POSITION | TRANSFORM_ROTATION | TRANSFORM_SCALE,
            position,
            rotation,
            scale,
        }
    }

    pub fn has_position(&self) -> bool {
        self.flags & TRANSFORM_POSITION != 0
    }

    pub fn has_rotation(&self) -> bool {
        self.flags & TRANSFORM_ROTATION != 0
    }

    pub fn has_scale(&self) -> bool {
        self.flags & TRANSFORM_SCALE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub target: String,
    pub command: String,
    pub sender: String,
}

/// Anchor reference plus a pose peers can fall back to when the anchor
/// itself cannot be resolved on their device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPose {
    pub anchor_id: String,
    pub fallback: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    pub sender: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvatarPose {
    pub head: Pose,
    pub left_hand: Option<Pose>,
    pub right_hand: Option<Pose>,
}

/// One-byte wire tag for every registered payload type.
///
/// Discriminants are part of the wire format and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Boolean = 0,
    Short = 1,
    Int = 2,
    Long = 3,
    Float = 4,
    String = 5,
    Guid = 6,
    DateTime = 7,
    TimeSpan = 8,
    Color = 9,
    Transform = 10,
    Command = 11,
    AnchorPose = 12,
    PingRequest = 13,
    PingResponse = 14,
    AvatarPose = 15,
    Message = 16,
    Generic = 254,
    Unknown = 255,
}

impl DataType {
    pub fn from_tag(tag: u8) -> Option<DataType> {
        match tag {
            0 => Some(DataType::Boolean),
            1 => Some(DataType::Short),
            2 => Some(DataType::Int),
            3 => Some(DataType::Long),
            4 => Some(DataType::Float),
            5 => Some(DataType::String),
            6 => Some(DataType::Guid),
            7 => Some(DataType::DateTime),
            8 => Some(DataType::TimeSpan),
            9 => Some(DataType::Color),
            10 => Some(DataType::Transform),
            11 => Some(DataType::Command),
            12 => Some(DataType::AnchorPose),
            13 => Some(DataType::PingRequest),
            14 => Some(DataType::PingResponse),
            15 => Some(DataType::AvatarPose),
            16 => Some(DataType::Message),
            254 => Some(DataType::Generic),
            255 => Some(DataType::Unknown),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        *self as u8
    }
}

/// Every value transmissible over the property/message channel.
///
/// `Generic` carries open-ended application data in a schema-less encoding;
/// `Message` allows a full protocol message to travel where a plain value is
/// expected (see wrap/unwrap idempotence in the protocol module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PayloadValue {
    Boolean(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    TimeSpan(#[serde(with = "timespan_micros")] Duration),
    Color(ColorRgba),
    Transform(TransformUpdate),
    Command(CommandMessage),
    AnchorPose(AnchorPose),
    PingRequest(PingRequest),
    PingResponse(PingResponse),
    AvatarPose(AvatarPose),
    Generic(Vec<u8>),
    Message(Box<ProtocolMessage>),
}

mod timespan_micros {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.num_microseconds().unwrap_or(i64::MAX).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let micros = i64::deserialize(deserializer)?;
        Ok(Duration::microseconds(micros))
    }
}

impl PayloadValue {
    /// Schema-less fallback encoding for application payloads that have no
    /// registered wire type.
    pub fn generic_from<T: Serialize>(value: &T) -> crate::error::Result<PayloadValue> {
        Ok(PayloadValue::Generic(serde_json::to_vec(value)?))
    }

    pub fn generic_to<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        match self {
            PayloadValue::Generic(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Err(crate::error::ShareError::InvalidArgument(format!(
                "expected generic payload, got {:?}",
                other.data_type()
            ))),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PayloadValue::Boolean(_) => DataType::Boolean,
            PayloadValue::Short(_) => DataType::Short,
            PayloadValue::Int(_) => DataType::Int,
            PayloadValue::Long(_) => DataType::Long,
            PayloadValue::Float(_) => DataType::Float,
            PayloadValue::String(_) => DataType::String,
            PayloadValue::Guid(_) => DataType::Guid,
            PayloadValue::DateTime(_) => DataType::DateTime,
            PayloadValue::TimeSpan(_) => DataType::TimeSpan,
            PayloadValue::Color(_) => DataType::Color,
            PayloadValue::Transform(_) => DataType::Transform,
            PayloadValue::Command(_) => DataType::Command,
            PayloadValue::AnchorPose(_) => DataType::AnchorPose,
            PayloadValue::PingRequest(_) => DataType::PingRequest,
            PayloadValue::PingResponse(_) => DataType::PingResponse,
            PayloadValue::AvatarPose(_) => DataType::AvatarPose,
            PayloadValue::Generic(_) => DataType::Generic,
            PayloadValue::Message(_) => DataType::Message,
        }
    }
}
