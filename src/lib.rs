pub mod address;
pub mod binary;
pub mod codec;
pub mod debug;
pub mod error;
pub mod objects;
pub mod protocol;
pub mod replay;
pub mod resolver;
pub mod values;

pub use address::{
    device_id, set_device_id,
    ObjectId, ObjectKind,
};

pub use values::{
    AnchorPose, AvatarPose, ColorRgba, CommandMessage, DataType, PayloadValue,
    PingRequest, PingResponse, Pose, Quaternion, TransformUpdate, Vector3,
};

pub use binary::{ByteReader, ByteWriter};

pub use codec::{
    byte_size, decode_value, encode_value, payload_size,
    value_from_string, value_to_string,
};

pub use protocol::{
    decode_message, decode_property_key, encode_message, encode_property_key,
    read_message, unwrap_value, write_message,
    MessageType, ProtocolMessage,
};

pub use objects::{
    ObjectCache, PropertyEvent, PropertyUpdate, SharingObject, SharingSpace,
};

pub use replay::{ReplaySession, ReplayStats, SessionProvider};

pub use resolver::{
    AnchorProvider, AnchorResolver, LocatedAnchor, ResolverConfig,
    SearchCriteria, SessionState,
    SESSION_LINGER, WATCHER_DEBOUNCE, WILDCARD_ANCHOR_ID,
};

pub use error::{Result, ShareError};

pub use debug::{
    init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_message, message_summary, set_verbose,
};
