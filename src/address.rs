use crate::debug;
use crate::error::{Result, ShareError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

static DEVICE_ID: OnceLock<String> = OnceLock::new();

/// Sets the host-supplied device id used when auto-generating labels.
/// Only the first call takes effect.
pub fn set_device_id(id: &str) {
    let _ = DEVICE_ID.set(id.to_string());
}

pub fn device_id() -> &'static str {
    DEVICE_ID.get_or_init(|| "device".to_string())
}

/// Role of a sharing object within the scene.
///
/// Discriminants appear as the leading segment of every encoded id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Unknown = 0,
    Dynamic = 1,
    Static = 2,
    Child = 3,
    Location = 4,
}

impl ObjectKind {
    pub fn from_segment(segment: &str) -> Option<ObjectKind> {
        match segment.parse::<u8>().ok()? {
            0 => Some(ObjectKind::Unknown),
            1 => Some(ObjectKind::Dynamic),
            2 => Some(ObjectKind::Static),
            3 => Some(ObjectKind::Child),
            4 => Some(ObjectKind::Location),
            _ => None,
        }
    }
}

/// Hierarchical identity of a sharing object.
///
/// Roots have an empty address; children are reached from their root by an
/// integer-index path. Two ids are equal iff their encoded strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub label: String,
    pub address: Vec<u32>,
}

impl ObjectId {
    /// `.` is the segment separator of the encoded form, so a label
    /// containing one would make the encoding ambiguous against address
    /// indices; such labels get the same lossy dot-to-dash escape as
    /// property names.
    pub fn new(kind: ObjectKind, label: &str) -> Self {
        let label = if label.is_empty() {
            generate_label()
        } else if label.contains('.') {
            debug::trace_label_escape(label);
            label.replace('.', "-")
        } else {
            label.to_string()
        };
        Self {
            kind,
            label,
            address: Vec::new(),
        }
    }

    /// Root id with a freshly generated label.
    pub fn fresh(kind: ObjectKind) -> Self {
        Self::new(kind, "")
    }

    pub fn is_root(&self) -> bool {
        self.address.is_empty()
    }

    pub fn root_id(&self) -> ObjectId {
        ObjectId {
            kind: self.kind,
            label: self.label.clone(),
            address: Vec::new(),
        }
    }

    pub fn child_id(&self, index: u32) -> ObjectId {
        let mut address = self.address.clone();
        address.push(index);
        ObjectId {
            kind: self.kind,
            label: self.label.clone(),
            address,
        }
    }

    /// True if `child` extends this id's address path by at least one index.
    pub fn is_ancestor_of(&self, child: &ObjectId) -> bool {
        self.kind == child.kind
            && self.label == child.label
            && child.address.len() > self.address.len()
            && child.address[..self.address.len()] == self.address[..]
    }

    /// Encoded string form: `kind.label[.addr0.addr1...]`.
    pub fn encode(&self) -> String {
        let mut encoded = format!("{}.{}", self.kind as u8, self.label);
        for index in &self.address {
            encoded.push('.');
            encoded.push_str(&index.to_string());
        }
        encoded
    }

    /// Decodes an id that may have arrived from an untrusted peer; malformed
    /// input is an error the caller treats as "not found".
    pub fn decode(encoded: &str) -> Result<ObjectId> {
        let mut segments = encoded.split('.');

        let kind_segment = segments
            .next()
            .ok_or_else(|| ShareError::InvalidObjectId(encoded.to_string()))?;
        let kind = ObjectKind::from_segment(kind_segment)
            .ok_or_else(|| ShareError::InvalidObjectId(encoded.to_string()))?;

        let label = segments
            .next()
            .filter(|label| !label.is_empty())
            .ok_or_else(|| ShareError::InvalidObjectId(encoded.to_string()))?
            .to_string();

        let mut address = Vec::new();
        for segment in segments {
            let index: u32 = segment
                .parse()
                .map_err(|_| ShareError::InvalidObjectId(encoded.to_string()))?;
            address.push(index);
        }

        Ok(ObjectId { kind, label, address })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn generate_label() -> String {
    format!("{}-{}", device_id(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_root() {
        let id = ObjectId::new(ObjectKind::Dynamic, "abc123");
        assert_eq!(id.encode(), "1.abc123");
        assert!(id.is_root());
    }

    #[test]
    fn test_encode_child_address() {
        let root = ObjectId::new(ObjectKind::Static, "table");
        let child = root.child_id(2).child_id(7);
        assert_eq!(child.encode(), "2.table.2.7");
        assert!(!child.is_root());
        assert_eq!(child.root_id(), root);
    }

    #[test]
    fn test_decode_round_trip_all_kinds_and_depths() {
        let kinds = [
            ObjectKind::Dynamic,
            ObjectKind::Static,
            ObjectKind::Child,
            ObjectKind::Location,
        ];

        for kind in kinds {
            for depth in 0u32..=5 {
                let mut id = ObjectId::new(kind, "label42");
                for index in 0..depth {
                    id = id.child_id(index * 3);
                }
                let decoded = ObjectId::decode(&id.encode()).unwrap();
                assert_eq!(decoded, id);
            }
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(ObjectId::decode("").is_err());
        assert!(ObjectId::decode("x.label").is_err()); // non-numeric kind
        assert!(ObjectId::decode("9.label").is_err()); // out-of-range kind
        assert!(ObjectId::decode("1.").is_err()); // empty label
        assert!(ObjectId::decode("1").is_err()); // missing label
        assert!(ObjectId::decode("1.label.x").is_err()); // non-numeric address
        assert!(ObjectId::decode("1.label.-3").is_err()); // negative address
    }

    #[test]
    fn test_ancestor_check() {
        let root = ObjectId::new(ObjectKind::Dynamic, "board");
        let child = root.child_id(0);
        let grandchild = child.child_id(4);

        assert!(root.is_ancestor_of(&child));
        assert!(root.is_ancestor_of(&grandchild));
        assert!(child.is_ancestor_of(&grandchild));
        assert!(!child.is_ancestor_of(&root));

        let other = ObjectId::new(ObjectKind::Dynamic, "other");
        assert!(!root.is_ancestor_of(&other.child_id(0)));
    }

    #[test]
    fn test_label_dots_escaped() {
        // "a.2" as a label would collide with label "a" + address [2];
        // escaping keeps the encoding injective.
        let dotted = ObjectId::new(ObjectKind::Dynamic, "a.2");
        assert_eq!(dotted.encode(), "1.a-2");
        assert_eq!(ObjectId::decode(&dotted.encode()).unwrap(), dotted);

        let child = ObjectId::new(ObjectKind::Dynamic, "a").child_id(2);
        assert_eq!(child.encode(), "1.a.2");
        assert_ne!(dotted, child);
    }

    #[test]
    fn test_generated_labels_are_unique() {
        let a = ObjectId::fresh(ObjectKind::Dynamic);
        let b = ObjectId::fresh(ObjectKind::Dynamic);
        assert_ne!(a.label, b.label);
        assert!(a.label.contains('-'));
    }
}
