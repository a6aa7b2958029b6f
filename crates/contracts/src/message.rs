//! RawMessage - broker collaborator output
//!
//! Undecoded message as fetched from the broker, with its position in the
//! topic so that it can be acknowledged later.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Position of a message inside the consumed topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageOffset {
    /// Topic partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl MessageOffset {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for MessageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}@{}", self.partition, self.offset)
    }
}

/// Raw broker message (zero-copy payload)
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub offset: MessageOffset,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(offset: MessageOffset, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_display() {
        assert_eq!(MessageOffset::new(3, 17).to_string(), "p3@17");
    }

    #[test]
    fn test_offset_ordering() {
        let mut offsets = vec![
            MessageOffset::new(1, 0),
            MessageOffset::new(0, 5),
            MessageOffset::new(0, 2),
        ];
        offsets.sort();
        assert_eq!(offsets[0], MessageOffset::new(0, 2));
        assert_eq!(offsets[2], MessageOffset::new(1, 0));
    }
}
