use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric room identifier as reported by the conferencing server.
///
/// The server hands these back as JSON numbers, sometimes fractional, so we
/// keep the raw `f64` rather than truncating to an integer. The server never
/// produces NaN, so `PartialEq`/`Hash` via bit pattern is safe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub f64);

impl RoomId {
    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0.abs() < 1e15 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl PartialEq for RoomId {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for RoomId {}

impl std::hash::Hash for RoomId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for RoomId {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

/// Identifier of a publisher within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_displays_integral_values_without_decimal() {
        assert_eq!(RoomId(1234.0).to_string(), "1234");
    }

    #[test]
    fn room_id_displays_fractional_values() {
        assert_eq!(RoomId(1234.5).to_string(), "1234.5");
    }

    #[test]
    fn room_id_equality_is_bitwise() {
        assert_eq!(RoomId(1.0), RoomId(1.0));
        assert_ne!(RoomId(1.0), RoomId(2.0));
    }
}
