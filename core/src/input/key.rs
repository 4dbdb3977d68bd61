//! Physical button set

use std::fmt;
use std::str::FromStr;

/// A physical input on the emulated handheld.
///
/// The declaration order is the wire order: bit `i` of a keystate bitmask
/// belongs to `KeyType::ALL[i]`. Reordering the variants breaks every
/// emulator-side listener already in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    A,
    B,
    L,
    R,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
}

/// Number of tracked keys
pub const KEY_COUNT: usize = 10;

impl KeyType {
    /// All keys in wire order
    pub const ALL: [KeyType; KEY_COUNT] = [
        KeyType::A,
        KeyType::B,
        KeyType::L,
        KeyType::R,
        KeyType::Start,
        KeyType::Select,
        KeyType::Up,
        KeyType::Down,
        KeyType::Left,
        KeyType::Right,
    ];

    /// Position of this key in the wire order
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for this key
    pub const fn bit(self) -> u16 {
        1 << self.index()
    }

    /// Lowercase name used in routine files and the CLI
    pub const fn name(self) -> &'static str {
        match self {
            KeyType::A => "a",
            KeyType::B => "b",
            KeyType::L => "l",
            KeyType::R => "r",
            KeyType::Start => "start",
            KeyType::Select => "select",
            KeyType::Up => "up",
            KeyType::Down => "down",
            KeyType::Left => "left",
            KeyType::Right => "right",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown key name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key '{0}' (expected one of: a, b, l, r, start, select, up, down, left, right)")]
pub struct KeyParseError(pub String);

impl FromStr for KeyType {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        KeyType::ALL
            .into_iter()
            .find(|key| key.name() == lowered)
            .ok_or_else(|| KeyParseError(s.to_string()))
    }
}

impl serde::Serialize for KeyType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for KeyType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
