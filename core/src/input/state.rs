//! Held/released snapshot of every tracked key

use super::key::{KEY_COUNT, KeyType};
use crate::protocol::Frame;

/// Complete held/released status of every [`KeyType`].
///
/// Always encoded as a full snapshot, never a delta. The remote side has no
/// way to acknowledge or reconcile a missed frame, so each transmitted frame
/// must stand on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyState {
    held: [bool; KEY_COUNT],
}

/// Flag string with the wrong length or a character other than `0`/`1`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key flag string '{0}'")]
pub struct FlagParseError(pub String);

impl KeyState {
    /// All keys released
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every key
    pub fn clear(&mut self) {
        self.held = [false; KEY_COUNT];
    }

    pub fn set(&mut self, key: KeyType, held: bool) {
        self.held[key.index()] = held;
    }

    pub fn is_held(&self, key: KeyType) -> bool {
        self.held[key.index()]
    }

    /// Keys currently held, in wire order
    pub fn held_keys(&self) -> impl Iterator<Item = KeyType> + '_ {
        KeyType::ALL.into_iter().filter(|key| self.is_held(*key))
    }

    /// Bit `i` set iff the `i`-th key is held
    pub fn bitmask(&self) -> u16 {
        self.held_keys().fold(0, |mask, key| mask | key.bit())
    }

    /// Rebuild a state from a bitmask. Bits above the tracked keys are ignored.
    pub fn from_bitmask(mask: u16) -> Self {
        let mut state = Self::new();
        for key in KeyType::ALL {
            state.set(key, mask & key.bit() != 0);
        }
        state
    }

    /// One character per key in wire order, `1` held and `0` released
    pub fn encode_flags(&self) -> String {
        self.held.iter().map(|&h| if h { '1' } else { '0' }).collect()
    }

    pub fn from_flags(flags: &str) -> Result<Self, FlagParseError> {
        if flags.len() != KEY_COUNT {
            return Err(FlagParseError(flags.to_string()));
        }
        let mut state = Self::new();
        for (key, c) in KeyType::ALL.into_iter().zip(flags.chars()) {
            match c {
                '1' => state.set(key, true),
                '0' => {}
                _ => return Err(FlagParseError(flags.to_string())),
            }
        }
        Ok(state)
    }

    /// Snapshot frame for the wire
    pub fn frame(&self) -> Frame {
        Frame::KeyState(self.bitmask())
    }

    /// Wire bytes of [`Self::frame`]
    pub fn encode(&self) -> Vec<u8> {
        self.frame().encode()
    }
}
