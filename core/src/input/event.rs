//! Key events consumed by [`ControlConnection::execute`](crate::ControlConnection::execute)

use std::time::Duration;

use super::key::KeyType;

/// Default press width for [`KeyEvent::push`]
pub const DEFAULT_PUSH_TIME: Duration = Duration::from_millis(100);

/// What to do with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    /// Hold for the given duration, then release
    Push(Duration),
    /// Mark held with no automatic release
    Hold,
    /// Clear held
    Release,
}

/// An immutable input instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: KeyType,
}

impl KeyEvent {
    /// Press-then-release with [`DEFAULT_PUSH_TIME`]
    pub fn push(key: KeyType) -> Self {
        Self::push_for(key, DEFAULT_PUSH_TIME)
    }

    /// Press-then-release; `duration` is the minimum press width
    pub fn push_for(key: KeyType, duration: Duration) -> Self {
        Self {
            kind: KeyEventKind::Push(duration),
            key,
        }
    }

    pub fn hold(key: KeyType) -> Self {
        Self {
            kind: KeyEventKind::Hold,
            key,
        }
    }

    pub fn release(key: KeyType) -> Self {
        Self {
            kind: KeyEventKind::Release,
            key,
        }
    }
}
