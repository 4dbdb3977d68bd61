//! Input model: the fixed key set, the held-state snapshot and key events
//!
//! - [`KeyType`] - Physical buttons, declared in wire order
//! - [`KeyState`] - Full held/released snapshot, encoded as flags or a bitmask
//! - [`KeyEvent`] - Push / hold / release instructions

mod event;
mod key;
mod state;

pub use event::{DEFAULT_PUSH_TIME, KeyEvent, KeyEventKind};
pub use key::{KEY_COUNT, KeyParseError, KeyType};
pub use state::{FlagParseError, KeyState};
