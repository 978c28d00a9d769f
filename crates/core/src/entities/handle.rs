//! Entity handle types for safe entity references
//!
//! Entities live in a generational arena. A handle combines the slot index
//! with a version that changes whenever the slot is reused, so a handle kept
//! past its entity's destruction resolves to nothing instead of to whatever
//! took the slot.
//!
//! # Handle Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           u64 raw value                          │
//! ├─────────────────────────────┬───────────────────────────────────┤
//! │       Version (32 bits)     │        Slot Index (32 bits)       │
//! │         bits 32-63          │           bits 0-31               │
//! └─────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! The raw value is what the host sees through the C ABI.

use slotmap::{new_key_type, Key, KeyData};

use studioanim_sdk::RawEntityHandle;

new_key_type! {
    /// Generation-checked reference to an entity in a world
    pub struct EntityHandle;
}

/// Raw value the host uses for an invalid handle
pub const INVALID_RAW_HANDLE: RawEntityHandle = 0;

impl EntityHandle {
    /// Raw value passed across the C ABI
    #[inline]
    pub fn to_raw(self) -> RawEntityHandle {
        if self.is_null() {
            INVALID_RAW_HANDLE
        } else {
            self.data().as_ffi()
        }
    }

    /// Rebuild a handle from its raw value
    ///
    /// Garbage values produce a handle that simply fails to resolve.
    #[inline]
    pub fn from_raw(raw: RawEntityHandle) -> Self {
        if raw == INVALID_RAW_HANDLE {
            Self::null()
        } else {
            Self::from(KeyData::from_ffi(raw))
        }
    }
}
