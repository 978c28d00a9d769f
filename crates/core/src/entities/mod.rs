//! Animated entities
//!
//! Every entity in a world is an [`AnimatingEntity`] tagged with an
//! [`EntityKind`]. The world stores them in a generational arena keyed by
//! [`EntityHandle`], so a handle to a destroyed entity resolves to nothing.
//!
//! # Entity Handles
//!
//! ```ignore
//! use studioanim_core::entities::{EntityHandle, EntityKind};
//!
//! let handle = world.create_entity(EntityKind::Base, Some("models/arm.mdl"))?;
//! let raw = handle.to_raw(); // what the host stores
//!
//! world.destroy_entity(handle);
//! assert!(world.entity(EntityHandle::from_raw(raw)).is_none());
//! ```
//!
//! # Network Updates
//!
//! ```ignore
//! use studioanim_core::entities::{DataUpdateType, NetworkUpdate};
//!
//! let update = NetworkUpdate { time: 1.0, cycle: Some(0.5), ..Default::default() };
//! world.apply_network_update(handle, &update, DataUpdateType::DataTableChanged)?;
//! ```

mod animating;
mod handle;
mod kind;
mod network;

pub use animating::{AnimatingEntity, ParentBones};
pub use handle::{EntityHandle, INVALID_RAW_HANDLE};
pub use kind::{
    BoneProvider, ClientAnimFlags, EntityKind, PvsNotifiable, Renderable, Simulatable,
};
pub use network::{DataUpdateType, NetworkUpdate};
