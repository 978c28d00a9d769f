//! Bone storage and caching
//!
//! - [`BoneAccessor`] - an entity's own bone-to-world matrices, epoch checked
//! - [`BoneCachePool`] - shared, budgeted copies used by hitbox queries
//! - [`BoneMergeCache`] - by-name bone mapping onto a followed model
//! - [`BoneBitList`] - which bones a pass touched

mod accessor;
mod bitlist;
mod cache;
mod merge;

pub use accessor::BoneAccessor;
pub use bitlist::BoneBitList;
pub use cache::{BoneCache, BoneCacheHandle, BoneCachePool};
pub use merge::BoneMergeCache;
