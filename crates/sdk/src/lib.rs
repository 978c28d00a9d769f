//! studioanim SDK - Studio Model Type Definitions
//!
//! This crate contains the plain data types shared by every layer of the
//! animation system. It holds no engine state, so it compiles quickly and in
//! parallel with the crates that depend on it.
//!
//! # Modules
//!
//! - [`math`] - 3x4 bone matrices, Euler angles and quaternion blending
//! - [`studio`] - Immutable studio model assets (bones, sequences, events)
//! - [`limits`] - Fixed engine limits (bone counts, pose parameters)
//! - [`interfaces`] - Collaborator traits implemented by the host engine

pub mod interfaces;
pub mod limits;
pub mod math;
pub mod studio;

pub use glam;
pub use glam::{Affine3A, Quat, Vec3};

pub use interfaces::*;
pub use limits::*;
pub use math::*;
pub use studio::*;
