//! Animation: sampling, blending and playback timing
//!
//! - [`pose`] - sample sequences into bone poses and blend them
//! - [`transitioner`] - fade previous sequences out under the current one
//! - [`layers`] - gesture overlays accumulated on top of the base pose
//! - [`clock`] - cycle advancement
//! - [`events`] - event boundary detection and listener dispatch
//! - [`interp`] - interpolation of networked values

pub mod clock;
pub mod events;
pub mod interp;
pub mod layers;
pub mod pose;
pub mod transitioner;

pub use clock::{clamp_cycle, AnimClock, ClockAdvance};
pub use events::{
    AnimEvent, AnimEventCallback, EventDispatcher, EventListenerKey, EventScanner, HookResult,
};
pub use interp::{Interpolate, InterpolatedVar};
pub use layers::{AnimationLayer, AnimationOverlays, LayerFlags};
pub use pose::{
    accumulate_pose, calc_pose, default_pose_parameters, get_pose_parameter,
    pose_parameter_range, set_pose_parameter, slerp_bones, BonePose, PoseParameters,
};
pub use transitioner::SequenceTransitioner;
