//! Networked field updates
//!
//! The host delivers server state as a [`NetworkUpdate`], a sparse set of
//! changed fields. Every field is optional so a delta only carries what
//! changed. Updates also arrive as JSON through the C ABI.

use serde::{Deserialize, Serialize};

use studioanim_sdk::{QAngle, Vec3};

/// Whether an update created the entity or changed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataUpdateType {
    Created,
    #[default]
    DataTableChanged,
}

impl DataUpdateType {
    /// Convert from the host's integer code
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::Created,
            _ => Self::DataTableChanged,
        }
    }
}

/// Changed networked fields of one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkUpdate {
    /// Server time the values belong to
    pub time: f32,
    pub model: Option<String>,
    pub origin: Option<Vec3>,
    pub angles: Option<QAngle>,
    pub model_width_scale: Option<f32>,
    pub sequence: Option<i32>,
    pub cycle: Option<f32>,
    pub playback_rate: Option<f32>,
    /// Encoded 0..1 values, by pose parameter index
    pub pose_parameters: Option<Vec<f32>>,
    pub new_sequence_parity: Option<i32>,
    pub reset_events_parity: Option<i32>,
    pub client_side_animation: Option<bool>,
    /// Snap this update instead of interpolating toward it
    pub no_interpolation: Option<bool>,
}

impl NetworkUpdate {
    /// Whether the update touches anything that moves bones
    pub fn affects_pose(&self) -> bool {
        self.origin.is_some()
            || self.angles.is_some()
            || self.model_width_scale.is_some()
            || self.sequence.is_some()
            || self.cycle.is_some()
            || self.pose_parameters.is_some()
            || self.new_sequence_parity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_json() {
        let update: NetworkUpdate =
            serde_json::from_str(r#"{"time": 1.5, "sequence": 2, "pose_parameters": [0.5]}"#).unwrap();
        assert_eq!(update.time, 1.5);
        assert_eq!(update.sequence, Some(2));
        assert_eq!(update.pose_parameters, Some(vec![0.5]));
        assert!(update.cycle.is_none());
        assert!(update.affects_pose());
        assert!(!NetworkUpdate::default().affects_pose());
    }

    #[test]
    fn test_update_type_codes() {
        assert_eq!(DataUpdateType::from_raw(0), DataUpdateType::Created);
        assert_eq!(DataUpdateType::from_raw(1), DataUpdateType::DataTableChanged);
    }
}
