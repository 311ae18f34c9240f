use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SCHEMA_VERSION_V1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Feedback played when the toggle activity starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackProfile {
    #[default]
    Short,
    Long,
}

impl FeedbackProfile {
    pub fn animation(self) -> &'static str {
        match self {
            Self::Short => "BufferEmpty",
            Self::Long => "PrepBarrage",
        }
    }

    pub fn playback_param(self) -> &'static str {
        match self {
            Self::Short => "BufferEmpty.playbackRate",
            Self::Long => "PrepBarrage.playbackRate",
        }
    }

    pub fn crossfade_secs(self) -> f32 {
        match self {
            Self::Short => 0.1,
            Self::Long => 0.25,
        }
    }

    pub fn aim_timer_secs(self) -> f32 {
        match self {
            Self::Short => 0.2,
            Self::Long => 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StanceConfig {
    pub schema_version: String,
    /// Type name matched by the exact-name probe tier.
    pub controller_type_name: String,
    pub toggle_ability_name: String,
    /// Ability family the toggle variant is appended to.
    pub ability_family: String,
    /// Case-insensitive object-name fragments identifying stance-capable bodies.
    pub body_name_markers: Vec<String>,
    pub body_token_marker: String,
    pub rebind_interval_secs: f32,
    pub toggle_duration_secs: f32,
    pub fixed_timestep_secs: f32,
    pub feedback: FeedbackProfile,
    pub diagnostics_dir: PathBuf,
    pub diagnostics_file_name: String,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            controller_type_name: "VoidSurvivorController".to_string(),
            toggle_ability_name: "VOIDSTANCE_TOGGLE".to_string(),
            ability_family: "VoidSurvivorBody.special".to_string(),
            body_name_markers: vec!["VoidSurvivor".to_string()],
            body_token_marker: "VOID_SURVIVOR".to_string(),
            rebind_interval_secs: 0.1,
            toggle_duration_secs: 0.2,
            fixed_timestep_secs: 1.0 / 60.0,
            feedback: FeedbackProfile::Short,
            diagnostics_dir: PathBuf::from("LogOutput"),
            diagnostics_file_name: "VoidStance.dump.txt".to_string(),
        }
    }
}

impl StanceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                })
            }
        }

        positive("rebind_interval_secs", self.rebind_interval_secs)?;
        positive("toggle_duration_secs", self.toggle_duration_secs)?;
        positive("fixed_timestep_secs", self.fixed_timestep_secs)?;
        if self.controller_type_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "controller_type_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.diagnostics_file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "diagnostics_file_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.diagnostics_dir.join(&self.diagnostics_file_name)
    }
}
