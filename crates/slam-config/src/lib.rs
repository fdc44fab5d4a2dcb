//! TOML configuration for the SLAM engine.
//!
//! Every section tolerates a partial file: missing keys fall back to
//! [`Default`] impls rather than failing the load, mirroring the original
//! `ConfigManager`'s "partial config is fine" contract.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrationConfig {
    #[serde(default = "RegistrationConfig::default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "RegistrationConfig::default_it_weight_gradient")]
    pub it_weight_gradient: f64,
    #[serde(default = "RegistrationConfig::default_epsilon")]
    pub epsilon: f64,
}

impl RegistrationConfig {
    const fn default_max_iterations() -> u32 {
        200
    }
    const fn default_it_weight_gradient() -> f64 {
        0.1
    }
    const fn default_epsilon() -> f64 {
        1e-5
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
            it_weight_gradient: Self::default_it_weight_gradient(),
            epsilon: Self::default_epsilon(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapConfig {
    #[serde(default = "MapConfig::default_map_size")]
    pub map_size_x: i32,
    #[serde(default = "MapConfig::default_map_size")]
    pub map_size_y: i32,
    #[serde(default = "MapConfig::default_map_size")]
    pub map_size_z: i32,
    #[serde(default = "MapConfig::default_map_resolution")]
    pub map_resolution: i32,
    #[serde(default = "MapConfig::default_max_distance")]
    pub max_distance: i32,
    #[serde(default = "MapConfig::default_initial_map_weight")]
    pub initial_map_weight: i32,
    #[serde(default = "MapConfig::default_tau")]
    pub tau: i32,
    #[serde(default = "MapConfig::default_max_weight")]
    pub max_weight: i32,
    #[serde(default = "MapConfig::default_position_threshold")]
    pub position_threshold: i32,
    #[serde(default = "MapConfig::default_period")]
    pub period: u64,
}

impl MapConfig {
    const fn default_map_size() -> i32 {
        127
    }
    const fn default_map_resolution() -> i32 {
        64
    }
    const fn default_max_distance() -> i32 {
        12_000
    }
    const fn default_initial_map_weight() -> i32 {
        0
    }
    const fn default_tau() -> i32 {
        1_000
    }
    const fn default_max_weight() -> i32 {
        4_000
    }
    const fn default_position_threshold() -> i32 {
        1_000
    }
    const fn default_period() -> u64 {
        100
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            map_size_x: Self::default_map_size(),
            map_size_y: Self::default_map_size(),
            map_size_z: Self::default_map_size(),
            map_resolution: Self::default_map_resolution(),
            max_distance: Self::default_max_distance(),
            initial_map_weight: Self::default_initial_map_weight(),
            tau: Self::default_tau(),
            max_weight: Self::default_max_weight(),
            position_threshold: Self::default_position_threshold(),
            period: Self::default_period(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_tsdf_port")]
    pub tsdf_port: u16,
    #[serde(default = "BridgeConfig::default_imu_port")]
    pub imu_port: u16,
    #[serde(default = "BridgeConfig::default_cloud_port")]
    pub cloud_port: u16,
}

impl BridgeConfig {
    const fn default_tsdf_port() -> u16 {
        9000
    }
    const fn default_imu_port() -> u16 {
        9001
    }
    const fn default_cloud_port() -> u16 {
        9002
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tsdf_port: Self::default_tsdf_port(),
            imu_port: Self::default_imu_port(),
            cloud_port: Self::default_cloud_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SlamConfig {
    #[serde(default = "SlamConfig::default_lidar_port")]
    pub lidar_port: u16,
    #[serde(default = "SlamConfig::default_buffer_size")]
    pub imu_buffer_size: usize,
    #[serde(default = "SlamConfig::default_buffer_size")]
    pub lidar_buffer_size: usize,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub slam: MapConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl SlamConfig {
    const fn default_lidar_port() -> u16 {
        7000
    }
    const fn default_buffer_size() -> usize {
        64
    }
}

/// Loads and parses a TOML config file. A missing file is not an error: it
/// yields the all-defaults configuration, matching the original
/// `ConfigManager`'s tolerance for a project with no config checked in yet.
pub fn load_from(path: &Path) -> Result<SlamConfig> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let cfg: SlamConfig = toml::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            tracing::info!(target: "slam_config", path = %path.display(), "loaded config");
            Ok(cfg)
        }
        Err(_) => {
            tracing::warn!(target: "slam_config", path = %path.display(), "config file not found, using defaults");
            Ok(SlamConfig::default())
        }
    }
}
