//! Configuration loading and validation

use anatomica_assets::CacheConfig;
use anatomica_core::Lod;
use anatomica_tracking::{ClassifierConfig, RegistrationConfig, SourceConfig, SourceKind};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub registration: RegistrationFileConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Patient to load at startup
    #[serde(default = "default_patient")]
    pub patient: String,
    /// Local patient catalog (TOML); the built-in demo catalog is used when missing
    #[serde(default = "default_catalog_path")]
    pub catalog: String,
    /// Remote patient data service; local catalog only when unset
    #[serde(default)]
    pub provider_url: Option<String>,
    /// Remote request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Read voice utterances from stdin, one per line
    #[serde(default = "default_true")]
    pub stdin_voice: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            patient: default_patient(),
            catalog: default_catalog_path(),
            provider_url: None,
            provider_timeout_secs: default_provider_timeout(),
            stdin_voice: true,
        }
    }
}

fn default_patient() -> String {
    "demo".to_string()
}

fn default_catalog_path() -> String {
    "./patients.toml".to_string()
}

fn default_provider_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Landmark source: "idle", "replay" or "udp"
    #[serde(default = "default_source")]
    pub source: String,
    /// JSON-lines recording for the replay source
    #[serde(default)]
    pub replay_path: Option<String>,
    /// Listen address for the udp source
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,
    /// Frame rate of idle/replay sources
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// UDP: report zero confidence after this long without data
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            replay_path: None,
            udp_bind: default_udp_bind(),
            fps: default_fps(),
            stale_after_ms: default_stale_after(),
        }
    }
}

fn default_source() -> String {
    "idle".to_string()
}

fn default_udp_bind() -> String {
    "127.0.0.1:5005".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_stale_after() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Normalized vertical gaze position (0 = top of frame)
    #[serde(default = "default_gaze_y")]
    pub gaze_y: f32,
    /// Manual zone override lifetime in seconds
    #[serde(default = "default_override_secs")]
    pub override_secs: u64,
    /// Frames with lower mean visibility are ignored
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            gaze_y: default_gaze_y(),
            override_secs: default_override_secs(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_gaze_y() -> f32 {
    0.5
}

fn default_override_secs() -> u64 {
    10
}

fn default_min_confidence() -> f32 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationFileConfig {
    #[serde(default = "default_threshold")]
    pub visibility_threshold: f32,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_min_correspondences")]
    pub min_correspondences: usize,
    #[serde(default = "default_full_quality")]
    pub full_quality_correspondences: usize,
    #[serde(default = "default_recalibration_delay")]
    pub recalibration_delay_ms: u64,
    /// Solve for rotation too (SVD), not only scale and translation
    #[serde(default)]
    pub estimate_rotation: bool,
    #[serde(default = "default_true")]
    pub auto_calibrate: bool,
}

impl Default for RegistrationFileConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_threshold(),
            confidence_threshold: default_threshold(),
            min_correspondences: default_min_correspondences(),
            full_quality_correspondences: default_full_quality(),
            recalibration_delay_ms: default_recalibration_delay(),
            estimate_rotation: false,
            auto_calibrate: true,
        }
    }
}

fn default_threshold() -> f32 {
    0.5
}

fn default_min_correspondences() -> usize {
    3
}

fn default_full_quality() -> usize {
    5
}

fn default_recalibration_delay() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Grace period before an unloaded zone's meshes are evicted
    #[serde(default = "default_eviction_secs")]
    pub eviction_secs: u64,
    #[serde(default = "default_active_lod")]
    pub active_lod: Lod,
    #[serde(default = "default_preload_lod")]
    pub preload_lod: Lod,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            eviction_secs: default_eviction_secs(),
            active_lod: default_active_lod(),
            preload_lod: default_preload_lod(),
        }
    }
}

fn default_eviction_secs() -> u64 {
    30
}

fn default_active_lod() -> Lod {
    Lod::High
}

fn default_preload_lod() -> Lod {
    Lod::Low
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the REST/WebSocket surface
    #[serde(default = "default_bind")]
    pub bind: String,
    /// WebSocket state push interval in milliseconds
    #[serde(default = "default_push_interval")]
    pub push_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            push_interval_ms: default_push_interval(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_push_interval() -> u64 {
    100
}

impl Config {
    /// Convert to the landmark source configuration
    pub fn to_source_config(&self) -> Result<SourceConfig> {
        let kind = match self.tracking.source.to_lowercase().as_str() {
            "idle" => SourceKind::Idle,
            "replay" => match &self.tracking.replay_path {
                Some(path) => SourceKind::Replay {
                    path: PathBuf::from(path),
                },
                None => bail!("tracking.replay_path is required for the replay source"),
            },
            "udp" => SourceKind::Udp {
                bind: self.tracking.udp_bind.parse::<SocketAddr>()?,
            },
            other => bail!("Unknown tracking source: {}", other),
        };
        Ok(SourceConfig {
            kind,
            fps: self.tracking.fps,
            stale_after: Duration::from_millis(self.tracking.stale_after_ms),
        })
    }

    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            gaze_y: self.zone.gaze_y.clamp(0.0, 1.0),
            override_duration: Duration::from_secs(self.zone.override_secs),
            min_confidence: self.zone.min_confidence,
        }
    }

    pub fn to_registration_config(&self) -> RegistrationConfig {
        let r = &self.registration;
        RegistrationConfig {
            visibility_threshold: r.visibility_threshold,
            confidence_threshold: r.confidence_threshold,
            min_correspondences: r.min_correspondences.max(1),
            full_quality_correspondences: r.full_quality_correspondences.max(r.min_correspondences),
            recalibration_delay: Duration::from_millis(r.recalibration_delay_ms),
            estimate_rotation: r.estimate_rotation,
            auto_calibrate: r.auto_calibrate,
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            eviction_delay: Duration::from_secs(self.assets.eviction_secs),
            active_lod: self.assets.active_lod,
            preload_lod: self.assets.preload_lod,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut config = Config::default();
    config.tracking.replay_path = Some("./recordings/session.jsonl".to_string());

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session.patient, "demo");
        assert_eq!(config.to_cache_config().eviction_delay, Duration::from_secs(30));
        assert_eq!(config.to_source_config().unwrap().kind, SourceKind::Idle);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
[tracking]
source = "udp"
udp_bind = "0.0.0.0:6000"

[registration]
estimate_rotation = true
recalibration_delay_ms = 250

[assets]
preload_lod = "medium"
"#,
        )
        .unwrap();

        let source = config.to_source_config().unwrap();
        assert_eq!(
            source.kind,
            SourceKind::Udp {
                bind: "0.0.0.0:6000".parse().unwrap()
            }
        );
        let registration = config.to_registration_config();
        assert!(registration.estimate_rotation);
        assert_eq!(registration.recalibration_delay, Duration::from_millis(250));
        assert_eq!(registration.min_correspondences, 3);
        assert_eq!(config.to_cache_config().preload_lod, Lod::Medium);
        assert_eq!(config.zone.gaze_y, 0.5);
    }

    #[test]
    fn test_replay_requires_path() {
        let config: Config = toml::from_str("[tracking]\nsource = \"replay\"\n").unwrap();
        assert!(config.to_source_config().is_err());
    }

    #[test]
    fn test_save_default_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anatomica.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8090");
        assert_eq!(
            config.tracking.replay_path.as_deref(),
            Some("./recordings/session.jsonl")
        );
    }
}
