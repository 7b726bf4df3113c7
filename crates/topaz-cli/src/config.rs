use std::path::PathBuf;
use std::time::Duration;
use topaz_hw::pigentl::{SdkPaths, DEFAULT_CTI_NAME, DEFAULT_SDK_DIR};
use topaz_hw::session::{DEFAULT_BUFFER_COUNT, DEFAULT_DISCOVERY_ATTEMPTS};
use topaz_hw::SessionConfig;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the vendor SDK and its producer.
    pub sdk_dir: PathBuf,
    /// Explicit SDK path; overrides the default file name inside `sdk_dir`.
    pub sdk_library: Option<PathBuf>,
    /// File name of the GenTL producer inside `sdk_dir`.
    pub cti_name: String,
    /// Number of driver buffers to allocate.
    pub buffer_count: usize,
    /// Camera-list refreshes before giving up on discovery.
    pub discovery_attempts: u32,
    /// Settling delay around flush/start/stop, in milliseconds.
    pub settle_ms: u64,
    /// Per-frame retrieval timeout in microseconds.
    pub frame_timeout_us: u64,
    /// Register table to use instead of the built-in one.
    pub address_map: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `TOPAZ_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            sdk_dir: std::env::var("TOPAZ_SDK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SDK_DIR)),
            sdk_library: std::env::var("TOPAZ_SDK_LIBRARY").ok().map(PathBuf::from),
            cti_name: std::env::var("TOPAZ_CTI_NAME").unwrap_or_else(|_| DEFAULT_CTI_NAME.to_string()),
            buffer_count: env_usize("TOPAZ_BUFFER_COUNT", DEFAULT_BUFFER_COUNT),
            discovery_attempts: env_u32("TOPAZ_DISCOVERY_ATTEMPTS", DEFAULT_DISCOVERY_ATTEMPTS),
            settle_ms: env_u64("TOPAZ_SETTLE_MS", 100),
            frame_timeout_us: env_u64("TOPAZ_FRAME_TIMEOUT_US", 500_000),
            address_map: std::env::var("TOPAZ_ADDRESS_MAP").ok().map(PathBuf::from),
        }
    }

    /// Locations of the SDK and producer.
    pub fn sdk_paths(&self) -> SdkPaths {
        let mut paths = SdkPaths::in_dir(&self.sdk_dir);
        paths.producer = self.sdk_dir.join(&self.cti_name);
        if let Some(library) = &self.sdk_library {
            paths.library = library.clone();
        }
        paths
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            buffer_count: self.buffer_count,
            discovery_attempts: self.discovery_attempts,
            settle_delay: Duration::from_millis(self.settle_ms),
            ..SessionConfig::default()
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
