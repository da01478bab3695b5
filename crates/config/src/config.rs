//! Core configuration structures, loading, and validation logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Output container extension produced by every conversion.
///
/// Must never appear in `include_extensions`, otherwise converted outputs
/// would be rediscovered as new candidates forever.
pub const OUTPUT_EXTENSION: &str = "m4v";

/// Video codecs accepted for `conversion.codec`.
pub const ALLOWED_CODECS: &[&str] = &["libx264", "libx265", "libvpx-vp9"];

/// Encoder presets accepted for `conversion.preset`.
pub const ALLOWED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Audio codecs accepted for `conversion.audio_codec`.
pub const ALLOWED_AUDIO_CODECS: &[&str] = &["aac", "ac3", "libmp3lame", "libopus", "copy"];

/// Upper bound on concurrent conversion workers.
pub const MAX_WORKERS: u32 = 8;

/// Lower bound on the scan interval in seconds.
pub const MIN_SCAN_INTERVAL_SECS: u64 = 30;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration failed validation
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Daemon loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Seconds between scan cycles (minimum 30)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Maximum concurrent conversion jobs (0 = auto-derive, max 8)
    #[serde(default)]
    pub max_workers: u32,
    /// Seconds to wait for in-flight jobs on shutdown before abandoning them
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Log level: error, warn, info, debug, or trace
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_scan_interval_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            max_workers: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_level: default_log_level(),
        }
    }
}

/// Processing configuration: staging, state, and candidate filtering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingConfig {
    /// Directory for staged input/output files during conversion
    pub work_dir: PathBuf,
    /// Directory holding the durable processed-set file
    pub state_dir: PathBuf,
    /// File extensions to convert (lowercase, without dots)
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,
    /// Glob patterns (`*`, `?`) excluding candidates by name or full path
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Keep the source file after a successful conversion
    #[serde(default = "default_keep_original")]
    pub keep_original: bool,
    /// Seconds to wait before re-checking a source's size (0 = disabled)
    #[serde(default = "default_stability_wait_secs")]
    pub stability_wait_secs: u64,
}

fn default_include_extensions() -> Vec<String> {
    vec![
        "mp4".to_string(),
        "mkv".to_string(),
        "avi".to_string(),
        "mov".to_string(),
    ]
}

fn default_keep_original() -> bool {
    true
}

fn default_stability_wait_secs() -> u64 {
    5
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/video-converter/work"),
            state_dir: PathBuf::from("/var/lib/video-converter/state"),
            include_extensions: default_include_extensions(),
            exclude_patterns: Vec::new(),
            keep_original: default_keep_original(),
            stability_wait_secs: default_stability_wait_secs(),
        }
    }
}

/// Encoder invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionConfig {
    /// Video codec (must be in the allow-list)
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Constant rate factor (0-51)
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// Encoder preset (must be in the allow-list)
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Audio codec (must be in the allow-list)
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Audio bitrate, e.g. "128k"
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Encode timeout in seconds
    #[serde(default = "default_conversion_timeout_secs")]
    pub timeout_secs: u64,
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Free-form encoder arguments are not supported; any non-empty value
    /// here is rejected at validation time to keep the argument vector
    /// fully enumerated.
    #[serde(default)]
    pub extra_options: Option<Vec<String>>,
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_conversion_timeout_secs() -> u64 {
    3 * 60 * 60
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            crf: default_crf(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            timeout_secs: default_conversion_timeout_secs(),
            ffmpeg_path: default_ffmpeg_path(),
            extra_options: None,
        }
    }
}

/// Local filesystem source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    /// Directory roots to scan for candidates
    pub directories: Vec<PathBuf>,
}

/// Remote SFTP source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Remote hostname or IP
    pub host: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH username
    pub user: String,
    /// Path to the SSH private key file
    pub key_file: PathBuf,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-transfer timeout in seconds
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// Remote directory roots to scan; all remote paths must stay inside these
    pub directories: Vec<PathBuf>,
    /// Maximum source file size to download, in bytes
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_transfer_timeout_secs() -> u64 {
    60 * 60
}

fn default_max_transfer_bytes() -> u64 {
    50 * 1024 * 1024 * 1024
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub local: Option<LocalConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VCD_SCAN_INTERVAL_SECS -> daemon.scan_interval_secs
    /// - VCD_MAX_WORKERS -> daemon.max_workers
    /// - VCD_LOG_LEVEL -> daemon.log_level
    /// - VCD_KEEP_ORIGINAL -> processing.keep_original
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VCD_SCAN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.daemon.scan_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("VCD_MAX_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.daemon.max_workers = workers;
            }
        }

        if let Ok(val) = env::var("VCD_LOG_LEVEL") {
            self.daemon.log_level = val;
        }

        if let Ok(val) = env::var("VCD_KEEP_ORIGINAL") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.processing.keep_original = true,
                "false" | "0" | "no" => self.processing.keep_original = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Validate the configuration
    ///
    /// Checks every rule the core relies on: allow-listed encoder settings,
    /// bounded concurrency, the scan-interval floor, a non-empty include set
    /// disjoint from the fixed output extension, exactly one source mode,
    /// and a staging directory that is not itself a scanned root.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conv = &self.conversion;

        if !ALLOWED_CODECS.contains(&conv.codec.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "codec '{}' is not allowed (expected one of {:?})",
                conv.codec, ALLOWED_CODECS
            )));
        }

        if !ALLOWED_PRESETS.contains(&conv.preset.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "preset '{}' is not allowed (expected one of {:?})",
                conv.preset, ALLOWED_PRESETS
            )));
        }

        if !ALLOWED_AUDIO_CODECS.contains(&conv.audio_codec.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "audio_codec '{}' is not allowed (expected one of {:?})",
                conv.audio_codec, ALLOWED_AUDIO_CODECS
            )));
        }

        if conv.crf > 51 {
            return Err(ConfigError::Invalid(format!(
                "crf {} is out of range (0-51)",
                conv.crf
            )));
        }

        if !is_valid_bitrate(&conv.audio_bitrate) {
            return Err(ConfigError::Invalid(format!(
                "audio_bitrate '{}' is invalid (expected e.g. '128k')",
                conv.audio_bitrate
            )));
        }

        if conv.extra_options.as_ref().is_some_and(|v| !v.is_empty()) {
            return Err(ConfigError::Invalid(
                "extra_options is disabled: encoder arguments are limited to the validated settings"
                    .to_string(),
            ));
        }

        if self.daemon.max_workers > MAX_WORKERS {
            return Err(ConfigError::Invalid(format!(
                "max_workers {} exceeds the limit of {}",
                self.daemon.max_workers, MAX_WORKERS
            )));
        }

        if self.daemon.scan_interval_secs < MIN_SCAN_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "scan_interval_secs {} is below the minimum of {}",
                self.daemon.scan_interval_secs, MIN_SCAN_INTERVAL_SECS
            )));
        }

        let proc = &self.processing;

        if proc.include_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "include_extensions must not be empty".to_string(),
            ));
        }

        for ext in &proc.include_extensions {
            if ext.is_empty() || ext.starts_with('.') || *ext != ext.to_lowercase() {
                return Err(ConfigError::Invalid(format!(
                    "include extension '{}' must be lowercase without a leading dot",
                    ext
                )));
            }
            if ext == OUTPUT_EXTENSION {
                return Err(ConfigError::Invalid(format!(
                    "include extension '{}' equals the output extension and would reprocess outputs",
                    ext
                )));
            }
        }

        match (&self.local, &self.remote) {
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "either a [local] or a [remote] section is required".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "[local] and [remote] sections are mutually exclusive".to_string(),
                ));
            }
            (Some(local), None) => {
                if local.directories.is_empty() {
                    return Err(ConfigError::Invalid(
                        "local.directories must not be empty".to_string(),
                    ));
                }
                // Staging inside a scanned root would let a scan observe
                // half-written files as candidates.
                for root in &local.directories {
                    if proc.work_dir.starts_with(root) {
                        return Err(ConfigError::Invalid(format!(
                            "work_dir {} is inside the scanned root {}",
                            proc.work_dir.display(),
                            root.display()
                        )));
                    }
                }
            }
            (None, Some(remote)) => {
                if remote.host.is_empty() {
                    return Err(ConfigError::Invalid("remote.host must not be empty".to_string()));
                }
                if remote.user.is_empty() {
                    return Err(ConfigError::Invalid("remote.user must not be empty".to_string()));
                }
                if remote.directories.is_empty() {
                    return Err(ConfigError::Invalid(
                        "remote.directories must not be empty".to_string(),
                    ));
                }
                if remote.max_transfer_bytes == 0 {
                    return Err(ConfigError::Invalid(
                        "remote.max_transfer_bytes must be greater than zero".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// True when a `[remote]` section is configured.
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

/// Check an audio bitrate string of the form `<digits>k`.
fn is_valid_bitrate(bitrate: &str) -> bool {
    match bitrate.strip_suffix('k') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_local_config() -> Config {
        Config {
            local: Some(LocalConfig {
                directories: vec![PathBuf::from("/videos")],
            }),
            ..Config::default()
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.daemon.scan_interval_secs, 300);
        assert_eq!(config.daemon.max_workers, 0);
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.conversion.codec, "libx264");
        assert_eq!(config.conversion.crf, 23);
        assert_eq!(config.conversion.preset, "medium");
        assert_eq!(config.conversion.audio_codec, "aac");
        assert_eq!(config.conversion.audio_bitrate, "128k");
        assert!(config.processing.keep_original);
        assert!(config.local.is_none());
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_parse_full_local_config() {
        let toml_str = r#"
[daemon]
scan_interval_secs = 60
max_workers = 2
log_level = "debug"

[processing]
work_dir = "/tmp/work"
state_dir = "/tmp/state"
include_extensions = ["mp4", "mkv"]
exclude_patterns = ["*.part"]
keep_original = false

[conversion]
codec = "libx265"
crf = 28
preset = "slow"

[local]
directories = ["/media/videos"]
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML should parse");

        assert_eq!(config.daemon.scan_interval_secs, 60);
        assert_eq!(config.daemon.max_workers, 2);
        assert_eq!(config.processing.work_dir, PathBuf::from("/tmp/work"));
        assert_eq!(config.processing.include_extensions, vec!["mp4", "mkv"]);
        assert_eq!(config.processing.exclude_patterns, vec!["*.part"]);
        assert!(!config.processing.keep_original);
        assert_eq!(config.conversion.codec, "libx265");
        assert_eq!(config.conversion.crf, 28);
        let local = config.local.as_ref().expect("local section");
        assert_eq!(local.directories, vec![PathBuf::from("/media/videos")]);
        config.validate().expect("config should validate");
    }

    #[test]
    fn test_parse_remote_config() {
        let toml_str = r#"
[remote]
host = "nas.local"
user = "convert"
key_file = "/home/convert/.ssh/id_ed25519"
directories = ["/export/videos"]
max_transfer_bytes = 1073741824
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML should parse");
        let remote = config.remote.as_ref().expect("remote section");

        assert_eq!(remote.host, "nas.local");
        assert_eq!(remote.port, 22); // default
        assert_eq!(remote.connect_timeout_secs, 30); // default
        assert_eq!(remote.max_transfer_bytes, 1073741824);
        config.validate().expect("config should validate");
    }

    #[test]
    fn test_validate_rejects_invalid_codec() {
        let mut config = valid_local_config();
        config.conversion.codec = "invalid_codec".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_invalid_preset() {
        let mut config = valid_local_config();
        config.conversion.preset = "invalid_preset".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_invalid_crf() {
        let mut config = valid_local_config();
        config.conversion.crf = 99;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_invalid_audio_bitrate() {
        let mut config = valid_local_config();
        config.conversion.audio_bitrate = "invalid".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_extra_options() {
        let mut config = valid_local_config();
        config.conversion.extra_options =
            Some(vec!["-movflags".to_string(), "+faststart".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("extra_options is disabled"));
    }

    #[test]
    fn test_validate_allows_empty_extra_options() {
        let mut config = valid_local_config();
        config.conversion.extra_options = Some(Vec::new());
        config.validate().expect("empty extra_options is tolerated");
    }

    #[test]
    fn test_validate_rejects_too_many_workers() {
        let mut config = valid_local_config();
        config.daemon.max_workers = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_short_scan_interval() {
        let mut config = valid_local_config();
        config.daemon.scan_interval_secs = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_output_extension_in_includes() {
        let mut config = valid_local_config();
        config.processing.include_extensions = vec!["mp4".to_string(), "m4v".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_missing_source_mode() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_both_source_modes() {
        let mut config = valid_local_config();
        config.remote = Some(RemoteConfig {
            host: "nas.local".to_string(),
            port: 22,
            user: "convert".to_string(),
            key_file: PathBuf::from("/key"),
            connect_timeout_secs: 30,
            transfer_timeout_secs: 3600,
            directories: vec![PathBuf::from("/export")],
            max_transfer_bytes: 1,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_work_dir_inside_scanned_root() {
        let mut config = valid_local_config();
        config.processing.work_dir = PathBuf::from("/videos/work");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bitrate_validation() {
        assert!(is_valid_bitrate("128k"));
        assert!(is_valid_bitrate("96k"));
        assert!(!is_valid_bitrate("128"));
        assert!(!is_valid_bitrate("k"));
        assert!(!is_valid_bitrate("12a8k"));
        assert!(!is_valid_bitrate(""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Any daemon/conversion numbers written to TOML come back unchanged.
        #[test]
        fn prop_config_round_trips_sections(
            scan_interval in 30u64..100_000,
            max_workers in 0u32..8,
            crf in 0u32..52,
            keep_original in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[daemon]
scan_interval_secs = {}
max_workers = {}

[processing]
work_dir = "/tmp/work"
state_dir = "/tmp/state"
keep_original = {}

[conversion]
crf = {}

[local]
directories = ["/videos"]
"#,
                scan_interval, max_workers, keep_original, crf
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.daemon.scan_interval_secs, scan_interval);
            prop_assert_eq!(config.daemon.max_workers, max_workers);
            prop_assert_eq!(config.conversion.crf, crf);
            prop_assert_eq!(config.processing.keep_original, keep_original);
            prop_assert!(config.validate().is_ok());
        }

        // CRF values beyond 51 always fail validation.
        #[test]
        fn prop_out_of_range_crf_rejected(crf in 52u32..10_000) {
            let mut config = valid_local_config();
            config.conversion.crf = crf;
            prop_assert!(config.validate().is_err());
        }
    }

    mod env_overrides {
        use super::*;
        use std::sync::Mutex;

        // Mutex to ensure env var tests don't interfere with each other
        static ENV_MUTEX: Mutex<()> = Mutex::new(());

        fn clear_env_vars() {
            env::remove_var("VCD_SCAN_INTERVAL_SECS");
            env::remove_var("VCD_MAX_WORKERS");
            env::remove_var("VCD_LOG_LEVEL");
            env::remove_var("VCD_KEEP_ORIGINAL");
        }

        #[test]
        fn test_env_overrides_scan_interval_and_workers() {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = valid_local_config();
            env::set_var("VCD_SCAN_INTERVAL_SECS", "120");
            env::set_var("VCD_MAX_WORKERS", "3");
            config.apply_env_overrides();
            clear_env_vars();

            assert_eq!(config.daemon.scan_interval_secs, 120);
            assert_eq!(config.daemon.max_workers, 3);
        }

        #[test]
        fn test_env_overrides_keep_original_accepts_boolish_values() {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = valid_local_config();
            config.processing.keep_original = true;

            env::set_var("VCD_KEEP_ORIGINAL", "no");
            config.apply_env_overrides();
            assert!(!config.processing.keep_original);

            env::set_var("VCD_KEEP_ORIGINAL", "1");
            config.apply_env_overrides();
            assert!(config.processing.keep_original);

            // Garbage leaves the current value in place
            env::set_var("VCD_KEEP_ORIGINAL", "maybe");
            config.apply_env_overrides();
            assert!(config.processing.keep_original);

            clear_env_vars();
        }

        // Under the mutex because Config::load applies env overrides.
        #[test]
        fn test_load_reads_validates_and_defaults() {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            fs::write(&path, "[local]\ndirectories = [\"/videos\"]\n").unwrap();

            let config = Config::load(&path).expect("minimal config loads");
            assert_eq!(config.daemon.scan_interval_secs, 300);
            assert!(!config.is_remote());
        }

        #[test]
        fn test_load_missing_file_is_io_error() {
            let err = Config::load("/nonexistent/config.toml").unwrap_err();
            assert!(matches!(err, ConfigError::Io(_)));
        }

        #[test]
        fn test_load_rejects_invalid_file() {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            // No [local] or [remote] section
            fs::write(&path, "[daemon]\nscan_interval_secs = 60\n").unwrap();

            let err = Config::load(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
        }

        #[test]
        fn test_env_overrides_log_level() {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = valid_local_config();
            env::set_var("VCD_LOG_LEVEL", "trace");
            config.apply_env_overrides();
            clear_env_vars();

            assert_eq!(config.daemon.log_level, "trace");
        }
    }
}
