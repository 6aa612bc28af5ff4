//! Configuration file – reads/writes `~/.crewsafe/config.toml`.
//!
//! Every key has a default, so an empty file (or a missing `[safety]` table)
//! is valid.  `CREWSAFE_*` environment variables override file values and
//! the result is validated before anything is started.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crewsafe_kernel::GateConfig;
use crewsafe_perception::{DetectorConfig, GapConfig, GapStrategy, PerceptionConfig, RangeConfig};
use crewsafe_runtime::CoreConfig;
use crewsafe_types::SafetyError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which signals feed the safety decisions.  A static choice made at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensingMode {
    #[default]
    VisionOnly,
    /// Vision plus the single-point range sensor.
    Hybrid,
}

impl std::fmt::Display for SensingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensingMode::VisionOnly => write!(f, "vision_only"),
            SensingMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for SensingMode {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "vision_only" | "vision" => Ok(SensingMode::VisionOnly),
            "hybrid" => Ok(SensingMode::Hybrid),
            other => Err(SafetyError::Config(format!("unknown sensing mode '{other}'"))),
        }
    }
}

/// The `[safety]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub forward_threshold_ratio: f32,
    pub approach_threshold_ratio: f32,
    pub edge_sensitivity: f32,
    pub thin_object_top_n: usize,
    pub thin_object_min_hits: usize,
    pub decay_window_ms: u64,
    pub lidar_stop_cm: f32,
    pub lidar_warn_cm: f32,
    pub approach_stop_cm: f32,
    pub range_max_age_ms: u64,
    pub vision_max_age_ms: u64,
    pub min_gap_width_cm: f32,
    pub view_width_cm: f32,
    pub centering_tolerance: f32,
    pub gap_strategy: GapStrategy,
    pub sensing_mode: SensingMode,
    /// Derived from `sensing_mode` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflex_poll_hz: Option<f32>,
    pub frame_rate_hz: f32,
    pub max_missed_frames: u32,
    pub max_motion_duration_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let perception = PerceptionConfig::default();
        let gate = GateConfig::default();
        Self {
            forward_threshold_ratio: perception.detector.forward_threshold_ratio,
            approach_threshold_ratio: perception.detector.approach_threshold_ratio,
            edge_sensitivity: perception.edge_sensitivity,
            thin_object_top_n: perception.detector.thin_object_top_n,
            thin_object_min_hits: perception.detector.thin_object_min_hits,
            decay_window_ms: perception.decay_window.as_millis() as u64,
            lidar_stop_cm: perception.range.stop_cm,
            lidar_warn_cm: perception.range.warn_cm,
            approach_stop_cm: perception.range.approach_stop_cm,
            range_max_age_ms: perception.range.max_age.as_millis() as u64,
            vision_max_age_ms: gate.vision_max_age.as_millis() as u64,
            min_gap_width_cm: perception.gap.min_gap_width_cm,
            view_width_cm: perception.gap.view_width_cm,
            centering_tolerance: perception.gap.centering_tolerance,
            gap_strategy: perception.gap.strategy,
            sensing_mode: SensingMode::default(),
            reflex_poll_hz: None,
            frame_rate_hz: 30.0,
            max_missed_frames: perception.max_missed_frames,
            max_motion_duration_ms: gate.max_motion_duration.as_millis() as u64,
        }
    }
}

fn ratio_ok(r: f32) -> bool {
    r > 0.0 && r <= 1.0
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl SafetyConfig {
    /// Reflex poll rate: explicit, or 10 Hz vision-only / 20 Hz hybrid.
    pub fn reflex_poll_hz(&self) -> f32 {
        self.reflex_poll_hz.unwrap_or(match self.sensing_mode {
            SensingMode::VisionOnly => 10.0,
            SensingMode::Hybrid => 20.0,
        })
    }

    /// # Errors
    ///
    /// Returns [`SafetyError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), SafetyError> {
        let fail = |msg: String| Err(SafetyError::Config(msg));

        if !ratio_ok(self.forward_threshold_ratio) {
            return fail(format!(
                "forward_threshold_ratio must be in (0, 1], got {}",
                self.forward_threshold_ratio
            ));
        }
        if !ratio_ok(self.approach_threshold_ratio)
            || self.approach_threshold_ratio < self.forward_threshold_ratio
        {
            return fail(format!(
                "approach_threshold_ratio must be in [forward_threshold_ratio, 1], got {}",
                self.approach_threshold_ratio
            ));
        }
        if !(self.edge_sensitivity.is_finite() && self.edge_sensitivity >= 0.0) {
            return fail("edge_sensitivity must be a non-negative number".into());
        }
        if self.thin_object_top_n == 0 {
            return fail("thin_object_top_n must be at least 1".into());
        }
        if self.thin_object_min_hits == 0 || self.thin_object_min_hits > self.thin_object_top_n {
            return fail(format!(
                "thin_object_min_hits must be in 1..={}, got {}",
                self.thin_object_top_n, self.thin_object_min_hits
            ));
        }
        if !positive(self.lidar_stop_cm) || !positive(self.approach_stop_cm) {
            return fail("lidar_stop_cm and approach_stop_cm must be positive".into());
        }
        if self.approach_stop_cm > self.lidar_stop_cm {
            return fail(format!(
                "approach_stop_cm ({}) must not exceed lidar_stop_cm ({})",
                self.approach_stop_cm, self.lidar_stop_cm
            ));
        }
        if !(self.lidar_warn_cm > self.lidar_stop_cm) {
            return fail(format!(
                "lidar_warn_cm ({}) must be greater than lidar_stop_cm ({})",
                self.lidar_warn_cm, self.lidar_stop_cm
            ));
        }
        if !positive(self.min_gap_width_cm) || !positive(self.view_width_cm) {
            return fail("min_gap_width_cm and view_width_cm must be positive".into());
        }
        if !(0.0..1.0).contains(&self.centering_tolerance) {
            return fail("centering_tolerance must be in [0, 1)".into());
        }
        if self.decay_window_ms == 0 || self.range_max_age_ms == 0 || self.vision_max_age_ms == 0 {
            return fail("decay_window_ms, range_max_age_ms and vision_max_age_ms must be non-zero".into());
        }
        if !positive(self.frame_rate_hz) || !positive(self.reflex_poll_hz()) {
            return fail("frame_rate_hz and reflex_poll_hz must be positive".into());
        }
        if self.max_missed_frames == 0 || self.max_motion_duration_ms == 0 {
            return fail("max_missed_frames and max_motion_duration_ms must be non-zero".into());
        }
        Ok(())
    }

    pub fn perception_config(&self) -> PerceptionConfig {
        let defaults = PerceptionConfig::default();
        PerceptionConfig {
            edge_sensitivity: self.edge_sensitivity,
            detector: DetectorConfig {
                forward_threshold_ratio: self.forward_threshold_ratio,
                approach_threshold_ratio: self.approach_threshold_ratio,
                thin_object_top_n: self.thin_object_top_n,
                thin_object_min_hits: self.thin_object_min_hits,
                ..defaults.detector
            },
            decay_window: Duration::from_millis(self.decay_window_ms),
            gap: GapConfig {
                min_gap_width_cm: self.min_gap_width_cm,
                view_width_cm: self.view_width_cm,
                centering_tolerance: self.centering_tolerance,
                strategy: self.gap_strategy,
                ..defaults.gap
            },
            range: RangeConfig {
                stop_cm: self.lidar_stop_cm,
                warn_cm: self.lidar_warn_cm,
                approach_stop_cm: self.approach_stop_cm,
                max_age: Duration::from_millis(self.range_max_age_ms),
                ..defaults.range
            },
            max_missed_frames: self.max_missed_frames,
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            max_motion_duration: Duration::from_millis(self.max_motion_duration_ms),
            vision_max_age: Duration::from_millis(self.vision_max_age_ms),
            range_stop_cm: self.lidar_stop_cm,
            approach_stop_cm: self.approach_stop_cm,
            range_max_age: Duration::from_millis(self.range_max_age_ms),
            reflex_poll_hz: self.reflex_poll_hz(),
        }
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            perception: self.perception_config(),
            gate: self.gate_config(),
            frame_rate_hz: self.frame_rate_hz,
        }
    }
}

/// The `[sim]` table: the simulated camera used when no hardware driver is
/// linked in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
        }
    }
}

/// Persisted configuration stored in `~/.crewsafe/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port for the cockpit endpoint.
    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub sim: SimConfig,
}

fn default_cockpit_port() -> u16 {
    crewsafe_cockpit::DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cockpit_port: default_cockpit_port(),
            safety: SafetyConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

/// Return the path to `~/.crewsafe/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".crewsafe").join("config.toml")
}

/// Load, override and validate.  `Ok(None)` when the file does not exist.
pub fn load() -> Result<Option<Config>, SafetyError> {
    load_from(&config_path(), true)
}

pub(crate) fn load_from(path: &Path, env_overrides: bool) -> Result<Option<Config>, SafetyError> {
    let Some(mut cfg) = read(path)? else {
        return Ok(None);
    };
    if env_overrides {
        apply_env_overrides(&mut cfg);
    }
    cfg.safety.validate()?;
    Ok(Some(cfg))
}

fn read(path: &Path) -> Result<Option<Config>, SafetyError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        SafetyError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    parse(&raw).map(Some)
}

pub(crate) fn parse(raw: &str) -> Result<Config, SafetyError> {
    toml::from_str(raw).map_err(|e| SafetyError::Config(format!("failed to parse config: {e}")))
}

fn override_from_env<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(%var, value = %raw, "ignoring unparsable override"),
        }
    }
}

/// Apply `CREWSAFE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config key |
/// |---|---|
/// | `CREWSAFE_COCKPIT_PORT` | `cockpit_port` |
/// | `CREWSAFE_SENSING_MODE` | `safety.sensing_mode` |
/// | `CREWSAFE_FORWARD_THRESHOLD_RATIO` | `safety.forward_threshold_ratio` |
/// | `CREWSAFE_EDGE_SENSITIVITY` | `safety.edge_sensitivity` |
/// | `CREWSAFE_DECAY_WINDOW_MS` | `safety.decay_window_ms` |
/// | `CREWSAFE_LIDAR_STOP_CM` | `safety.lidar_stop_cm` |
/// | `CREWSAFE_FRAME_RATE_HZ` | `safety.frame_rate_hz` |
/// | `CREWSAFE_REFLEX_POLL_HZ` | `safety.reflex_poll_hz` |
pub fn apply_env_overrides(cfg: &mut Config) {
    override_from_env("CREWSAFE_COCKPIT_PORT", &mut cfg.cockpit_port);
    let s = &mut cfg.safety;
    override_from_env("CREWSAFE_SENSING_MODE", &mut s.sensing_mode);
    override_from_env("CREWSAFE_FORWARD_THRESHOLD_RATIO", &mut s.forward_threshold_ratio);
    override_from_env("CREWSAFE_EDGE_SENSITIVITY", &mut s.edge_sensitivity);
    override_from_env("CREWSAFE_DECAY_WINDOW_MS", &mut s.decay_window_ms);
    override_from_env("CREWSAFE_LIDAR_STOP_CM", &mut s.lidar_stop_cm);
    override_from_env("CREWSAFE_FRAME_RATE_HZ", &mut s.frame_rate_hz);
    if let Ok(raw) = std::env::var("CREWSAFE_REFLEX_POLL_HZ") {
        match raw.parse::<f32>() {
            Ok(hz) => s.reflex_poll_hz = Some(hz),
            Err(_) => warn!(value = %raw, "ignoring unparsable CREWSAFE_REFLEX_POLL_HZ"),
        }
    }
}

/// Save the config, creating `~/.crewsafe/` if necessary.
pub fn save(cfg: &Config) -> Result<(), SafetyError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), SafetyError> {
    let io_err = |what: &str, e: std::io::Error| SafetyError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = to_toml(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    Ok(())
}

pub fn to_toml(cfg: &Config) -> Result<String, SafetyError> {
    toml::to_string_pretty(cfg)
        .map_err(|e| SafetyError::Config(format!("failed to serialize config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = SafetyConfig::default();
        assert_eq!(s.forward_threshold_ratio, 0.875);
        assert_eq!(s.approach_threshold_ratio, 0.95);
        assert_eq!(s.edge_sensitivity, 30.0);
        assert_eq!(s.thin_object_top_n, 5);
        assert_eq!(s.thin_object_min_hits, 2);
        assert_eq!(s.decay_window_ms, 500);
        assert_eq!(s.lidar_stop_cm, 30.0);
        assert_eq!(s.lidar_warn_cm, 80.0);
        assert_eq!(s.approach_stop_cm, 10.0);
        assert_eq!(s.range_max_age_ms, 250);
        assert_eq!(s.vision_max_age_ms, 500);
        assert_eq!(s.min_gap_width_cm, 35.0);
        assert_eq!(s.view_width_cm, 120.0);
        assert_eq!(s.centering_tolerance, 0.15);
        assert_eq!(s.sensing_mode, SensingMode::VisionOnly);
        assert_eq!(s.frame_rate_hz, 30.0);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn poll_rate_follows_sensing_mode() {
        let mut s = SafetyConfig::default();
        assert_eq!(s.reflex_poll_hz(), 10.0);
        s.sensing_mode = SensingMode::Hybrid;
        assert_eq!(s.reflex_poll_hz(), 20.0);
        s.reflex_poll_hz = Some(50.0);
        assert_eq!(s.reflex_poll_hz(), 50.0);
        assert_eq!(s.gate_config().poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg = parse(
            r#"
            cockpit_port = 9000

            [safety]
            forward_threshold_ratio = 0.8
            sensing_mode = "hybrid"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cockpit_port, 9000);
        assert_eq!(cfg.safety.forward_threshold_ratio, 0.8);
        assert_eq!(cfg.safety.sensing_mode, SensingMode::Hybrid);
        assert_eq!(cfg.safety.lidar_stop_cm, 30.0);
        assert_eq!(cfg.sim, SimConfig::default());
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(parse("").unwrap(), Config::default());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad: Vec<fn(&mut SafetyConfig)> = vec![
            |s| s.forward_threshold_ratio = 0.0,
            |s| s.forward_threshold_ratio = 1.2,
            |s| s.approach_threshold_ratio = 0.5,
            |s| s.lidar_warn_cm = 30.0,
            |s| s.lidar_warn_cm = 10.0,
            |s| s.approach_stop_cm = 40.0,
            |s| s.frame_rate_hz = 0.0,
            |s| s.reflex_poll_hz = Some(0.0),
            |s| s.thin_object_min_hits = 9,
            |s| s.decay_window_ms = 0,
            |s| s.centering_tolerance = 1.0,
        ];
        for (i, mutate) in bad.into_iter().enumerate() {
            let mut s = SafetyConfig::default();
            mutate(&mut s);
            assert!(
                matches!(s.validate(), Err(SafetyError::Config(_))),
                "case {i} should be rejected"
            );
        }
    }

    #[test]
    fn approach_stop_may_equal_lidar_stop() {
        let mut s = SafetyConfig::default();
        s.approach_stop_cm = s.lidar_stop_cm;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn conversion_carries_every_key() {
        let mut s = SafetyConfig::default();
        s.forward_threshold_ratio = 0.8;
        s.lidar_stop_cm = 25.0;
        s.decay_window_ms = 700;
        s.centering_tolerance = 0.1;
        let core = s.core_config();
        assert_eq!(core.perception.detector.forward_threshold_ratio, 0.8);
        assert_eq!(core.perception.range.stop_cm, 25.0);
        assert_eq!(core.gate.range_stop_cm, 25.0);
        assert_eq!(core.perception.decay_window, Duration::from_millis(700));
        assert_eq!(core.perception.gap.centering_tolerance, 0.1);
        assert_eq!(core.frame_rate_hz, 30.0);
    }

    #[test]
    fn sensing_mode_parses() {
        assert_eq!("hybrid".parse::<SensingMode>().unwrap(), SensingMode::Hybrid);
        assert_eq!("vision-only".parse::<SensingMode>().unwrap(), SensingMode::VisionOnly);
        assert!("sonar".parse::<SensingMode>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path, false).expect("load ok").expect("some");
        assert_eq!(loaded.safety, SafetyConfig::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[safety]\nlidar_warn_cm = 5.0\n").unwrap();
        assert!(matches!(load_from(&path, false), Err(SafetyError::Config(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path, false).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_crewsafe_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".crewsafe"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("CREWSAFE_SENSING_MODE", "hybrid");
            std::env::set_var("CREWSAFE_LIDAR_STOP_CM", "not-a-number");
            std::env::set_var("CREWSAFE_REFLEX_POLL_HZ", "25");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.safety.sensing_mode, SensingMode::Hybrid);
        assert_eq!(cfg.safety.lidar_stop_cm, 30.0);
        assert_eq!(cfg.safety.reflex_poll_hz(), 25.0);
        unsafe {
            std::env::remove_var("CREWSAFE_SENSING_MODE");
            std::env::remove_var("CREWSAFE_LIDAR_STOP_CM");
            std::env::remove_var("CREWSAFE_REFLEX_POLL_HZ");
        }
    }
}
