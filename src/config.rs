//! Run configuration using Figment
//!
//! A cycling run is described by one immutable [`RunConfig`]. It is assembled from,
//! in increasing priority:
//! 1. Built-in defaults (matching the long-standing bench defaults)
//! 2. A TOML file
//! 3. Environment variables prefixed with `CHARGE_CYCLER_`, with `__` separating
//!    the section from the key (e.g. `CHARGE_CYCLER_CYCLING__MAX_REPEATS=5`)
//! 4. Command-line overrides
//!
//! # Example
//! ```no_run
//! use charge_cycler::config::{ConfigOverrides, RunConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::load(Some("config/charge_hybrid.toml".as_ref()), &ConfigOverrides::default())?;
//! config.validate()?;
//! println!("Cycling at {} A", config.hybrid.i_init);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, CyclerError};
use crate::logging::OutputFormat;
use crate::procedures::polarity::CurrentSign;
use crate::validation;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CHARGE_CYCLER_";

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunConfig {
    /// Logging settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where traces go
    #[serde(default)]
    pub output: OutputConfig,
    /// Hybrid measurement parameters
    #[serde(default)]
    pub hybrid: HybridConfig,
    /// Optional conditioning step before cycling
    #[serde(default)]
    pub condition: ConditionConfig,
    /// Cycling loop bounds and stop limits
    #[serde(default)]
    pub cycling: CyclingConfig,
    /// Potentiostatic voltage finish
    #[serde(default)]
    pub finish: FinishConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving all trace files
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Base identifier appended to every trace name
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    /// Directory for the live-view mirror trace (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kst_path: Option<PathBuf>,
    /// Free-form notes stored with each hybrid measurement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_notes: Option<String>,
}

/// Hybrid measurement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Initial DC current in amps; its sign sets the charge direction
    #[serde(default)]
    pub i_init: f64,
    /// Rest between hybrid cycles in seconds (performed by the hybrid engine)
    #[serde(default = "default_hybrid_rest_time")]
    pub rest_time: f64,
    /// Galvanostatic step length of one hybrid cycle in seconds
    #[serde(default = "default_hybrid_duration")]
    pub duration: f64,
    /// Sample interval in seconds
    #[serde(default = "default_hybrid_t_sample")]
    pub t_sample: f64,
}

/// Conditioning step parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Conditioning duration in seconds; 0 disables conditioning
    #[serde(default)]
    pub time: f64,
    /// Sample interval in seconds
    #[serde(default = "default_condition_t_sample")]
    pub t_sample: f64,
}

/// Cycling loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclingConfig {
    /// Maximum number of hybrid cycles
    #[serde(default = "default_max_repeats")]
    pub max_repeats: u32,
    /// Overall wall-clock budget in seconds, checked at cycle boundaries
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Stop when the minimum measured voltage falls to this value (V)
    #[serde(default = "default_stop_v_min")]
    pub stop_v_min: f64,
    /// Stop when the maximum measured voltage rises to this value (V)
    #[serde(default = "default_stop_v_max")]
    pub stop_v_max: f64,
}

/// Voltage finish configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishConfig {
    /// Run the potentiostatic finish after cycling
    #[serde(default)]
    pub enabled: bool,
    /// Finish voltage (V); also the cycling stop target when enabled
    #[serde(default)]
    pub v: f64,
    /// Current magnitude at which the hold is considered complete (A)
    #[serde(default = "default_finish_i_thresh")]
    pub i_thresh: f64,
    /// Largest current magnitude accepted by the cutoff band (A)
    #[serde(default = "default_finish_i_max")]
    pub i_max: f64,
    /// Sample interval in seconds
    #[serde(default = "default_finish_t_sample")]
    pub t_sample: f64,
    /// Maximum hold duration in seconds
    #[serde(default = "default_finish_duration")]
    pub duration: f64,
    /// Rest before the hold in seconds
    #[serde(default = "default_finish_rest_time")]
    pub rest_time: f64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_file_suffix() -> String {
    "run".to_string()
}

fn default_hybrid_rest_time() -> f64 {
    10.0
}

fn default_hybrid_duration() -> f64 {
    30.0
}

fn default_hybrid_t_sample() -> f64 {
    1e-3
}

fn default_condition_t_sample() -> f64 {
    1e-3
}

fn default_max_repeats() -> u32 {
    1
}

fn default_duration() -> f64 {
    3600.0
}

fn default_stop_v_min() -> f64 {
    -1.0
}

fn default_stop_v_max() -> f64 {
    1.0
}

fn default_finish_i_thresh() -> f64 {
    0.005
}

fn default_finish_i_max() -> f64 {
    1.0
}

fn default_finish_t_sample() -> f64 {
    1.0
}

fn default_finish_duration() -> f64 {
    3600.0
}

fn default_finish_rest_time() -> f64 {
    2.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            file_suffix: default_file_suffix(),
            kst_path: None,
            exp_notes: None,
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            i_init: 0.0,
            rest_time: default_hybrid_rest_time(),
            duration: default_hybrid_duration(),
            t_sample: default_hybrid_t_sample(),
        }
    }
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            time: 0.0,
            t_sample: default_condition_t_sample(),
        }
    }
}

impl Default for CyclingConfig {
    fn default() -> Self {
        Self {
            max_repeats: default_max_repeats(),
            duration: default_duration(),
            stop_v_min: default_stop_v_min(),
            stop_v_max: default_stop_v_max(),
        }
    }
}

impl Default for FinishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            v: 0.0,
            i_thresh: default_finish_i_thresh(),
            i_max: default_finish_i_max(),
            t_sample: default_finish_t_sample(),
            duration: default_finish_duration(),
            rest_time: default_finish_rest_time(),
        }
    }
}

/// Command-line overrides, merged last.
///
/// Only fields that are `Some` (or `true` for flags) take effect.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<OutputOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<ConditionOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cycling: Option<CyclingOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish: Option<FinishOverrides>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    data_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ConditionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct CyclingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_repeats: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_v_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_v_max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct FinishOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<f64>,
}

impl ConfigOverrides {
    /// Override the trace directory
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.get_or_insert_with(Default::default).data_path = Some(path.into());
        self
    }

    /// Override the base file suffix
    pub fn file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output.get_or_insert_with(Default::default).file_suffix = Some(suffix.into());
        self
    }

    /// Override the conditioning duration
    pub fn condition_time(mut self, seconds: f64) -> Self {
        self.condition.get_or_insert_with(Default::default).time = Some(seconds);
        self
    }

    /// Override the maximum number of cycles
    pub fn max_repeats(mut self, n: u32) -> Self {
        self.cycling.get_or_insert_with(Default::default).max_repeats = Some(n);
        self
    }

    /// Override the overall duration budget
    pub fn duration(mut self, seconds: f64) -> Self {
        self.cycling.get_or_insert_with(Default::default).duration = Some(seconds);
        self
    }

    /// Override the low voltage stop bound
    pub fn stop_v_min(mut self, volts: f64) -> Self {
        self.cycling.get_or_insert_with(Default::default).stop_v_min = Some(volts);
        self
    }

    /// Override the high voltage stop bound
    pub fn stop_v_max(mut self, volts: f64) -> Self {
        self.cycling.get_or_insert_with(Default::default).stop_v_max = Some(volts);
        self
    }

    /// Enable the voltage finish
    pub fn voltage_finish(mut self, enabled: bool) -> Self {
        self.finish.get_or_insert_with(Default::default).enabled = Some(enabled);
        self
    }

    /// Override the finish voltage
    pub fn finish_v(mut self, volts: f64) -> Self {
        self.finish.get_or_insert_with(Default::default).v = Some(volts);
        self
    }
}

impl RunConfig {
    /// Build the figment used by [`RunConfig::load`].
    ///
    /// Exposed so tests can layer their own providers.
    pub fn figment(path: Option<&Path>, overrides: &ConfigOverrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RunConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    /// Load configuration from an optional TOML file, the environment and overrides.
    ///
    /// A missing file is an error; pass `None` to rely on defaults and environment.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> AppResult<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(CyclerError::Configuration(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
        }
        Ok(Self::figment(path, overrides).extract()?)
    }

    /// Parse configuration from a TOML string on top of the defaults.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::string(toml))
            .extract()?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CyclerError::Configuration(format!("cannot render configuration: {e}")))
    }

    /// Sign of the initial current, oriented once for the whole run.
    pub fn current_sign(&self) -> CurrentSign {
        CurrentSign::of(self.hybrid.i_init)
    }

    /// Whether a conditioning step runs before cycling.
    pub fn conditioning_enabled(&self) -> bool {
        self.condition.time > 0.0
    }

    /// Validate configuration after loading.
    ///
    /// All checks here are preconditions of a run: a config that fails validation
    /// never reaches the instrument.
    pub fn validate(&self) -> AppResult<()> {
        fn check(field: &str, result: Result<(), &'static str>) -> AppResult<()> {
            result.map_err(|msg| CyclerError::Configuration(format!("{field} {msg}")))
        }

        crate::logging::parse_log_level(&self.application.log_level)
            .map_err(CyclerError::Configuration)?;

        check("output.file_suffix", validation::is_not_empty(&self.output.file_suffix))?;
        check(
            "output.data_path",
            validation::is_valid_path(&self.output.data_path.to_string_lossy()),
        )?;

        check("hybrid.i_init", validation::is_non_zero(self.hybrid.i_init))?;
        check("hybrid.rest_time", validation::is_duration(self.hybrid.rest_time))?;
        check("hybrid.duration", validation::is_positive(self.hybrid.duration))?;
        check("hybrid.duration", validation::is_duration(self.hybrid.duration))?;
        check("hybrid.t_sample", validation::is_positive(self.hybrid.t_sample))?;
        check("hybrid.t_sample", validation::is_duration(self.hybrid.t_sample))?;

        check("condition.time", validation::is_duration(self.condition.time))?;
        if self.conditioning_enabled() {
            check("condition.t_sample", validation::is_positive(self.condition.t_sample))?;
            check("condition.t_sample", validation::is_duration(self.condition.t_sample))?;
        }

        check(
            "cycling.max_repeats",
            validation::is_in_range(self.cycling.max_repeats, 1..=u32::MAX),
        )?;
        check("cycling.duration", validation::is_duration(self.cycling.duration))?;
        check("cycling.stop_v_min", validation::is_finite(self.cycling.stop_v_min))?;
        check("cycling.stop_v_max", validation::is_finite(self.cycling.stop_v_max))?;
        check(
            "cycling.stop_v_min/stop_v_max",
            validation::is_ordered(self.cycling.stop_v_min, self.cycling.stop_v_max),
        )?;

        if self.finish.enabled {
            check("finish.v", validation::is_finite(self.finish.v))?;
            check("finish.i_thresh", validation::is_finite(self.finish.i_thresh))?;
            check("finish.i_max", validation::is_finite(self.finish.i_max))?;
            if self.finish.i_thresh.abs() > self.finish.i_max.abs() {
                return Err(CyclerError::Configuration(format!(
                    "finish.i_thresh magnitude ({}) must not exceed finish.i_max magnitude ({})",
                    self.finish.i_thresh.abs(),
                    self.finish.i_max.abs()
                )));
            }
            check("finish.t_sample", validation::is_positive(self.finish.t_sample))?;
            check("finish.t_sample", validation::is_duration(self.finish.t_sample))?;
            check("finish.duration", validation::is_positive(self.finish.duration))?;
            check("finish.duration", validation::is_duration(self.finish.duration))?;
            check("finish.rest_time", validation::is_duration(self.finish.rest_time))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RunConfig {
        let mut config = RunConfig::default();
        config.hybrid.i_init = 0.05;
        config
    }

    #[test]
    fn defaults_match_bench_values() {
        let config = RunConfig::default();
        assert_eq!(config.condition.time, 0.0);
        assert_eq!(config.condition.t_sample, 1e-3);
        assert_eq!(config.cycling.max_repeats, 1);
        assert_eq!(config.cycling.duration, 3600.0);
        assert_eq!(config.cycling.stop_v_min, -1.0);
        assert_eq!(config.cycling.stop_v_max, 1.0);
        assert!(!config.finish.enabled);
        assert_eq!(config.finish.v, 0.0);
        assert_eq!(config.finish.i_thresh, 0.005);
        assert_eq!(config.finish.i_max, 1.0);
        assert_eq!(config.finish.t_sample, 1.0);
        assert_eq!(config.finish.duration, 3600.0);
        assert_eq!(config.finish.rest_time, 2.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn zero_initial_current_is_rejected() {
        let err = RunConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("hybrid.i_init"));
    }

    #[test]
    fn zero_max_repeats_is_rejected() {
        let mut config = valid_config();
        config.cycling.max_repeats = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycling.max_repeats"));
    }

    #[test]
    fn conflicting_voltage_bounds_are_rejected() {
        let mut config = valid_config();
        config.cycling.stop_v_min = 1.2;
        config.cycling.stop_v_max = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn conditioning_sample_checked_only_when_enabled() {
        let mut config = valid_config();
        config.condition.t_sample = 0.0;
        assert!(config.validate().is_ok());

        config.condition.time = 600.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn finish_thresholds_checked_only_when_enabled() {
        let mut config = valid_config();
        config.finish.i_thresh = 2.0;
        config.finish.i_max = 1.0;
        assert!(config.validate().is_ok());

        config.finish.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("finish.i_thresh"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CyclerError::Configuration(_)));
        assert!(err.to_string().contains("Invalid log level 'verbose'"));

        config.application.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_times_rejected() {
        let mut config = valid_config();
        config.finish.enabled = true;
        config.finish.rest_time = 1e20;
        let err_msg = config.validate().unwrap_err().to_string();
        assert!(err_msg.contains("finish.rest_time is too large to be a duration"));

        let mut config = valid_config();
        config.hybrid.rest_time = 1e20;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.hybrid.duration = f64::MAX;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.cycling.duration = 1e30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            [hybrid]
            i_init = -0.1

            [cycling]
            max_repeats = 12
            stop_v_min = -0.8

            [finish]
            enabled = true
            v = -0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.hybrid.i_init, -0.1);
        assert_eq!(config.cycling.max_repeats, 12);
        assert_eq!(config.cycling.stop_v_min, -0.8);
        assert_eq!(config.cycling.stop_v_max, 1.0);
        assert!(config.finish.enabled);
        assert_eq!(config.finish.i_max, 1.0);
        assert_eq!(config.current_sign(), CurrentSign::Negative);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_win_over_file_and_environment() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "run.toml",
                r#"
                [hybrid]
                i_init = 0.2

                [cycling]
                max_repeats = 3
                duration = 100.0
                "#,
            )?;
            jail.set_env("CHARGE_CYCLER_CYCLING__DURATION", "250.0");

            let overrides = ConfigOverrides::default().max_repeats(7);
            let config: RunConfig =
                RunConfig::figment(Some(Path::new("run.toml")), &overrides).extract()?;

            assert_eq!(config.hybrid.i_init, 0.2);
            assert_eq!(config.cycling.max_repeats, 7);
            assert_eq!(config.cycling.duration, 250.0);
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = RunConfig::load(
            Some(Path::new("definitely/not/here.toml")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn renders_back_to_toml() {
        let config = valid_config();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = RunConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }
}
