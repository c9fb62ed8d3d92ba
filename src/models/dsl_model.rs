use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{ConfigError, ConfigResult};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DRAIN_GRACE_MS: u64 = 1_000;

/// A load test definition. Built once at startup and shared read-only by
/// the scheduler and every virtual user.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DslConfig {
    pub name: String,
    /// May be left out of the file and supplied on the command line.
    #[serde(default)]
    pub target: String,
    pub stages: Vec<Stage>,

    /// Per-request timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub payload: Payload,

    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    pub checks: Checks,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Sleep between iterations in milliseconds. Absent means a tight loop.
    #[serde(default)]
    pub pacing: Option<u64>,

    /// Upper bound in milliseconds on waiting for in-flight requests at the end.
    #[serde(default)]
    pub drain_timeout: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Stage {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// The JSON log entry posted on every iteration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Payload {
    pub message: String,
    pub level: String,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            message: "Test log entry".to_string(),
            level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for Checks {
    fn default() -> Self {
        Self {
            expected_status: default_expected_status(),
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

fn default_expected_status() -> u16 {
    200
}

fn default_max_duration_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq)]
pub struct Thresholds {
    /// Error rate above which the run is reported as degraded.
    #[serde(default)]
    pub error_rate: Option<f64>,
}

impl DslConfig {
    /// Configuration with default payload, checks and timeouts.
    pub fn new(name: impl Into<String>, target: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            stages,
            timeout: None,
            payload: Payload::default(),
            headers: None,
            checks: Checks::default(),
            thresholds: Thresholds::default(),
            pacing: None,
            drain_timeout: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a config file without validating it, so that command-line
    /// overrides can be applied first.
    pub fn read_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: DslConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::Validation("target url is missing".into()));
        }
        let url = Url::parse(&self.target)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "unsupported scheme '{}', expected http or https",
                url.scheme()
            )));
        }

        if self.stages.is_empty() {
            return Err(ConfigError::Validation("at least one stage is required".into()));
        }
        if let Some(i) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::Validation(format!(
                "stage {} has a zero duration",
                i + 1
            )));
        }
        self.stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .ok_or_else(|| ConfigError::Validation("total duration overflows".into()))?;

        if self.timeout == Some(0) {
            return Err(ConfigError::Validation("timeout must be positive".into()));
        }
        if let Some(rate) = self.thresholds.error_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Validation(format!(
                    "error rate threshold {} is outside [0, 1]",
                    rate
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.request_timeout() + Duration::from_millis(DRAIN_GRACE_MS))
    }

    pub fn pacing(&self) -> Option<Duration> {
        self.pacing.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Saturates instead of overflowing; `validate` rejects such profiles.
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }
}

/// Parses durations such as `"250ms"`, `"30s"`, `"1m"`, `"2h"` or compounds
/// like `"1m 30s"`. A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidDuration(format!("'{}' ({})", s, e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const LOG_INGEST: &str = r#"{
        "name": "log-ingest",
        "target": "http://127.0.0.1:8000/log",
        "stages": [
            { "duration": "1m", "target": 100 },
            { "duration": "3m", "target": 100 },
            { "duration": "1m", "target": 0 }
        ]
    }"#;

    #[rstest]
    #[case("250ms", Duration::from_millis(250))]
    #[case("30s", Duration::from_secs(30))]
    #[case("1m", Duration::from_secs(60))]
    #[case("2h", Duration::from_secs(7200))]
    #[case("1m30s", Duration::from_secs(90))]
    #[case("1m 30s", Duration::from_secs(90))]
    #[case("45", Duration::from_secs(45))]
    #[case(" 10s ", Duration::from_secs(10))]
    fn parses_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("ms")]
    #[case("10x")]
    #[case("1.5s")]
    #[case("-3s")]
    #[case("18446744073709551615h1s")]
    fn rejects_bad_durations(#[case] input: &str) {
        assert!(matches!(
            parse_duration(input),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn loads_ramp_profile_with_defaults() {
        let config = DslConfig::from_json(LOG_INGEST).unwrap();
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[0], Stage::new(Duration::from_secs(60), 100));
        assert_eq!(config.total_duration(), Duration::from_secs(300));
        assert_eq!(config.max_target(), 100);
        assert_eq!(config.payload, Payload::default());
        assert_eq!(config.checks.expected_status, 200);
        assert_eq!(config.checks.max_duration_ms, 500);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_timeout(), Duration::from_secs(61));
        assert_eq!(config.pacing(), None);
    }

    #[test]
    fn numeric_stage_durations_are_seconds() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[{"duration":10,"target":1}]}"#;
        let config = DslConfig::from_json(raw).unwrap();
        assert_eq!(config.stages[0].duration, Duration::from_secs(10));
    }

    #[test]
    fn target_may_come_later() {
        let raw = r#"{"name":"n","stages":[{"duration":"1s","target":1}]}"#;
        assert!(matches!(
            DslConfig::from_json(raw),
            Err(ConfigError::Validation(_))
        ));

        let mut config: DslConfig = serde_json::from_str(raw).unwrap();
        config.target = "http://127.0.0.1:8000/log".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_files() {
        let path = std::env::temp_dir().join(format!("stagehand-config-{}.json", std::process::id()));
        std::fs::write(&path, LOG_INGEST).unwrap();
        let config = DslConfig::from_file(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(config.unwrap().name, "log-ingest");

        assert!(matches!(
            DslConfig::from_file("/nonexistent/stagehand.json"),
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn rejects_empty_stages() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[]}"#;
        assert!(matches!(
            DslConfig::from_json(raw),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_zero_duration_stage() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[{"duration":"0s","target":1}]}"#;
        assert!(matches!(
            DslConfig::from_json(raw),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_overflowing_total_duration() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[
            {"duration":18446744073709551615,"target":1},
            {"duration":1,"target":1}
        ]}"#;
        match DslConfig::from_json(raw) {
            Err(ConfigError::Validation(msg)) => assert_eq!(msg, "total duration overflows"),
            other => panic!("expected a validation error, got {:?}", other),
        }

        let config: DslConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.total_duration(), Duration::MAX);
    }

    #[test]
    fn rejects_malformed_stage_duration() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[{"duration":"soon","target":1}]}"#;
        assert!(matches!(DslConfig::from_json(raw), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_negative_target() {
        let raw = r#"{"name":"n","target":"http://h/log","stages":[{"duration":"1s","target":-1}]}"#;
        assert!(matches!(DslConfig::from_json(raw), Err(ConfigError::Parse(_))));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn rejects_missing_target(#[case] target: &str) {
        let config = DslConfig::new("n", target, vec![Stage::new(Duration::from_secs(1), 1)]);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_unparsable_and_non_http_targets() {
        let stages = vec![Stage::new(Duration::from_secs(1), 1)];
        let config = DslConfig::new("n", "not a url", stages.clone());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let config = DslConfig::new("n", "ftp://host/log", stages);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_zero_timeout_and_bad_threshold() {
        let stages = vec![Stage::new(Duration::from_secs(1), 1)];
        let mut config = DslConfig::new("n", "http://h/log", stages);
        config.timeout = Some(0);
        assert!(config.validate().is_err());

        config.timeout = Some(100);
        config.thresholds.error_rate = Some(1.5);
        assert!(config.validate().is_err());

        config.thresholds.error_rate = Some(0.05);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stage_durations_serialize_as_strings() {
        let stage = Stage::new(Duration::from_secs(90), 5);
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json, serde_json::json!({ "duration": "1m 30s", "target": 5 }));

        let back: Stage = serde_json::from_value(json).unwrap();
        assert_eq!(back, stage);

        let json = serde_json::to_value(Stage::new(Duration::from_millis(1500), 1)).unwrap();
        assert_eq!(json["duration"], "1s 500ms");
    }
}
