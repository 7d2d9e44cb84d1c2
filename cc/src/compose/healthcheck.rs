//! Healthcheck parsing and translation to ECS health checks
//!
//! Compose durations ("90s", "1m30s") become whole seconds; the command
//! keeps the compose CMD/CMD-SHELL distinction, which maps 1:1 onto the
//! ECS container health check command array.

use serde::Deserialize;

use crate::error::{ComposeError, Result};

/// Raw `healthcheck:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawHealthcheck {
    pub test: Option<RawHealthcheckTest>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    #[serde(rename = "start_period")]
    pub start_period: Option<String>,
    pub disable: bool,
}

/// `test:` in string or list form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawHealthcheckTest {
    Command(String),
    Argv(Vec<String>),
}

/// Normalized healthcheck, in the shape ECS consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Healthcheck {
    /// ECS command array, first element CMD or CMD-SHELL
    pub command: Vec<String>,

    /// Seconds between checks
    pub interval: u32,

    /// Seconds before a check is considered hung
    pub timeout: u32,

    /// Consecutive failures before unhealthy
    pub retries: u32,

    /// Grace period before failures count
    pub start_period: u32,
}

/// ECS bounds and defaults for container health checks
const DEFAULT_INTERVAL_SECS: u32 = 30;
const DEFAULT_TIMEOUT_SECS: u32 = 5;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_START_PERIOD_SECS: u32 = 0;

impl Healthcheck {
    /// Normalize a raw healthcheck; returns None when disabled or empty
    pub fn from_raw(service: &str, raw: RawHealthcheck) -> Result<Option<Self>> {
        if raw.disable {
            return Ok(None);
        }
        let Some(test) = raw.test else {
            return Ok(None);
        };

        let command = match test {
            RawHealthcheckTest::Command(cmd) => {
                if cmd.trim().is_empty() {
                    return Err(ComposeError::malformed(service, "healthcheck test command is empty"));
                }
                vec!["CMD-SHELL".to_string(), cmd]
            }
            RawHealthcheckTest::Argv(argv) => {
                let head = argv.first().map(String::as_str);
                if head == Some("NONE") {
                    return Ok(None);
                }
                if !matches!(head, Some("CMD") | Some("CMD-SHELL")) || argv.len() < 2 {
                    return Err(ComposeError::malformed(
                        service,
                        "healthcheck test list must start with CMD, CMD-SHELL or NONE",
                    ));
                }
                argv
            }
        };

        Ok(Some(Self {
            command,
            interval: parse_duration_opt(service, raw.interval.as_deref(), DEFAULT_INTERVAL_SECS)?,
            timeout: parse_duration_opt(service, raw.timeout.as_deref(), DEFAULT_TIMEOUT_SECS)?,
            retries: raw.retries.unwrap_or(DEFAULT_RETRIES),
            start_period: parse_duration_opt(service, raw.start_period.as_deref(), DEFAULT_START_PERIOD_SECS)?,
        }))
    }
}

fn parse_duration_opt(service: &str, text: Option<&str>, default: u32) -> Result<u32> {
    match text {
        Some(t) => parse_duration_secs(service, t),
        None => Ok(default),
    }
}

/// Parse a compose duration ("30s", "2m", "1m30s", "1h") into whole seconds
pub fn parse_duration_secs(service: &str, text: &str) -> Result<u32> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ComposeError::malformed(service, "empty duration"));
    }

    // Bare integers are seconds
    if let Ok(secs) = text.parse::<u32>() {
        return Ok(secs);
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| ComposeError::malformed(service, format!("invalid duration '{text}'")))?;
        digits.clear();
        let factor = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return Err(ComposeError::malformed(service, format!("invalid duration unit '{ch}' in '{text}'"))),
        };
        total += value * factor;
    }
    if !digits.is_empty() {
        return Err(ComposeError::malformed(
            service,
            format!("duration '{text}' has trailing digits without a unit"),
        ));
    }

    u32::try_from(total).map_err(|_| ComposeError::malformed(service, format!("duration '{text}' overflows")))
}
