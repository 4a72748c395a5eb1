use anyhow::{anyhow, Result};
use std::env;

/// Rolling-window and storage tuning knobs, all read from `OBS_*`
/// environment variables (§6), each with its own documented default;
/// malformed values (non-numeric, non-boolean) are a startup-time
/// `anyhow::Error`, not a silent fallback.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub token: String,
    pub window_s: u64,
    pub max_events: usize,
    pub slow_ms: f64,
    pub sample_rate: f64,
    pub trace_store_max: usize,
    pub trace_logs_max: usize,
    pub trace_spans_max: usize,
    pub recent_reqs_max: usize,
    pub log_files: String,
    pub tail_from_start: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            token: env::var("OBS_TOKEN").unwrap_or_else(|_| "dev-secret".to_string()),
            window_s: parse_optional_u64("OBS_WINDOW_S")?.unwrap_or(120),
            max_events: parse_optional_u64("OBS_MAX_EVENTS")?.unwrap_or(30_000) as usize,
            slow_ms: parse_optional_f64("OBS_SLOW_MS")?.unwrap_or(750.0),
            sample_rate: parse_optional_f64("OBS_SAMPLE_RATE")?.unwrap_or(0.05),
            trace_store_max: parse_optional_u64("OBS_TRACE_STORE")?.unwrap_or(2_000) as usize,
            trace_logs_max: parse_optional_u64("OBS_TRACE_LOGS")?.unwrap_or(200) as usize,
            trace_spans_max: parse_optional_u64("OBS_TRACE_SPANS")?.unwrap_or(200) as usize,
            recent_reqs_max: parse_optional_u64("OBS_RECENT_REQS")?.unwrap_or(2_000) as usize,
            log_files: env::var("OBS_LOG_FILES").unwrap_or_default(),
            tail_from_start: parse_bool_env("OBS_TAIL_FROM_START")?.unwrap_or(false),
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_f64(var: &str) -> Result<Option<f64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
