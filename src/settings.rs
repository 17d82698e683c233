//! Process configuration from environment variables.
//!
//! Every knob has a default; values that are present but malformed are hard
//! errors so a typo never silently runs with the default.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::matcher::{InvalidPattern, Pattern, PatternList};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{name} is not set")]
    Missing { name: &'static str },

    #[error("unable to parse {name}=`{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid allowlist entry: {0}")]
    Allowlist(#[from] InvalidPattern),
}

/// Settings shared by the ingress and the worker.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the ingress, `host:port`.
    pub address: String,

    /// URL of the queue substrate.
    pub nats_url: String,

    /// Repositories the bot acts on.
    pub allowed_repositories: PatternList,
    pub allow_only_public_repositories: bool,

    /// Name under which check runs appear.
    pub bot_name: String,

    pub stream_name: String,
    pub push_subject: String,
    pub status_subject: String,
    pub pull_request_subject: String,

    pub message_retry_attempts: i64,
    pub message_retry_wait: Duration,

    pub rate_limit_bucket_name: String,
    pub rate_limit_bucket_ttl: Duration,
    pub rate_limit_interval: Duration,

    pub access_tokens_bucket_name: String,
    pub access_tokens_bucket_ttl: Duration,

    pub configs_bucket_name: String,
    pub configs_bucket_ttl: Duration,

    pub check_runs_bucket_name: String,
    pub check_runs_bucket_ttl: Duration,

    pub duration_before_merge_after_check: Duration,
    pub duration_to_wait_after_update_branch: Duration,

    pub max_message_age: Duration,
    pub message_channel_size_per_subject: usize,

    /// Log escalation flags; any non-empty value counts as set.
    pub debug: bool,
    pub trace: bool,
}

impl Settings {
    /// Reads all settings from the environment, applying defaults.
    pub fn from_env() -> Result<Settings, SettingsError> {
        let address = match env::var("ADDRESS").ok().filter(|s| !s.is_empty()) {
            Some(address) => address,
            None => {
                let port = env::var("PORT").ok().filter(|s| !s.is_empty());
                format!("0.0.0.0:{}", port.as_deref().unwrap_or("8000"))
            }
        };

        Ok(Settings {
            address,
            nats_url: string_setting("NATS_URL", "nats://127.0.0.1:4222"),
            allowed_repositories: allowlist_setting("AllowedRepositories")?,
            allow_only_public_repositories: bool_setting("AllowOnlyPublicRepositories", false)?,
            bot_name: string_setting("BotName", "merge-pilot"),
            stream_name: string_setting("StreamName", "mp_bot_events"),
            push_subject: string_setting("PushSubject", "push"),
            status_subject: string_setting("StatusSubject", "status"),
            pull_request_subject: string_setting("PullRequestSubject", "pull_request"),
            message_retry_attempts: int_setting("MessageRetryAttempts", 5)?,
            message_retry_wait: duration_setting("MessageRetryWait", Duration::from_secs(15))?,
            rate_limit_bucket_name: string_setting("RateLimitBucketName", "mp_rate_limit"),
            rate_limit_bucket_ttl: duration_setting(
                "RateLimitBucketTTL",
                Duration::from_secs(24 * 60 * 60),
            )?,
            rate_limit_interval: duration_setting("RateLimitInterval", Duration::from_secs(30))?,
            access_tokens_bucket_name: string_setting("AccessTokensBucketName", "mp_access_tokens"),
            access_tokens_bucket_ttl: duration_setting(
                "AccessTokensBucketTTL",
                Duration::from_secs(24 * 60 * 60),
            )?,
            configs_bucket_name: string_setting("ConfigsBucketName", "mp_configs"),
            configs_bucket_ttl: duration_setting(
                "ConfigsBucketTTL",
                Duration::from_secs(24 * 60 * 60),
            )?,
            check_runs_bucket_name: string_setting("CheckRunsBucketName", "mp_check_runs"),
            check_runs_bucket_ttl: duration_setting(
                "CheckRunsBucketTTL",
                Duration::from_secs(10 * 60),
            )?,
            duration_before_merge_after_check: duration_setting(
                "DurationBeforeMergeAfterCheck",
                Duration::from_secs(10),
            )?,
            duration_to_wait_after_update_branch: duration_setting(
                "DurationToWaitAfterUpdateBranch",
                Duration::from_secs(30),
            )?,
            max_message_age: duration_setting("MaxMessageAge", Duration::from_secs(10 * 60))?,
            message_channel_size_per_subject: int_setting("MessageChannelSizePerSubject", 64)?
                as usize,
            debug: flag_setting("DEBUG"),
            trace: flag_setting("TRACE"),
        })
    }

    /// The default tracing directive, used when `RUST_LOG` does not
    /// override it.
    pub fn log_directive(&self) -> &'static str {
        log_directive(self.debug, self.trace)
    }

    /// The GitHub App credentials, required by the worker only.
    pub fn github_app_from_env() -> Result<(u64, Vec<u8>), SettingsError> {
        let app_id_raw = env::var("APP_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(SettingsError::Missing { name: "APP_ID" })?;
        let app_id = app_id_raw
            .parse::<u64>()
            .map_err(|e| SettingsError::Invalid {
                name: "APP_ID",
                value: app_id_raw,
                reason: e.to_string(),
            })?;

        let key_path = env::var("PRIVATE_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(SettingsError::Missing { name: "PRIVATE_KEY" })?;
        let private_key = std::fs::read(&key_path).map_err(|e| SettingsError::Invalid {
            name: "PRIVATE_KEY",
            value: key_path,
            reason: e.to_string(),
        })?;

        Ok((app_id, private_key))
    }
}

fn log_directive(debug: bool, trace: bool) -> &'static str {
    if trace {
        "merge_pilot=trace"
    } else if debug {
        "merge_pilot=debug"
    } else {
        "merge_pilot=info"
    }
}

fn flag_setting(name: &'static str) -> bool {
    env::var(name).is_ok_and(|s| !s.is_empty())
}

fn string_setting(name: &'static str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn bool_setting(name: &'static str, default: bool) -> Result<bool, SettingsError> {
    match env::var(name).ok().filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "t" | "true" => Ok(true),
            "0" | "f" | "false" => Ok(false),
            _ => Err(SettingsError::Invalid {
                name,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn int_setting(name: &'static str, default: i64) -> Result<i64, SettingsError> {
    match env::var(name).ok().filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse::<i64>().map_err(|e| SettingsError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

fn duration_setting(name: &'static str, default: Duration) -> Result<Duration, SettingsError> {
    match env::var(name).ok().filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => parse_duration(&value).ok_or_else(|| SettingsError::Invalid {
            name,
            value,
            reason: "expected a duration such as 30s, 10m or 1h30m".to_string(),
        }),
    }
}

fn allowlist_setting(name: &'static str) -> Result<PatternList, SettingsError> {
    match env::var(name).ok().filter(|s| !s.is_empty()) {
        None => Ok(PatternList::new(vec![
            Pattern::new(".*").expect(".* is a valid regex"),
        ])),
        Some(value) => Ok(PatternList::from_comma_separated(&value)?),
    }
}

/// Parses duration strings of the form `<number><unit>…` with units
/// `ms`, `s`, `m`, `h`; components may be chained (`1h30m`).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: u64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let (unit, remainder) = if let Some(r) = rest.strip_prefix("ms") {
            (Duration::from_millis(value), r)
        } else if let Some(r) = rest.strip_prefix('s') {
            (Duration::from_secs(value), r)
        } else if let Some(r) = rest.strip_prefix('m') {
            (Duration::from_secs(value * 60), r)
        } else if let Some(r) = rest.strip_prefix('h') {
            (Duration::from_secs(value * 60 * 60), r)
        } else {
            return None;
        };
        total += unit;
        rest = remainder;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── parse_duration ───

    #[test]
    fn parses_simple_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("150ms"), Some(Duration::from_millis(150)));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("30"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("30x"), None);
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(parse_duration("  5s "), Some(Duration::from_secs(5)));
    }

    // ─── log directive ───

    #[test]
    fn trace_outranks_debug() {
        assert_eq!(log_directive(false, false), "merge_pilot=info");
        assert_eq!(log_directive(true, false), "merge_pilot=debug");
        assert_eq!(log_directive(true, true), "merge_pilot=trace");
        assert_eq!(log_directive(false, true), "merge_pilot=trace");
    }
}
