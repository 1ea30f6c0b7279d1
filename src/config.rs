use chrono::Duration;
use dotenv::dotenv;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// Timing and release rules shared by the reservation, booking and
/// reschedule services.
#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    /// How long a checkout hold lasts
    pub hold: Duration,
    /// How long a reschedule request may stay pending
    pub reschedule_max_age: Duration,
    /// Minimum notice a mentee must give to cancel or reschedule
    pub min_cancel_notice: Duration,
    /// Reopen a cancelled booking's slot even when its rule was disabled
    pub release_when_rule_inactive: bool,
    /// Rolling generation horizon in days
    pub horizon_days: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold: Duration::minutes(10),
            reschedule_max_age: Duration::hours(24),
            min_cancel_notice: Duration::hours(24),
            release_when_rule_inactive: false,
            horizon_days: 60,
        }
    }
}

/// Service configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub policy: BookingPolicy,
    pub sweep_interval: std::time::Duration,
    pub simulate_payments: bool,
    pub payment_endpoint: Option<String>,
    pub payment_api_key: String,
    pub payment_api_secret: String,
    pub ledger_endpoint: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub api_auth_token: Option<String>,
    pub is_production: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = BookingPolicy::default();
        let policy = BookingPolicy {
            hold: Duration::minutes(parse_var("HOLD_MINUTES", 10)?),
            reschedule_max_age: Duration::hours(parse_var("RESCHEDULE_MAX_AGE_HOURS", 24)?),
            min_cancel_notice: Duration::hours(parse_var("MIN_CANCEL_NOTICE_HOURS", 24)?),
            release_when_rule_inactive: flag("RELEASE_WHEN_RULE_INACTIVE"),
            horizon_days: parse_var("GENERATION_HORIZON_DAYS", defaults.horizon_days)?,
        };

        if policy.hold <= Duration::zero() || policy.reschedule_max_age <= Duration::zero() {
            return Err(EngineError::Validation(
                "hold and reschedule windows must be positive".to_string(),
            ));
        }
        if policy.horizon_days < 1 {
            return Err(EngineError::Validation(
                "GENERATION_HORIZON_DAYS must be at least 1".to_string(),
            ));
        }

        let simulate_payments = flag("SIMULATE_PAYMENTS");
        let payment_endpoint = env::var("PAYMENT_API_ENDPOINT").ok();
        if !simulate_payments && payment_endpoint.is_none() {
            return Err(EngineError::Validation(
                "PAYMENT_API_ENDPOINT must be set unless SIMULATE_PAYMENTS=true".to_string(),
            ));
        }

        let config = Self {
            bind_addr: parse_var("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/app/data")),
            policy,
            sweep_interval: std::time::Duration::from_secs(parse_var("SWEEP_INTERVAL_SECS", 30)?),
            simulate_payments,
            payment_endpoint,
            payment_api_key: env::var("PAYMENT_API_KEY").unwrap_or_default(),
            payment_api_secret: env::var("PAYMENT_API_SECRET").unwrap_or_default(),
            ledger_endpoint: env::var("LEDGER_API_ENDPOINT").ok(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            api_auth_token: env::var("API_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            is_production: env::var("ENVIRONMENT")
                .map(|val| val.to_lowercase() == "production")
                .unwrap_or(false),
        };

        info!(
            "Loaded configuration: hold={}m, reschedule_max_age={}h, min_cancel_notice={}h, horizon={}d",
            config.policy.hold.num_minutes(),
            config.policy.reschedule_max_age.num_hours(),
            config.policy.min_cancel_notice.num_hours(),
            config.policy.horizon_days
        );

        Ok(config)
    }
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false)
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            warn!("Invalid value for {}: {}", name, raw);
            EngineError::Validation(format!("{} is not valid: {}", name, e))
        }),
        Err(_) => Ok(default),
    }
}
