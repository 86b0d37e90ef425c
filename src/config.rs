use std::env;
use std::sync::RwLock;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub event_buffer_size: usize,
    /// How long each ranked courier gets to accept before the next one is notified.
    pub notification_timeout: Duration,
    pub max_candidates: usize,
    /// How long a claimed dispatch lock is kept before it is dropped from memory.
    pub lock_retention: Duration,
    pub commission_amount: Decimal,
    pub delivery_fee: Decimal,
    pub debt_threshold: Decimal,
    pub debt_grace: chrono::Duration,
    pub debt_reminder_interval: chrono::Duration,
    /// `None` disables the in-process end-of-day timer.
    pub debt_sweep_interval: Option<Duration>,
    pub dispute_penalty: Decimal,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let sweep_secs: u64 = parse_or_default("DEBT_SWEEP_INTERVAL_SECS", 86_400)?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: parse_or_default("LOG_JSON", false)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            notification_timeout: Duration::from_secs(parse_or_default(
                "NOTIFICATION_TIMEOUT_SECS",
                12,
            )?),
            max_candidates: parse_or_default("MAX_CANDIDATES", 5)?,
            lock_retention: Duration::from_secs(parse_or_default("LOCK_RETENTION_SECS", 60)?),
            commission_amount: parse_or_default("COMMISSION_AMOUNT", dec!(1.5))?,
            delivery_fee: parse_or_default("DELIVERY_FEE", dec!(1.5))?,
            debt_threshold: parse_or_default("DEBT_THRESHOLD", dec!(50))?,
            debt_grace: chrono::Duration::hours(parse_or_default("DEBT_GRACE_HOURS", 24)?),
            debt_reminder_interval: chrono::Duration::hours(parse_or_default(
                "DEBT_REMINDER_HOURS",
                12,
            )?),
            debt_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            dispute_penalty: parse_or_default("DISPUTE_PENALTY", dec!(5))?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            event_buffer_size: 1024,
            notification_timeout: Duration::from_secs(12),
            max_candidates: 5,
            lock_retention: Duration::from_secs(60),
            commission_amount: dec!(1.5),
            delivery_fee: dec!(1.5),
            debt_threshold: dec!(50),
            debt_grace: chrono::Duration::hours(24),
            debt_reminder_interval: chrono::Duration::hours(12),
            debt_sweep_interval: Some(Duration::from_secs(86_400)),
            dispute_penalty: dec!(5),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

/// The platform's per-order commission. Read when an order is created; the
/// latest value always wins.
#[derive(Debug)]
pub struct CommissionConfig {
    amount: RwLock<Decimal>,
}

impl CommissionConfig {
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount: RwLock::new(amount),
        }
    }

    pub fn current(&self) -> Decimal {
        match self.amount.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, amount: Decimal) -> Result<Decimal, AppError> {
        if amount.is_sign_negative() {
            return Err(AppError::Validation(
                "commission amount cannot be negative".to_string(),
            ));
        }

        match self.amount.write() {
            Ok(mut guard) => *guard = amount,
            Err(poisoned) => *poisoned.into_inner() = amount,
        }
        Ok(amount)
    }
}
