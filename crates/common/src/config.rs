use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Deadline scan interval in seconds (default: 60)
    pub scan_interval_secs: u64,

    /// Reminder offsets in hours before a task's due time (default: "24,1")
    pub reminder_offset_hours: Vec<i64>,

    /// Per-send timeout in seconds; exceeding it counts as a transient
    /// failure (default: 10)
    pub send_timeout_secs: u64,

    /// Base delay for retry backoff in seconds (default: 5)
    pub retry_base_delay_secs: u64,

    /// Multiplier applied to the delay after each failed attempt (default: 5)
    pub retry_backoff_factor: u32,

    /// Maximum delivery attempts per (notification, channel) (default: 4)
    pub retry_max_attempts: u32,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            scan_interval_secs: std::env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCAN_INTERVAL_SECS must be a valid u64"))?,
            reminder_offset_hours: parse_offset_hours(
                &std::env::var("REMINDER_OFFSET_HOURS").unwrap_or_else(|_| "24,1".to_string()),
            )?,
            send_timeout_secs: std::env::var("SEND_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SEND_TIMEOUT_SECS must be a valid u64"))?,
            retry_base_delay_secs: std::env::var("RETRY_BASE_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BASE_DELAY_SECS must be a valid u64"))?,
            retry_backoff_factor: std::env::var("RETRY_BACKOFF_FACTOR")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BACKOFF_FACTOR must be a valid u32"))?,
            retry_max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be a valid u32"))?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
        })
    }
}

/// Parse a comma-separated list of hour offsets, e.g. `"24,1"`.
fn parse_offset_hours(raw: &str) -> anyhow::Result<Vec<i64>> {
    let offsets: Vec<i64> = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("REMINDER_OFFSET_HOURS must be comma-separated hours"))
        })
        .collect::<Result<_, _>>()?;

    if offsets.is_empty() || offsets.iter().any(|h| *h <= 0) {
        anyhow::bail!("REMINDER_OFFSET_HOURS must contain at least one positive hour value");
    }

    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset_hours() {
        assert_eq!(parse_offset_hours("24,1").unwrap(), vec![24, 1]);
        assert_eq!(parse_offset_hours(" 48 , 24 , 1 ").unwrap(), vec![48, 24, 1]);
    }

    #[test]
    fn test_parse_offset_hours_rejects_garbage() {
        assert!(parse_offset_hours("soon").is_err());
        assert!(parse_offset_hours("24,-1").is_err());
        assert!(parse_offset_hours("").is_err());
    }
}
