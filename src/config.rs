use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub session_expiry_hours: i64,
    pub media_dir: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub max_image_bytes: usize,
    pub max_video_bytes: usize,
    pub feed_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            database_url: "sqlite://skillswap.db".to_string(),
            session_expiry_hours: 24,
            media_dir: "./media".to_string(),
            db_max_connections: 20,
            db_min_connections: 5,
            request_timeout_secs: 30,
            rate_limit_per_minute: 100,
            max_image_bytes: 5 * 1024 * 1024,
            max_video_bytes: 50 * 1024 * 1024,
            feed_capacity: 256,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Config::default();

        let config = Config {
            server_host: std::env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT", defaults.server_port)?,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            session_expiry_hours: parse_var("SESSION_EXPIRY_HOURS", defaults.session_expiry_hours)?,
            media_dir: std::env::var("MEDIA_DIR").unwrap_or(defaults.media_dir),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: parse_var("DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?,
            max_image_bytes: parse_var("MAX_IMAGE_BYTES", defaults.max_image_bytes)?,
            max_video_bytes: parse_var("MAX_VIDEO_BYTES", defaults.max_video_bytes)?,
            feed_capacity: parse_var("FEED_CAPACITY", defaults.feed_capacity)?,
        };

        if config.db_min_connections > config.db_max_connections {
            return Err(AppError::Config(
                "DB_MIN_CONNECTIONS cannot exceed DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upload_limits() {
        let config = Config::default();
        assert_eq!(config.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(config.max_video_bytes, 50 * 1024 * 1024);
        assert_eq!(config.server_address(), "127.0.0.1:8080");
    }

    #[test]
    fn invalid_number_is_config_error() {
        std::env::set_var("SKILLSWAP_TEST_BAD_PORT", "eighty");
        let err = parse_var::<u16>("SKILLSWAP_TEST_BAD_PORT", 1).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        std::env::remove_var("SKILLSWAP_TEST_BAD_PORT");
    }
}
