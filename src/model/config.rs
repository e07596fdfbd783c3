use clap::{Parser, command};
use serde::{Deserialize, Serialize};

/**
 * Command-line arguments for the application.
 */
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ApplicationArguments {
    /**
     * Path to the configuration file.
     */
    #[arg(short, long)]
    pub config_file: String,
}

/**
 * Represents the configuration for the application.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /**
     * Logging configuration for the application.
     */
    pub logging: LoggingConfig,
    /**
     * Security configuration for the application.
     */
    pub security: AppSecurity,
    /**
     * Server configuration for the application.
     */
    pub server: Server,
    /**
     * Database configuration for the application.
     */
    pub database: Database,
    /**
     * Exchange rate feed and refresh scheduling.
     */
    pub rates: RatesConfig,
    /**
     * Storage of uploaded files.
     */
    pub storage: StorageConfig,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /**
     * Whether to log the target of the log message.
     */
    pub target: bool,
    /**
     * Whether to log thread IDs .
     */
    pub thread_ids: bool,
    /**
     * Whether to log thread names.
     */
    pub thread_names: bool,
    /**
     * Whether to log line numbers.
     */
    pub line_number: bool,
    /**
     * Whether to log the log level.
     */
    pub level: bool,
    /**
     * Whether to use ANSI colors in logs.
     */
    pub ansi: bool,
    /**
     * Whether to log the source file.
     */
    pub file: bool,
    /**
     * Additional directives for logging configuration.
     */
    pub directives: Vec<String>,
}

impl LoggingConfig {
    #[allow(dead_code)]
    pub fn default() -> Self {
        LoggingConfig { target: true, thread_ids: true, thread_names: true, line_number: true, level: true, ansi: true, file: true, directives: vec![] }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    /**
     * Type of the database (e.g., `PostgreSQL`).
     */
    pub db_type: DatabaseType,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseType {
    /**
     * `PostgreSQL` database type.
     */
    #[serde(rename_all = "camelCase")]
    Postgresql { connection_string: String, max_connections: u32, min_connections: u32, acquire_timeout: u64, acquire_slow_threshold: u64, idle_timeout: u64, max_lifetime: u64 },
}

/**
 * Secrets and lifetimes for issued tokens.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSecurity {
    /**
     * HMAC secret used for access tokens.
     */
    pub access_secret: String,
    /**
     * HMAC secret used for refresh tokens.
     */
    pub refresh_secret: String,
    /**
     * Access token lifetime in minutes.
     */
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    /**
     * Refresh token lifetime in days.
     */
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
}

fn default_access_token_minutes() -> i64 {
    30
}

fn default_refresh_token_days() -> i64 {
    30
}

/**
 * Represents the server configuration for the application.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /**
     * Number of worker threads for the server.
     */
    pub workers: usize,
    /**
     * HTTP port for the server.
     */
    pub http_port: Option<u16>,
    /**
     * HTTPS configuration for the server.
     */
    pub https_config: Option<HttpsConfig>,
    /**
     * Origins allowed by CORS. Empty means any origin.
     */
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/**
 * Represents the HTTPS configuration for the server.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsConfig {
    /**
     * Port for the HTTPS server.
     */
    pub port: u16,
    /**
     * Path to the certificate file.
     */
    pub certificate_file: String,
    /**
     * Path to the private key file.
     */
    pub private_key_file: String,
}

/**
 * Exchange rate feed and refresh configuration.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatesConfig {
    /**
     * Base url of the central bank daily rate archive.
     */
    pub feed_url: String,
    /**
     * Timeout for a single feed request.
     */
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /**
     * Attempts per date before the date is reported as failed.
     */
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /**
     * Fixed delay between attempts.
     */
    #[serde(default = "default_retry_delay_millis")]
    pub retry_delay_millis: u64,
    /**
     * Interval of the background refresh in seconds. Defaults to 24 hours.
     */
    pub refresh_interval_secs: Option<u64>,
    /**
     * Whether to refresh once when the server starts.
     */
    #[serde(default)]
    pub refresh_on_startup: bool,
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_millis() -> u64 {
    1000
}

/**
 * Local storage of uploaded avatars.
 */
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /**
     * Directory the files are written to and served from.
     */
    pub upload_dir: String,
    /**
     * Url path the upload directory is mounted on.
     */
    pub public_path: String,
    /**
     * Maximum accepted avatar size in bytes.
     */
    pub max_avatar_bytes: usize,
}
