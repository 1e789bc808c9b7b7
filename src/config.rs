use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Pricing knobs used by the pricing engine. Kept together so the same values
/// are injected into cart preview and order settlement.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Orders at or above this amount (after discount) ship free
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Decimal,

    /// Flat delivery fee below the free-delivery threshold
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: Decimal,

    /// Flat fee charged when gift wrapping is requested
    #[serde(default = "default_gift_wrap_fee")]
    pub gift_wrap_fee: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_delivery_threshold: default_free_delivery_threshold(),
            delivery_fee: default_delivery_fee(),
            gift_wrap_fee: default_gift_wrap_fee(),
        }
    }
}

/// Payment gateway credentials and endpoints.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the payment gateway API
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// API key id (basic auth username)
    pub key_id: String,

    /// API key secret; also the HMAC key for payment-proof verification
    #[validate(length(min = 16))]
    pub key_secret: String,

    /// Separate secret for webhook body signatures
    #[validate(length(min = 16))]
    pub webhook_secret: String,

    /// Bounded timeout for gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    /// ISO currency code charged through the gateway
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Application configuration loaded from config files plus environment
/// overrides (`APP_`-prefixed, `__` separator).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Broadcast channel capacity per real-time topic
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[validate]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_db_connect_timeout_secs() -> u64 {
    10
}

fn default_free_delivery_threshold() -> Decimal {
    Decimal::from(500)
}

fn default_delivery_fee() -> Decimal {
    Decimal::from(50)
}

fn default_gift_wrap_fee() -> Decimal {
    Decimal::from(30)
}

fn default_gateway_base_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_currency() -> String {
    "INR".to_string()
}

impl AppConfig {
    /// Loads configuration from `config/default.toml`, an environment-specific
    /// overlay, and `APP_`-prefixed environment variables (highest priority).
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();

        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }
        let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(environment = %config.environment, "configuration loaded");
        Ok(config)
    }
}
