//! Process configuration.
//!
//! Everything that is fixed for the lifetime of the process (database, ports,
//! gateway credentials) comes from environment variables via `envy`. Options
//! an operator toggles at runtime live in the settings table instead, see
//! [`crate::models::setting::StoreSettings`].

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT`: HTTP server port, defaults to 3000
/// - `ORDER_TIMEOUT_MINUTES`: unpaid order lifetime, defaults to 15
/// - `USDT_POLL_INTERVAL_SECS`: transfer polling period, defaults to 30
/// - `TRON_API_URL` / `TRON_API_KEY` / `USDT_CONTRACT`: transfer listing API
/// - `PUBLIC_BASE_URL`: externally reachable base URL used in callbacks
/// - `ALIPAY_APP_ID` / `ALIPAY_PRIVATE_KEY` / `ALIPAY_PUBLIC_KEY` / `ALIPAY_GATEWAY_URL`
/// - `WECHAT_MOCK_SECRET`: HMAC key for the demo WeChat flow
/// - `ADMIN_API_KEY_SHA256`: hex SHA-256 of the operator bearer key
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_order_timeout")]
    pub order_timeout_minutes: i64,

    #[serde(default = "default_poll_interval")]
    pub usdt_poll_interval_secs: u64,

    #[serde(default = "default_tron_api_url")]
    pub tron_api_url: String,

    pub tron_api_key: Option<String>,

    #[serde(default = "default_usdt_contract")]
    pub usdt_contract: String,

    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    pub alipay_app_id: Option<String>,
    pub alipay_private_key: Option<String>,
    pub alipay_public_key: Option<String>,

    #[serde(default = "default_alipay_gateway")]
    pub alipay_gateway_url: String,

    /// The WeChat demo flow is refused while this is unset.
    pub wechat_mock_secret: Option<String>,

    pub admin_api_key_sha256: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_order_timeout() -> i64 {
    15
}

fn default_poll_interval() -> u64 {
    30
}

fn default_tron_api_url() -> String {
    "https://api.trongrid.io".to_string()
}

/// TRC20 USDT on Tron mainnet.
fn default_usdt_contract() -> String {
    "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_alipay_gateway() -> String {
    "https://openapi.alipay.com/gateway.do".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first when present.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a value cannot be
    /// parsed into its field type.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    /// How long an order may stay PENDING before a read cancels it.
    pub fn order_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.order_timeout_minutes)
    }

    /// Alipay credentials, present only when all three values are configured.
    pub fn alipay_credentials(&self) -> Option<(&str, &str, &str)> {
        match (
            self.alipay_app_id.as_deref(),
            self.alipay_private_key.as_deref(),
            self.alipay_public_key.as_deref(),
        ) {
            (Some(app_id), Some(private_key), Some(public_key))
                if !app_id.is_empty() && !private_key.is_empty() && !public_key.is_empty() =>
            {
                Some((app_id, private_key, public_key))
            }
            _ => None,
        }
    }

    /// HMAC key for the WeChat demo flow, present only when configured.
    pub fn wechat_secret(&self) -> Option<&str> {
        self.wechat_mock_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Configuration with every optional value at its default.
    pub fn with_defaults(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            server_port: default_port(),
            order_timeout_minutes: default_order_timeout(),
            usdt_poll_interval_secs: default_poll_interval(),
            tron_api_url: default_tron_api_url(),
            tron_api_key: None,
            usdt_contract: default_usdt_contract(),
            public_base_url: default_public_base_url(),
            alipay_app_id: None,
            alipay_private_key: None,
            alipay_public_key: None,
            alipay_gateway_url: default_alipay_gateway(),
            wechat_mock_secret: None,
            admin_api_key_sha256: None,
        }
    }
}
