//! Store settings.
//!
//! The `settings` table is a flat `key -> value` text map that operators edit
//! at runtime. Nothing outside this module reads raw keys: the map is parsed
//! once into [`StoreSettings`], with explicit defaults for missing keys and
//! errors for values that do not parse.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where available quantity comes from when taking an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockMode {
    /// Count AVAILABLE cards in the pool.
    Auto,
    /// Use the operator-maintained stock counter.
    Manual,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting '{0}'")]
    UnknownKey(String),
    #[error("Setting '{key}' has invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Typed view of the settings table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSettings {
    pub stock_mode: StockMode,
    pub alipay_enabled: bool,
    pub wechat_enabled: bool,
    pub usdt_enabled: bool,
    pub usdt_wallet_address: String,
    /// Fiat units per 1 USDT.
    pub usdt_exchange_rate: Decimal,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub smtp_pass: String,
    pub email_notify: bool,
    pub sender_name: String,
}

/// Every key the settings table may contain.
pub const SETTING_KEYS: &[&str] = &[
    "stock_mode",
    "alipay_enabled",
    "wechat_enabled",
    "usdt_enabled",
    "usdt_wallet_address",
    "usdt_exchange_rate",
    "smtp_host",
    "smtp_port",
    "smtp_user",
    "smtp_pass",
    "email_notify",
    "sender_name",
];

/// Smallest accepted `usdt_exchange_rate`. Anything below it would turn a
/// fiat total into a token amount too large to store.
pub const MIN_USDT_EXCHANGE_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            stock_mode: StockMode::Auto,
            alipay_enabled: false,
            wechat_enabled: false,
            usdt_enabled: false,
            usdt_wallet_address: String::new(),
            usdt_exchange_rate: Decimal::new(72, 1),
            smtp_host: String::new(),
            smtp_port: 465,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            email_notify: false,
            sender_name: "Card Shop".to_string(),
        }
    }
}

impl StoreSettings {
    /// Parse settings from raw key/value rows.
    ///
    /// Missing keys keep their default. Unknown keys are ignored here so a
    /// stale row cannot take the shop down; [`validate_key`] rejects them on
    /// write.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "stock_mode" => {
                    settings.stock_mode = match value {
                        "auto" => StockMode::Auto,
                        "manual" => StockMode::Manual,
                        _ => return Err(invalid("stock_mode", value)),
                    }
                }
                "alipay_enabled" => settings.alipay_enabled = parse_bool("alipay_enabled", value)?,
                "wechat_enabled" => settings.wechat_enabled = parse_bool("wechat_enabled", value)?,
                "usdt_enabled" => settings.usdt_enabled = parse_bool("usdt_enabled", value)?,
                "usdt_wallet_address" => settings.usdt_wallet_address = value.to_string(),
                "usdt_exchange_rate" => {
                    let rate: Decimal = value
                        .parse()
                        .map_err(|_| invalid("usdt_exchange_rate", value))?;
                    if rate < MIN_USDT_EXCHANGE_RATE {
                        return Err(invalid("usdt_exchange_rate", value));
                    }
                    settings.usdt_exchange_rate = rate;
                }
                "smtp_host" => settings.smtp_host = value.to_string(),
                "smtp_port" => {
                    settings.smtp_port = value.parse().map_err(|_| invalid("smtp_port", value))?
                }
                "smtp_user" => settings.smtp_user = value.to_string(),
                "smtp_pass" => settings.smtp_pass = value.to_string(),
                "email_notify" => settings.email_notify = parse_bool("email_notify", value)?,
                "sender_name" => settings.sender_name = value.to_string(),
                other => tracing::debug!("Ignoring unknown setting '{other}'"),
            }
        }
        Ok(settings)
    }

    /// SMTP host, user and password are all present.
    pub fn smtp_configured(&self) -> bool {
        !self.smtp_host.is_empty() && !self.smtp_user.is_empty() && !self.smtp_pass.is_empty()
    }

    /// USDT can only be offered once a receiving wallet is configured.
    pub fn usdt_ready(&self) -> bool {
        self.usdt_enabled && !self.usdt_wallet_address.is_empty()
    }
}

/// Reject keys the settings table does not know about.
pub fn validate_key(key: &str) -> Result<(), SettingsError> {
    if SETTING_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(SettingsError::UnknownKey(key.to_string()))
    }
}

/// Overlay `updates` on `current` raw rows.
pub fn merge_pairs(
    current: Vec<(String, String)>,
    updates: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: HashMap<String, String> = current.into_iter().collect();
    for (key, value) in updates {
        merged.insert(key.clone(), value.clone());
    }
    merged.into_iter().collect()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &'static str, value: &str) -> SettingsError {
    SettingsError::InvalidValue {
        key,
        value: value.to_string(),
    }
}
