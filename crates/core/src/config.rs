use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    pub currency: String,
    pub pricing: PricingConfig,
    pub shipping: ShippingConfig,
    pub payment: PaymentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub free_shipping_threshold: Option<Decimal>,
    pub handling_fee: Decimal,
    pub tax_rate_pct: Decimal,
    pub tax_on_shipping: bool,
}

#[derive(Clone, Debug)]
pub struct ShippingConfig {
    pub module_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub idempotency_window_secs: u64,
    pub gateway_timeout_ms: u64,
    pub gateway_api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub currency: Option<String>,
    pub free_shipping_threshold: Option<Decimal>,
    pub handling_fee: Option<Decimal>,
    pub tax_rate_pct: Option<Decimal>,
    pub tax_on_shipping: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid value for `{key}`: `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            pricing: PricingConfig {
                free_shipping_threshold: None,
                handling_fee: Decimal::ZERO,
                tax_rate_pct: Decimal::ZERO,
                tax_on_shipping: false,
            },
            shipping: ShippingConfig { module_timeout_ms: 5_000 },
            payment: PaymentConfig {
                idempotency_window_secs: 900,
                gateway_timeout_ms: 10_000,
                gateway_api_key: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl CheckoutConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tally.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(currency) = patch.currency {
            self.currency = currency;
        }

        if let Some(pricing) = patch.pricing {
            if let Some(raw) = pricing.free_shipping_threshold {
                self.pricing.free_shipping_threshold =
                    Some(parse_decimal("pricing.free_shipping_threshold", &raw)?);
            }
            if let Some(raw) = pricing.handling_fee {
                self.pricing.handling_fee = parse_decimal("pricing.handling_fee", &raw)?;
            }
            if let Some(raw) = pricing.tax_rate_pct {
                self.pricing.tax_rate_pct = parse_decimal("pricing.tax_rate_pct", &raw)?;
            }
            if let Some(tax_on_shipping) = pricing.tax_on_shipping {
                self.pricing.tax_on_shipping = tax_on_shipping;
            }
        }

        if let Some(shipping) = patch.shipping {
            if let Some(module_timeout_ms) = shipping.module_timeout_ms {
                self.shipping.module_timeout_ms = module_timeout_ms;
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(idempotency_window_secs) = payment.idempotency_window_secs {
                self.payment.idempotency_window_secs = idempotency_window_secs;
            }
            if let Some(gateway_timeout_ms) = payment.gateway_timeout_ms {
                self.payment.gateway_timeout_ms = gateway_timeout_ms;
            }
            if let Some(gateway_api_key_value) = payment.gateway_api_key {
                self.payment.gateway_api_key = Some(gateway_api_key_value.into());
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TALLY_CURRENCY") {
            self.currency = value;
        }

        if let Some(value) = read_env("TALLY_PRICING_FREE_SHIPPING_THRESHOLD") {
            self.pricing.free_shipping_threshold =
                Some(parse_decimal("TALLY_PRICING_FREE_SHIPPING_THRESHOLD", &value)?);
        }
        if let Some(value) = read_env("TALLY_PRICING_HANDLING_FEE") {
            self.pricing.handling_fee = parse_decimal("TALLY_PRICING_HANDLING_FEE", &value)?;
        }
        if let Some(value) = read_env("TALLY_PRICING_TAX_RATE_PCT") {
            self.pricing.tax_rate_pct = parse_decimal("TALLY_PRICING_TAX_RATE_PCT", &value)?;
        }
        if let Some(value) = read_env("TALLY_PRICING_TAX_ON_SHIPPING") {
            self.pricing.tax_on_shipping = parse_bool("TALLY_PRICING_TAX_ON_SHIPPING", &value)?;
        }

        if let Some(value) = read_env("TALLY_SHIPPING_MODULE_TIMEOUT_MS") {
            self.shipping.module_timeout_ms = parse_u64("TALLY_SHIPPING_MODULE_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("TALLY_PAYMENT_IDEMPOTENCY_WINDOW_SECS") {
            self.payment.idempotency_window_secs =
                parse_u64("TALLY_PAYMENT_IDEMPOTENCY_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLY_PAYMENT_GATEWAY_TIMEOUT_MS") {
            self.payment.gateway_timeout_ms =
                parse_u64("TALLY_PAYMENT_GATEWAY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("TALLY_PAYMENT_GATEWAY_API_KEY") {
            self.payment.gateway_api_key = Some(value.into());
        }

        let log_level = read_env("TALLY_LOGGING_LEVEL").or_else(|| read_env("TALLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("TALLY_LOGGING_FORMAT").or_else(|| read_env("TALLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(currency) = overrides.currency {
            self.currency = currency;
        }
        if let Some(free_shipping_threshold) = overrides.free_shipping_threshold {
            self.pricing.free_shipping_threshold = Some(free_shipping_threshold);
        }
        if let Some(handling_fee) = overrides.handling_fee {
            self.pricing.handling_fee = handling_fee;
        }
        if let Some(tax_rate_pct) = overrides.tax_rate_pct {
            self.pricing.tax_rate_pct = tax_rate_pct;
        }
        if let Some(tax_on_shipping) = overrides.tax_on_shipping {
            self.pricing.tax_on_shipping = tax_on_shipping;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
            return Err(ConfigError::Validation(
                "currency must be a three-letter uppercase code (e.g. USD)".to_string(),
            ));
        }

        if self.pricing.handling_fee < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "pricing.handling_fee must not be negative".to_string(),
            ));
        }

        if let Some(threshold) = self.pricing.free_shipping_threshold {
            if threshold <= Decimal::ZERO {
                return Err(ConfigError::Validation(
                    "pricing.free_shipping_threshold must be greater than zero".to_string(),
                ));
            }
        }

        if self.pricing.tax_rate_pct < Decimal::ZERO
            || self.pricing.tax_rate_pct > Decimal::new(100, 0)
        {
            return Err(ConfigError::Validation(
                "pricing.tax_rate_pct must be in range 0..=100".to_string(),
            ));
        }

        if self.shipping.module_timeout_ms == 0 || self.shipping.module_timeout_ms > 60_000 {
            return Err(ConfigError::Validation(
                "shipping.module_timeout_ms must be in range 1..=60000".to_string(),
            ));
        }

        if self.payment.gateway_timeout_ms == 0 || self.payment.gateway_timeout_ms > 60_000 {
            return Err(ConfigError::Validation(
                "payment.gateway_timeout_ms must be in range 1..=60000".to_string(),
            ));
        }

        if self.payment.idempotency_window_secs == 0
            || self.payment.idempotency_window_secs > 86_400
        {
            return Err(ConfigError::Validation(
                "payment.idempotency_window_secs must be in range 1..=86400".to_string(),
            ));
        }

        let level = self.logging.level.trim().to_ascii_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::Validation(
                "logging.level must be one of trace|debug|info|warn|error".to_string(),
            )),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tally.toml"), PathBuf::from("config/tally.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    currency: Option<String>,
    pricing: Option<PricingPatch>,
    shipping: Option<ShippingPatch>,
    payment: Option<PaymentPatch>,
    logging: Option<LoggingPatch>,
}

// Money fields arrive as strings so decimal precision survives the TOML
// round trip.
#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    free_shipping_threshold: Option<String>,
    handling_fee: Option<String>,
    tax_rate_pct: Option<String>,
    tax_on_shipping: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ShippingPatch {
    module_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    idempotency_window_secs: Option<u64>,
    gateway_timeout_ms: Option<u64>,
    gateway_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{CheckoutConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_a_config_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = CheckoutConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.currency == "USD", "default currency should be USD")?;
        ensure(
            config.pricing.free_shipping_threshold.is_none(),
            "free shipping should be off by default",
        )?;
        ensure(config.shipping.module_timeout_ms == 5_000, "default module timeout is 5s")
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLY_PRICING_HANDLING_FEE", "3.25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tally.toml");
            fs::write(
                &path,
                r#"
currency = "EUR"

[pricing]
free_shipping_threshold = "75.00"
handling_fee = "1.00"
tax_rate_pct = "20"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = CheckoutConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    tax_rate_pct: Some(Decimal::new(19, 0)),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.currency == "EUR", "file currency should win over default")?;
            ensure(
                config.pricing.free_shipping_threshold == Some(Decimal::new(7_500, 2)),
                "file threshold should be loaded",
            )?;
            ensure(
                config.pricing.handling_fee == Decimal::new(325, 2),
                "env handling fee should win over file",
            )?;
            ensure(
                config.pricing.tax_rate_pct == Decimal::new(19, 0),
                "programmatic override should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&["TALLY_PRICING_HANDLING_FEE"]);
        result
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_KEY", "sk-live-interpolated");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tally.toml");
            fs::write(
                &path,
                r#"
[payment]
gateway_api_key = "${TEST_GATEWAY_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = CheckoutConfig::load(LoadOptions {
                config_path: Some(path),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            let key = config
                .payment
                .gateway_api_key
                .as_ref()
                .ok_or_else(|| "gateway key should be set".to_string())?;
            ensure(
                key.expose_secret() == "sk-live-interpolated",
                "gateway key should come from the environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GATEWAY_KEY"]);
        result
    }

    #[test]
    fn validation_rejects_out_of_range_tax_rate() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLY_PRICING_TAX_RATE_PCT", "250");

        let result = (|| -> Result<(), String> {
            let error = match CheckoutConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("tax_rate_pct")
            );
            ensure(has_message, "validation failure should mention tax_rate_pct")
        })();

        clear_vars(&["TALLY_PRICING_TAX_RATE_PCT"]);
        result
    }

    #[test]
    fn gateway_key_is_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLY_PAYMENT_GATEWAY_API_KEY", "sk-live-secret-value");

        let result = (|| -> Result<(), String> {
            let config = CheckoutConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("sk-live-secret-value"),
                "debug output should not contain the gateway key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["TALLY_PAYMENT_GATEWAY_API_KEY"]);
        result
    }
}
