//! Supervisor configuration

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::policy::SeverityMask;

pub const DEFAULT_TIMEZONE: &str = "Europe/London";
pub const DEFAULT_LOCALE: &str = "en_UK.utf-8";
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Configuration for [`MicroFramework`](crate::MicroFramework)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Timezone handed to handlers on the execution context
    pub default_timezone: String,

    /// Locale handed to handlers on the execution context
    pub default_locale: String,

    /// Diagnostic severities that fail a request
    #[serde(with = "mask_serde")]
    pub error_reporting: SeverityMask,

    /// Content type added to responses that do not set one
    pub default_content_type: Option<String>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            default_locale: DEFAULT_LOCALE.to_string(),
            error_reporting: SeverityMask::ALL,
            default_content_type: Some(DEFAULT_CONTENT_TYPE.to_string()),
        }
    }
}

impl FrameworkConfig {
    /// Create a new config builder
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::new()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any variable lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let error_reporting = match lookup("MICROFRAMEWORK_ERROR_REPORTING") {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring MICROFRAMEWORK_ERROR_REPORTING");
                defaults.error_reporting
            }),
            None => defaults.error_reporting,
        };

        // An empty value switches the default content type off.
        let default_content_type = match lookup("MICROFRAMEWORK_DEFAULT_CONTENT_TYPE") {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value),
            None => defaults.default_content_type,
        };

        Self {
            default_timezone: lookup("MICROFRAMEWORK_TIMEZONE").unwrap_or(defaults.default_timezone),
            default_locale: lookup("MICROFRAMEWORK_LOCALE").unwrap_or(defaults.default_locale),
            error_reporting,
            default_content_type,
        }
    }

    /// The default content type as a header value, if it is valid.
    pub fn default_content_type_header(&self) -> Option<HeaderValue> {
        let value = self.default_content_type.as_deref()?;
        match HeaderValue::from_str(value) {
            Ok(header) => Some(header),
            Err(e) => {
                tracing::warn!(value, error = %e, "Ignoring invalid default content type");
                None
            }
        }
    }
}

/// Builder for FrameworkConfig
#[derive(Debug, Default)]
pub struct FrameworkConfigBuilder {
    config: FrameworkConfig,
}

impl FrameworkConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.config.default_timezone = timezone.into();
        self
    }

    pub fn default_locale(mut self, locale: impl Into<String>) -> Self {
        self.config.default_locale = locale.into();
        self
    }

    pub fn error_reporting(mut self, mask: SeverityMask) -> Self {
        self.config.error_reporting = mask;
        self
    }

    pub fn default_content_type(mut self, content_type: Option<String>) -> Self {
        self.config.default_content_type = content_type;
        self
    }

    pub fn build(self) -> FrameworkConfig {
        self.config
    }
}

mod mask_serde {
    use super::SeverityMask;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mask: &SeverityMask, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(mask)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SeverityMask, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
