//! Background configuration

use serde::{Deserialize, Serialize};

use cg_core::injection::PayloadPaths;

use crate::error::ConfigError;

/// Issue-report page; the page URL is appended percent-encoded.
pub const DEFAULT_REPORT_URL: &str = "https://github.com/OhMyGuus/I-Dont-Care-About-Cookies/issues/new?assignees=OhMyGuus&labels=Website+request&template=site-request.md&title=%5BREQ%5D+Website+request%3A+";

pub const DEFAULT_OPTIONS_PAGE: &str = "data/options.html";

pub const DEFAULT_STORAGE_KEY: &str = "whitelisted_domains";

pub const DEFAULT_INJECTION_ATTEMPTS: u32 = 5;

/// How requests are filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Synchronous request interception with the filter engine
    #[default]
    Imperative,
    /// Browser-enforced dynamic allow-rules for the whitelist
    Declarative,
}

/// Payload file locations, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub common_css: String,
    pub embeds_js: String,
    pub fallback_js: String,
    pub script_dir: String,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        PayloadPaths::default().into()
    }
}

impl From<PayloadPaths> for PayloadConfig {
    fn from(paths: PayloadPaths) -> Self {
        Self {
            common_css: paths.common_css,
            embeds_js: paths.embeds_js,
            fallback_js: paths.fallback_js,
            script_dir: paths.script_dir,
        }
    }
}

impl PayloadConfig {
    pub fn paths(&self) -> PayloadPaths {
        let mut script_dir = self.script_dir.clone();
        if !script_dir.is_empty() && !script_dir.ends_with('/') {
            script_dir.push('/');
        }
        PayloadPaths {
            common_css: self.common_css.clone(),
            embeds_js: self.embeds_js.clone(),
            fallback_js: self.fallback_js.clone(),
            script_dir,
        }
    }
}

/// Runtime settings of the background. Every field has a default, so `{}`
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub backend: Backend,
    pub payloads: PayloadConfig,
    /// Attempts at the common stylesheet before giving up on a frame
    pub injection_attempts: u32,
    pub report_url: String,
    pub options_page: String,
    pub storage_key: String,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            payloads: PayloadConfig::default(),
            injection_attempts: DEFAULT_INJECTION_ATTEMPTS,
            report_url: DEFAULT_REPORT_URL.to_string(),
            options_page: DEFAULT_OPTIONS_PAGE.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl BackgroundConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.injection_attempts == 0 {
            return Err(ConfigError::Invalid(
                "injection_attempts must be at least 1".to_string(),
            ));
        }
        if self.storage_key.is_empty() {
            return Err(ConfigError::Invalid("storage_key is empty".to_string()));
        }
        Ok(())
    }

    pub fn is_declarative(&self) -> bool {
        self.backend == Backend::Declarative
    }
}
