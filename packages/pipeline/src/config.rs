//! Pipeline configuration.
//!
//! Defaults are embedded at compile time from `config/default.toml`. A user
//! TOML file is merged over them key by key, so it only needs to name the
//! settings it changes:
//!
//! ```toml
//! row_limit = 50
//! refresh_interval_secs = 60
//!
//! [geocoder]
//! base_url = "http://localhost:8080/search"
//! rate_limit_ms = 0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use dispatch_geocoder::nominatim::NominatimConfig;
use dispatch_geocoder_models::{Coordinate, Region, RegionSpan};
use serde::{Deserialize, Serialize};

const DEFAULT_TOML: &str = include_str!("../config/default.toml");

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has wrongly typed values.
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Geocoding service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocoderSettings {
    /// Nominatim search endpoint.
    pub base_url: String,
    /// `User-Agent` sent with every search.
    pub user_agent: String,
    /// Minimum delay between searches in milliseconds.
    pub rate_limit_ms: u64,
    /// Candidates requested per search (only the first is used).
    pub result_limit: u32,
    /// Appended to queries that do not already name it (e.g. `"Seattle, WA"`).
    #[serde(default)]
    pub locality: Option<String>,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Feed page URL.
    pub feed_url: String,
    /// Number of `row_<n>` positions read from each feed page.
    pub row_limit: usize,
    /// Seconds between automatic feed refreshes; `None` disables them.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retries for transient feed request failures.
    pub max_retries: u32,
    /// Maximum geocode lookups in flight during a bulk resolve.
    pub geocode_concurrency: usize,
    /// Center of the geocoding bias region and of the map display region.
    pub bias_region_center: Coordinate,
    /// Extent of the geocoding bias region.
    pub bias_region_span: RegionSpan,
    /// Extent of the default map display region.
    pub display_region_span: RegionSpan,
    /// Geocoding service settings.
    pub geocoder: GeocoderSettings,
}

impl Default for DispatchConfig {
    /// Returns the embedded defaults.
    ///
    /// # Panics
    ///
    /// Panics if the embedded defaults are malformed (covered by tests).
    fn default() -> Self {
        toml::from_str(DEFAULT_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded default config: {e}"))
    }
}

impl DispatchConfig {
    /// Parses a TOML override document and merges it over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or the merged
    /// configuration fails validation.
    pub fn from_toml_str(overrides: &str) -> Result<Self, ConfigError> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_TOML)?;
        let overrides: toml::Table = toml::from_str(overrides)?;
        merge_tables(&mut merged, overrides);

        let config: Self = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML override file and merges it over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config overrides from {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed_url.trim().is_empty() {
            return Err(ConfigError::Invalid("feed_url is empty".to_string()));
        }
        if self.row_limit == 0 {
            return Err(ConfigError::Invalid("row_limit must be at least 1".to_string()));
        }
        if !self.bias_region_center.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "bias_region_center ({}) is not a valid coordinate",
                self.bias_region_center
            )));
        }
        for (name, span) in [
            ("bias_region_span", self.bias_region_span),
            ("display_region_span", self.display_region_span),
        ] {
            if !(span.latitudinal_meters.is_finite()
                && span.longitudinal_meters.is_finite()
                && span.latitudinal_meters > 0.0
                && span.longitudinal_meters > 0.0)
            {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive in both directions"
                )));
            }
        }
        if self.refresh_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be at least 1 (omit it to disable)".to_string(),
            ));
        }
        if self.geocode_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "geocode_concurrency must be at least 1".to_string(),
            ));
        }
        if self.geocoder.base_url.trim().is_empty() || self.geocoder.user_agent.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "geocoder.base_url and geocoder.user_agent are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Region geocoder queries are biased toward.
    #[must_use]
    pub const fn bias_region(&self) -> Region {
        Region::new(self.bias_region_center, self.bias_region_span)
    }

    /// Default map display region.
    #[must_use]
    pub const fn display_region(&self) -> Region {
        Region::new(self.bias_region_center, self.display_region_span)
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Automatic refresh interval, if enabled.
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }

    /// Connection settings for the Nominatim client.
    #[must_use]
    pub fn nominatim(&self) -> NominatimConfig {
        NominatimConfig {
            base_url: self.geocoder.base_url.clone(),
            user_agent: self.geocoder.user_agent.clone(),
            rate_limit: Duration::from_millis(self.geocoder.rate_limit_ms),
            result_limit: self.geocoder.result_limit,
            timeout: self.request_timeout(),
        }
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`toml::ser::Error`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

/// Recursively merges `overrides` into `base`. Nested tables merge key by
/// key; any other value replaces the base value.
fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(override_table)) => {
                merge_tables(base_table, override_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse_and_validate() {
        let config = DispatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.row_limit, 200);
        assert!(config.feed_url.contains("getRecsForDatePub.asp"));
        assert!((config.bias_region_center.latitude - 47.609_722).abs() < 1e-9);
        assert!((config.bias_region_span.latitudinal_meters - 90_000.0).abs() < f64::EPSILON);
        assert!((config.display_region_span.latitudinal_meters - 50_000.0).abs() < f64::EPSILON);
        assert_eq!(config.refresh_interval(), None);
        assert_eq!(config.geocoder.locality.as_deref(), Some("Seattle, WA"));
    }

    #[test]
    fn empty_override_equals_defaults() {
        assert_eq!(
            DispatchConfig::from_toml_str("").unwrap(),
            DispatchConfig::default()
        );
    }

    #[test]
    fn overrides_merge_key_by_key() {
        let config = DispatchConfig::from_toml_str(
            r#"
            row_limit = 50
            refresh_interval_secs = 60

            [bias_region_span]
            latitudinal_meters = 10000.0

            [geocoder]
            rate_limit_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.row_limit, 50);
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(60)));
        assert!((config.bias_region_span.latitudinal_meters - 10_000.0).abs() < f64::EPSILON);
        assert!((config.bias_region_span.longitudinal_meters - 90_000.0).abs() < f64::EPSILON);
        assert_eq!(config.geocoder.rate_limit_ms, 0);
        assert_eq!(
            config.geocoder.base_url,
            DispatchConfig::default().geocoder.base_url
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        for toml in [
            "row_limit = 0",
            "geocode_concurrency = 0",
            "refresh_interval_secs = 0",
            "feed_url = \"\"",
            "[bias_region_center]\nlatitude = 123.0",
            "[display_region_span]\nlongitudinal_meters = -1.0",
        ] {
            assert!(
                matches!(
                    DispatchConfig::from_toml_str(toml),
                    Err(ConfigError::Invalid(_))
                ),
                "accepted: {toml}"
            );
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            DispatchConfig::from_toml_str("row_limit = \"many\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            DispatchConfig::from_toml_str("row_limit = "),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("dispatch_config_does_not_exist.toml");
        let err = DispatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(
            err.to_string()
                .contains("dispatch_config_does_not_exist.toml"),
            "{err}"
        );
    }

    #[test]
    fn loads_file_overrides() {
        let path = std::env::temp_dir().join("dispatch_config_test_overrides.toml");
        std::fs::write(&path, "max_retries = 7\n").unwrap();

        let config = DispatchConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.max_retries, 7);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn regions_share_the_configured_center() {
        let config = DispatchConfig::default();
        assert_eq!(config.bias_region().center, config.display_region().center);
        assert!(
            config.bias_region().span.latitudinal_meters
                > config.display_region().span.latitudinal_meters
        );
    }

    #[test]
    fn renders_back_to_toml() {
        let config = DispatchConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(DispatchConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
