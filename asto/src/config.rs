//! Backend configuration
//!
//! A [`Config`] is a typed view over a JSON object. The `type` field is the
//! backend discriminator; the remaining fields belong to the backend. Nested
//! blocks are read with [`Config::section`], and errors name the full dotted
//! path of the offending field (`credentials.accessKeyId`).
//!
//! Factories read their fields through the typed settings below so a
//! misconfigured backend fails when the storage is built, not on first use.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Field holding the backend name
pub const DISCRIMINATOR: &str = "type";

/// Default collection name of the `redis` backend
pub const DEFAULT_REDIS_NAME: &str = "artipie-redis";

/// JSON object with typed field accessors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    fields: Map<String, Value>,
    path: Option<String>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields, path: None }
    }

    /// Parse a JSON object
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if `text` is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let fields: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Self::from_map(fields))
    }

    /// # Errors
    ///
    /// [`ConfigError::Parse`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let fields: Map<String, Value> = serde_json::from_value(value)?;
        Ok(Self::from_map(fields))
    }

    /// Builder-style field setter
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Backend discriminator (`type` field)
    ///
    /// # Errors
    ///
    /// Missing or non-string `type`.
    pub fn backend(&self) -> Result<&str, ConfigError> {
        self.string(DISCRIMINATOR)
    }

    /// Required string field
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] or [`ConfigError::InvalidField`].
    pub fn string(&self, field: &str) -> Result<&str, ConfigError> {
        self.optional_string(field)?
            .ok_or_else(|| ConfigError::MissingField(self.qualified(field)))
    }

    /// Optional string field
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidField`] if present but not a string.
    pub fn optional_string(&self, field: &str) -> Result<Option<&str>, ConfigError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.invalid(field, "a string")),
        }
    }

    /// Boolean field with a default
    ///
    /// Accepts JSON booleans and the strings `"true"`/`"false"`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidField`] for any other value.
    pub fn bool_or(&self, field: &str, default: bool) -> Result<bool, ConfigError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(self.invalid(field, "a boolean")),
        }
    }

    /// Optional nested block
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidField`] if present but not an object.
    pub fn optional_section(&self, field: &str) -> Result<Option<Config>, ConfigError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Config {
                fields: map.clone(),
                path: Some(self.qualified(field)),
            })),
            Some(_) => Err(self.invalid(field, "an object")),
        }
    }

    /// Required nested block
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] or [`ConfigError::InvalidField`].
    pub fn section(&self, field: &str) -> Result<Config, ConfigError> {
        self.optional_section(field)?
            .ok_or_else(|| ConfigError::MissingField(self.qualified(field)))
    }

    fn qualified(&self, field: &str) -> String {
        match &self.path {
            Some(path) => format!("{path}.{field}"),
            None => field.to_string(),
        }
    }

    fn invalid(&self, field: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidField {
            field: self.qualified(field),
            expected,
        }
    }
}

/// Settings of the `fs` backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsSettings {
    /// Root directory of the storage
    pub path: PathBuf,
}

impl FsSettings {
    /// # Errors
    ///
    /// Missing or non-string `path`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            path: PathBuf::from(config.string("path")?),
        })
    }
}

/// Settings of the `sqlite` backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSettings {
    /// Database file, or `:memory:`
    pub path: String,
}

impl SqliteSettings {
    /// # Errors
    ///
    /// Missing or non-string `path`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            path: config.string("path")?.to_string(),
        })
    }
}

/// Credentials accepted by the `s3` backend
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { access_key_id, .. } => f
                .debug_struct("Basic")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedCredentials`] for any `type` but `basic`,
    /// missing fields otherwise.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match config.string("type")? {
            "basic" => Ok(Self::Basic {
                access_key_id: config.string("accessKeyId")?.to_string(),
                secret_access_key: config.string("secretAccessKey")?.to_string(),
            }),
            other => Err(ConfigError::UnsupportedCredentials(other.to_string())),
        }
    }
}

/// Settings of the `s3` backend
///
/// No S3 driver is bundled; an external driver validates its configuration
/// through this type when it registers a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Multipart uploads, on unless disabled
    pub multipart: bool,
    /// `None` defers to the driver's default credential chain
    pub credentials: Option<Credentials>,
}

impl S3Settings {
    /// # Errors
    ///
    /// Missing `bucket`, malformed optional fields, or unsupported credentials.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let credentials = config
            .optional_section("credentials")?
            .map(|section| Credentials::from_config(&section))
            .transpose()?;
        Ok(Self {
            bucket: config.string("bucket")?.to_string(),
            region: config.optional_string("region")?.map(str::to_string),
            endpoint: config.optional_string("endpoint")?.map(str::to_string),
            multipart: config.bool_or("multipart", true)?,
            credentials,
        })
    }
}

/// Settings of the `redis` backend
///
/// `config` is handed to the driver untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisSettings {
    pub name: String,
    pub config: Value,
}

impl RedisSettings {
    /// # Errors
    ///
    /// Missing `config` block, or a non-string `name`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let name = config
            .optional_string("name")?
            .unwrap_or(DEFAULT_REDIS_NAME)
            .to_string();
        let driver = config
            .get("config")
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| ConfigError::MissingField("config".to_string()))?;
        Ok(Self {
            name,
            config: driver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Config {
        Config::from_value(value).unwrap()
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(Config::from_json(r#"{"type": "memory"}"#).is_ok());
        assert!(matches!(
            Config::from_json("[1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_backend_discriminator() {
        assert_eq!(config(json!({"type": "fs"})).backend().unwrap(), "fs");
        assert!(matches!(
            Config::new().backend(),
            Err(ConfigError::MissingField(field)) if field == "type"
        ));
    }

    #[test]
    fn test_field_type_errors() {
        let cfg = config(json!({"path": 1, "multipart": "maybe"}));
        assert!(matches!(
            cfg.string("path"),
            Err(ConfigError::InvalidField { field, .. }) if field == "path"
        ));
        assert!(cfg.bool_or("multipart", true).is_err());
        assert!(cfg.bool_or("absent", true).unwrap());
    }

    #[test]
    fn test_nested_errors_name_full_path() {
        let cfg = config(json!({"credentials": {"type": "basic", "accessKeyId": "id"}}));
        let err = Credentials::from_config(&cfg.section("credentials").unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField(field) if field == "credentials.secretAccessKey"
        ));
    }

    #[test]
    fn test_fs_settings() {
        let settings = FsSettings::from_config(&config(json!({"type": "fs", "path": "/var/data"})))
            .unwrap();
        assert_eq!(settings.path, PathBuf::from("/var/data"));
        assert!(FsSettings::from_config(&config(json!({"type": "fs"}))).is_err());
    }

    #[test]
    fn test_s3_settings_defaults() {
        let settings = S3Settings::from_config(&config(json!({"bucket": "b"}))).unwrap();
        assert_eq!(settings.bucket, "b");
        assert!(settings.multipart);
        assert_eq!(settings.region, None);
        assert_eq!(settings.credentials, None);
    }

    #[test]
    fn test_s3_settings_full() {
        let settings = S3Settings::from_config(&config(json!({
            "bucket": "b",
            "region": "eu-west-1",
            "endpoint": "http://localhost:9000",
            "multipart": false,
            "credentials": {
                "type": "basic",
                "accessKeyId": "id",
                "secretAccessKey": "secret"
            }
        })))
        .unwrap();
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(!settings.multipart);
        assert_eq!(
            settings.credentials,
            Some(Credentials::Basic {
                access_key_id: "id".into(),
                secret_access_key: "secret".into()
            })
        );
    }

    #[test]
    fn test_s3_requires_bucket() {
        assert!(matches!(
            S3Settings::from_config(&config(json!({"region": "r"}))),
            Err(ConfigError::MissingField(field)) if field == "bucket"
        ));
    }

    #[test]
    fn test_s3_rejects_unknown_credentials() {
        let err = S3Settings::from_config(&config(json!({
            "bucket": "b",
            "credentials": {"type": "profile"}
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedCredentials(t) if t == "profile"));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::Basic {
            access_key_id: "id".into(),
            secret_access_key: "secret".into(),
        };
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn test_redis_settings() {
        let settings =
            RedisSettings::from_config(&config(json!({"config": {"address": "redis://x"}})))
                .unwrap();
        assert_eq!(settings.name, DEFAULT_REDIS_NAME);
        assert_eq!(settings.config, json!({"address": "redis://x"}));

        let named = RedisSettings::from_config(&config(json!({"name": "n", "config": {}})))
            .unwrap();
        assert_eq!(named.name, "n");

        assert!(RedisSettings::from_config(&config(json!({"name": "n"}))).is_err());
    }
}
