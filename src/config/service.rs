//! Service configuration read from dotted keys.
//!
//! The same key set (`service`, `cert.env`, `queue.method`, `queue.api.uri`, ...)
//! can come from plain pairs, a JSON document, or a dotenv-style file. Every
//! input is folded into one key tree, deserialized into per-section structs
//! and validated section by section.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::pool::{DispatcherConfig, PoolConfig};
use crate::core::{AppResult, DispatchError};

/// APNs environment the provider certificate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertEnv {
    /// `api.sandbox.push.apple.com`.
    Sandbox,
    /// `api.push.apple.com`.
    Production,
}

impl FromStr for CertEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" | "development" | "dev" => Ok(Self::Sandbox),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown cert env `{other}`")),
        }
    }
}

/// Provider credential settings. Loading the certificate is the provider's job.
#[derive(Clone, PartialEq, Eq)]
pub struct CertConfig {
    /// Sandbox or production gateway.
    pub env: CertEnv,
    /// Path to the certificate bundle.
    pub path: PathBuf,
    /// Certificate password.
    pub password: String,
    /// APNs topic (bundle id).
    pub topic: String,
}

impl fmt::Debug for CertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertConfig")
            .field("env", &self.env)
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .finish()
    }
}

/// Queue source method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMethod {
    /// HTTP API returning a JSON device list.
    Api,
    /// MySQL query.
    Mysql,
    /// Newline-delimited file.
    File,
}

impl FromStr for QueueMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "mysql" => Ok(Self::Mysql),
            "file" => Ok(Self::File),
            other => Err(format!("value is not allowed: {other}")),
        }
    }
}

/// Where device lists are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSourceConfig {
    /// `queue.api.uri` prefix and optional `queue.api.default` key.
    Api {
        /// URI prefix the key is appended to.
        uri: String,
        /// Key used when a submission names none.
        default: String,
    },
    /// `queue.mysql.dsn` and optional `queue.mysql.sql`.
    Mysql {
        /// Connection string.
        dsn: String,
        /// Default statement.
        sql: String,
    },
    /// `queue.file.path` and optional `queue.file.default`.
    File {
        /// File, or directory when keys name files inside it.
        path: PathBuf,
        /// Key used when a submission names none.
        default: String,
    },
}

impl QueueSourceConfig {
    /// Method this source was configured with.
    #[must_use]
    pub const fn method(&self) -> QueueMethod {
        match self {
            Self::Api { .. } => QueueMethod::Api,
            Self::Mysql { .. } => QueueMethod::Mysql,
            Self::File { .. } => QueueMethod::File,
        }
    }

    /// The `.default` (or `.sql`) value, possibly empty.
    #[must_use]
    pub fn default_key(&self) -> &str {
        match self {
            Self::Api { default, .. } | Self::File { default, .. } => default,
            Self::Mysql { sql, .. } => sql,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service identifier.
    pub service: String,
    /// Provider credentials.
    pub cert: CertConfig,
    /// Device list source.
    pub queue: QueueSourceConfig,
    /// Pool template.
    pub pool: PoolConfig,
    /// Dispatcher pacing.
    pub dispatcher: DispatcherConfig,
    /// Directory for `ok` / `fail` outcome files; in-memory sinks when unset.
    pub log_path: Option<PathBuf>,
}

/// A leaf value. Pairs and dotenv files only carry text; JSON may also carry
/// numbers and booleans.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
            Self::Flag(b) => b.to_string(),
        }
    }
}

fn optional(value: Option<&Scalar>) -> Option<String> {
    value.map(Scalar::text).filter(|v| !v.is_empty())
}

fn required(value: Option<&Scalar>, key: &str) -> Result<String, DispatchError> {
    optional(value).ok_or_else(|| DispatchError::InvalidConfig(format!("config of {key} is empty")))
}

fn parsed<T>(value: Option<&Scalar>, key: &str, default: T) -> Result<T, DispatchError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    optional(value).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| DispatchError::InvalidConfig(format!("config of {key}: {e}")))
    })
}

/// The key tree as read, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceFile {
    service: Option<Scalar>,
    cert: CertSection,
    queue: QueueSection,
    pool: PoolSection,
    dispatcher: DispatcherSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CertSection {
    env: Option<Scalar>,
    path: Option<Scalar>,
    password: Option<Scalar>,
    topic: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueSection {
    method: Option<Scalar>,
    api: KeyedSection,
    mysql: MysqlSection,
    file: KeyedSection,
}

/// `api` and `file` share a location plus an optional default key.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyedSection {
    uri: Option<Scalar>,
    path: Option<Scalar>,
    default: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MysqlSection {
    dsn: Option<Scalar>,
    sql: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolSection {
    size: Option<Scalar>,
    capacity: Option<Scalar>,
    minispare: Option<Scalar>,
    maxspare: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DispatcherSection {
    idle_backoff_ms: Option<Scalar>,
    max_pool_attempts: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogSection {
    path: Option<Scalar>,
}

impl CertSection {
    fn validate(&self) -> Result<CertConfig, DispatchError> {
        Ok(CertConfig {
            env: required(self.env.as_ref(), "cert.env")?
                .parse::<CertEnv>()
                .map_err(|e| DispatchError::InvalidConfig(format!("config of cert.env: {e}")))?,
            path: PathBuf::from(required(self.path.as_ref(), "cert.path")?),
            password: required(self.password.as_ref(), "cert.password")?,
            topic: required(self.topic.as_ref(), "cert.topic")?,
        })
    }
}

impl QueueSection {
    fn validate(&self) -> Result<QueueSourceConfig, DispatchError> {
        let method = required(self.method.as_ref(), "queue.method")?
            .parse::<QueueMethod>()
            .map_err(|e| DispatchError::InvalidConfig(format!("config of queue.method {e}")))?;
        Ok(match method {
            QueueMethod::Api => QueueSourceConfig::Api {
                uri: required(self.api.uri.as_ref(), "queue.api.uri")?,
                default: optional(self.api.default.as_ref()).unwrap_or_default(),
            },
            QueueMethod::Mysql => {
                let dsn = required(self.mysql.dsn.as_ref(), "queue.mysql.dsn")?;
                if !dsn.starts_with("mysql://") {
                    return Err(DispatchError::InvalidConfig(
                        "config of queue.mysql.dsn must be a mysql:// URL".into(),
                    ));
                }
                QueueSourceConfig::Mysql {
                    dsn,
                    sql: optional(self.mysql.sql.as_ref()).unwrap_or_default(),
                }
            }
            QueueMethod::File => QueueSourceConfig::File {
                path: PathBuf::from(required(self.file.path.as_ref(), "queue.file.path")?),
                default: optional(self.file.default.as_ref()).unwrap_or_default(),
            },
        })
    }
}

impl PoolSection {
    fn validate(&self) -> Result<PoolConfig, DispatchError> {
        let template = PoolConfig::default();
        PoolConfig::new(
            parsed(self.size.as_ref(), "pool.size", template.size)?,
            parsed(self.capacity.as_ref(), "pool.capacity", template.capacity)?,
            parsed(self.minispare.as_ref(), "pool.minispare", template.mini_spare)?,
            parsed(self.maxspare.as_ref(), "pool.maxspare", template.max_spare)?,
        )
    }
}

impl DispatcherSection {
    fn validate(&self) -> Result<DispatcherConfig, DispatchError> {
        let defaults = DispatcherConfig::default();
        let cfg = DispatcherConfig {
            idle_backoff_ms: parsed(
                self.idle_backoff_ms.as_ref(),
                "dispatcher.idle_backoff_ms",
                defaults.idle_backoff_ms,
            )?,
            max_pool_attempts: parsed(
                self.max_pool_attempts.as_ref(),
                "dispatcher.max_pool_attempts",
                defaults.max_pool_attempts,
            )?,
        };
        cfg.validate()
            .map_err(|e| DispatchError::InvalidConfig(format!("dispatcher: {e}")))?;
        Ok(cfg)
    }
}

impl ServiceFile {
    fn validate(&self) -> Result<ServiceConfig, DispatchError> {
        Ok(ServiceConfig {
            service: required(self.service.as_ref(), "service")?,
            cert: self.cert.validate()?,
            queue: self.queue.validate()?,
            pool: self.pool.validate()?,
            dispatcher: self.dispatcher.validate()?,
            log_path: optional(self.log.path.as_ref()).map(PathBuf::from),
        })
    }
}

impl ServiceConfig {
    /// Build from dotted key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first missing or
    /// invalid key.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tree = Map::new();
        for (key, value) in pairs {
            insert(&mut tree, &key.into(), Value::String(value.into()))?;
        }
        Self::from_tree(tree)
    }

    /// Parse a JSON object. Nested objects and dotted keys may be mixed, so
    /// `{"cert": {"env": "sandbox"}}` and `{"cert.env": "sandbox"}` agree.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] on malformed JSON or invalid keys.
    pub fn from_json_str(input: &str) -> Result<Self, DispatchError> {
        let root: Value = serde_json::from_str(input)
            .map_err(|e| DispatchError::InvalidConfig(format!("parse error: {e}")))?;
        let Value::Object(map) = root else {
            return Err(DispatchError::InvalidConfig("top level must be an object".into()));
        };
        Self::from_tree(nest(map)?)
    }

    /// Load a dotenv-style file of `key=value` lines.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or the keys are invalid.
    pub fn from_env_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let pairs = iter
            .collect::<Result<Vec<(String, String)>, _>>()
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let cfg = Self::from_pairs(pairs)
            .with_context(|| format!("validating config file {}", path.display()))?;
        Ok(cfg)
    }

    fn from_tree(tree: Map<String, Value>) -> Result<Self, DispatchError> {
        let file: ServiceFile = serde_json::from_value(Value::Object(tree))
            .map_err(|e| DispatchError::InvalidConfig(format!("config: {e}")))?;
        file.validate()
    }
}

/// Turn dotted keys into nested objects, merging with nesting already present.
fn nest(map: Map<String, Value>) -> Result<Map<String, Value>, DispatchError> {
    let mut out = Map::new();
    for (key, value) in map {
        let value = match value {
            Value::Object(inner) => Value::Object(nest(inner)?),
            Value::Null => continue,
            other => other,
        };
        insert(&mut out, &key, value)?;
    }
    Ok(out)
}

/// Place `value` at dotted `key`. A key may not be both a leaf and a section.
fn insert(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), DispatchError> {
    let conflict =
        || DispatchError::InvalidConfig(format!("config of {key} conflicts with another key"));
    let (parents, leaf) = key.rsplit_once('.').unwrap_or(("", key));
    let mut node = root;
    for part in parents.split('.').filter(|p| !p.is_empty()) {
        let entry = node
            .entry(part)
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(next) = entry else {
            return Err(conflict());
        };
        node = next;
    }
    match value {
        Value::Object(incoming) => {
            if let Some(Value::Object(existing)) = node.get_mut(leaf) {
                for (k, v) in incoming {
                    insert(existing, &k, v)?;
                }
                return Ok(());
            }
            if node.contains_key(leaf) {
                return Err(conflict());
            }
            node.insert(leaf.to_string(), Value::Object(incoming));
        }
        scalar => {
            if matches!(node.get(leaf), Some(Value::Object(_))) {
                return Err(conflict());
            }
            node.insert(leaf.to_string(), scalar);
        }
    }
    Ok(())
}
