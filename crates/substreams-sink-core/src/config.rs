//! Run configuration and the layered resolver that builds it.
//!
//! Every field is resolved with the same precedence:
//! explicit invocation value → environment variable → built-in default.
//! Historical environment names are kept as aliases of one canonical field.
//!
//! Resolution is pure: it performs no file or network I/O, and the
//! environment is read through [`Environment`] so it can be replaced in tests.

use std::collections::HashMap;
use std::hash::Hash;
use std::borrow::Borrow;

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::auth::Credential;
use crate::error::{ConfigError, SinkError};

// ─── Defaults ────────────────────────────────────────────────────────────────

pub const DEFAULT_START_BLOCK: i64 = -1;
pub const DEFAULT_CURSOR_PATH: &str = "cursor.lock";
pub const DEFAULT_INACTIVITY_SECONDS: u64 = 60;
pub const DEFAULT_DELAY_BEFORE_START_MS: u64 = 0;
pub const DEFAULT_METRICS_HOSTNAME: &str = "localhost";
pub const DEFAULT_METRICS_PORT: u16 = 9102;

// ─── Field table ─────────────────────────────────────────────────────────────

/// Canonical field: its CLI flag and every environment alias, in lookup order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub flag: &'static str,
    pub env: &'static [&'static str],
}

impl FieldSpec {
    const fn new(name: &'static str, flag: &'static str, env: &'static [&'static str]) -> Self {
        Self { name, flag, env }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::Missing {
            field: self.name,
            flag: self.flag,
            env: self.env.first().copied().unwrap_or(""),
        }
    }
}

pub mod fields {
    use super::FieldSpec;

    pub const ENDPOINT: FieldSpec = FieldSpec::new("endpoint", "substreams-endpoint", &["SUBSTREAMS_ENDPOINT"]);
    pub const MANIFEST: FieldSpec = FieldSpec::new("manifest", "manifest", &["MANIFEST", "SUBSTREAMS_MANIFEST"]);
    pub const MODULE_NAME: FieldSpec = FieldSpec::new("module_name", "module-name", &["MODULE_NAME", "OUTPUT_MODULE"]);
    pub const CREDENTIAL: FieldSpec =
        FieldSpec::new("credential", "substreams-api-key", &["SUBSTREAMS_API_KEY", "SUBSTREAMS_API_TOKEN"]);
    pub const CREDENTIAL_ENVVAR: FieldSpec =
        FieldSpec::new("credential_envvar", "api-token-envvar", &["SUBSTREAMS_API_TOKEN_ENVVAR"]);
    pub const START_BLOCK: FieldSpec = FieldSpec::new("start_block", "start-block", &["START_BLOCK"]);
    pub const STOP_BLOCK: FieldSpec = FieldSpec::new("stop_block", "stop-block", &["STOP_BLOCK"]);
    pub const PARAMS: FieldSpec = FieldSpec::new("params", "params", &["PARAMS"]);
    pub const CURSOR_PATH: FieldSpec = FieldSpec::new("cursor_path", "cursor-path", &["CURSOR_PATH", "CURSOR_FILE"]);
    pub const CURSOR_AUTH: FieldSpec = FieldSpec::new("cursor_auth", "cursor-auth", &["CURSOR_AUTH"]);
    pub const PRODUCTION_MODE: FieldSpec = FieldSpec::new("production_mode", "production-mode", &["PRODUCTION_MODE"]);
    pub const FINAL_BLOCKS_ONLY: FieldSpec =
        FieldSpec::new("final_blocks_only", "final-blocks-only", &["FINAL_BLOCKS_ONLY"]);
    pub const PLAINTEXT: FieldSpec = FieldSpec::new("plaintext", "plaintext", &["PLAINTEXT"]);
    pub const HEADERS: FieldSpec = FieldSpec::new("headers", "header", &["HEADERS"]);
    pub const INACTIVITY_SECONDS: FieldSpec = FieldSpec::new(
        "inactivity_seconds",
        "inactivity-seconds",
        &["INACTIVITY_SECONDS", "RESTART_INACTIVITY_SECONDS"],
    );
    pub const DELAY_BEFORE_START: FieldSpec =
        FieldSpec::new("delay_before_start", "delay-before-start", &["DELAY_BEFORE_START"]);
    pub const METRICS_DISABLED: FieldSpec = FieldSpec::new("metrics_disabled", "metrics-disabled", &["METRICS_DISABLED"]);
    pub const HOSTNAME: FieldSpec = FieldSpec::new("hostname", "hostname", &["HOSTNAME"]);
    pub const PORT: FieldSpec = FieldSpec::new("port", "port", &["PORT"]);
    pub const METRICS_LABELS: FieldSpec = FieldSpec::new("metrics_labels", "metrics-labels", &["METRICS_LABELS"]);
    pub const VERBOSE: FieldSpec = FieldSpec::new("verbose", "verbose", &["VERBOSE"]);
}

// ─── Environment ─────────────────────────────────────────────────────────────

/// Read-only view of environment variables.
pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<K, V> Environment for HashMap<K, V>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
{
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.as_ref().to_string())
    }
}

// ─── Explicit options ────────────────────────────────────────────────────────

/// Values passed explicitly at invocation (CLI flags or an embedding program).
///
/// `None` / empty means "not given here", so the environment and then the
/// default are consulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub substreams_endpoint: Option<String>,
    pub manifest: Option<String>,
    pub module_name: Option<String>,
    pub substreams_api_key: Option<String>,
    /// Name of the environment variable holding the credential.
    pub api_token_envvar: Option<String>,
    pub start_block: Option<i64>,
    pub stop_block: Option<u64>,
    #[serde(default)]
    pub params: Vec<String>,
    pub cursor_path: Option<String>,
    /// `user:password` for the HTTP cursor backend.
    pub cursor_auth: Option<String>,
    pub production_mode: Option<bool>,
    pub final_blocks_only: Option<bool>,
    pub plaintext: Option<bool>,
    #[serde(default)]
    pub headers: Vec<String>,
    pub inactivity_seconds: Option<u64>,
    pub delay_before_start: Option<u64>,
    pub metrics_disabled: Option<bool>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub metrics_labels: Vec<String>,
    pub verbose: Option<bool>,
}

// ─── Resolved configuration ──────────────────────────────────────────────────

/// Which cursor backend a location selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorBackend {
    File,
    Http,
}

impl CursorBackend {
    /// `http://` / `https://` locations use the HTTP backend, anything else is
    /// a file path.
    pub fn detect(location: &str) -> Self {
        let lower = location.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Http
        } else {
            Self::File
        }
    }
}

impl std::fmt::Display for CursorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// HTTP Basic-Auth credential for the cursor backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

impl BasicAuth {
    /// Parse `user:password` (password optional).
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (username, password) = match raw.split_once(':') {
            Some((user, pass)) => (user, Some(pass.to_string())),
            None => (raw, None),
        };
        if username.is_empty() {
            return Err(ConfigError::invalid(fields::CURSOR_AUTH.name, "***", "username is empty"));
        }
        Ok(Self {
            username: username.to_string(),
            password,
        })
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Where the cursor lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorLocation {
    /// File path or URL (userinfo stripped).
    pub location: String,
    pub backend: CursorBackend,
    pub auth: Option<BasicAuth>,
}

impl CursorLocation {
    /// Build a location, lifting `user:pass@` out of HTTP URLs.
    ///
    /// An explicit `auth` wins over URL userinfo.
    pub fn new(location: impl Into<String>, auth: Option<BasicAuth>) -> Result<Self, ConfigError> {
        let location = location.into();
        let backend = CursorBackend::detect(&location);
        if backend == CursorBackend::File {
            return Ok(Self {
                location,
                backend,
                auth,
            });
        }

        let mut url = url::Url::parse(location.trim())
            .map_err(|e| ConfigError::invalid(fields::CURSOR_PATH.name, &location, e.to_string()))?;
        let url_auth = if url.username().is_empty() {
            None
        } else {
            let decode = |part: &str| {
                percent_decode_str(part)
                    .decode_utf8()
                    .map(|s| s.into_owned())
                    .map_err(|e| ConfigError::invalid(fields::CURSOR_PATH.name, &location, format!("userinfo: {e}")))
            };
            Some(BasicAuth {
                username: decode(url.username())?,
                password: url.password().map(decode).transpose()?,
            })
        };
        // Url::set_* only fail for cannot-be-a-base URLs, which http(s) never are.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self {
            location: url.to_string(),
            backend,
            auth: auth.or(url_auth),
        })
    }
}

/// Metrics endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsOptions {
    pub enabled: bool,
    pub hostname: String,
    pub port: u16,
    /// Static labels applied to every exported series.
    pub labels: IndexMap<String, String>,
}

/// Fully resolved, immutable run configuration.
///
/// Built once per process by [`resolve`] and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub endpoint: String,
    pub manifest: String,
    pub module_name: String,
    pub credential: Credential,
    /// `-1` = initial block of the first module.
    pub start_block: i64,
    /// Exclusive stop block; `None` = stream forever.
    pub stop_block: Option<u64>,
    /// Module parameters, `module → value`.
    pub params: IndexMap<String, String>,
    pub cursor: CursorLocation,
    pub production_mode: bool,
    pub final_blocks_only: bool,
    pub plaintext: bool,
    pub headers: IndexMap<String, String>,
    /// `0` disables the inactivity check.
    pub inactivity_seconds: u64,
    pub delay_before_start_ms: u64,
    pub metrics: MetricsOptions,
    pub verbose: bool,
}

impl RunConfiguration {
    /// Module parameters in `module=value` form, in insertion order.
    pub fn params_list(&self) -> Vec<String> {
        self.params.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.metrics.hostname, self.metrics.port)
    }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Resolve the run configuration from explicit options and the environment.
///
/// Required fields are checked first, so a missing one fails before anything
/// else is parsed. No I/O is performed.
pub fn resolve(explicit: &RunOptions, env: &dyn Environment) -> Result<RunConfiguration, SinkError> {
    let layers = Layers { env };

    // Required
    let endpoint = layers.required(&explicit.substreams_endpoint, &fields::ENDPOINT)?;
    let manifest = layers.required(&explicit.manifest, &fields::MANIFEST)?;
    let module_name = layers.required(&explicit.module_name, &fields::MODULE_NAME)?;
    let raw_credential = layers.credential(explicit)?;

    // Optional
    let start_block = layers
        .parsed(explicit.start_block, &fields::START_BLOCK, parse_i64)?
        .unwrap_or(DEFAULT_START_BLOCK);
    let stop_block = layers
        .parsed(explicit.stop_block, &fields::STOP_BLOCK, parse_u64)?
        .filter(|&stop| stop > 0);

    let params = fold_pairs(&fields::PARAMS, &layers.list(&explicit.params, &fields::PARAMS), Delimiters::Equals)?;
    let headers = fold_pairs(&fields::HEADERS, &layers.list(&explicit.headers, &fields::HEADERS), Delimiters::EqualsOrColon)?;
    let labels = fold_pairs(
        &fields::METRICS_LABELS,
        &layers.list(&explicit.metrics_labels, &fields::METRICS_LABELS),
        Delimiters::Equals,
    )?;

    let cursor_path = layers
        .optional(&explicit.cursor_path, &fields::CURSOR_PATH)
        .unwrap_or_else(|| DEFAULT_CURSOR_PATH.to_string());
    let cursor_auth = layers
        .optional(&explicit.cursor_auth, &fields::CURSOR_AUTH)
        .map(|raw| BasicAuth::parse(&raw))
        .transpose()?;
    let cursor = CursorLocation::new(cursor_path, cursor_auth)?;

    let production_mode = layers.flag(explicit.production_mode, &fields::PRODUCTION_MODE)?;
    let final_blocks_only = layers.flag(explicit.final_blocks_only, &fields::FINAL_BLOCKS_ONLY)?;
    let plaintext = layers.flag(explicit.plaintext, &fields::PLAINTEXT)?;
    let verbose = layers.flag(explicit.verbose, &fields::VERBOSE)?;
    let metrics_disabled = layers.flag(explicit.metrics_disabled, &fields::METRICS_DISABLED)?;

    let inactivity_seconds = layers
        .parsed(explicit.inactivity_seconds, &fields::INACTIVITY_SECONDS, parse_u64)?
        .unwrap_or(DEFAULT_INACTIVITY_SECONDS);
    let delay_before_start_ms = layers
        .parsed(explicit.delay_before_start, &fields::DELAY_BEFORE_START, parse_u64)?
        .unwrap_or(DEFAULT_DELAY_BEFORE_START_MS);

    let hostname = layers
        .optional(&explicit.hostname, &fields::HOSTNAME)
        .unwrap_or_else(|| DEFAULT_METRICS_HOSTNAME.to_string());
    let port = layers
        .parsed(explicit.port, &fields::PORT, parse_u16)?
        .unwrap_or(DEFAULT_METRICS_PORT);

    let credential = Credential::parse(&raw_credential)?;

    Ok(RunConfiguration {
        endpoint,
        manifest,
        module_name,
        credential,
        start_block,
        stop_block,
        params,
        cursor,
        production_mode,
        final_blocks_only,
        plaintext,
        headers,
        inactivity_seconds,
        delay_before_start_ms,
        metrics: MetricsOptions {
            enabled: !metrics_disabled,
            hostname,
            port,
            labels,
        },
        verbose,
    })
}

struct Layers<'a> {
    env: &'a dyn Environment,
}

impl Layers<'_> {
    /// First non-blank value among the field's environment aliases.
    fn env_value(&self, field: &FieldSpec) -> Option<String> {
        field
            .env
            .iter()
            .filter_map(|name| self.env.var(name))
            .find(|value| !value.trim().is_empty())
    }

    fn optional(&self, explicit: &Option<String>, field: &FieldSpec) -> Option<String> {
        explicit
            .as_ref()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .or_else(|| self.env_value(field))
    }

    fn required(&self, explicit: &Option<String>, field: &FieldSpec) -> Result<String, ConfigError> {
        self.optional(explicit, field).ok_or_else(|| field.missing())
    }

    /// Explicit key → variable named by `--api-token-envvar` → standard aliases.
    fn credential(&self, explicit: &RunOptions) -> Result<String, ConfigError> {
        if let Some(key) = explicit.substreams_api_key.as_ref().filter(|v| !v.trim().is_empty()) {
            return Ok(key.clone());
        }
        let indirect = self
            .optional(&explicit.api_token_envvar, &fields::CREDENTIAL_ENVVAR)
            .and_then(|name| self.env.var(name.trim()))
            .filter(|v| !v.trim().is_empty());
        indirect
            .or_else(|| self.env_value(&fields::CREDENTIAL))
            .ok_or_else(|| fields::CREDENTIAL.missing())
    }

    fn parsed<T>(
        &self,
        explicit: Option<T>,
        field: &FieldSpec,
        parse: fn(&FieldSpec, &str) -> Result<T, ConfigError>,
    ) -> Result<Option<T>, ConfigError> {
        match explicit {
            Some(value) => Ok(Some(value)),
            None => self.env_value(field).map(|raw| parse(field, raw.trim())).transpose(),
        }
    }

    fn flag(&self, explicit: Option<bool>, field: &FieldSpec) -> Result<bool, ConfigError> {
        Ok(self.parsed(explicit, field, parse_bool_field)?.unwrap_or(false))
    }

    /// Explicit occurrences win as a whole; otherwise the env value counts as
    /// one occurrence.
    fn list(&self, explicit: &[String], field: &FieldSpec) -> Vec<String> {
        if explicit.iter().any(|v| !v.trim().is_empty()) {
            explicit.to_vec()
        } else {
            self.env_value(field).into_iter().collect()
        }
    }
}

// ─── Value parsers ───────────────────────────────────────────────────────────

/// Case-insensitive `"true"` / `"false"`.
pub fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected 'true' or 'false', got {other:?}")),
    }
}

fn parse_bool_field(field: &FieldSpec, raw: &str) -> Result<bool, ConfigError> {
    parse_bool(raw).map_err(|reason| ConfigError::invalid(field.name, raw, reason))
}

fn parse_i64(field: &FieldSpec, raw: &str) -> Result<i64, ConfigError> {
    raw.parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::invalid(field.name, raw, e.to_string()))
}

fn parse_u64(field: &FieldSpec, raw: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::invalid(field.name, raw, e.to_string()))
}

fn parse_u16(field: &FieldSpec, raw: &str) -> Result<u16, ConfigError> {
    raw.parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::invalid(field.name, raw, e.to_string()))
}

/// Key/value separators accepted by [`fold_pairs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiters {
    /// `key=value`
    Equals,
    /// `key=value` or `Key: Value`, whichever separator comes first.
    EqualsOrColon,
}

/// Fold repeated `key=value` / `k1=v1&k2=v2` occurrences into one ordered map.
///
/// Later keys overwrite earlier ones. A `&`-piece without a separator belongs
/// to the previous value, so `mod=a&b` yields `mod → "a&b"`.
pub fn fold_pairs(
    field: &FieldSpec,
    occurrences: &[String],
    delimiters: Delimiters,
) -> Result<IndexMap<String, String>, ConfigError> {
    let mut map = IndexMap::new();
    for occurrence in occurrences {
        let occurrence = occurrence.trim();
        if occurrence.is_empty() {
            continue;
        }
        let mut last_key: Option<String> = None;
        for piece in occurrence.split('&') {
            match split_pair(piece, delimiters) {
                Some((key, value)) => {
                    if key.is_empty() {
                        return Err(ConfigError::invalid(field.name, occurrence, "empty key"));
                    }
                    map.insert(key.to_string(), value.to_string());
                    last_key = Some(key.to_string());
                }
                None => match &last_key {
                    Some(key) => {
                        if let Some(value) = map.get_mut(key) {
                            value.push('&');
                            value.push_str(piece);
                        }
                    }
                    None => {
                        return Err(ConfigError::invalid(field.name, occurrence, "expected key=value"));
                    }
                },
            }
        }
    }
    Ok(map)
}

fn split_pair(piece: &str, delimiters: Delimiters) -> Option<(&str, &str)> {
    let eq = piece.find('=');
    let colon = match delimiters {
        Delimiters::Equals => None,
        Delimiters::EqualsOrColon => piece.find(':'),
    };
    let at = match (eq, colon) {
        (Some(e), Some(c)) => e.min(c),
        (Some(e), None) => e,
        (None, Some(c)) => c,
        (None, None) => return None,
    };
    Some((piece[..at].trim(), piece[at + 1..].trim()))
}
