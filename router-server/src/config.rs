//! Router server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax;
//! unresolved references are left as-is, which makes a facilitator URL that
//! depends on them unresolvable.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4022
//! whitelist = ["payai", "x402rs", "internal"]
//!
//! [router]
//! max_facilitator_attempts = 3
//!
//! [resilience]
//! timeout_ms = 10000
//! max_attempts = 3
//! backoff_ms = 250
//!
//! [resilience.circuit_breaker]
//! enabled = true
//! failure_threshold = 5
//! cooldown_ms = 30000
//!
//! [events]
//! queue_capacity = 1024
//! sink = "http"
//! sink_url = "http://collector:8123/events"
//!
//! [[facilitators]]
//! id = "internal"
//! url = "${INTERNAL_FACILITATOR_URL}"
//! bearer_token = "$INTERNAL_FACILITATOR_TOKEN"
//! circuit_breaker = false
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `config.toml`)
//! - `HOST`, `PORT`: override the bind address
//! - `CDP_API_KEY`: enables the built-in `coinbase` facilitator
//! - anything referenced by `$VAR` in the file

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use x402_router::catalog::{CatalogEntry, EnvLookup, FacilitatorSettings, bearer, known_facilitators};
use x402_router::events::{EventRecorder, EventSink, EventsConfig, LogSink};
use x402_router::executor::AttemptExecutor;
use x402_router::registry::RegistryBuilder;
use x402_router::resilience::{CircuitBreakerConfig, ResilienceConfig};
use x402_router::router::{FacilitatorRouter, RouterConfig};
use x402_router::transport::FacilitatorTransport;
use x402_router_http::{HttpEventSink, ReqwestTransport};

/// Errors raised while loading configuration or assembling the router.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or has the wrong shape.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// `events.sink = "http"` without a usable `events.sink_url`.
    #[error("events.sink = \"http\" requires a valid events.sink_url")]
    SinkUrl,

    /// An HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Top-level router server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4022`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Facilitator ids allowed to receive traffic; empty allows every
    /// resolvable catalog entry.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Failover settings.
    #[serde(default)]
    pub router: RouterSection,

    /// Per-facilitator resilience settings.
    #[serde(default)]
    pub resilience: ResilienceSection,

    /// Analytics event settings.
    #[serde(default)]
    pub events: EventsSection,

    /// Facilitators added to, or replacing, the built-in catalog.
    #[serde(default)]
    pub facilitators: Vec<FacilitatorEntryConfig>,
}

/// `[router]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RouterSection {
    /// Attempts across facilitators in auto mode (default: 3).
    #[serde(default = "default_max_facilitator_attempts")]
    pub max_facilitator_attempts: usize,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_facilitator_attempts: default_max_facilitator_attempts(),
        }
    }
}

/// `[resilience]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ResilienceSection {
    /// Per-try timeout in milliseconds; `0` disables it (default: 10000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Tries per facilitator attempt, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between tries in milliseconds (default: 250).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// `[resilience.circuit_breaker]` section.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            circuit_breaker: CircuitBreakerSection::default(),
        }
    }
}

/// `[resilience.circuit_breaker]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CircuitBreakerSection {
    /// Global toggle (default: `true`).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive failures that open the circuit (default: 5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Open-circuit cooldown in milliseconds (default: 30000).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Where analytics events go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Structured log records.
    #[default]
    Log,
    /// JSON POSTs to `sink_url`.
    Http,
}

/// `[events]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsSection {
    /// Events buffered ahead of the sink (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Sink kind (default: `log`).
    #[serde(default)]
    pub sink: SinkKind,
    /// Collector endpoint for the `http` sink.
    #[serde(default)]
    pub sink_url: Option<String>,
    /// Collector request timeout in milliseconds (default: 5000).
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sink: SinkKind::default(),
            sink_url: None,
            sink_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

/// One `[[facilitators]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorEntryConfig {
    /// Facilitator id; an id of the built-in catalog replaces that entry.
    pub id: String,
    /// Base URL. Supports `$VAR` / `${VAR}`.
    #[serde(default)]
    pub url: Option<String>,
    /// Optional bearer token. Supports `$VAR` / `${VAR}`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Set to `false` to run this facilitator without a circuit breaker.
    #[serde(default)]
    pub circuit_breaker: Option<bool>,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4022
}

const fn default_max_facilitator_attempts() -> usize {
    3
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    250
}

const fn default_true() -> bool {
    true
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_ms() -> u64 {
    30_000
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_sink_timeout_ms() -> u64 {
    5_000
}

impl RouterServerConfig {
    /// Loads configuration from `path`, expanding `$VAR` references from `env`.
    ///
    /// A missing file yields the defaults. `HOST` and `PORT` from `env`
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path, env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            String::new()
        };
        Self::parse(&content, env)
    }

    /// Parses configuration text, expanding `$VAR` references from `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded text is not a valid configuration.
    pub fn parse(content: &str, env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content, env);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Some(addr) = env.var("HOST").and_then(|h| h.parse().ok()) {
            config.host = addr;
        }
        if let Some(port) = env.var("PORT").and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Resilience settings shared by every facilitator.
    #[must_use]
    pub const fn resilience_config(&self) -> ResilienceConfig {
        let r = &self.resilience;
        ResilienceConfig {
            timeout: if r.timeout_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(r.timeout_ms))
            },
            max_attempts: r.max_attempts,
            backoff: Duration::from_millis(r.backoff_ms),
            circuit_breaker: CircuitBreakerConfig {
                enabled: r.circuit_breaker.enabled,
                failure_threshold: r.circuit_breaker.failure_threshold,
                cooldown: Duration::from_millis(r.circuit_breaker.cooldown_ms),
            },
        }
    }

    /// Router settings.
    #[must_use]
    pub const fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_facilitator_attempts: self.router.max_facilitator_attempts,
        }
    }

    /// Event pipeline settings.
    #[must_use]
    pub const fn events_config(&self) -> EventsConfig {
        EventsConfig {
            queue_capacity: self.events.queue_capacity,
        }
    }

    /// The built-in catalog with configured facilitators applied.
    ///
    /// A configured entry with a built-in id replaces it in place; others are
    /// appended. Entries whose bearer token references an unset variable are
    /// skipped.
    #[must_use]
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut catalog = known_facilitators();
        for entry in &self.facilitators {
            let Some(settings) = entry.settings() else {
                continue;
            };
            let configured = CatalogEntry::fixed(entry.id.clone(), settings);
            match catalog.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = configured,
                None => catalog.push(configured),
            }
        }
        catalog
    }

    /// The event sink selected by `[events]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `http` sink has no valid URL or its client
    /// cannot be built.
    pub fn event_sink(&self) -> Result<Arc<dyn EventSink>, ConfigError> {
        match self.events.sink {
            SinkKind::Log => Ok(Arc::new(LogSink)),
            SinkKind::Http => {
                let url: Url = self
                    .events
                    .sink_url
                    .as_deref()
                    .and_then(|u| u.parse().ok())
                    .ok_or(ConfigError::SinkUrl)?;
                let timeout = Duration::from_millis(self.events.sink_timeout_ms);
                Ok(Arc::new(HttpEventSink::new(url, timeout)?))
            }
        }
    }

    /// Assembles the facilitator router with the production transport.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport or event sink cannot be built.
    pub fn build_router(&self, env: &dyn EnvLookup) -> Result<FacilitatorRouter, ConfigError> {
        let transport: Arc<dyn FacilitatorTransport> = Arc::new(ReqwestTransport::new()?);
        self.build_router_with(transport, env)
    }

    /// Assembles the facilitator router around `transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event sink cannot be built.
    pub fn build_router_with(
        &self,
        transport: Arc<dyn FacilitatorTransport>,
        env: &dyn EnvLookup,
    ) -> Result<FacilitatorRouter, ConfigError> {
        let registry = RegistryBuilder::new(transport)
            .catalog(self.catalog())
            .whitelist(self.whitelist.iter().cloned())
            .resilience(self.resilience_config())
            .build(env);
        if registry.is_empty() {
            tracing::warn!("No facilitators configured, every request will fail");
        }

        let recorder = EventRecorder::new(self.event_sink()?, &self.events_config());
        Ok(FacilitatorRouter::new(
            Arc::new(registry),
            AttemptExecutor::new(recorder),
            self.router_config(),
        ))
    }
}

impl FacilitatorEntryConfig {
    fn settings(&self) -> Option<FacilitatorSettings> {
        let mut settings = FacilitatorSettings {
            url: self.url.clone(),
            auth: None,
            circuit_breaker: self.circuit_breaker,
        };
        if let Some(token) = self.bearer_token.as_deref().map(str::trim) {
            if token.is_empty() || token.contains('$') {
                tracing::warn!(
                    facilitator = %self.id,
                    "Skipping facilitator: bearer_token not resolved (missing env var?)"
                );
                return None;
            }
            match bearer(token) {
                Ok(auth) => settings.auth = Some(auth),
                Err(_) => {
                    tracing::warn!(facilitator = %self.id, "Skipping facilitator: bearer_token is not a valid header value");
                    return None;
                }
            }
        }
        Some(settings)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from `env`.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str, env: &dyn EnvLookup) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match env.var(&name).filter(|_| !name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_expand_env_vars() {
        let env = env(&[("A", "1"), ("B_URL", "https://b.example")]);
        assert_eq!(expand_env_vars("x=$A y=${B_URL}/v1", &env), "x=1 y=https://b.example/v1");
        assert_eq!(expand_env_vars("$MISSING ${ALSO_MISSING}", &env), "$MISSING ${ALSO_MISSING}");
        assert_eq!(expand_env_vars("cost: 5$ and ${", &env), "cost: 5$ and ${");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RouterServerConfig::parse("", &env(&[])).unwrap();
        assert_eq!(config.port, 4022);
        assert!(config.whitelist.is_empty());
        assert_eq!(config.router_config(), RouterConfig::default());
        assert_eq!(config.resilience_config(), ResilienceConfig::default());
        assert_eq!(config.events_config(), EventsConfig::default());
        assert_eq!(config.events.sink, SinkKind::Log);
    }

    #[test]
    fn test_full_config_with_env_overrides() {
        let toml = r#"
            port = 9000
            whitelist = ["payai", "internal"]

            [router]
            max_facilitator_attempts = 5

            [resilience]
            timeout_ms = 0
            max_attempts = 2
            backoff_ms = 50

            [resilience.circuit_breaker]
            enabled = false

            [events]
            queue_capacity = 16

            [[facilitators]]
            id = "internal"
            url = "${INTERNAL_URL}"
            bearer_token = "$INTERNAL_TOKEN"
            circuit_breaker = false
        "#;
        let env = env(&[
            ("INTERNAL_URL", "http://10.0.0.5:8080"),
            ("INTERNAL_TOKEN", "tok"),
            ("PORT", "7000"),
        ]);
        let config = RouterServerConfig::parse(toml, &env).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.router.max_facilitator_attempts, 5);
        let resilience = config.resilience_config();
        assert_eq!(resilience.timeout, None);
        assert_eq!(resilience.max_attempts, 2);
        assert!(!resilience.circuit_breaker.enabled);
        assert_eq!(resilience.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.events_config().queue_capacity, 16);

        let internal = config.catalog().into_iter().find(|e| e.id == "internal").unwrap();
        let resolved = internal.resolve(&env).unwrap();
        assert_eq!(resolved.base_url.as_str(), "http://10.0.0.5:8080/");
        assert_eq!(resolved.circuit_breaker, Some(false));
        assert!(resolved.auth.is_some());
    }

    #[test]
    fn test_unresolved_entries_are_skipped() {
        let toml = r#"
            [[facilitators]]
            id = "no-url"
            url = "${NOT_SET}"

            [[facilitators]]
            id = "no-token"
            url = "https://t.example"
            bearer_token = "${TOKEN_NOT_SET}"
        "#;
        let env = env(&[]);
        let config = RouterServerConfig::parse(toml, &env).unwrap();
        let catalog = config.catalog();

        let no_url = catalog.iter().find(|e| e.id == "no-url").unwrap();
        assert!(no_url.resolve(&env).is_none());
        assert!(catalog.iter().all(|e| e.id != "no-token"));
    }

    #[test]
    fn test_configured_entry_replaces_builtin_in_place() {
        let toml = r#"
            [[facilitators]]
            id = "payai"
            url = "https://payai.internal"
        "#;
        let config = RouterServerConfig::parse(toml, &env(&[])).unwrap();
        let catalog = config.catalog();

        assert_eq!(catalog.len(), known_facilitators().len());
        assert_eq!(catalog[1].id, "payai");
        let resolved = catalog[1].resolve(&env(&[])).unwrap();
        assert_eq!(resolved.base_url.host_str(), Some("payai.internal"));
    }

    #[test]
    fn test_http_sink_requires_url() {
        let config = RouterServerConfig::parse("[events]\nsink = \"http\"", &env(&[])).unwrap();
        assert!(matches!(config.event_sink(), Err(ConfigError::SinkUrl)));
    }
}
