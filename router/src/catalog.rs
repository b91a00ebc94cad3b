//! Facilitator catalog and its startup-time resolution.
//!
//! A catalog entry may be a plain value, a zero-argument constructor, or a
//! constructor that needs deployment inputs (API keys, custom URLs) looked
//! up from the environment. [`CatalogEntry::resolve`] normalizes every shape
//! into a [`ResolvedEntry`] once at startup; nothing downstream sees the
//! difference.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::BuildHasher;
use std::sync::Arc;

use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue};
use url::Url;

use crate::proto::PaymentMethod;

/// Produces authentication headers for each facilitator call.
///
/// Called once per attempt, so implementations may mint short-lived tokens.
pub trait AuthHeaderFactory: Debug + Send + Sync {
    /// Returns the headers to attach to a call of `method`.
    fn headers(&self, method: PaymentMethod) -> HeaderMap;
}

/// [`AuthHeaderFactory`] that sends the same headers on every call.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthHeaders {
    headers: HeaderMap,
}

impl StaticAuthHeaders {
    /// Creates a factory from a fixed header map.
    #[must_use]
    pub const fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Creates a factory sending `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns an error if `token` contains characters not allowed in a header value.
    pub fn bearer(token: &str) -> Result<Self, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(Self { headers })
    }
}

impl AuthHeaderFactory for StaticAuthHeaders {
    fn headers(&self, _method: PaymentMethod) -> HeaderMap {
        self.headers.clone()
    }
}

/// Shorthand for an `Arc`-wrapped bearer token factory.
///
/// # Errors
///
/// Returns an error if `token` is not a valid header value.
pub fn bearer(token: &str) -> Result<Arc<dyn AuthHeaderFactory>, InvalidHeaderValue> {
    Ok(Arc::new(StaticAuthHeaders::bearer(token)?))
}

/// Source of deployment inputs for [`EntrySource::Environment`] entries.
pub trait EnvLookup {
    /// Returns the value of `key`, if set and non-empty.
    fn var(&self, key: &str) -> Option<String>;
}

/// [`EnvLookup`] backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl<S: BuildHasher> EnvLookup for HashMap<String, String, S> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Raw settings of a facilitator before validation.
#[derive(Debug, Clone, Default)]
pub struct FacilitatorSettings {
    /// Base URL; entries without a usable URL are discarded.
    pub url: Option<String>,
    /// Optional per-call auth headers.
    pub auth: Option<Arc<dyn AuthHeaderFactory>>,
    /// Per-facilitator breaker override; `Some(false)` disables it.
    pub circuit_breaker: Option<bool>,
}

impl FacilitatorSettings {
    /// Settings with only a URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Attaches an auth header factory.
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn AuthHeaderFactory>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the circuit breaker override.
    #[must_use]
    pub const fn circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = Some(enabled);
        self
    }
}

/// How a catalog entry produces its settings.
#[derive(Clone)]
pub enum EntrySource {
    /// Settings known up front.
    Static(FacilitatorSettings),
    /// Settings built by a zero-argument constructor.
    Constructor(fn() -> FacilitatorSettings),
    /// Settings that depend on deployment inputs; `None` when they are missing.
    Environment(fn(&dyn EnvLookup) -> Option<FacilitatorSettings>),
}

impl Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(settings) => f.debug_tuple("Static").field(settings).finish(),
            Self::Constructor(_) => f.write_str("Constructor(..)"),
            Self::Environment(_) => f.write_str("Environment(..)"),
        }
    }
}

/// One facilitator in the catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Unique facilitator id.
    pub id: String,
    /// Where its settings come from.
    pub source: EntrySource,
}

/// A catalog entry with a validated base URL.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    /// Facilitator id.
    pub id: String,
    /// Base URL; `/verify` and `/settle` are appended to it.
    pub base_url: Url,
    /// Optional auth header factory.
    pub auth: Option<Arc<dyn AuthHeaderFactory>>,
    /// Per-facilitator breaker override.
    pub circuit_breaker: Option<bool>,
}

impl CatalogEntry {
    /// An entry with fixed settings.
    #[must_use]
    pub fn fixed(id: impl Into<String>, settings: FacilitatorSettings) -> Self {
        Self {
            id: id.into(),
            source: EntrySource::Static(settings),
        }
    }

    /// An entry built by a constructor.
    #[must_use]
    pub fn constructor(id: impl Into<String>, build: fn() -> FacilitatorSettings) -> Self {
        Self {
            id: id.into(),
            source: EntrySource::Constructor(build),
        }
    }

    /// An entry built from deployment inputs.
    #[must_use]
    pub fn environment(
        id: impl Into<String>,
        build: fn(&dyn EnvLookup) -> Option<FacilitatorSettings>,
    ) -> Self {
        Self {
            id: id.into(),
            source: EntrySource::Environment(build),
        }
    }

    /// Resolves the entry, or returns `None` (logging why) if it has no usable URL.
    pub fn resolve(&self, env: &dyn EnvLookup) -> Option<ResolvedEntry> {
        let settings = match &self.source {
            EntrySource::Static(settings) => settings.clone(),
            EntrySource::Constructor(build) => build(),
            EntrySource::Environment(build) => {
                let Some(settings) = build(env) else {
                    tracing::warn!(facilitator = %self.id, "Facilitator skipped: required environment is not set");
                    return None;
                };
                settings
            }
        };

        let base_url = match parse_base_url(settings.url.as_deref()) {
            Ok(url) => url,
            Err(reason) => {
                tracing::warn!(facilitator = %self.id, reason, "Facilitator skipped: no usable URL");
                return None;
            }
        };

        Some(ResolvedEntry {
            id: self.id.clone(),
            base_url,
            auth: settings.auth,
            circuit_breaker: settings.circuit_breaker,
        })
    }
}

fn parse_base_url(raw: Option<&str>) -> Result<Url, &'static str> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err("url is empty");
    }
    if raw.contains('$') {
        return Err("url references an unset environment variable");
    }
    let url = Url::parse(raw).map_err(|_| "url is not valid")?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err("url scheme must be http or https"),
    }
}

/// Public facilitators known out of the box, in default round-robin order.
#[must_use]
pub fn known_facilitators() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::fixed(
            "x402org",
            FacilitatorSettings::with_url("https://x402.org/facilitator"),
        ),
        CatalogEntry::constructor("payai", || {
            FacilitatorSettings::with_url("https://facilitator.payai.network")
        }),
        CatalogEntry::fixed(
            "x402rs",
            FacilitatorSettings::with_url("https://facilitator.x402.rs"),
        ),
        CatalogEntry::constructor("daydreams", || {
            FacilitatorSettings::with_url("https://facilitator.daydreams.systems")
        }),
        CatalogEntry::environment("coinbase", coinbase),
    ]
}

fn coinbase(env: &dyn EnvLookup) -> Option<FacilitatorSettings> {
    let api_key = env.var("CDP_API_KEY")?;
    let auth = match bearer(&api_key) {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(error = %e, "CDP_API_KEY is not a valid header value");
            return None;
        }
    };
    let url = env
        .var("CDP_FACILITATOR_URL")
        .unwrap_or_else(|| "https://api.cdp.coinbase.com/platform/v2/x402".to_owned());
    Some(FacilitatorSettings::with_url(url).auth(auth))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_every_source_shape_resolves() {
        let entries = [
            CatalogEntry::fixed("a", FacilitatorSettings::with_url("https://a.example")),
            CatalogEntry::constructor("b", || FacilitatorSettings::with_url("https://b.example/")),
            CatalogEntry::environment("c", |env| {
                env.var("C_URL").map(FacilitatorSettings::with_url)
            }),
        ];
        let env = env(&[("C_URL", "http://c.example:8080")]);

        let resolved: Vec<_> = entries.iter().filter_map(|e| e.resolve(&env)).collect();
        let ids: Vec<_> = resolved.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(resolved[2].base_url.port(), Some(8080));
    }

    #[test]
    fn test_entries_without_usable_url_are_discarded() {
        let env = env(&[]);
        for url in ["", "   ", "${MISSING_URL}", "not a url", "ftp://files.example"] {
            let entry = CatalogEntry::fixed("x", FacilitatorSettings::with_url(url));
            assert!(entry.resolve(&env).is_none(), "{url:?} should not resolve");
        }
        let no_url = CatalogEntry::fixed("x", FacilitatorSettings::default());
        assert!(no_url.resolve(&env).is_none());
    }

    #[test]
    fn test_coinbase_needs_an_api_key() {
        let catalog = known_facilitators();
        let coinbase = catalog.iter().find(|e| e.id == "coinbase").unwrap();

        assert!(coinbase.resolve(&env(&[])).is_none());

        let resolved = coinbase.resolve(&env(&[("CDP_API_KEY", "secret")])).unwrap();
        let headers = resolved.auth.unwrap().headers(PaymentMethod::Settle);
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_known_catalog_order_is_stable() {
        let ids: Vec<_> = known_facilitators().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["x402org", "payai", "x402rs", "daydreams", "coinbase"]);
    }

    #[test]
    fn test_bearer_rejects_control_characters() {
        assert!(StaticAuthHeaders::bearer("bad\ntoken").is_err());
    }
}
