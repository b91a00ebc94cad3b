//! The set of routable facilitators and how one is picked.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::HeaderMap;
use url::Url;

use crate::catalog::{AuthHeaderFactory, CatalogEntry, EnvLookup, ResolvedEntry};
use crate::error::RegistryError;
use crate::proto::PaymentMethod;
use crate::resilience::{CircuitBreaker, ResilienceConfig, ResiliencePolicy};
use crate::transport::FacilitatorTransport;

/// Facilitator id that requests round-robin selection. Never a concrete facilitator.
pub const AUTO_FACILITATOR_ID: &str = "auto";

/// A configured upstream facilitator.
///
/// Immutable after startup apart from its circuit breaker's counters.
#[derive(Debug)]
pub struct Facilitator {
    id: String,
    base_url: Url,
    auth: Option<Arc<dyn AuthHeaderFactory>>,
    policy: ResiliencePolicy,
    transport: Arc<dyn FacilitatorTransport>,
}

impl Facilitator {
    /// Creates a facilitator without authentication.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        base_url: Url,
        policy: ResiliencePolicy,
        transport: Arc<dyn FacilitatorTransport>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url,
            auth: None,
            policy,
            transport,
        }
    }

    /// Builds a facilitator from a resolved catalog entry.
    #[must_use]
    pub fn from_entry(
        entry: ResolvedEntry,
        config: &ResilienceConfig,
        transport: Arc<dyn FacilitatorTransport>,
    ) -> Self {
        let policy = ResiliencePolicy::from_config(&entry.id, config, entry.circuit_breaker);
        Self {
            id: entry.id,
            base_url: entry.base_url,
            auth: entry.auth,
            policy,
            transport,
        }
    }

    /// Sets the auth header factory.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthHeaderFactory>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Auth headers for one call of `method`; empty without an auth factory.
    #[must_use]
    pub fn auth_headers(&self, method: PaymentMethod) -> HeaderMap {
        self.auth
            .as_ref()
            .map(|auth| auth.headers(method))
            .unwrap_or_default()
    }

    /// The resilience policy wrapping every call.
    #[must_use]
    pub const fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// The circuit breaker, if circuit breaking is enabled for this facilitator.
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.policy.circuit_breaker().map(Arc::as_ref)
    }

    /// The transport used to reach it.
    #[must_use]
    pub fn transport(&self) -> &dyn FacilitatorTransport {
        self.transport.as_ref()
    }
}

/// Ordered set of routable facilitators with a shared round-robin cursor.
///
/// One instance per process, shared behind an `Arc`. Each facilitator's
/// breaker has its own lock; the registry itself only holds the atomic cursor.
#[derive(Debug)]
pub struct FacilitatorRegistry {
    facilitators: Vec<Arc<Facilitator>>,
    index: HashMap<String, usize>,
    cursor: AtomicUsize,
}

impl FacilitatorRegistry {
    /// Creates a registry preserving the given order. Duplicate ids keep the
    /// first occurrence; a facilitator named [`AUTO_FACILITATOR_ID`] is skipped.
    #[must_use]
    pub fn new(facilitators: impl IntoIterator<Item = Facilitator>) -> Self {
        let mut list = Vec::new();
        let mut index = HashMap::new();
        for facilitator in facilitators {
            if facilitator.id() == AUTO_FACILITATOR_ID {
                tracing::warn!("Facilitator id \"auto\" is reserved, entry ignored");
                continue;
            }
            if index.contains_key(facilitator.id()) {
                tracing::warn!(facilitator = %facilitator.id(), "Duplicate facilitator id ignored");
                continue;
            }
            index.insert(facilitator.id().to_owned(), list.len());
            list.push(Arc::new(facilitator));
        }
        Self {
            facilitators: list,
            index,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the facilitator at the cursor and advances the cursor.
    ///
    /// The read and the advance are one atomic step, so the cursor is always
    /// a valid index. Concurrent callers may see duplicates under contention.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Empty`] if no facilitator is configured.
    pub fn select_round_robin(&self) -> Result<Arc<Facilitator>, RegistryError> {
        let len = self.facilitators.len();
        if len == 0 {
            return Err(RegistryError::Empty);
        }
        let (Ok(current) | Err(current)) =
            self.cursor
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len));
        Ok(Arc::clone(&self.facilitators[current]))
    }

    /// Looks up a facilitator by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids and for
    /// [`AUTO_FACILITATOR_ID`].
    pub fn lookup_by_id(&self, id: &str) -> Result<Arc<Facilitator>, RegistryError> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.facilitators[i]))
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))
    }

    /// Index the next round-robin selection will return.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Number of facilitators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facilitators.len()
    }

    /// Whether the registry has no facilitators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facilitators.is_empty()
    }

    /// Facilitator ids in round-robin order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.facilitators.iter().map(|f| f.id())
    }

    /// Facilitators in round-robin order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Facilitator>> {
        self.facilitators.iter()
    }
}

/// Builds a [`FacilitatorRegistry`] from a catalog at startup.
///
/// Every entry is resolved once; unresolvable entries and entries outside the
/// whitelist are dropped. Catalog order is kept.
#[derive(Debug)]
pub struct RegistryBuilder {
    catalog: Vec<CatalogEntry>,
    whitelist: Vec<String>,
    resilience: ResilienceConfig,
    transport: Arc<dyn FacilitatorTransport>,
}

impl RegistryBuilder {
    /// Starts a builder with an empty catalog and default resilience settings.
    #[must_use]
    pub fn new(transport: Arc<dyn FacilitatorTransport>) -> Self {
        Self {
            catalog: Vec::new(),
            whitelist: Vec::new(),
            resilience: ResilienceConfig::default(),
            transport,
        }
    }

    /// Appends catalog entries.
    #[must_use]
    pub fn catalog(mut self, entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        self.catalog.extend(entries);
        self
    }

    /// Restricts the registry to these ids. An empty whitelist admits every
    /// resolvable entry.
    #[must_use]
    pub fn whitelist<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Resilience settings applied to every facilitator.
    #[must_use]
    pub const fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    /// Resolves the catalog and builds the registry.
    #[must_use]
    pub fn build(self, env: &dyn EnvLookup) -> FacilitatorRegistry {
        let admitted = |id: &str| self.whitelist.is_empty() || self.whitelist.iter().any(|w| w == id);

        let resolved: Vec<ResolvedEntry> = self
            .catalog
            .iter()
            .filter(|entry| entry.id != AUTO_FACILITATOR_ID)
            .filter(|entry| admitted(&entry.id))
            .filter_map(|entry| entry.resolve(env))
            .collect();

        for id in &self.whitelist {
            if !resolved.iter().any(|e| &e.id == id) {
                tracing::warn!(facilitator = %id, "Whitelisted facilitator is not configured");
            }
        }

        let registry = FacilitatorRegistry::new(resolved.into_iter().map(|entry| {
            Facilitator::from_entry(entry, &self.resilience, Arc::clone(&self.transport))
        }));
        tracing::info!(
            facilitators = ?registry.ids().collect::<Vec<_>>(),
            "Facilitator registry ready"
        );
        registry
    }
}
