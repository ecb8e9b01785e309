//! The environment: one store, one network function, one listener registry.
//!
//! Environments are explicit values so a test process can hold several
//! independent caches at once. Applications that want the usual
//! one-environment-per-process wiring install a default via
//! `install_default` and reach it through `with_default`.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use crate::key::Argument;
use crate::normalize::normalize;
use crate::plan::{Entrypoint, NormalizationNode, ReaderNode};
use crate::read::{FragmentReference, ReadOutcome, read};
use crate::store::{Record, Store, StoreUpdate};
use crate::subscribe::{SubscriberRegistry, SubscriptionToken};
use crate::value::{Link, ROOT_ID, Variables};

/// The network collaborator: query text and variables in, response data out.
pub type NetworkFn = Box<dyn Fn(&str, &Variables) -> Result<JsonValue> + Send + Sync>;

/// Pluggable fallback consulted when a requested field is absent from the
/// store; may synthesize a substitute link without a network round-trip.
pub type MissingFieldHandler =
    Box<dyn Fn(&Record, &str, &str, &[Argument], &Variables) -> Option<Link> + Send + Sync>;

pub struct Environment {
    store: RwLock<Store>,
    registry: RwLock<SubscriberRegistry>,
    fetched: RwLock<BTreeSet<[u8; 32]>>,
    network: NetworkFn,
    missing_field_handler: Option<MissingFieldHandler>,
}

impl Environment {
    pub fn new(network: NetworkFn) -> Self {
        Self {
            store: RwLock::new(Store::new()),
            registry: RwLock::new(SubscriberRegistry::new()),
            fetched: RwLock::new(BTreeSet::new()),
            network,
            missing_field_handler: None,
        }
    }

    /// An environment with no transport: any fetch attempt is an error.
    /// Suits consumers that normalize canned responses themselves.
    pub fn offline() -> Self {
        Self::new(Box::new(|query_text: &str, _: &Variables| {
            bail!(
                "environment has no network transport (attempted to fetch {} bytes of query text)",
                query_text.len()
            )
        }))
    }

    pub fn with_missing_field_handler(mut self, handler: MissingFieldHandler) -> Self {
        self.missing_field_handler = Some(handler);
        self
    }

    pub fn missing_field_handler(&self) -> Option<&MissingFieldHandler> {
        self.missing_field_handler.as_ref()
    }

    pub fn call_network(&self, query_text: &str, variables: &Variables) -> Result<JsonValue> {
        (self.network)(query_text, variables)
    }

    /// Run a closure against the current store contents.
    pub fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let store = self.store.read().expect("store lock poisoned");
        f(&store)
    }

    /// Apply one write batch and notify subscribers exactly once.
    /// An empty batch mutates nothing and notifies no one.
    pub fn commit_update(&self, update: StoreUpdate) {
        if update.is_empty() {
            return;
        }
        {
            let mut store = self.store.write().expect("store lock poisoned");
            store.commit(update);
        }
        self.notify();
    }

    /// Normalize a network response into the store: one commit, one notify.
    pub fn normalize_response(
        &self,
        plan: &[NormalizationNode],
        data: &JsonValue,
        variables: &Variables,
        root_id: &str,
    ) -> Result<()> {
        let update = normalize(plan, data, variables, root_id)?;
        self.commit_update(update);
        Ok(())
    }

    /// Mark a record as deleted (entity invalidation) and notify subscribers.
    pub fn delete_record(&self, record_id: &str) -> Result<()> {
        {
            let mut store = self.store.write().expect("store lock poisoned");
            store.delete(record_id)?;
        }
        self.notify();
        Ok(())
    }

    /// Read an entrypoint's reader plan against the root record.
    pub fn read_entrypoint(
        &self,
        entrypoint: &Entrypoint,
        variables: &Variables,
    ) -> Result<ReadOutcome> {
        let store = self.store.read().expect("store lock poisoned");
        read(
            &store,
            &entrypoint.reader,
            ROOT_ID,
            variables,
            self.missing_field_handler.as_ref(),
        )
    }

    /// Resolve a previously produced fragment reference with its reader plan.
    pub fn read_fragment(
        &self,
        reference: &FragmentReference,
        plan: &[ReaderNode],
    ) -> Result<ReadOutcome> {
        let store = self.store.read().expect("store lock poisoned");
        read(
            &store,
            plan,
            &reference.record_id,
            &reference.variables,
            self.missing_field_handler.as_ref(),
        )
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionToken {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        registry.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        registry.unsubscribe(token)
    }

    /// Fan out to every listener registered when the pass began. The registry
    /// lock is released before any callback runs, so callbacks may subscribe,
    /// unsubscribe, and re-read freely.
    pub fn notify(&self) {
        let snapshot = {
            let registry = self.registry.read().expect("registry lock poisoned");
            registry.snapshot()
        };
        for callback in snapshot {
            callback();
        }
    }

    pub(crate) fn already_fetched(&self, key: [u8; 32]) -> bool {
        let fetched = self.fetched.read().expect("fetch log lock poisoned");
        fetched.contains(&key)
    }

    pub(crate) fn mark_fetched(&self, key: [u8; 32]) {
        let mut fetched = self.fetched.write().expect("fetch log lock poisoned");
        fetched.insert(key);
    }
}

static DEFAULT_ENVIRONMENT: Lazy<RwLock<Option<Arc<Environment>>>> =
    Lazy::new(|| RwLock::new(None));

/// Install the process-wide default environment. Installing twice is fatal
/// misuse; call `reset_default` first if a replacement is genuinely intended.
pub fn install_default(environment: Arc<Environment>) -> Result<()> {
    let mut slot = DEFAULT_ENVIRONMENT
        .write()
        .expect("default environment lock poisoned");
    if slot.is_some() {
        bail!("a default environment is already installed");
    }
    *slot = Some(environment);
    Ok(())
}

/// Run a closure against the default environment.
pub fn with_default<R>(f: impl FnOnce(&Environment) -> R) -> Result<R> {
    let slot = DEFAULT_ENVIRONMENT
        .read()
        .expect("default environment lock poisoned");
    match slot.as_ref() {
        Some(environment) => Ok(f(environment)),
        None => bail!(
            "no default environment installed; call install_default before reading or subscribing"
        ),
    }
}

/// Drop the default environment, if any.
pub fn reset_default() {
    let mut slot = DEFAULT_ENVIRONMENT
        .write()
        .expect("default environment lock poisoned");
    *slot = None;
}
