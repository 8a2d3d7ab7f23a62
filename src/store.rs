//! Observable state slots for front ends that render simulation results.
//!
//! A [`Store`] keeps the last published [`Snapshot`] of one piece of state and
//! pushes every new snapshot to its subscribers synchronously. Writes are typed
//! partial updates: each field of a patch is an `Option`, where `None` keeps the
//! current value and `Some` replaces it. Nothing can be cleared through a patch.
//!
//! `loading` stays set while any asynchronous update on a slot is still
//! outstanding, so overlapping updates never report a finished slot early.
//!
//! Slots are owned by a [`StoreRegistry`] that the application root creates and
//! hands down; there is no process-wide registry.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::{PlanOutcome, PlanParameters, PricePoint};

/// State that can absorb a partial update.
pub trait Mergeable: Default + Clone {
    type Patch;

    fn merge(&mut self, patch: Self::Patch);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub data: Option<T>,
    pub error: Option<String>,
    pub loading: bool,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            loading: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

struct Inner<T> {
    snapshot: Snapshot<T>,
    published: bool,
    next_id: u64,
    in_flight: usize,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
}

pub struct Store<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
}

impl<T: Mergeable> Store<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                snapshot: Snapshot::default(),
                published: false,
                next_id: 0,
                in_flight: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn current(&self) -> Snapshot<T> {
        self.lock().snapshot.clone()
    }

    /// Registers `callback`. If anything was published already, it is called
    /// right away with the latest snapshot.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let callback: Subscriber<T> = Arc::new(callback);
        let (id, replay) = {
            let mut inner = self.lock();
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::clone(&callback)));
            let replay = inner.published.then(|| inner.snapshot.clone());
            (id, replay)
        };
        if let Some(snapshot) = replay {
            callback(&snapshot);
        }
        id
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(existing, _)| *existing != id);
        inner.subscribers.len() != before
    }

    pub fn sync_update(&self, patch: T::Patch) -> Snapshot<T> {
        self.publish(|inner| merge_into(&mut inner.snapshot, patch))
    }

    /// Publishes `loading`, awaits `work`, then publishes its outcome.
    ///
    /// A failure is recorded in `error` and the previous data is kept as is.
    /// Dropping the returned future before it finishes releases its share of
    /// `loading` without touching data or error.
    pub async fn async_update<Fut, E>(&self, work: Fut) -> Result<Snapshot<T>, E>
    where
        Fut: Future<Output = Result<T::Patch, E>>,
        E: Display,
    {
        self.publish(|inner| {
            inner.in_flight += 1;
            inner.snapshot.error = None;
        });
        let mut pending = InFlight {
            store: self,
            settled: false,
        };

        let result = work.await;
        pending.settled = true;

        match result {
            Ok(patch) => Ok(self.publish(|inner| {
                inner.in_flight = inner.in_flight.saturating_sub(1);
                merge_into(&mut inner.snapshot, patch);
            })),
            Err(err) => {
                let message = err.to_string();
                self.publish(|inner| {
                    inner.in_flight = inner.in_flight.saturating_sub(1);
                    inner.snapshot.error = Some(message);
                });
                Err(err)
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut Inner<T>)) -> Snapshot<T> {
        let (snapshot, subscribers) = {
            let mut inner = self.lock();
            update(&mut *inner);
            inner.snapshot.loading = inner.in_flight > 0;
            inner.published = true;
            let subscribers: Vec<Subscriber<T>> = inner
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            (inner.snapshot.clone(), subscribers)
        };
        for callback in subscribers {
            callback(&snapshot);
        }
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn merge_into<T: Mergeable>(snapshot: &mut Snapshot<T>, patch: T::Patch) {
    let mut data = snapshot.data.take().unwrap_or_default();
    data.merge(patch);
    snapshot.data = Some(data);
    snapshot.error = None;
}

/// Counts one outstanding `async_update` until it settles or is dropped.
struct InFlight<'a, T: Mergeable> {
    store: &'a Store<T>,
    settled: bool,
}

impl<T: Mergeable> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.publish(|inner| {
                inner.in_flight = inner.in_flight.saturating_sub(1);
            });
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompanyInfo {
    pub symbol: Option<String>,
    pub prices: Vec<PricePoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompanyInfoPatch {
    pub symbol: Option<String>,
    pub prices: Option<Vec<PricePoint>>,
}

impl Mergeable for CompanyInfo {
    type Patch = CompanyInfoPatch;

    fn merge(&mut self, patch: CompanyInfoPatch) {
        if let Some(symbol) = patch.symbol {
            self.symbol = Some(symbol);
        }
        if let Some(prices) = patch.prices {
            self.prices = prices;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EsppModel {
    pub parameters: Option<PlanParameters>,
    pub outcome: Option<PlanOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct EsppModelPatch {
    pub parameters: Option<PlanParameters>,
    pub outcome: Option<PlanOutcome>,
}

impl Mergeable for EsppModel {
    type Patch = EsppModelPatch;

    fn merge(&mut self, patch: EsppModelPatch) {
        if let Some(parameters) = patch.parameters {
            self.parameters = Some(parameters);
        }
        if let Some(outcome) = patch.outcome {
            self.outcome = Some(outcome);
        }
    }
}

/// Named state slots shared by the handlers of one application instance.
pub struct StoreRegistry {
    pub company_info: Store<CompanyInfo>,
    pub espp_model: Store<EsppModel>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            company_info: Store::new("companyInfo"),
            espp_model: Store::new("esppProfitsModel"),
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
