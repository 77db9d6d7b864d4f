//! Authoritative expectation store.
//!
//! Owns the id→expectation map and drives the index; both live under a
//! single reader/writer lock so a concurrent `find` sees either the pre- or
//! post-state of any mutation, never a partial index. Persistence runs
//! outside the lock on its own serialised path: mutations snapshot under
//! the lock and hand the snapshot to the persistence layer afterwards.

use crate::expectation::{admit, AdmittedExpectation, Expectation, ValidationError};
use crate::index::ExpectationIndex;
use crate::persistence::FilePersistence;
use crate::request::RequestRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Arc<AdmittedExpectation>>,
    index: ExpectationIndex,
}

/// Filter accepted by [`ExpectationStore::clear`].
#[derive(Debug, Clone)]
pub enum ClearFilter {
    /// Remove everything.
    All,
    /// Remove one expectation by id.
    ById(String),
    /// Remove expectations whose declared literal method and path equal
    /// the filter's; absent filter fields match any declaration.
    ByRequest {
        method: Option<String>,
        path: Option<String>,
    },
}

pub struct ExpectationStore {
    inner: RwLock<Inner>,
    persistence: Option<Arc<FilePersistence>>,
}

impl ExpectationStore {
    pub fn new(persistence: Option<Arc<FilePersistence>>) -> Self {
        ExpectationStore {
            inner: RwLock::new(Inner::default()),
            persistence,
        }
    }

    /// Load the persisted expectation set and rebuild the index.
    ///
    /// Duplicate ids get a fresh id with a warning; invalid documents are
    /// skipped. A load failure leaves the store empty and running.
    pub async fn initialize(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let loaded = match persistence.load().await {
            Ok(expectations) => expectations,
            Err(e) => {
                warn!("failed to load persisted expectations, starting empty: {e:#}");
                return;
            }
        };

        let count = loaded.len();
        let mut inner = self.inner.write();
        for mut expectation in loaded {
            if let Some(id) = &expectation.id {
                if inner.by_id.contains_key(id) {
                    warn!("duplicate persisted expectation id {id}, assigning a fresh id");
                    expectation.id = None;
                }
            }
            match admit(expectation) {
                Ok(admitted) => insert_locked(&mut inner, admitted),
                Err(e) => warn!("skipping invalid persisted expectation: {e}"),
            }
        }
        drop(inner);
        info!("loaded {count} persisted expectations");
    }

    /// Insert a new expectation. A colliding id is replaced with a fresh
    /// one rather than rejected.
    pub async fn add(&self, expectation: Expectation) -> Result<Expectation, ValidationError> {
        let mut admitted = admit(expectation)?;
        {
            let mut inner = self.inner.write();
            while inner.by_id.contains_key(admitted.id()) {
                admitted.expectation.id = Some(Uuid::new_v4().to_string());
            }
            insert_locked(&mut inner, admitted.clone());
        }
        self.persist().await;
        Ok(admitted.expectation)
    }

    /// Insert or replace keyed by id; replacement preserves the id and
    /// swaps the index entries atomically.
    pub async fn upsert(&self, expectation: Expectation) -> Result<Expectation, ValidationError> {
        let admitted = admit(expectation)?;
        {
            let mut inner = self.inner.write();
            if let Some(previous) = inner.by_id.remove(admitted.id()) {
                inner.index.remove(&previous);
            }
            insert_locked(&mut inner, admitted.clone());
        }
        self.persist().await;
        Ok(admitted.expectation)
    }

    pub fn get(&self, id: &str) -> Option<Expectation> {
        let inner = self.inner.read();
        inner.by_id.get(id).map(|a| a.expectation.clone())
    }

    /// Snapshot of the current expectation set, ordered by id.
    pub fn list(&self) -> Vec<Expectation> {
        let inner = self.inner.read();
        let mut out: Vec<Expectation> = inner
            .by_id
            .values()
            .map(|a| a.expectation.clone())
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }

    /// Remove one expectation; false when the id is unknown.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_id.remove(id) {
                Some(previous) => {
                    inner.index.remove(&previous);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Remove expectations matching the filter; returns how many went.
    pub async fn clear(&self, filter: ClearFilter) -> usize {
        if let ClearFilter::ById(id) = &filter {
            return usize::from(self.delete(id).await);
        }

        let removed = {
            let mut inner = self.inner.write();
            match &filter {
                ClearFilter::All => {
                    let count = inner.by_id.len();
                    inner.by_id.clear();
                    inner.index.clear();
                    count
                }
                ClearFilter::ByRequest { method, path } => {
                    let doomed: Vec<Arc<AdmittedExpectation>> = inner
                        .by_id
                        .values()
                        .filter(|a| request_filter_matches(&a.expectation, method, path))
                        .cloned()
                        .collect();
                    for admitted in &doomed {
                        inner.by_id.remove(admitted.id());
                        inner.index.remove(admitted);
                    }
                    doomed.len()
                }
                ClearFilter::ById(_) => unreachable!("delegated to delete"),
            }
        };
        self.persist().await;
        removed
    }

    /// Replace the whole expectation set atomically. Every document must
    /// admit, or the store is left untouched.
    pub async fn replace_all(&self, expectations: Vec<Expectation>) -> Result<(), ValidationError> {
        let mut admitted = Vec::with_capacity(expectations.len());
        for expectation in expectations {
            admitted.push(admit(expectation)?);
        }

        {
            let mut inner = self.inner.write();
            inner.by_id.clear();
            inner.index.clear();
            for mut entry in admitted {
                while inner.by_id.contains_key(entry.id()) {
                    entry.expectation.id = Some(Uuid::new_v4().to_string());
                }
                insert_locked(&mut inner, entry);
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Select the expectation answering a request, if any.
    ///
    /// Index candidates are filtered through the full matchers, then
    /// response actions are preferred over forwards; within the partition
    /// the highest priority wins and ties break on the lexicographically
    /// greater id.
    pub fn find(&self, request: &RequestRecord) -> Option<Arc<AdmittedExpectation>> {
        let inner = self.inner.read();
        let candidates = inner.index.candidates(request);
        debug!(
            method = %request.method,
            path = %request.path,
            candidates = candidates.len(),
            "matching request"
        );

        let matched: Vec<Arc<AdmittedExpectation>> = candidates
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|a| a.matcher.matches(request))
            .cloned()
            .collect();

        let has_response = matched
            .iter()
            .any(|a| a.expectation.http_response.is_some());

        matched
            .into_iter()
            .filter(|a| !has_response || a.expectation.http_response.is_some())
            .max_by(|a, b| {
                a.expectation
                    .priority
                    .cmp(&b.expectation.priority)
                    .then_with(|| a.id().cmp(b.id()))
            })
    }

    /// Index/store lockstep invariant: every bucket entry resolves to a
    /// stored expectation and every stored expectation is indexed.
    pub fn index_in_lockstep(&self) -> bool {
        let inner = self.inner.read();
        let referenced = inner.index.referenced_ids();
        referenced.len() == inner.by_id.len()
            && referenced.iter().all(|id| inner.by_id.contains_key(id))
            && inner.by_id.keys().all(|id| referenced.contains(id))
    }

    /// Write the current snapshot through the persistence layer. Failures
    /// are logged; the in-memory state stays authoritative and the next
    /// save retries.
    pub async fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            let snapshot = self.list();
            if let Err(e) = persistence.save(snapshot).await {
                warn!("failed to persist expectations: {e:#}");
            }
        }
    }

    pub fn persistence(&self) -> Option<&Arc<FilePersistence>> {
        self.persistence.as_ref()
    }
}

fn insert_locked(inner: &mut Inner, admitted: AdmittedExpectation) {
    let admitted = Arc::new(admitted);
    inner.index.insert(&admitted);
    inner.by_id.insert(admitted.id().to_string(), admitted);
}

/// Literal comparison used by request-definition clears: each provided
/// filter field must equal the expectation's declared (non-inverted) value.
fn request_filter_matches(
    expectation: &Expectation,
    method: &Option<String>,
    path: &Option<String>,
) -> bool {
    if let Some(method) = method {
        let declared = expectation
            .http_request
            .method
            .as_ref()
            .filter(|m| !m.not())
            .map(|m| m.value().as_str());
        if declared != Some(method.as_str()) {
            return false;
        }
    }
    if let Some(path) = path {
        let declared = expectation
            .http_request
            .path
            .as_ref()
            .filter(|p| !p.not())
            .map(|p| p.value().as_str());
        if declared != Some(path.as_str()) {
            return false;
        }
    }
    true
}
