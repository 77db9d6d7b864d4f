//! Inverted indices over the expectation set.
//!
//! Stage 1 of matching: the index narrows a request to a candidate id set
//! before the full matchers run. It is a must-not-drop-matches filter;
//! false positives are fine and get weeded out by stage 2.
//!
//! Three structures, all keyed by expectation id:
//!
//! - `by_method`: literal request methods
//! - `by_path_prefix`: first segment of plain literal paths
//! - `wildcards`: everything path-indexing cannot narrow: wildcard, regex,
//!   inverted or absent paths, and every forward-action expectation
//!   (forwards are eligible for every path)

use crate::expectation::AdmittedExpectation;
use crate::request::RequestRecord;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct ExpectationIndex {
    by_method: HashMap<String, HashSet<String>>,
    by_path_prefix: HashMap<String, HashSet<String>>,
    wildcards: HashSet<String>,
}

impl ExpectationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an admitted expectation. Mirrors [`Self::remove`] exactly.
    pub fn insert(&mut self, admitted: &AdmittedExpectation) {
        let id = admitted.id().to_string();

        if let Some(method) = admitted.matcher.indexable_method() {
            self.by_method
                .entry(method.to_string())
                .or_default()
                .insert(id.clone());
        }

        match self.path_bucket(admitted) {
            Some(prefix) => {
                self.by_path_prefix.entry(prefix).or_default().insert(id);
            }
            None => {
                self.wildcards.insert(id);
            }
        }
    }

    /// Remove an expectation from every bucket it was admitted to.
    pub fn remove(&mut self, admitted: &AdmittedExpectation) {
        let id = admitted.id();

        if let Some(method) = admitted.matcher.indexable_method() {
            if let Some(bucket) = self.by_method.get_mut(method) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.by_method.remove(method);
                }
            }
        }

        match self.path_bucket(admitted) {
            Some(prefix) => {
                if let Some(bucket) = self.by_path_prefix.get_mut(&prefix) {
                    bucket.remove(id);
                    if bucket.is_empty() {
                        self.by_path_prefix.remove(&prefix);
                    }
                }
            }
            None => {
                self.wildcards.remove(id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_method.clear();
        self.by_path_prefix.clear();
        self.wildcards.clear();
    }

    /// Candidate ids for a request: method bucket ∪ wildcards ∪ path-prefix
    /// bucket.
    pub fn candidates(&self, request: &RequestRecord) -> HashSet<String> {
        let mut out: HashSet<String> = self.wildcards.clone();

        if let Some(bucket) = self.by_method.get(&request.method) {
            out.extend(bucket.iter().cloned());
        }

        if let Some(bucket) = self.by_path_prefix.get(first_segment(&request.path)) {
            out.extend(bucket.iter().cloned());
        }

        out
    }

    /// The path-prefix bucket key for an expectation, or `None` when it
    /// belongs to the wildcard set.
    fn path_bucket(&self, admitted: &AdmittedExpectation) -> Option<String> {
        if admitted.expectation.is_forward() {
            return None;
        }
        admitted
            .matcher
            .indexable_path()
            .map(|path| first_segment(path).to_string())
    }

    /// Every id referenced by any bucket, for invariant checking.
    pub fn referenced_ids(&self) -> HashSet<String> {
        let mut out = self.wildcards.clone();
        for bucket in self.by_method.values() {
            out.extend(bucket.iter().cloned());
        }
        for bucket in self.by_path_prefix.values() {
            out.extend(bucket.iter().cloned());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty() && self.by_path_prefix.is_empty() && self.wildcards.is_empty()
    }
}

/// First path segment including its leading slash: `/api/users` → `/api`.
fn first_segment(path: &str) -> &str {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.find('/') {
        Some(end) => &path[..end + 1],
        None => path,
    }
}
