//! Statements, signatures, and the per-connection prepared-statement cache.
//!
//! This module provides:
//! - `Statement`: text, declared parameter types, and bound parameters
//! - `StatementSignature`: the cache key (text + parameter type sequence)
//! - `StatementCache`: signature → server handle map with monotonic handles

use std::collections::HashMap;

use futures::future::BoxFuture;
use smallvec::SmallVec;

use crate::driver::DriverConnection;
use crate::error::Result;
use crate::types::{RawValue, TypeOid};

/// Inline storage for parameter type lists; statements rarely declare more
/// than a handful of parameters.
pub type ParamTypes = SmallVec<[TypeOid; 8]>;

// ============================================================================
// Statement
// ============================================================================

/// A statement to execute: text, declared parameter types, and the bound
/// parameter values for this execution.
#[derive(Debug, Clone)]
pub struct Statement {
    pub text: String,
    pub param_types: ParamTypes,
    pub params: Vec<RawValue>,
    /// Whether the prepared handle should be cached on the connection.
    /// One-shot statements skip the cache so they never consume a handle.
    pub cacheable: bool,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            param_types: ParamTypes::new(),
            params: Vec::new(),
            cacheable: true,
        }
    }

    /// A statement that will be prepared but never cached.
    pub fn one_shot(text: impl Into<String>) -> Self {
        let mut statement = Self::new(text);
        statement.cacheable = false;
        statement
    }

    /// Declare and bind one parameter.
    pub fn bind(mut self, ty: TypeOid, value: RawValue) -> Self {
        self.param_types.push(ty);
        self.params.push(value);
        self
    }

    pub fn signature(&self) -> StatementSignature {
        StatementSignature::new(self.text.clone(), &self.param_types)
    }
}

// ============================================================================
// Statement Signature
// ============================================================================

/// Cache key for a prepared statement: text plus the ordered parameter type
/// sequence.
///
/// Equality compares both fields. `Hash` covers the text only: hashing the
/// type sequence rarely discriminates further, so the hot path pays for one
/// string hash and lets full equality resolve collisions.
#[derive(Debug, Clone)]
pub struct StatementSignature {
    text: String,
    param_types: ParamTypes,
}

impl StatementSignature {
    pub fn new(text: impl Into<String>, param_types: &[TypeOid]) -> Self {
        Self {
            text: text.into(),
            param_types: ParamTypes::from_slice(param_types),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn param_types(&self) -> &[TypeOid] {
        &self.param_types
    }
}

impl PartialEq for StatementSignature {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text && self.param_types == other.param_types
    }
}

impl Eq for StatementSignature {}

impl std::hash::Hash for StatementSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Text only; see type-level docs.
        self.text.hash(state);
    }
}

// ============================================================================
// Statement Cache
// ============================================================================

/// Per-connection prepared-statement cache.
///
/// Maps a signature to the server-side handle under which the statement was
/// prepared. Handles are the ASCII decimal rendering of a monotonic counter,
/// so they are strictly increasing and never reused within one connection's
/// lifetime. There is no eviction: entries live until the connection closes,
/// which also invalidates every handle it owns.
///
/// A connection is used by at most one in-flight transaction attempt at a
/// time (the pool enforces this), so the cache needs no locking.
pub struct StatementCache {
    entries: HashMap<StatementSignature, String>,
    /// Next handle to assign. Advances only when a miss is persisted.
    counter: u64,
}

impl StatementCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            counter: 0,
        }
    }

    /// Resolve a signature against the cache.
    ///
    /// On a hit, `on_hit` runs with the stored handle and the cache is left
    /// untouched. On a miss, `on_miss` runs with the candidate handle (the
    /// current counter value, not yet advanced); it performs the server-side
    /// preparation and reports `(persist, value)`. Only when `persist` is
    /// true does the mapping get inserted and the counter advance. A failed
    /// or deliberately uncached preparation leaves the cache exactly as if
    /// the miss never happened, and the same candidate handle is offered to
    /// the next miss.
    ///
    /// Errors from either callback propagate unchanged; the cache never
    /// retries.
    pub async fn resolve<T, M, H>(
        &mut self,
        signature: StatementSignature,
        driver: &mut dyn DriverConnection,
        on_miss: M,
        on_hit: H,
    ) -> Result<T>
    where
        T: Send,
        M: for<'a> FnOnce(&'a mut dyn DriverConnection, String) -> BoxFuture<'a, Result<(bool, T)>>
            + Send,
        H: for<'a> FnOnce(&'a mut dyn DriverConnection, String) -> BoxFuture<'a, Result<T>> + Send,
    {
        if let Some(handle) = self.entries.get(&signature) {
            return on_hit(driver, handle.clone()).await;
        }

        let candidate = self.counter.to_string();
        let (persist, value) = on_miss(driver, candidate.clone()).await?;
        if persist {
            self.entries.insert(signature, candidate);
            self.counter += 1;
        }
        Ok(value)
    }

    /// Handle currently stored for a signature, if any.
    pub fn handle(&self, signature: &StatementSignature) -> Option<&str> {
        self.entries.get(signature).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new()
    }
}
