//! Credential pool and per-run rotation state.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How the pool picks a credential for each chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Stay on the first working credential; move on only after a failure.
    #[default]
    Failover,
    /// Start every chunk one past the credential that last succeeded.
    RoundRobin,
}

/// One API key and its position in the pool.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub ordinal: usize,
    value: String,
}

impl Credential {
    pub fn new(ordinal: usize, value: impl Into<String>) -> Self {
        Self {
            ordinal,
            value: value.into(),
        }
    }

    /// The secret itself. Never log this.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ordinal", &self.ordinal)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Rotation state worth keeping between runs. Holds no secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub strategy: RotationStrategy,
    pub cursor: Option<usize>,
    pub pool_size: usize,
}

/// Ordered credentials plus the rotation cursor.
///
/// The cursor is the ordinal of the last credential that succeeded. The
/// orchestrator takes the pool by value and hands it back after the run so
/// the caller can persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    strategy: RotationStrategy,
    #[serde(default)]
    cursor: Option<usize>,
}

impl CredentialPool {
    pub fn new<I, S>(keys: I, strategy: RotationStrategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials = keys
            .into_iter()
            .enumerate()
            .map(|(ordinal, key)| Credential::new(ordinal, key))
            .collect();

        Self {
            credentials,
            strategy,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn get(&self, ordinal: usize) -> Option<&Credential> {
        self.credentials.get(ordinal)
    }

    /// Remember the credential that just succeeded.
    pub fn record_success(&mut self, ordinal: usize) {
        if ordinal < self.credentials.len() {
            self.cursor = Some(ordinal);
        }
    }

    /// Fresh rotation state for one run.
    pub fn start_run(&self) -> RotationRun {
        RotationRun {
            size: self.credentials.len(),
            position: 0,
            exhausted: BTreeSet::new(),
        }
    }

    /// Where a dispatch within `run` should begin.
    pub(crate) fn starting_ordinal(&self, run: &RotationRun) -> usize {
        if self.credentials.is_empty() {
            return 0;
        }
        match self.strategy {
            RotationStrategy::Failover => run.position % self.credentials.len(),
            RotationStrategy::RoundRobin => self
                .cursor
                .map_or(0, |c| (c + 1) % self.credentials.len()),
        }
    }

    pub fn rotation_state(&self) -> RotationState {
        RotationState {
            strategy: self.strategy,
            cursor: self.cursor,
            pool_size: self.credentials.len(),
        }
    }

    /// Restore a saved cursor. Ignored when the pool changed size or strategy
    /// since the state was saved.
    pub fn restore(&mut self, state: &RotationState) -> bool {
        if state.pool_size != self.credentials.len() || state.strategy != self.strategy {
            return false;
        }
        self.cursor = state.cursor.filter(|&c| c < self.credentials.len());
        true
    }
}

/// Rotation bookkeeping for a single run.
///
/// Credentials throttled during the run are skipped until every other
/// credential has been tried for the current chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRun {
    size: usize,
    position: usize,
    exhausted: BTreeSet<usize>,
}

impl RotationRun {
    pub fn exhausted(&self) -> &BTreeSet<usize> {
        &self.exhausted
    }

    pub fn is_exhausted(&self, ordinal: usize) -> bool {
        self.exhausted.contains(&ordinal)
    }

    pub(crate) fn mark_exhausted(&mut self, ordinal: usize) {
        self.exhausted.insert(ordinal);
    }

    pub(crate) fn mark_success(&mut self, ordinal: usize) {
        self.position = ordinal;
        self.exhausted.remove(&ordinal);
    }

    /// First credential to try for a new chunk, at or after `start`.
    pub(crate) fn first_candidate(&mut self, start: usize) -> usize {
        if self.exhausted.len() >= self.size {
            // Everyone has been throttled once; start a new round.
            self.exhausted.clear();
        }
        self.scan(start, |ordinal| !self.exhausted.contains(&ordinal))
            .unwrap_or(start)
    }

    /// Next credential after `current` that has not been tried for this
    /// chunk, preferring ones not throttled earlier in the run.
    pub(crate) fn next_candidate(
        &self,
        current: usize,
        tried: &BTreeSet<usize>,
    ) -> Option<usize> {
        let start = (current + 1) % self.size.max(1);
        self.scan(start, |o| !tried.contains(&o) && !self.exhausted.contains(&o))
            .or_else(|| self.scan(start, |o| !tried.contains(&o)))
    }

    fn scan(&self, start: usize, accept: impl Fn(usize) -> bool) -> Option<usize> {
        (0..self.size)
            .map(|offset| (start + offset) % self.size)
            .find(|&ordinal| accept(ordinal))
    }
}
