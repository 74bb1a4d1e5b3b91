//! Result and rejection classes.
//!
//! Both are closed, finite sets fixed at construction. Members are small
//! `Copy` handles carrying their index into the class table, so counters and
//! latency recorders can be indexed directly without per-operation hashing.
//! Each class gets a process-unique id; handles from one class are rejected
//! by rails and promises built over another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

fn next_class_id() -> u64 {
    NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed)
}

/// A member of a [`ResultClass`]: one possible way an operation can end.
#[derive(Clone, Copy, Debug)]
pub struct Outcome {
    class_id: u64,
    index: u16,
    failure: bool,
    token: &'static str,
}

impl Outcome {
    /// Index of this outcome in its class; the slot used by counters and
    /// latency recorders.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The user-facing token this outcome was registered under.
    pub fn token(&self) -> &'static str {
        self.token
    }

    pub fn is_failure(&self) -> bool {
        self.failure
    }

    pub fn is_success(&self) -> bool {
        !self.failure
    }

    pub(crate) fn class_id(&self) -> u64 {
        self.class_id
    }
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.class_id == other.class_id && self.index == other.index
    }
}

impl Eq for Outcome {}

impl std::hash::Hash for Outcome {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.class_id.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token)
    }
}

struct OutcomeEntry {
    token: &'static str,
    failure: bool,
}

struct ResultClassInner {
    id: u64,
    entries: Vec<OutcomeEntry>,
}

/// A closed set of outcomes, each tagged success or failure.
///
/// ```
/// use railguard::ResultClass;
///
/// let class = ResultClass::builder()
///     .success("success")
///     .failure("error")
///     .failure("timeout")
///     .build();
///
/// let success = class.outcome("success").unwrap();
/// assert!(success.is_success());
/// assert_eq!(class.len(), 3);
/// ```
#[derive(Clone)]
pub struct ResultClass {
    inner: Arc<ResultClassInner>,
}

impl ResultClass {
    pub fn builder() -> ResultClassBuilder {
        ResultClassBuilder {
            entries: Vec::new(),
        }
    }

    /// Number of outcomes in the class.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Looks an outcome up by token.
    pub fn outcome(&self, token: &str) -> Option<Outcome> {
        self.inner
            .entries
            .iter()
            .position(|e| e.token == token)
            .map(|index| self.get(index).expect("position is in range"))
    }

    /// The outcome at `index`, if any.
    pub fn get(&self, index: usize) -> Option<Outcome> {
        self.inner.entries.get(index).map(|e| Outcome {
            class_id: self.inner.id,
            index: index as u16,
            failure: e.failure,
            token: e.token,
        })
    }

    /// True when `outcome` is a member of this class.
    pub fn contains(&self, outcome: Outcome) -> bool {
        outcome.class_id == self.inner.id && (outcome.index as usize) < self.inner.entries.len()
    }

    /// Iterates the class in index order.
    pub fn outcomes(&self) -> impl Iterator<Item = Outcome> + '_ {
        (0..self.len()).map(|i| self.get(i).expect("index is in range"))
    }

    /// The registered tokens, in index order.
    pub fn tokens(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.entries.iter().map(|e| e.token)
    }

    /// The first success-tagged outcome, if the class has one.
    pub fn first_success(&self) -> Option<Outcome> {
        self.outcomes().find(|o| o.is_success())
    }

    /// The first failure-tagged outcome, if the class has one.
    pub fn first_failure(&self) -> Option<Outcome> {
        self.outcomes().find(|o| o.is_failure())
    }
}

impl fmt::Debug for ResultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.inner.entries.iter().map(|e| e.token))
            .finish()
    }
}

/// Builder for a [`ResultClass`].
pub struct ResultClassBuilder {
    entries: Vec<OutcomeEntry>,
}

impl ResultClassBuilder {
    /// Registers a success-tagged outcome.
    pub fn success(self, token: &'static str) -> Self {
        self.push(token, false)
    }

    /// Registers a failure-tagged outcome.
    pub fn failure(self, token: &'static str) -> Self {
        self.push(token, true)
    }

    fn push(mut self, token: &'static str, failure: bool) -> Self {
        assert!(
            self.entries.iter().all(|e| e.token != token),
            "duplicate outcome token '{token}'"
        );
        assert!(
            self.entries.len() < u16::MAX as usize,
            "result class is limited to {} outcomes",
            u16::MAX
        );
        self.entries.push(OutcomeEntry { token, failure });
        self
    }

    /// Freezes the class.
    ///
    /// # Panics
    ///
    /// Panics if no outcome was registered.
    pub fn build(self) -> ResultClass {
        assert!(
            !self.entries.is_empty(),
            "a result class needs at least one outcome"
        );
        ResultClass {
            inner: Arc::new(ResultClassInner {
                id: next_class_id(),
                entries: self.entries,
            }),
        }
    }
}

/// A member of a [`RejectionClass`]: one reason an acquire can be denied.
#[derive(Clone, Copy, Debug)]
pub struct Rejection {
    class_id: u64,
    index: u16,
    token: &'static str,
}

impl Rejection {
    /// Index of this reason in its class; the slot used by rejection counters.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn token(&self) -> &'static str {
        self.token
    }

    pub(crate) fn class_id(&self) -> u64 {
        self.class_id
    }
}

impl PartialEq for Rejection {
    fn eq(&self, other: &Self) -> bool {
        self.class_id == other.class_id && self.index == other.index
    }
}

impl Eq for Rejection {}

impl std::hash::Hash for Rejection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.class_id.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token)
    }
}

struct RejectionClassInner {
    id: u64,
    tokens: Vec<&'static str>,
}

/// A closed set of rejection reasons.
///
/// ```
/// use railguard::RejectionClass;
///
/// let class = RejectionClass::builder()
///     .reason("max-concurrency")
///     .reason("circuit-open")
///     .build();
///
/// assert_eq!(class.reason("circuit-open").unwrap().index(), 1);
/// ```
#[derive(Clone)]
pub struct RejectionClass {
    inner: Arc<RejectionClassInner>,
}

impl RejectionClass {
    pub fn builder() -> RejectionClassBuilder {
        RejectionClassBuilder { tokens: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tokens.is_empty()
    }

    /// Looks a reason up by token.
    pub fn reason(&self, token: &str) -> Option<Rejection> {
        self.inner
            .tokens
            .iter()
            .position(|t| *t == token)
            .map(|index| Rejection {
                class_id: self.inner.id,
                index: index as u16,
                token: self.inner.tokens[index],
            })
    }

    /// True when `rejection` is a member of this class.
    pub fn contains(&self, rejection: Rejection) -> bool {
        rejection.class_id == self.inner.id && (rejection.index as usize) < self.inner.tokens.len()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.tokens.iter().copied()
    }
}

impl fmt::Debug for RejectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.tokens.iter()).finish()
    }
}

/// Builder for a [`RejectionClass`].
pub struct RejectionClassBuilder {
    tokens: Vec<&'static str>,
}

impl RejectionClassBuilder {
    /// Registers a rejection reason.
    pub fn reason(mut self, token: &'static str) -> Self {
        assert!(
            !self.tokens.contains(&token),
            "duplicate rejection token '{token}'"
        );
        assert!(
            self.tokens.len() < u16::MAX as usize,
            "rejection class is limited to {} reasons",
            u16::MAX
        );
        self.tokens.push(token);
        self
    }

    /// Freezes the class.
    ///
    /// # Panics
    ///
    /// Panics if no reason was registered.
    pub fn build(self) -> RejectionClass {
        assert!(
            !self.tokens.is_empty(),
            "a rejection class needs at least one reason"
        );
        RejectionClass {
            inner: Arc::new(RejectionClassInner {
                id: next_class_id(),
                tokens: self.tokens,
            }),
        }
    }
}
