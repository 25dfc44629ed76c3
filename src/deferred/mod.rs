//! Deferred values - values that become known after provisioning steps complete
//!
//! A [`Deferred<T>`] is either already resolved, or backed by a computation
//! (a node's materialization, a state backend lookup, or a transformation of
//! other deferreds). Internally it is a memoised shared future:
//!
//! - `map`/`combine` build continuations lazily; each runs at most once, in
//!   whichever task first awaits the result
//! - producers complete through a one-shot channel ([`Completer`])
//! - once settled, every read returns the identical value or error
//!
//! Failures propagate: a continuation whose source failed settles with the
//! same error without invoking its function.
//!
//! Each deferred also carries its [`Provenance`]: the graph nodes it was
//! derived from. The graph builder reads it to infer dependency edges.

mod provenance;

pub use provenance::{NodeId, Provenance};

use std::fmt;
use std::future::{Future, IntoFuture};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::StackError;
use crate::util::jsonpath;

/// Settled state of a deferred value
pub type Outcome<T> = Result<T, StackError>;

/// Bound for values that can flow through deferreds
pub trait Resolvable: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Resolvable for T {}

/// A value that may not be known yet
pub struct Deferred<T: Resolvable> {
    inner: Shared<BoxFuture<'static, Outcome<T>>>,
    provenance: Provenance,
}

/// Producer side of a pending deferred
///
/// Dropping a completer without calling [`Completer::complete`] settles the
/// deferred with [`StackError::Abandoned`].
pub struct Completer<T> {
    sender: oneshot::Sender<Outcome<T>>,
}

impl<T> Completer<T> {
    pub fn complete(self, outcome: Outcome<T>) {
        // Err means every consumer is gone; nothing left to notify.
        let _ = self.sender.send(outcome);
    }

    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: StackError) {
        self.complete(Err(error));
    }
}

impl<T: Resolvable> Deferred<T> {
    /// Immediately-resolved deferred
    pub fn of(value: T) -> Self {
        Self::from_future(future::ready(Ok(value)), Provenance::default())
    }

    /// Immediately-failed deferred
    pub fn failed(error: StackError) -> Self {
        Self::from_future(future::ready(Err(error)), Provenance::default())
    }

    /// Pending deferred plus the completer that settles it
    pub fn pending() -> (Completer<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let deferred = Self::from_future(
            async move { receiver.await.unwrap_or_else(|_| Err(StackError::Abandoned)) },
            Provenance::default(),
        );
        (Completer { sender }, deferred)
    }

    pub(crate) fn from_future<F>(fut: F, provenance: Provenance) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
            provenance,
        }
    }

    pub(crate) fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Graph nodes this value derives from
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Transform the value once it resolves
    ///
    /// `f` must not have side effects visible outside the run: it runs at
    /// most once, and not at all if nobody awaits the result.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Resolvable,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.inner.clone();
        Deferred::from_future(async move { source.await.map(f) }, self.provenance.clone())
    }

    /// Fallible transformation; an `Err` settles the result as failed
    pub fn try_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Resolvable,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        let source = self.inner.clone();
        Deferred::from_future(
            async move { source.await.and_then(f) },
            self.provenance.clone(),
        )
    }

    /// Join two deferreds; resolves once both have resolved
    ///
    /// Settles as failed as soon as either side fails.
    pub fn combine<U, V, F>(&self, other: &Deferred<U>, f: F) -> Deferred<V>
    where
        U: Resolvable,
        V: Resolvable,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        let left = self.inner.clone();
        let right = other.inner.clone();
        Deferred::from_future(
            async move {
                let (a, b) = future::try_join(left, right).await?;
                Ok(f(a, b))
            },
            self.provenance.union(&other.provenance),
        )
    }

    /// Join any number of deferreds, preserving order
    pub fn join_all<I>(items: I) -> Deferred<Vec<T>>
    where
        I: IntoIterator<Item = Deferred<T>>,
    {
        let mut provenance = Provenance::default();
        let sources: Vec<_> = items
            .into_iter()
            .map(|d| {
                provenance = provenance.union(&d.provenance);
                d.inner
            })
            .collect();
        Deferred::from_future(future::try_join_all(sources), provenance)
    }

    /// Wait until the value resolves or fails
    pub async fn resolve(&self) -> Outcome<T> {
        self.inner.clone().await
    }

    /// Non-blocking read: `None` while still pending
    pub fn try_now(&self) -> Option<Outcome<T>> {
        self.inner.clone().now_or_never()
    }

    pub fn is_settled(&self) -> bool {
        self.try_now().is_some()
    }
}

impl<T: Resolvable> Deferred<Option<T>> {
    /// Substitute `default` for an unset value
    ///
    /// An already-known `None` is replaced on the spot (no suspension, no
    /// provenance); a pending source falls back to a lazy `map`.
    pub fn get_or_default(&self, default: T) -> Deferred<T> {
        match self.try_now() {
            Some(Ok(None)) => Deferred::of(default),
            Some(Ok(Some(value))) => Deferred::of(value).with_provenance(self.provenance.clone()),
            Some(Err(error)) => Deferred::failed(error).with_provenance(self.provenance.clone()),
            None => self.map(move |value| value.unwrap_or(default)),
        }
    }
}

impl Deferred<Value> {
    /// Project a path (`a.b`, `items[0].id`) out of a JSON value
    pub fn field(&self, path: &str) -> Deferred<Value> {
        let path = path.to_string();
        self.try_map(move |value| {
            jsonpath::resolve(&value, &path)?.ok_or(StackError::PathNotFound { path })
        })
    }

    /// Replace a resolved null or empty string with `fallback`
    ///
    /// Failures are never replaced.
    pub fn or_value(&self, fallback: Value) -> Deferred<Value> {
        self.map(move |value| match &value {
            Value::Null => fallback,
            Value::String(s) if s.is_empty() => fallback,
            _ => value,
        })
    }
}

impl<T: Resolvable> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

impl<T: Resolvable> IntoFuture for Deferred<T> {
    type Output = Outcome<T>;
    type IntoFuture = Shared<BoxFuture<'static, Outcome<T>>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

impl<T: Resolvable> From<T> for Deferred<T> {
    fn from(value: T) -> Self {
        Self::of(value)
    }
}

// Never prints the value itself: deferreds may carry secrets.
impl<T: Resolvable> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("provenance", &self.provenance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn of_is_resolved_immediately() {
        let d = Deferred::of(42);
        assert_eq!(d.try_now(), Some(Ok(42)));
        assert_eq!(d.resolve().await, Ok(42));
    }

    #[tokio::test]
    async fn map_runs_once_across_consumers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (completer, source) = Deferred::<i32>::pending();
        let doubled = source.map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v * 2
        });

        assert!(doubled.try_now().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        completer.resolve(21);
        let a = doubled.clone();
        let (x, y) = tokio::join!(a.resolve(), doubled.resolve());
        assert_eq!((x, y), (Ok(42), Ok(42)));
        assert_eq!(doubled.resolve().await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn map_is_skipped_when_source_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source: Deferred<i32> = Deferred::failed(StackError::ReferenceNotFound {
            unit: "hub".into(),
        });
        let mapped = source.map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v + 1
        });

        let err = mapped.resolve().await.unwrap_err();
        assert!(matches!(err, StackError::ReferenceNotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn combine_waits_for_both_sides() {
        let (left_done, left) = Deferred::<String>::pending();
        let (right_done, right) = Deferred::<String>::pending();
        let joined = left.combine(&right, |a, b| format!("{a}/{b}"));

        left_done.resolve("hub".into());
        tokio::task::yield_now().await;
        assert!(joined.try_now().is_none());

        right_done.resolve("spoke".into());
        assert_eq!(joined.resolve().await, Ok("hub/spoke".to_string()));
    }

    #[tokio::test]
    async fn combine_fails_if_either_side_fails() {
        let ok = Deferred::of(1);
        let bad: Deferred<i32> = Deferred::failed(StackError::Abandoned);
        let joined = ok.combine(&bad, |a, b| a + b);
        assert_eq!(joined.resolve().await, Err(StackError::Abandoned));
    }

    #[tokio::test]
    async fn resolution_is_monotonic() {
        let (completer, d) = Deferred::<i32>::pending();
        completer.fail(StackError::Omitted { node: "x".into() });

        let first = d.resolve().await;
        let second = d.resolve().await;
        assert_eq!(first, second);
        assert_eq!(d.try_now(), Some(first));
    }

    #[tokio::test]
    async fn dropped_completer_abandons() {
        let (completer, d) = Deferred::<i32>::pending();
        drop(completer);
        assert_eq!(d.resolve().await, Err(StackError::Abandoned));
    }

    #[tokio::test]
    async fn get_or_default_is_synchronous_for_unset_values() {
        let unset: Deferred<Option<String>> = Deferred::of(None);
        let value = unset.get_or_default("dev".to_string());
        assert_eq!(value.try_now(), Some(Ok("dev".to_string())));

        let set = Deferred::of(Some("prod".to_string()));
        assert_eq!(set.get_or_default("dev".into()).resolve().await, Ok("prod".into()));

        let (completer, pending) = Deferred::<Option<String>>::pending();
        let defaulted = pending.get_or_default("dev".into());
        assert!(defaulted.try_now().is_none());
        completer.resolve(None);
        assert_eq!(defaulted.resolve().await, Ok("dev".to_string()));
    }

    #[tokio::test]
    async fn provenance_flows_through_map_and_combine() {
        let a = Deferred::of(1).with_provenance(Provenance::node(NodeId::new(0, 0)));
        let b = Deferred::of(2).with_provenance(Provenance::node(NodeId::new(0, 5)));

        let mapped = a.map(|v| v * 10);
        assert_eq!(mapped.provenance(), &Provenance::node(NodeId::new(0, 0)));

        let joined = mapped.combine(&b, |x, y| x + y);
        let ids: Vec<_> = joined.provenance().iter().collect();
        assert_eq!(ids, vec![NodeId::new(0, 0), NodeId::new(0, 5)]);
        assert_eq!(joined.resolve().await, Ok(12));
    }

    #[tokio::test]
    async fn join_all_preserves_order() {
        let parts = vec![Deferred::of(json!("a")), Deferred::of(json!(1)), Deferred::of(json!(true))];
        let all = Deferred::join_all(parts);
        assert_eq!(all.resolve().await, Ok(vec![json!("a"), json!(1), json!(true)]));
    }

    #[tokio::test]
    async fn field_and_or_value() {
        let config = Deferred::of(json!({"network": {"vnetId": "vnet-1", "location": ""}}));

        assert_eq!(config.field("network.vnetId").resolve().await, Ok(json!("vnet-1")));
        assert_eq!(
            config
                .field("network.location")
                .or_value(json!("westeurope"))
                .resolve()
                .await,
            Ok(json!("westeurope"))
        );
        assert!(matches!(
            config.field("network.missing").resolve().await,
            Err(StackError::PathNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn debug_never_shows_the_value() {
        let secret = Deferred::of(json!("hunter2"));
        secret.resolve().await.unwrap();
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("resolved"));
        assert!(!rendered.contains("hunter2"));
    }
}
