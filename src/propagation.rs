//! Waiters for attribute propagation and resource removal
//!
//! Mutations against an eventually consistent API are acknowledged before
//! every replica agrees on the new attribute values. These waiters wrap
//! the ConvergencePoller with a fixed status vocabulary so adapters only
//! supply a fetch closure and the timing configuration.

use crate::context::Context;
use crate::error::BoxError;
use crate::poll::{ConvergencePoller, PollConfig, StateSource, WaitError};
use crate::projection::ProjectionTable;
use crate::types::{AttrValue, RemoteAttributes};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

const ATTRIBUTES_EQUAL: &str = "equal";
const ATTRIBUTES_NOT_EQUAL: &str = "not-equal";
const STATUS_EXISTS: &str = "exists";

/// Compares an observed attribute bag against the expected one, attribute
/// kinds taken from the projection table.
///
/// Only keys present in `expected` are inspected. A key absent from
/// `observed` compares equal to the zero value of its kind, mirroring the
/// create-time suppression of zero values. Keys outside the table fall
/// back to raw string comparison with absence reading as "".
pub fn attributes_match(
    table: &ProjectionTable,
    expected: &RemoteAttributes,
    observed: &RemoteAttributes,
) -> bool {
    for (remote_name, expected_raw) in expected {
        let observed_raw = observed.get(remote_name);
        match table.spec_for_remote(remote_name) {
            Some(spec) => {
                let expected_value = match AttrValue::parse(spec.kind, expected_raw) {
                    Some(value) => value,
                    // An unparseable expectation cannot be normalized;
                    // compare the raw strings.
                    None => {
                        if observed_raw.map(String::as_str) != Some(expected_raw.as_str()) {
                            return false;
                        }
                        continue;
                    }
                };
                let observed_value = match observed_raw {
                    Some(raw) => match AttrValue::parse(spec.kind, raw) {
                        Some(value) => value,
                        None => return false,
                    },
                    None => AttrValue::zero(spec.kind),
                };
                if observed_value != expected_value {
                    return false;
                }
            }
            None => {
                let observed_raw = observed_raw.map(String::as_str).unwrap_or("");
                if observed_raw != expected_raw {
                    return false;
                }
            }
        }
    }
    true
}

struct PropagationSource<'a, F> {
    table: &'a ProjectionTable,
    expected: &'a RemoteAttributes,
    fetch: F,
}

#[async_trait]
impl<'a, F, Fut> StateSource for PropagationSource<'a, F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = std::result::Result<Option<RemoteAttributes>, BoxError>> + Send,
{
    type Snapshot = RemoteAttributes;

    async fn fetch(&mut self) -> std::result::Result<Option<RemoteAttributes>, BoxError> {
        (self.fetch)().await
    }

    fn classify(&self, snapshot: &RemoteAttributes) -> String {
        if attributes_match(self.table, self.expected, snapshot) {
            ATTRIBUTES_EQUAL.to_string()
        } else {
            ATTRIBUTES_NOT_EQUAL.to_string()
        }
    }
}

/// Polls `fetch` until the observed attribute bag matches `expected`,
/// returning the final bag.
///
/// A fetch returning `Ok(None)` counts against the configured not-found
/// tolerance, which covers the window right after creation where the
/// resource itself has not propagated yet.
pub async fn wait_attributes_propagated<F, Fut>(
    ctx: &Context,
    table: &ProjectionTable,
    expected: &RemoteAttributes,
    fetch: F,
    config: PollConfig,
) -> std::result::Result<RemoteAttributes, WaitError<RemoteAttributes>>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = std::result::Result<Option<RemoteAttributes>, BoxError>> + Send,
{
    tracing::debug!(
        "waiting for {} attribute(s) to propagate",
        expected.len()
    );
    let poller = ConvergencePoller::new(config)
        .pending([ATTRIBUTES_NOT_EQUAL])
        .target([ATTRIBUTES_EQUAL]);
    let mut source = PropagationSource {
        table,
        expected,
        fetch,
    };
    let snapshot = poller.poll(ctx, &mut source).await?;
    // A non-empty target set always converges with a snapshot.
    Ok(snapshot.unwrap_or_default())
}

struct RemovalSource<F, T> {
    fetch: F,
    _snapshot: PhantomData<fn() -> T>,
}

#[async_trait]
impl<F, Fut, T> StateSource for RemovalSource<F, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = std::result::Result<Option<T>, BoxError>> + Send,
    T: Send + fmt::Debug,
{
    type Snapshot = T;

    async fn fetch(&mut self) -> std::result::Result<Option<T>, BoxError> {
        (self.fetch)().await
    }

    fn classify(&self, _snapshot: &T) -> String {
        STATUS_EXISTS.to_string()
    }
}

/// Polls `fetch` until the resource stays gone for the configured number
/// of consecutive observations.
///
/// Deletion on an eventually consistent backend can flicker, with reads
/// still finding the resource after a first miss, so a single not-found
/// is usually not proof of removal.
pub async fn wait_removed<F, Fut, T>(
    ctx: &Context,
    fetch: F,
    config: PollConfig,
) -> std::result::Result<(), WaitError<T>>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = std::result::Result<Option<T>, BoxError>> + Send,
    T: Send + fmt::Debug,
{
    let poller = ConvergencePoller::new(config).pending([STATUS_EXISTS]);
    let mut source = RemovalSource {
        fetch,
        _snapshot: PhantomData,
    };
    poller.poll(ctx, &mut source).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::AttributeSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn bag(pairs: &[(&str, &str)]) -> RemoteAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn queue_table() -> ProjectionTable {
        ProjectionTable::builder()
            .attribute(AttributeSpec::int("delay_seconds", "DelaySeconds"))
            .attribute(AttributeSpec::bool("fifo_queue", "FifoQueue"))
            .build()
            .unwrap()
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            timeout: Duration::from_secs(5),
            min_timeout: Duration::from_millis(5),
            max_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    type FetchFuture = std::pin::Pin<
        Box<dyn Future<Output = std::result::Result<Option<RemoteAttributes>, BoxError>> + Send>,
    >;

    /// Serves scripted responses in order, repeating the final one.
    fn scripted(
        script: Vec<Option<RemoteAttributes>>,
    ) -> (impl FnMut() -> FetchFuture + Send, Arc<AtomicUsize>) {
        let script = Arc::new(Mutex::new(script));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_out = Arc::clone(&calls);
        let fetch = move || -> FetchFuture {
            let script = Arc::clone(&script);
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let index = calls.fetch_add(1, Ordering::SeqCst);
                let script = script.lock().unwrap();
                let index = index.min(script.len() - 1);
                Ok(script[index].clone())
            })
        };
        (fetch, calls_out)
    }

    #[test]
    fn absent_observed_key_equals_zero_expectation() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "0"), ("FifoQueue", "false")]);
        assert!(attributes_match(&table, &expected, &bag(&[])));
    }

    #[test]
    fn absent_observed_key_fails_non_zero_expectation() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "90")]);
        assert!(!attributes_match(&table, &expected, &bag(&[])));
    }

    #[test]
    fn comparison_is_kind_aware() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "90")]);
        assert!(attributes_match(
            &table,
            &expected,
            &bag(&[("DelaySeconds", "090")])
        ));
    }

    #[test]
    fn non_boolean_observed_value_is_a_mismatch() {
        let table = queue_table();
        let expected = bag(&[("FifoQueue", "true")]);
        assert!(!attributes_match(
            &table,
            &expected,
            &bag(&[("FifoQueue", "True")])
        ));
    }

    #[test]
    fn unknown_attribute_compares_raw_with_absence_as_empty() {
        let table = queue_table();
        let expected = bag(&[("Policy", "{}")]);
        assert!(attributes_match(
            &table,
            &expected,
            &bag(&[("Policy", "{}")])
        ));
        assert!(!attributes_match(&table, &expected, &bag(&[])));
        assert!(attributes_match(&table, &bag(&[("Policy", "")]), &bag(&[])));
    }

    #[test]
    fn observed_keys_outside_the_expectation_are_ignored() {
        let table = queue_table();
        let observed = bag(&[("DelaySeconds", "90"), ("ApproximateNumberOfMessages", "3")]);
        assert!(attributes_match(&table, &bag(&[]), &observed));
    }

    #[tokio::test]
    async fn propagation_waits_for_a_matching_bag() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "90")]);
        let (fetch, calls) = scripted(vec![
            Some(bag(&[("DelaySeconds", "0")])),
            Some(bag(&[("DelaySeconds", "0")])),
            Some(bag(&[("DelaySeconds", "90")])),
        ]);

        let observed = wait_attributes_propagated(
            &Context::new(),
            &table,
            &expected,
            fetch,
            fast_config(),
        )
        .await
        .unwrap();
        assert_eq!(observed.get("DelaySeconds").map(String::as_str), Some("90"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn propagation_requires_consecutive_matches_when_configured() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "90")]);
        let (fetch, calls) = scripted(vec![
            Some(bag(&[("DelaySeconds", "90")])),
            Some(bag(&[("DelaySeconds", "0")])),
            Some(bag(&[("DelaySeconds", "90")])),
            Some(bag(&[("DelaySeconds", "90")])),
        ]);
        let config = PollConfig {
            continuous_target_occurrence: 2,
            ..fast_config()
        };

        wait_attributes_propagated(&Context::new(), &table, &expected, fetch, config)
            .await
            .unwrap();
        // A stale read interrupts the first run; two fresh reads finish it.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn propagation_tolerates_missing_resource_within_checks() {
        let table = queue_table();
        let expected = bag(&[("FifoQueue", "true")]);
        let (fetch, _calls) = scripted(vec![None, None, Some(bag(&[("FifoQueue", "true")]))]);
        let config = PollConfig {
            not_found_checks: 2,
            ..fast_config()
        };

        wait_attributes_propagated(&Context::new(), &table, &expected, fetch, config)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn propagation_times_out_on_permanent_divergence() {
        let table = queue_table();
        let expected = bag(&[("DelaySeconds", "90")]);
        let (fetch, _calls) = scripted(vec![Some(bag(&[("DelaySeconds", "0")]))]);
        let config = PollConfig {
            timeout: Duration::from_millis(60),
            min_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_millis(10),
            ..Default::default()
        };

        let err =
            wait_attributes_propagated(&Context::new(), &table, &expected, fetch, config)
                .await
                .unwrap_err();
        match err {
            WaitError::Timeout { last_status, .. } => {
                assert_eq!(last_status.as_deref(), Some(ATTRIBUTES_NOT_EQUAL));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn removal_waits_for_consecutive_absence() {
        let (fetch, calls) = scripted(vec![
            Some(bag(&[("DelaySeconds", "0")])),
            None,
            Some(bag(&[("DelaySeconds", "0")])),
            None,
            None,
        ]);
        let config = PollConfig {
            continuous_target_occurrence: 2,
            ..fast_config()
        };

        wait_removed(&Context::new(), fetch, config).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
