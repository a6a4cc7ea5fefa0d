//! Bounded-concurrency fan-out over destination namespaces.

use std::future::Future;

use crate::errors::Error;

/// Runs `op` for every namespace in fixed-size batches.
///
/// Namespaces within a batch run concurrently and the batch is always
/// awaited in full before errors are inspected, so writes that already
/// started are never abandoned. The first error observed in a batch is
/// returned wrapped and no further batches run. Concurrency is clamped
/// to at least one.
pub async fn batch_over_namespaces<F, Fut>(
    concurrency: usize,
    namespaces: &[String],
    op: F,
) -> Result<(), Error>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let concurrency = concurrency.max(1);
    for batch in namespaces.chunks(concurrency) {
        let results =
            futures::future::join_all(batch.iter().cloned().map(&op)).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(Error::Batch(Box::new(err)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn namespaces(names: &[&str]) -> Vec<String> {
        names.iter().map(|ns| ns.to_string()).collect()
    }

    #[tokio::test]
    async fn test_runs_every_namespace() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = batch_over_namespaces(2, &namespaces(&["a", "b", "c"]), |ns| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(ns);
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_batch_members_all_complete_before_error_surfaces() {
        let completed = Arc::new(AtomicUsize::new(0));
        let result = batch_over_namespaces(3, &namespaces(&["a", "b", "c"]), |ns| {
            let completed = Arc::clone(&completed);
            async move {
                completed.fetch_add(1, Ordering::SeqCst);
                if ns == "a" {
                    Err(Error::CacheSync)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Batch(_))));
        // the failing batch still ran to completion
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_stops_later_batches() {
        let started = Arc::new(AtomicUsize::new(0));
        let result = batch_over_namespaces(1, &namespaces(&["a", "b", "c"]), |_ns| {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                Err(Error::CacheSync)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_clamps_to_one() {
        let result =
            batch_over_namespaces(0, &namespaces(&["a"]), |_ns| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_namespaces_is_a_no_op() {
        let result = batch_over_namespaces(4, &[], |_ns| async { Ok(()) }).await;
        assert!(result.is_ok());
    }
}
