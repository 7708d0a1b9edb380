//! Bounded-concurrency fan-out.
//!
//! All per-job and per-bid I/O fan-outs in the tick pipeline route through
//! `map_limit` so the marketplace never sees more than the configured number
//! of in-flight requests from one worker.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Applies `f` to every item with at most `limit` futures in flight.
///
/// Output order matches input order. Every task settles before results are
/// inspected; the first error (in input order) is then surfaced.
pub async fn map_limit<T, U, E, F, Fut>(limit: usize, items: Vec<T>, f: F) -> Result<Vec<U>, E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    map_limit_settled(limit, items, f)
        .await
        .into_iter()
        .collect()
}

/// Like [`map_limit`] but keeps every per-item outcome, so one failed item
/// does not discard its siblings. Callers that tolerate partial failure
/// (per-job bid fetches) use this variant.
pub async fn map_limit_settled<T, U, E, F, Fut>(
    limit: usize,
    items: Vec<T>,
    f: F,
) -> Vec<Result<U, E>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    stream::iter(items.into_iter().map(f))
        .buffered(limit.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn preserves_input_order() {
        // Later items finish first; output order must still match input.
        let items: Vec<u64> = (0..8).collect();
        let out = map_limit(3, items, |n| async move {
            tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
            Ok::<_, ()>(n * 2)
        })
        .await
        .unwrap();

        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[tokio::test(start_paused = true)]
    async fn respects_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<usize> = (0..20).collect();
        let (in_flight_ref, peak_ref) = (in_flight.clone(), peak.clone());
        map_limit(4, items, move |n| {
            let in_flight = in_flight_ref.clone();
            let peak = peak_ref.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(n)
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_surfaces_after_all_settle() {
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_ref = completed.clone();

        let err = map_limit(2, vec![0u32, 1, 2, 3], move |n| {
            let completed = completed_ref.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if n == 1 { Err(format!("item {n} failed")) } else { Ok(n) }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err, "item 1 failed");
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn settled_variant_keeps_every_outcome() {
        let out = map_limit_settled(2, vec![1u32, 2, 3], |n| async move {
            if n % 2 == 0 { Err(n) } else { Ok(n) }
        })
        .await;

        assert_eq!(out, vec![Ok(1), Err(2), Ok(3)]);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped() {
        let out = map_limit(0, vec![1u32], |n| async move { Ok::<_, ()>(n) })
            .await
            .unwrap();
        assert_eq!(out, vec![1]);
    }
}
