use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use super::error::DownloadResult;

type SharedTask<T> = Shared<BoxFuture<'static, DownloadResult<T>>>;

/// At most one in-flight task per key. The first caller for a key runs the
/// operation; later callers attach to the running task and receive a clone
/// of the same outcome. Entries are removed on completion, so a failed key
/// is immediately retryable and nothing is cached across calls.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, SharedTask<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> DownloadResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DownloadResult<T>> + Send + 'static,
    {
        let task = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match inflight.get(key) {
                Some(existing) => existing.clone(),
                None => {
                    let task = operation().boxed().shared();
                    inflight.insert(key.to_string(), task.clone());
                    task
                }
            }
        };
        let result = task.clone().await;
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A newer task may already occupy the slot; only evict our own.
        if inflight
            .get(key)
            .is_some_and(|current| current.ptr_eq(&task))
        {
            inflight.remove(key);
        }
        result
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::error::DownloadError;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_invocation() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let invocations = Arc::clone(&invocations);
            handles.push(tokio::spawn(async move {
                flight
                    .run("shared", move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(7)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_fans_out_and_slot_is_retryable() {
        let flight = SingleFlight::<u32>::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        let first = flight
            .run("key", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::Transport {
                    url: "http://example.com".to_string(),
                    message: "refused".to_string(),
                })
            })
            .await;
        assert!(first.is_err());

        let counter = Arc::clone(&invocations);
        let second = flight
            .run("key", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(9)
            })
            .await;
        assert_eq!(second.unwrap(), 9);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_run_independently() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..3u32 {
            let flight = Arc::clone(&flight);
            let invocations = Arc::clone(&invocations);
            handles.push(tokio::spawn(async move {
                flight
                    .run(&format!("key-{index}"), move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(index)
                    })
                    .await
            }));
        }
        for (index, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), index as u32);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }
}
