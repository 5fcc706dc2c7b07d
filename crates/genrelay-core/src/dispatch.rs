//! Fallback dispatcher — try providers in order until one answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, ProviderError};
use crate::provider::GenerationProvider;

/// Per-attempt ceiling used when the caller does not override it.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub text: String,
    /// Name of the provider that served the answer.
    pub provider: String,
    /// How many providers were tried, including the successful one.
    pub attempts: usize,
}

/// Ordered fallback chain over a fixed list of providers.
///
/// Providers are attempted strictly left to right, each at most once per
/// call, with no delay between attempts. The first success wins.
pub struct Dispatcher {
    providers: Vec<Arc<dyn GenerationProvider>>,
    attempt_timeout: Duration,
    dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(providers: Vec<Arc<dyn GenerationProvider>>) -> Self {
        Self {
            providers,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Override the per-provider timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Provider names in chain order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Number of dispatch calls started on this instance.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Dispatch without an external cancellation source.
    pub async fn dispatch(&self, prompt: &str) -> Result<Generation, DispatchError> {
        self.dispatch_with_cancel(prompt, &CancellationToken::new())
            .await
    }

    /// Dispatch a prompt, aborting between or during attempts once `cancel` fires.
    pub async fn dispatch_with_cancel(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Generation, DispatchError> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        if self.providers.is_empty() {
            warn!("Dispatch refused: no providers configured");
            return Err(DispatchError::NoProviders);
        }
        if prompt.trim().is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }

        let total = self.providers.len();
        let mut last: Option<(String, ProviderError)> = None;

        for (index, provider) in self.providers.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Dispatch cancelled before attempt {}/{}", index + 1, total);
                return Err(DispatchError::Cancelled { attempts: index });
            }

            let name = provider.name();
            debug!("Attempt {}/{}: {}", index + 1, total, name);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Dispatch cancelled during attempt {}/{} ({})", index + 1, total, name);
                    return Err(DispatchError::Cancelled { attempts: index + 1 });
                }
                res = tokio::time::timeout(self.attempt_timeout, provider.generate(prompt)) => {
                    res.unwrap_or(Err(ProviderError::Timeout(self.attempt_timeout)))
                }
            };

            match outcome {
                Ok(text) => {
                    info!(
                        provider = name,
                        outcome = "success",
                        "Provider {}/{} answered",
                        index + 1,
                        total
                    );
                    return Ok(Generation {
                        text,
                        provider: name.to_string(),
                        attempts: index + 1,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = name,
                        outcome = e.classification(),
                        "Provider {}/{} failed: {}",
                        index + 1,
                        total,
                        e
                    );
                    last = Some((name.to_string(), e));
                }
            }
        }

        // Non-empty chain and every attempt failed, so `last` is set.
        let (provider, last) = last.ok_or(DispatchError::NoProviders)?;
        Err(DispatchError::Exhausted {
            attempts: total,
            provider,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    enum Behavior {
        Reply(&'static str),
        Fail(ProviderError),
        Hang,
    }

    struct Stub {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationProvider for Stub {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".into())
                }
            }
        }
    }

    fn chain(stubs: &[&Arc<Stub>]) -> Vec<Arc<dyn GenerationProvider>> {
        stubs
            .iter()
            .map(|s| Arc::clone(*s) as Arc<dyn GenerationProvider>)
            .collect()
    }

    fn transport(msg: &str) -> ProviderError {
        ProviderError::Transport(msg.to_string())
    }

    #[tokio::test]
    async fn test_empty_chain_fails_without_calls() {
        let dispatcher = Dispatcher::new(Vec::new());
        let err = dispatcher.dispatch("hi").await.unwrap_err();
        assert_eq!(err, DispatchError::NoProviders);
        assert_eq!(err.to_string(), "no providers configured");
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let a = Stub::new("A", Behavior::Reply("x"));
        let dispatcher = Dispatcher::new(chain(&[&a]));
        assert_eq!(
            dispatcher.dispatch("   ").await.unwrap_err(),
            DispatchError::EmptyPrompt
        );
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Stub::new("A", Behavior::Reply("from a"));
        let b = Stub::new("B", Behavior::Reply("from b"));
        let dispatcher = Dispatcher::new(chain(&[&a, &b]));

        let out = dispatcher.dispatch("hi").await.unwrap();
        assert_eq!(out.text, "from a");
        assert_eq!(out.provider, "A");
        assert_eq!(out.attempts, 1);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_order_preserved_until_success() {
        let a = Stub::new("A", Behavior::Fail(transport("refused")));
        let b = Stub::new(
            "B",
            Behavior::Fail(ProviderError::Status {
                status: 503,
                message: "overloaded".into(),
            }),
        );
        let c = Stub::new("C", Behavior::Reply("hello"));
        let dispatcher = Dispatcher::new(chain(&[&a, &b, &c]));

        let out = dispatcher.dispatch("hi").await.unwrap();
        assert_eq!(out.provider, "C");
        assert_eq!(out.attempts, 3);
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let a = Stub::new("A", Behavior::Fail(transport("refused")));
        let b = Stub::new("B", Behavior::Fail(transport("reset by peer")));
        let dispatcher = Dispatcher::new(chain(&[&a, &b]));

        match dispatcher.dispatch("hi").await.unwrap_err() {
            DispatchError::Exhausted {
                attempts,
                provider,
                last,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(provider, "B");
                assert_eq!(last, transport("reset by peer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_advances() {
        let x = Stub::new(
            "X",
            Behavior::Fail(ProviderError::ResponseShape("missing field `choices`".into())),
        );
        let y = Stub::new("Y", Behavior::Reply("hello"));
        let dispatcher = Dispatcher::new(chain(&[&x, &y]));

        let out = dispatcher.dispatch("hi").await.unwrap();
        assert_eq!(out.provider, "Y");
        assert_eq!(x.calls(), 1);
    }

    #[tokio::test]
    async fn test_only_malformed_provider_fails_with_shape_error() {
        let x = Stub::new(
            "X",
            Behavior::Fail(ProviderError::ResponseShape("expected value at line 1".into())),
        );
        let dispatcher = Dispatcher::new(chain(&[&x]));

        match dispatcher.dispatch("hi").await.unwrap_err() {
            DispatchError::Exhausted { provider, last, .. } => {
                assert_eq!(provider, "X");
                assert!(matches!(last, ProviderError::ResponseShape(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_advances_to_next_provider() {
        let x = Stub::new("X", Behavior::Hang);
        let y = Stub::new("Y", Behavior::Reply("hello"));
        let dispatcher =
            Dispatcher::new(chain(&[&x, &y])).with_attempt_timeout(Duration::from_millis(50));

        let out = dispatcher.dispatch("hi").await.unwrap();
        assert_eq!(
            out,
            Generation {
                text: "hello".into(),
                provider: "Y".into(),
                attempts: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_on_last_provider_is_reported() {
        let x = Stub::new("X", Behavior::Hang);
        let timeout = Duration::from_millis(30);
        let dispatcher = Dispatcher::new(chain(&[&x])).with_attempt_timeout(timeout);

        match dispatcher.dispatch("hi").await.unwrap_err() {
            DispatchError::Exhausted { last, .. } => {
                assert_eq!(last, ProviderError::Timeout(timeout))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let a = Stub::new("A", Behavior::Reply("x"));
        let dispatcher = Dispatcher::new(chain(&[&a]));
        let token = CancellationToken::new();
        token.cancel();

        let err = dispatcher.dispatch_with_cancel("hi", &token).await.unwrap_err();
        assert_eq!(err, DispatchError::Cancelled { attempts: 0 });
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_inflight_attempt() {
        let slow = Stub::new("slow", Behavior::Hang);
        let next = Stub::new("next", Behavior::Reply("x"));
        let dispatcher = Dispatcher::new(chain(&[&slow, &next]));
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = dispatcher.dispatch_with_cancel("hi", &token).await.unwrap_err();
        assert_eq!(err, DispatchError::Cancelled { attempts: 1 });
        assert_eq!(next.calls(), 0);
    }

    #[tokio::test]
    async fn test_repeat_dispatch_same_outcome() {
        let a = Stub::new("A", Behavior::Fail(transport("down")));
        let b = Stub::new("B", Behavior::Reply("ok"));
        let dispatcher = Dispatcher::new(chain(&[&a, &b]));

        let first = dispatcher.dispatch("hi").await;
        let second = dispatcher.dispatch("hi").await;
        assert_eq!(first, second);
        assert_eq!(dispatcher.dispatch_count(), 2);
        assert_eq!(a.calls(), 2);
    }

    #[test]
    fn test_provider_names_keep_order() {
        let a = Stub::new("A", Behavior::Reply("x"));
        let b = Stub::new("B", Behavior::Reply("y"));
        let dispatcher = Dispatcher::new(chain(&[&b, &a]));
        assert_eq!(dispatcher.provider_names(), vec!["B", "A"]);
        assert_eq!(dispatcher.attempt_timeout(), DEFAULT_ATTEMPT_TIMEOUT);
    }
}
