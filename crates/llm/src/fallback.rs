//! Model Fallback Chain
//!
//! Wraps a provider call in the retry/fallback ladder:
//!
//! 1. first attempt on the model's default transport
//! 2. rate limit: switch to the gateway immediately if it has not been tried,
//!    otherwise move to the family alternate model, otherwise wait a fixed delay
//! 3. model not found on the gateway: go back to the transport it came from
//! 4. invalid request on the first attempt: retry once with request-shaping
//!    options stripped (not counted as an attempt)
//! 5. server error: exponential backoff
//! 6. anything else, or attempts exhausted: return the error
//!
//! The unit of work is a closure receiving an [`Attempt`], so the same ladder
//! drives streaming generation, summary extraction, and plain calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::classify::{classify, ErrorClass};
use crate::models::{ModelCatalog, ModelDescriptor, TransportClass};
use crate::types::LlmResult;

/// Attempt bound for the main generation call.
pub const GENERATION_MAX_ATTEMPTS: u32 = 3;
/// Attempt bound for generic retryable calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Fixed wait after a rate limit with nowhere else to go.
pub const RATE_LIMIT_DELAY_MS: u64 = 60_000;
/// Base of the server-error backoff.
pub const SERVER_ERROR_BASE_DELAY_MS: u64 = 2_000;

/// One try of the unit of work.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub model: ModelDescriptor,
    pub transport: TransportClass,
    /// Send the request without provider hints or reasoning effort
    pub strip_request_shaping: bool,
    /// 1-based attempt number (the reshape retry reuses number 1)
    pub number: u32,
}

/// What the ladder decided after a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RetryAction {
    SwitchToGateway,
    SwitchToAlternateModel { model: String },
    ReturnToOrigin,
    StripRequestShaping,
    Wait { delay_ms: u64 },
}

/// Observable record of a retry, rendered as a status line by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct RetryNotice {
    pub model: String,
    pub transport: TransportClass,
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: String,
    pub action: RetryAction,
}

impl RetryNotice {
    /// Human-readable one-line description.
    pub fn message(&self) -> String {
        match &self.action {
            RetryAction::SwitchToGateway => format!(
                "Rate limited on {}, switching to gateway",
                self.model
            ),
            RetryAction::SwitchToAlternateModel { model } => {
                format!("Rate limited on {}, falling back to {}", self.model, model)
            }
            RetryAction::ReturnToOrigin => format!(
                "{} unavailable on gateway, retrying on direct endpoint",
                self.model
            ),
            RetryAction::StripRequestShaping => format!(
                "Request rejected by {}, retrying without provider hints",
                self.model
            ),
            RetryAction::Wait { delay_ms } => format!(
                "Retrying {} in {}s (attempt {}/{})",
                self.model,
                delay_ms / 1000,
                self.attempt + 1,
                self.max_attempts
            ),
        }
    }
}

/// Delay policy. Overridable for embedding and tests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rate_limit_delay: Duration,
    pub server_error_base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_delay: Duration::from_millis(RATE_LIMIT_DELAY_MS),
            server_error_base_delay: Duration::from_millis(SERVER_ERROR_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// `base × 2^(attempt−1)`
    pub fn server_error_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.server_error_base_delay.saturating_mul(1u32 << exp)
    }
}

/// The fallback ladder.
#[derive(Clone)]
pub struct FallbackChain {
    catalog: Arc<ModelCatalog>,
    policy: RetryPolicy,
    notices: Option<mpsc::UnboundedSender<RetryNotice>>,
}

impl FallbackChain {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self {
            catalog,
            policy: RetryPolicy::default(),
            notices: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Send every retry decision to `tx`.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<RetryNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn notify(&self, notice: RetryNotice) {
        tracing::warn!(
            model = %notice.model,
            transport = %notice.transport,
            attempt = notice.attempt,
            error = %notice.error,
            action = ?notice.action,
            "model call failed, retrying"
        );
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }

    /// Run `op` under the ladder for `model`, making at most `max_attempts`
    /// counted attempts.
    pub async fn run<T, F, Fut>(
        &self,
        model: &ModelDescriptor,
        max_attempts: u32,
        mut op: F,
    ) -> LlmResult<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut current = model.clone();
        let mut origin = current.default_transport;
        let mut transport = origin;
        let mut gateway_tried = transport == TransportClass::Gateway;
        let mut alternate_used = false;
        let mut strip = false;
        let mut reshaped = false;
        let mut attempt: u32 = 1;

        loop {
            let result = op(Attempt {
                model: current.clone(),
                transport,
                strip_request_shaping: strip,
                number: attempt,
            })
            .await;

            let err = match result {
                Ok(value) => {
                    if attempt > 1 || reshaped {
                        tracing::info!(
                            model = %current.id,
                            transport = %transport,
                            attempt,
                            "model call recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let class = classify(&err);
            let mut notice = RetryNotice {
                model: current.id.clone(),
                transport,
                attempt,
                max_attempts,
                error: err.to_string(),
                action: RetryAction::StripRequestShaping,
            };

            if class == ErrorClass::InvalidRequest && attempt == 1 && !reshaped {
                reshaped = true;
                strip = true;
                self.notify(notice);
                continue;
            }

            if attempt >= max_attempts {
                tracing::error!(
                    model = %current.id,
                    attempts = attempt,
                    error = %err,
                    "fallback chain exhausted"
                );
                return Err(err);
            }

            match class {
                ErrorClass::RateLimit => {
                    if current.can_switch_to_gateway(transport) && !gateway_tried {
                        transport = TransportClass::Gateway;
                        gateway_tried = true;
                        notice.action = RetryAction::SwitchToGateway;
                        self.notify(notice);
                    } else if let Some(alternate) = self.alternate_for(&current, alternate_used) {
                        notice.action = RetryAction::SwitchToAlternateModel {
                            model: alternate.id.clone(),
                        };
                        self.notify(notice);
                        alternate_used = true;
                        origin = alternate.default_transport;
                        transport = origin;
                        gateway_tried = transport == TransportClass::Gateway;
                        current = alternate;
                    } else {
                        let delay = self.policy.rate_limit_delay;
                        notice.action = RetryAction::Wait {
                            delay_ms: delay.as_millis() as u64,
                        };
                        self.notify(notice);
                        tokio::time::sleep(delay).await;
                    }
                }
                ErrorClass::ModelNotFound
                    if transport == TransportClass::Gateway
                        && origin != TransportClass::Gateway =>
                {
                    transport = origin;
                    notice.action = RetryAction::ReturnToOrigin;
                    self.notify(notice);
                }
                ErrorClass::ServerError => {
                    let delay = self.policy.server_error_delay(attempt);
                    notice.action = RetryAction::Wait {
                        delay_ms: delay.as_millis() as u64,
                    };
                    self.notify(notice);
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(err),
            }

            attempt += 1;
        }
    }

    fn alternate_for(
        &self,
        model: &ModelDescriptor,
        already_used: bool,
    ) -> Option<ModelDescriptor> {
        if already_used {
            return None;
        }
        let id = model.fallback_model.as_deref()?;
        if id == model.id {
            return None;
        }
        self.catalog.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelFamily;
    use crate::types::LlmError;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn model(id: &str, gateway: bool, fallback: Option<&str>) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            family: ModelFamily::OpenAI,
            default_transport: TransportClass::Direct,
            temperature: 0.3,
            capabilities: BTreeSet::new(),
            supports_research: false,
            gateway_fallback: gateway,
            gateway_id: None,
            fallback_model: fallback.map(str::to_string),
        }
    }

    fn chain(models: Vec<ModelDescriptor>) -> FallbackChain {
        FallbackChain::new(Arc::new(ModelCatalog {
            default_model: models[0].id.clone(),
            auxiliary_model: models[0].id.clone(),
            models,
            rules: vec![],
        }))
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            message: "slow down".to_string(),
            retry_after: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_makes_exactly_max_attempts() {
        let m = model("solo", false, None);
        let chain = chain(vec![m.clone()]);
        let calls = Mutex::new(0u32);

        let result: LlmResult<()> = chain
            .run(&m, GENERATION_MAX_ATTEMPTS, |_| {
                *calls.lock().unwrap() += 1;
                async { Err(rate_limited()) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success_waits_fixed_delay() {
        let m = model("solo", false, None);
        let chain = chain(vec![m.clone()]);
        let starts = Mutex::new(Vec::new());

        let result = chain
            .run(&m, GENERATION_MAX_ATTEMPTS, |attempt| {
                starts.lock().unwrap().push(Instant::now());
                async move {
                    if attempt.number == 1 {
                        Err(rate_limited())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 2);
        assert_eq!(
            starts[1] - starts[0],
            Duration::from_millis(RATE_LIMIT_DELAY_MS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_switch_is_immediate_then_alternate_model() {
        let primary = model("big", true, Some("small"));
        let alternate = model("small", true, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = chain(vec![primary.clone(), alternate]).with_notices(tx);
        let seen = Mutex::new(Vec::new());
        let started = Instant::now();

        let result = chain
            .run(&primary, DEFAULT_MAX_ATTEMPTS, |attempt| {
                seen.lock()
                    .unwrap()
                    .push((attempt.model.id.clone(), attempt.transport));
                async move {
                    if attempt.model.id == "small" {
                        Ok(())
                    } else {
                        Err(rate_limited())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("big".to_string(), TransportClass::Direct),
                ("big".to_string(), TransportClass::Gateway),
                ("small".to_string(), TransportClass::Direct),
            ]
        );
        assert_eq!(Instant::now() - started, Duration::ZERO);
        assert_eq!(rx.recv().await.unwrap().action, RetryAction::SwitchToGateway);
        assert!(matches!(
            rx.recv().await.unwrap().action,
            RetryAction::SwitchToAlternateModel { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_not_found_on_gateway_returns_to_direct() {
        let m = model("big", true, None);
        let chain = chain(vec![m.clone()]);
        let transports = Mutex::new(Vec::new());

        let result = chain
            .run(&m, DEFAULT_MAX_ATTEMPTS, |attempt| {
                transports.lock().unwrap().push(attempt.transport);
                async move {
                    match attempt.number {
                        1 => Err(rate_limited()),
                        2 => Err(LlmError::ModelNotFound {
                            model: "gateway: big".to_string(),
                        }),
                        _ => Ok(attempt.transport),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), TransportClass::Direct);
        assert_eq!(
            *transports.lock().unwrap(),
            vec![
                TransportClass::Direct,
                TransportClass::Gateway,
                TransportClass::Direct
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_reshape_is_not_counted() {
        let m = model("solo", false, None);
        let chain = chain(vec![m.clone()]);
        let calls = Mutex::new(Vec::new());

        let result: LlmResult<()> = chain
            .run(&m, 1, |attempt| {
                calls
                    .lock()
                    .unwrap()
                    .push((attempt.number, attempt.strip_request_shaping));
                async {
                    Err(LlmError::InvalidRequest {
                        message: "unsupported parameter".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        // max_attempts = 1 still allows the reshape retry
        assert_eq!(*calls.lock().unwrap(), vec![(1, false), (1, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_backoff_doubles() {
        let m = model("solo", false, None);
        let chain = chain(vec![m.clone()]);
        let starts = Mutex::new(Vec::new());

        let result: LlmResult<()> = chain
            .run(&m, 3, |_| {
                starts.lock().unwrap().push(Instant::now());
                async {
                    Err(LlmError::ServerError {
                        message: "boom".to_string(),
                        status: Some(503),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[1] - starts[0], Duration::from_millis(2_000));
        assert_eq!(starts[2] - starts[1], Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_without_retry() {
        let m = model("solo", true, None);
        let chain = chain(vec![m.clone()]);
        let calls = Mutex::new(0u32);

        let result: LlmResult<()> = chain
            .run(&m, DEFAULT_MAX_ATTEMPTS, |_| {
                *calls.lock().unwrap() += 1;
                async {
                    Err(LlmError::AuthenticationFailed {
                        message: "bad key".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(LlmError::AuthenticationFailed { .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_notice_messages() {
        let notice = RetryNotice {
            model: "solo".to_string(),
            transport: TransportClass::Direct,
            attempt: 1,
            max_attempts: 3,
            error: "Rate limited".to_string(),
            action: RetryAction::Wait { delay_ms: 60_000 },
        };
        assert_eq!(notice.message(), "Retrying solo in 60s (attempt 2/3)");
    }
}
