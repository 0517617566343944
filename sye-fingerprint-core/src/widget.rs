//! The device fingerprint widget: the top-level flow and its two result
//! channels.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::{self, FingerprintConfig, FingerprintOptions};
use crate::envelope::{FlowResult, ResultEnvelope, WidgetContract};
use crate::error::FingerprintError;
use crate::identity::IdentityStore;
use crate::payload::PayloadBuilder;
use crate::signals::SignalCollector;
use crate::submit::{with_deadline, SubmitHeaders, Submitter};

/// Buffered events per subscriber before the slowest one starts lagging.
const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Handler invoked with the outcome envelope.
pub type ResultHandler = Arc<dyn Fn(&ResultEnvelope) + Send + Sync>;

/// Per-call result handlers.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_success: Option<ResultHandler>,
    on_error: Option<ResultHandler>,
}

impl Callbacks {
    /// Handler for completed flows.
    #[must_use]
    pub fn on_success(
        mut self,
        handler: impl Fn(&ResultEnvelope) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(handler));
        self
    }

    /// Handler for failed flows.
    #[must_use]
    pub fn on_error(
        mut self,
        handler: impl Fn(&ResultEnvelope) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    fn handler_for(&self, envelope: &ResultEnvelope) -> Option<&ResultHandler> {
        if envelope.is_success() {
            self.on_success.as_ref()
        } else {
            self.on_error.as_ref()
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A broadcast notification: event name plus the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintEvent {
    /// `fingerprint-success` or `fingerprint-error`.
    pub name: String,
    /// Same value handed to the callback.
    pub envelope: ResultEnvelope,
}

/// Builder for [`DeviceFingerprint`].
#[derive(Debug)]
pub struct DeviceFingerprintBuilder {
    endpoint: Option<String>,
    read_environment: bool,
    collector: Option<SignalCollector>,
    identity: Option<IdentityStore>,
    submitter: Option<Submitter>,
    event_capacity: usize,
}

impl DeviceFingerprintBuilder {
    /// Endpoint used when a call does not carry its own.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Skips the environment fallback for the endpoint.
    #[must_use]
    pub const fn ignore_environment(mut self) -> Self {
        self.read_environment = false;
        self
    }

    /// Signal collector, [`SignalCollector::native`] by default.
    #[must_use]
    pub fn collector(mut self, collector: SignalCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Device identity store, in-memory by default.
    #[must_use]
    pub fn identity(mut self, identity: IdentityStore) -> Self {
        self.identity = Some(identity);
        self
    }

    /// HTTP submitter.
    #[must_use]
    pub fn submitter(mut self, submitter: Submitter) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Capacity of the event channel.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the widget. The environment is read here and never again.
    #[must_use]
    pub fn build(self) -> DeviceFingerprint {
        let endpoint = self
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .or_else(|| {
                if self.read_environment {
                    config::endpoint_from_env()
                } else {
                    None
                }
            });
        let (events, _) = broadcast::channel(self.event_capacity.max(1));

        DeviceFingerprint {
            contract: WidgetContract::fingerprint(),
            endpoint,
            collector: self.collector.unwrap_or_default(),
            identity: self.identity.unwrap_or_else(IdentityStore::in_memory),
            submitter: self.submitter.unwrap_or_default(),
            events,
            last: Mutex::new(None),
        }
    }
}

/// Device fingerprint widget.
///
/// Each [`DeviceFingerprint::init`] call is an independent flow; one instance
/// can serve concurrent flows.
pub struct DeviceFingerprint {
    contract: WidgetContract,
    endpoint: Option<String>,
    collector: SignalCollector,
    identity: IdentityStore,
    submitter: Submitter,
    events: broadcast::Sender<FingerprintEvent>,
    last: Mutex<Option<ResultEnvelope>>,
}

impl fmt::Debug for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFingerprint")
            .field("endpoint", &self.endpoint)
            .field("collector", &self.collector)
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl DeviceFingerprint {
    /// Starts a builder.
    #[must_use]
    pub const fn builder() -> DeviceFingerprintBuilder {
        DeviceFingerprintBuilder {
            endpoint: None,
            read_environment: true,
            collector: None,
            identity: None,
            submitter: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Endpoint resolved at build time, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Contract naming this widget's envelope and events.
    #[must_use]
    pub const fn contract(&self) -> &WidgetContract {
        &self.contract
    }

    /// Subscribes to the outcome events of this instance.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FingerprintEvent> {
        self.events.subscribe()
    }

    /// Envelope of the most recent flow of this instance.
    #[must_use]
    pub fn last_result(&self) -> Option<ResultEnvelope> {
        match self.last.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Runs one fingerprint flow.
    ///
    /// Every outcome becomes a [`ResultEnvelope`] which is stored as
    /// [`Self::last_result`], published to subscribers and then handed to the
    /// matching callback.
    ///
    /// # Errors
    /// The failure that ended the flow, unchanged:
    /// [`FingerprintError::Configuration`] for a missing endpoint or token
    /// (raised before any I/O), [`FingerprintError::Timeout`] when the
    /// deadline elapses, or the submission error once retries are exhausted.
    pub async fn init(
        &self,
        transaction_token: &str,
        access_token: &str,
        options: &FingerprintOptions,
        callbacks: &Callbacks,
    ) -> Result<ResultEnvelope, FingerprintError> {
        match self.execute(transaction_token, access_token, options).await {
            Ok(result) => {
                let envelope = ResultEnvelope::success(result);
                self.deliver(&envelope, callbacks);
                Ok(envelope)
            }
            Err(err) => {
                log::warn!("fingerprint flow failed: {err}");
                self.deliver(&ResultEnvelope::failure(&err), callbacks);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        transaction_token: &str,
        access_token: &str,
        options: &FingerprintOptions,
    ) -> Result<FlowResult, FingerprintError> {
        let endpoint =
            config::resolve_endpoint(options.endpoint.as_deref(), self.endpoint.as_deref())?;
        require_token("transactionToken", transaction_token)?;
        require_token("accessToken", access_token)?;

        let config = options.normalize();
        let headers = SubmitHeaders::new(transaction_token, access_token);
        with_deadline(
            Duration::from_millis(config.timeout_ms),
            self.run_flow(&endpoint, &headers, &config),
        )
        .await
    }

    async fn run_flow(
        &self,
        endpoint: &str,
        headers: &SubmitHeaders,
        config: &FingerprintConfig,
    ) -> Result<FlowResult, FingerprintError> {
        let built = PayloadBuilder::new(&self.collector, &self.identity)
            .build(config)
            .await?;
        log::debug!("fingerprint payload built: {:?}", built.computed);

        let api_resp = self
            .submitter
            .post_with_retry(endpoint, headers, &built.body, &config.retry)
            .await?;

        Ok(FlowResult {
            sent: built.body,
            computed: built.computed,
            api_resp,
        })
    }

    fn deliver(&self, envelope: &ResultEnvelope, callbacks: &Callbacks) {
        match self.last.lock() {
            Ok(mut last) => *last = Some(envelope.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(envelope.clone()),
        }

        let event = FingerprintEvent {
            name: self.contract.event_for(envelope).to_string(),
            envelope: envelope.clone(),
        };
        // Fails only when nobody is subscribed.
        let _ = self.events.send(event);

        if let Some(handler) = callbacks.handler_for(envelope) {
            handler(envelope);
        }
    }
}

fn require_token(name: &str, value: &str) -> Result<(), FingerprintError> {
    if value.trim().is_empty() {
        return Err(FingerprintError::configuration(format!("{name} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn offline() -> DeviceFingerprint {
        DeviceFingerprint::builder().ignore_environment().build()
    }

    #[test]
    fn test_builder_endpoint_wins_and_blank_is_ignored() {
        let widget = DeviceFingerprint::builder()
            .ignore_environment()
            .endpoint("https://api.test/fp")
            .build();
        assert_eq!(widget.endpoint(), Some("https://api.test/fp"));

        let widget = DeviceFingerprint::builder()
            .ignore_environment()
            .endpoint("  ")
            .build();
        assert_eq!(widget.endpoint(), None);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_reported_on_both_channels() {
        let widget = offline();
        let mut events = widget.subscribe();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let callbacks = Callbacks::default()
            .on_success(|_| panic!("flow cannot succeed"))
            .on_error(move |envelope| {
                assert!(!envelope.is_success());
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let err = widget
            .init("tx", "access", &FingerprintOptions::default(), &callbacks)
            .await
            .unwrap_err();

        assert!(matches!(err, FingerprintError::Configuration { .. }));
        assert!(err.to_string().contains("FP_API_URL"));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        let event = events.try_recv().unwrap();
        assert_eq!(event.name, "fingerprint-error");
        assert_eq!(Some(event.envelope), widget.last_result());
    }

    #[tokio::test]
    async fn test_tokens_are_required() {
        let widget = offline();
        let options = FingerprintOptions {
            endpoint: Some("http://127.0.0.1:9/fp".to_string()),
            ..FingerprintOptions::default()
        };

        let err = widget
            .init("", "access", &options, &Callbacks::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "transactionToken is required");

        let err = widget
            .init("tx", " ", &options, &Callbacks::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "accessToken is required");
    }

    #[test]
    fn test_no_subscribers_is_not_an_error() {
        let widget = offline();
        widget.deliver(
            &ResultEnvelope::failure(&FingerprintError::Timeout { timeout_ms: 1 }),
            &Callbacks::default(),
        );
        assert!(widget.last_result().is_some());
    }

    #[test]
    fn test_widget_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceFingerprint>();
    }
}
