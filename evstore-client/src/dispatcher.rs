//! Correlation table and retry policy.
//!
//! Every request in flight is registered under its correlation id before
//! its frame is written, so a fast reply always finds its operation. The
//! dispatcher turns inspection decisions into actions for the connection:
//! write a frame now, resend later, or move to another node.

use crate::error::ClientError;
use crate::operation::{InspectionDecision, MasterEndpoint, Operation, OperationKind};
use evstore_protocol::{Frame, InboundPackage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Default number of resends before an operation gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Bounded linear backoff for timeout-class replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(DEFAULT_MAX_RETRIES),
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: Option<u32>, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            max_delay,
        }
    }

    /// Fails on the first timeout-class reply.
    pub fn no_retries() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt).min(self.max_delay)
    }

    fn exhausted(&self, retries: u32) -> bool {
        matches!(self.max_retries, Some(max) if retries >= max)
    }
}

/// What the connection must do after a reply was dispatched.
#[derive(Debug)]
pub enum DispatchAction {
    None,
    /// Write this frame now.
    Send(Frame),
    /// Write this frame after `delay`.
    Resend { frame: Frame, delay: Duration },
    /// Reconnect to the master and resend everything pending.
    Reconnect(MasterEndpoint),
}

struct Registration {
    operation: Box<dyn Operation>,
    frame: Frame,
    retries: u32,
}

/// Owns the correlation id to operation table.
pub struct Dispatcher {
    pending: Mutex<HashMap<Uuid, Registration>>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Registers `operation` and returns the frame to send for it.
    pub fn register(
        &self,
        correlation_id: Uuid,
        operation: Box<dyn Operation>,
    ) -> Result<Frame, ClientError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&correlation_id) {
            return Err(ClientError::DuplicateCorrelationId(correlation_id));
        }
        let frame = operation.create_network_package(correlation_id);
        tracing::debug!(
            %correlation_id,
            operation = operation.name(),
            command = %frame.command,
            "registered operation"
        );
        pending.insert(
            correlation_id,
            Registration {
                operation,
                frame: frame.clone(),
                retries: 0,
            },
        );
        Ok(frame)
    }

    /// Routes one inbound package to its operation.
    pub fn handle(&self, package: InboundPackage) -> DispatchAction {
        let correlation_id = package.correlation_id;
        let command = package.command;
        let mut pending = self.pending.lock();

        let Some(mut registration) = pending.remove(&correlation_id) else {
            tracing::debug!(%correlation_id, %command, "no operation for package");
            return DispatchAction::None;
        };

        if registration.operation.is_cancelled() {
            tracing::debug!(
                %correlation_id,
                operation = registration.operation.name(),
                "operation cancelled by caller"
            );
            return teardown(&registration, correlation_id);
        }

        let result = registration.operation.inspect_package(package);
        let name = registration.operation.name();
        tracing::debug!(%correlation_id, operation = name, %command, "{}", result);

        match result.decision {
            InspectionDecision::EndOperation => teardown(&registration, correlation_id),
            InspectionDecision::Retry => {
                if self.retry.exhausted(registration.retries) {
                    tracing::warn!(
                        %correlation_id,
                        operation = name,
                        attempts = registration.retries + 1,
                        "retries exhausted"
                    );
                    registration.operation.fail(ClientError::RetriesExhausted {
                        operation: name,
                        attempts: registration.retries + 1,
                    });
                    return DispatchAction::None;
                }
                registration.retries += 1;
                let delay = self.retry.backoff(registration.retries);
                tracing::warn!(
                    %correlation_id,
                    operation = name,
                    retry = registration.retries,
                    ?delay,
                    reason = %result.description,
                    "retrying operation"
                );
                let frame = registration.frame.clone();
                pending.insert(correlation_id, registration);
                DispatchAction::Resend { frame, delay }
            }
            InspectionDecision::Reconnect(endpoint) => {
                if self.retry.exhausted(registration.retries) {
                    registration.operation.fail(ClientError::RetriesExhausted {
                        operation: name,
                        attempts: registration.retries + 1,
                    });
                    return DispatchAction::None;
                }
                registration.retries += 1;
                pending.insert(correlation_id, registration);
                DispatchAction::Reconnect(endpoint)
            }
            InspectionDecision::Subscribed | InspectionDecision::DoNothing => {
                pending.insert(correlation_id, registration);
                DispatchAction::None
            }
            InspectionDecision::NotHandled => {
                tracing::error!(%correlation_id, operation = name, %command, "unexpected command");
                registration
                    .operation
                    .fail(ClientError::UnexpectedCommand {
                        operation: name,
                        command,
                    });
                teardown(&registration, correlation_id)
            }
        }
    }

    /// Deregisters and fails one operation. Returns whether it was pending.
    pub fn fail(&self, correlation_id: Uuid, error: ClientError) -> bool {
        match self.pending.lock().remove(&correlation_id) {
            Some(mut registration) => {
                registration.operation.fail(error);
                true
            }
            None => false,
        }
    }

    /// Deregisters one operation without resolving it.
    pub fn remove(&self, correlation_id: Uuid) -> bool {
        self.pending.lock().remove(&correlation_id).is_some()
    }

    /// Fails every pending operation.
    pub fn fail_all(&self, error: impl Fn() -> ClientError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending operations");
        }
        for (_, mut registration) in drained {
            registration.operation.fail(error());
        }
    }

    /// Drops subscriptions and returns the frames of the one-shot
    /// operations to resend on the next connection.
    pub fn prepare_reconnect(&self) -> Vec<Frame> {
        let mut pending = self.pending.lock();
        let subscriptions: Vec<Uuid> = pending
            .iter()
            .filter(|(_, r)| r.operation.kind() == OperationKind::Subscription)
            .map(|(id, _)| *id)
            .collect();
        for id in subscriptions {
            if let Some(mut registration) = pending.remove(&id) {
                registration.operation.fail(ClientError::ConnectionClosed);
            }
        }
        pending.values().map(|r| r.frame.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn contains(&self, correlation_id: Uuid) -> bool {
        self.pending.lock().contains_key(&correlation_id)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn teardown(registration: &Registration, correlation_id: Uuid) -> DispatchAction {
    match registration.operation.teardown_package(correlation_id) {
        Some(frame) => DispatchAction::Send(frame),
        None => DispatchAction::None,
    }
}
