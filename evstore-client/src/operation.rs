//! The unit of work driven by the dispatcher.
//!
//! An [`Operation`] builds its request frame, classifies every reply that
//! carries its correlation id, and resolves the caller's handle. One-shot
//! requests are expressed as an [`OperationSpec`] wrapped in a
//! [`OneShotOperation`]; subscriptions implement [`Operation`] directly.

use crate::error::ClientError;
use evstore_protocol::message::{
    enum_value, MasterInfo, NotHandled, NotHandledReason, OperationResult,
};
use evstore_protocol::{Credentials, Frame, InboundMessage, InboundPackage, TcpCommand};
use prost::Message;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Whether an operation expects one reply or an open-ended stream of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    OneShot,
    Subscription,
}

/// Where a `NotMaster` reply says the request should go instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterEndpoint {
    pub tcp: SocketAddr,
    pub secure_tcp: Option<SocketAddr>,
}

impl MasterEndpoint {
    fn from_master_info(info: &MasterInfo) -> Option<Self> {
        let tcp = socket_addr(&info.external_tcp_address, info.external_tcp_port)?;
        let secure_tcp = match (
            info.external_secure_tcp_address.as_deref(),
            info.external_secure_tcp_port,
        ) {
            (Some(address), Some(port)) if port > 0 => socket_addr(address, port),
            _ => None,
        };
        Some(Self { tcp, secure_tcp })
    }

    /// Endpoint to use, preferring the secure one when TLS is on.
    pub fn select(&self, tls: bool) -> SocketAddr {
        match (tls, self.secure_tcp) {
            (true, Some(secure)) => secure,
            _ => self.tcp,
        }
    }
}

fn socket_addr(address: &str, port: i32) -> Option<SocketAddr> {
    let ip: IpAddr = address.parse().ok()?;
    let port = u16::try_from(port).ok()?;
    Some(SocketAddr::new(ip, port))
}

/// What the dispatcher should do after an operation inspected a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionDecision {
    /// The operation is finished; deregister it.
    EndOperation,
    /// Resend the same request under the same correlation id.
    Retry,
    /// Reconnect to another node and resend.
    Reconnect(MasterEndpoint),
    /// A subscription was confirmed; keep it registered.
    Subscribed,
    /// Keep the registration open.
    DoNothing,
    /// The reply makes no sense for this operation.
    NotHandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionResult {
    pub decision: InspectionDecision,
    pub description: String,
}

impl InspectionResult {
    pub fn new(decision: InspectionDecision, description: impl Into<String>) -> Self {
        Self {
            decision,
            description: description.into(),
        }
    }

    pub fn end(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::EndOperation, description)
    }

    pub fn retry(description: impl Into<String>) -> Self {
        Self::new(InspectionDecision::Retry, description)
    }
}

impl fmt::Display for InspectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.decision, self.description)
    }
}

/// A request registered with the dispatcher.
pub trait Operation: Send {
    fn name(&self) -> &'static str;

    fn kind(&self) -> OperationKind {
        OperationKind::OneShot
    }

    /// Builds the request frame sent under `correlation_id`.
    fn create_network_package(&self, correlation_id: Uuid) -> Frame;

    /// Classifies a reply carrying this operation's correlation id.
    fn inspect_package(&mut self, package: InboundPackage) -> InspectionResult;

    /// Fails the operation. Has no effect once it has completed.
    fn fail(&mut self, error: ClientError);

    /// Whether the caller stopped listening for the outcome.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Frame to send once the operation is deregistered, if any.
    fn teardown_package(&self, _correlation_id: Uuid) -> Option<Frame> {
        None
    }
}

/// Classification of a typed reply by an [`OperationSpec`].
#[derive(Debug)]
pub enum ResponseStatus {
    Success,
    Retry(String),
    Fail(ClientError),
}

/// Describes a single request/reply exchange.
pub trait OperationSpec: Send + 'static {
    type Request: Message;
    type Response;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    fn request_command(&self) -> TcpCommand;

    fn response_command(&self) -> TcpCommand;

    fn request(&self) -> Self::Request;

    /// Picks the expected reply out of an inbound message.
    fn extract(message: InboundMessage) -> Option<Self::Response>;

    fn inspect_response(&self, response: &Self::Response) -> ResponseStatus;

    fn transform_response(&self, response: Self::Response) -> Result<Self::Output, ClientError>;
}

type Outcome<T> = Result<T, ClientError>;

/// An [`OperationSpec`] plus the handle its caller awaits.
pub struct OneShotOperation<S: OperationSpec> {
    spec: S,
    credentials: Option<Credentials>,
    result: Option<oneshot::Sender<Outcome<S::Output>>>,
}

impl<S: OperationSpec> OneShotOperation<S> {
    pub fn new(
        spec: S,
        credentials: Option<Credentials>,
    ) -> (Self, oneshot::Receiver<Outcome<S::Output>>) {
        let (tx, rx) = oneshot::channel();
        let operation = Self {
            spec,
            credentials,
            result: Some(tx),
        };
        (operation, rx)
    }

    fn resolve(&mut self, outcome: Outcome<S::Output>) {
        if let Some(tx) = self.result.take() {
            let _ = tx.send(outcome);
        }
    }

    fn inspect_response(&mut self, response: S::Response) -> InspectionResult {
        match self.spec.inspect_response(&response) {
            ResponseStatus::Success => {
                let outcome = self.spec.transform_response(response);
                self.resolve(outcome);
                InspectionResult::end("Success")
            }
            ResponseStatus::Retry(description) => InspectionResult::retry(description),
            ResponseStatus::Fail(error) => {
                let description = error.to_string();
                self.resolve(Err(error));
                InspectionResult::end(description)
            }
        }
    }
}

impl<S: OperationSpec> Operation for OneShotOperation<S> {
    fn name(&self) -> &'static str {
        self.spec.name()
    }

    fn create_network_package(&self, correlation_id: Uuid) -> Frame {
        Frame::from_message(
            self.spec.request_command(),
            correlation_id,
            &self.spec.request(),
        )
        .with_credentials(self.credentials.clone())
    }

    fn inspect_package(&mut self, package: InboundPackage) -> InspectionResult {
        match package.message {
            InboundMessage::NotHandled(ref not_handled) => {
                match inspect_not_handled(not_handled) {
                    Ok(result) => result,
                    Err(error) => {
                        let description = error.to_string();
                        self.resolve(Err(error));
                        InspectionResult::end(description)
                    }
                }
            }
            InboundMessage::NotAuthenticated(reason) => {
                self.resolve(Err(ClientError::NotAuthenticated(reason)));
                InspectionResult::end("NotAuthenticated")
            }
            InboundMessage::BadRequest(reason) => {
                self.resolve(Err(ClientError::BadRequest(reason)));
                InspectionResult::end("BadRequest")
            }
            message if package.command == self.spec.response_command() => {
                match S::extract(message) {
                    Some(response) => self.inspect_response(response),
                    None => InspectionResult::new(
                        InspectionDecision::NotHandled,
                        format!("unexpected payload for {}", package.command),
                    ),
                }
            }
            _ => InspectionResult::new(
                InspectionDecision::NotHandled,
                format!("unexpected command {}", package.command),
            ),
        }
    }

    fn fail(&mut self, error: ClientError) {
        self.resolve(Err(error));
    }

    fn is_cancelled(&self) -> bool {
        self.result.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Routing decision for a `NotHandled` reply.
pub(crate) fn inspect_not_handled(
    not_handled: &NotHandled,
) -> Result<InspectionResult, ClientError> {
    let reason: NotHandledReason = enum_value("NotHandledReason", not_handled.reason)?;
    let result = match reason {
        NotHandledReason::NotReady => InspectionResult::retry("NotHandled - NotReady"),
        NotHandledReason::TooBusy => InspectionResult::retry("NotHandled - TooBusy"),
        NotHandledReason::NotMaster => {
            let master = not_handled
                .additional_info
                .as_deref()
                .and_then(|info| MasterInfo::decode(info).ok())
                .and_then(|info| MasterEndpoint::from_master_info(&info));
            match master {
                Some(endpoint) => InspectionResult::new(
                    InspectionDecision::Reconnect(endpoint),
                    format!("NotHandled - NotMaster, master at {}", endpoint.tcp),
                ),
                None => InspectionResult::retry("NotHandled - NotMaster without master info"),
            }
        }
    };
    Ok(result)
}

/// Maps the write-path result code shared by appends, deletes and transactions.
pub(crate) fn map_operation_result(
    raw: i32,
    stream: &str,
    expected_version: i64,
    current_version: Option<i64>,
) -> ResponseStatus {
    let result: OperationResult = match enum_value("OperationResult", raw) {
        Ok(result) => result,
        Err(err) => return ResponseStatus::Fail(err.into()),
    };
    match result {
        OperationResult::Success => ResponseStatus::Success,
        OperationResult::PrepareTimeout
        | OperationResult::CommitTimeout
        | OperationResult::ForwardTimeout => ResponseStatus::Retry(format!("{:?}", result)),
        OperationResult::WrongExpectedVersion => {
            ResponseStatus::Fail(ClientError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected: expected_version,
                current: current_version,
            })
        }
        OperationResult::StreamDeleted => {
            ResponseStatus::Fail(ClientError::StreamDeleted(stream.to_string()))
        }
        OperationResult::InvalidTransaction => {
            ResponseStatus::Fail(ClientError::InvalidTransaction)
        }
        OperationResult::AccessDenied => ResponseStatus::Fail(ClientError::AccessDenied(format!(
            "write to stream '{}'",
            stream
        ))),
    }
}
