use crate::error::ClientError;
use crate::operation::{OperationSpec, ResponseStatus};
use crate::types::{PersistentSubscriptionSettings, SystemConsumerStrategy};
use evstore_protocol::message::{
    self, enum_value, CreatePersistentSubscriptionCompleted, CreatePersistentSubscriptionResult,
    DeletePersistentSubscriptionCompleted, DeletePersistentSubscriptionResult,
    UpdatePersistentSubscriptionCompleted, UpdatePersistentSubscriptionResult,
};
use evstore_protocol::{InboundMessage, TcpCommand};
use std::time::Duration;

fn millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

/// Settings flattened into the create/update wire layout.
struct GroupFields {
    group: String,
    stream: String,
    settings: PersistentSubscriptionSettings,
}

impl GroupFields {
    fn failed(&self, reason: &Option<String>) -> ClientError {
        ClientError::PersistentSubscriptionFailed {
            stream: self.stream.clone(),
            group: self.group.clone(),
            reason: reason.clone().unwrap_or_default(),
        }
    }

    fn access_denied(&self) -> ClientError {
        ClientError::AccessDenied(format!(
            "persistent subscription '{}' on '{}'",
            self.group, self.stream
        ))
    }

    fn does_not_exist(&self) -> ClientError {
        ClientError::PersistentSubscriptionDoesNotExist {
            stream: self.stream.clone(),
            group: self.group.clone(),
        }
    }

    fn create_message(&self) -> message::CreatePersistentSubscription {
        let s = &self.settings;
        message::CreatePersistentSubscription {
            subscription_group_name: self.group.clone(),
            event_stream_id: self.stream.clone(),
            resolve_link_tos: s.resolve_link_tos,
            start_from: s.start_from,
            message_timeout_milliseconds: millis(s.message_timeout),
            record_statistics: s.extra_statistics,
            live_buffer_size: s.live_buffer_size,
            read_batch_size: s.read_batch_size,
            buffer_size: s.history_buffer_size,
            max_retry_count: s.max_retry_count,
            prefer_round_robin: s.consumer_strategy == SystemConsumerStrategy::RoundRobin,
            checkpoint_after_time: millis(s.checkpoint_after),
            checkpoint_max_count: s.max_checkpoint_count,
            checkpoint_min_count: s.min_checkpoint_count,
            subscriber_max_count: s.max_subscriber_count,
            named_consumer_strategy: Some(s.consumer_strategy.as_str().to_string()),
        }
    }

    fn update_message(&self) -> message::UpdatePersistentSubscription {
        let m = self.create_message();
        message::UpdatePersistentSubscription {
            subscription_group_name: m.subscription_group_name,
            event_stream_id: m.event_stream_id,
            resolve_link_tos: m.resolve_link_tos,
            start_from: m.start_from,
            message_timeout_milliseconds: m.message_timeout_milliseconds,
            record_statistics: m.record_statistics,
            live_buffer_size: m.live_buffer_size,
            read_batch_size: m.read_batch_size,
            buffer_size: m.buffer_size,
            max_retry_count: m.max_retry_count,
            prefer_round_robin: m.prefer_round_robin,
            checkpoint_after_time: m.checkpoint_after_time,
            checkpoint_max_count: m.checkpoint_max_count,
            checkpoint_min_count: m.checkpoint_min_count,
            subscriber_max_count: m.subscriber_max_count,
            named_consumer_strategy: m.named_consumer_strategy,
        }
    }
}

/// Creates a persistent subscription group.
pub struct CreatePersistentSubscription(GroupFields);

impl CreatePersistentSubscription {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings,
    ) -> Self {
        Self(GroupFields {
            group: group.into(),
            stream: stream.into(),
            settings,
        })
    }
}

impl OperationSpec for CreatePersistentSubscription {
    type Request = message::CreatePersistentSubscription;
    type Response = CreatePersistentSubscriptionCompleted;
    type Output = ();

    fn name(&self) -> &'static str {
        "CreatePersistentSubscription"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::CreatePersistentSubscription
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::CreatePersistentSubscriptionCompleted
    }

    fn request(&self) -> message::CreatePersistentSubscription {
        self.0.create_message()
    }

    fn extract(message: InboundMessage) -> Option<CreatePersistentSubscriptionCompleted> {
        match message {
            InboundMessage::CreatePersistentSubscriptionCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &CreatePersistentSubscriptionCompleted) -> ResponseStatus {
        use CreatePersistentSubscriptionResult as R;
        match enum_value::<R>("CreatePersistentSubscriptionResult", response.result) {
            Ok(R::Success) => ResponseStatus::Success,
            Ok(R::AlreadyExists) => {
                ResponseStatus::Fail(ClientError::PersistentSubscriptionAlreadyExists {
                    stream: self.0.stream.clone(),
                    group: self.0.group.clone(),
                })
            }
            Ok(R::Fail) => ResponseStatus::Fail(self.0.failed(&response.reason)),
            Ok(R::AccessDenied) => ResponseStatus::Fail(self.0.access_denied()),
            Err(err) => ResponseStatus::Fail(err.into()),
        }
    }

    fn transform_response(
        &self,
        _: CreatePersistentSubscriptionCompleted,
    ) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Changes the settings of an existing group.
pub struct UpdatePersistentSubscription(GroupFields);

impl UpdatePersistentSubscription {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings,
    ) -> Self {
        Self(GroupFields {
            group: group.into(),
            stream: stream.into(),
            settings,
        })
    }
}

impl OperationSpec for UpdatePersistentSubscription {
    type Request = message::UpdatePersistentSubscription;
    type Response = UpdatePersistentSubscriptionCompleted;
    type Output = ();

    fn name(&self) -> &'static str {
        "UpdatePersistentSubscription"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::UpdatePersistentSubscription
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::UpdatePersistentSubscriptionCompleted
    }

    fn request(&self) -> message::UpdatePersistentSubscription {
        self.0.update_message()
    }

    fn extract(message: InboundMessage) -> Option<UpdatePersistentSubscriptionCompleted> {
        match message {
            InboundMessage::UpdatePersistentSubscriptionCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &UpdatePersistentSubscriptionCompleted) -> ResponseStatus {
        use UpdatePersistentSubscriptionResult as R;
        match enum_value::<R>("UpdatePersistentSubscriptionResult", response.result) {
            Ok(R::Success) => ResponseStatus::Success,
            Ok(R::DoesNotExist) => ResponseStatus::Fail(self.0.does_not_exist()),
            Ok(R::Fail) => ResponseStatus::Fail(self.0.failed(&response.reason)),
            Ok(R::AccessDenied) => ResponseStatus::Fail(self.0.access_denied()),
            Err(err) => ResponseStatus::Fail(err.into()),
        }
    }

    fn transform_response(
        &self,
        _: UpdatePersistentSubscriptionCompleted,
    ) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Deletes a group.
pub struct DeletePersistentSubscription(GroupFields);

impl DeletePersistentSubscription {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self(GroupFields {
            group: group.into(),
            stream: stream.into(),
            settings: PersistentSubscriptionSettings::default(),
        })
    }
}

impl OperationSpec for DeletePersistentSubscription {
    type Request = message::DeletePersistentSubscription;
    type Response = DeletePersistentSubscriptionCompleted;
    type Output = ();

    fn name(&self) -> &'static str {
        "DeletePersistentSubscription"
    }

    fn request_command(&self) -> TcpCommand {
        TcpCommand::DeletePersistentSubscription
    }

    fn response_command(&self) -> TcpCommand {
        TcpCommand::DeletePersistentSubscriptionCompleted
    }

    fn request(&self) -> message::DeletePersistentSubscription {
        message::DeletePersistentSubscription {
            subscription_group_name: self.0.group.clone(),
            event_stream_id: self.0.stream.clone(),
        }
    }

    fn extract(message: InboundMessage) -> Option<DeletePersistentSubscriptionCompleted> {
        match message {
            InboundMessage::DeletePersistentSubscriptionCompleted(completed) => Some(completed),
            _ => None,
        }
    }

    fn inspect_response(&self, response: &DeletePersistentSubscriptionCompleted) -> ResponseStatus {
        use DeletePersistentSubscriptionResult as R;
        match enum_value::<R>("DeletePersistentSubscriptionResult", response.result) {
            Ok(R::Success) => ResponseStatus::Success,
            Ok(R::DoesNotExist) => ResponseStatus::Fail(self.0.does_not_exist()),
            Ok(R::Fail) => ResponseStatus::Fail(self.0.failed(&response.reason)),
            Ok(R::AccessDenied) => ResponseStatus::Fail(self.0.access_denied()),
            Err(err) => ResponseStatus::Fail(err.into()),
        }
    }

    fn transform_response(
        &self,
        _: DeletePersistentSubscriptionCompleted,
    ) -> Result<(), ClientError> {
        Ok(())
    }
}
