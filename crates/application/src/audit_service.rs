use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use jitgate_core::{Actor, AppResult};
use jitgate_domain::{AuditEvent, AuditEventType};
use tracing::info;
use uuid::Uuid;

use crate::store_ports::AuditRepository;

/// Who drove a transition, for audit attribution.
#[derive(Debug, Clone, Copy)]
pub enum AuditActor<'a> {
    /// A chat user acted.
    User(&'a Actor),
    /// A system component acted, identified by label (`system`, `reconciler`).
    System(&'a str),
}

/// Records audit events for request state transitions.
#[derive(Clone)]
pub struct AuditService {
    repository: Arc<dyn AuditRepository>,
}

impl AuditService {
    /// Creates an audit service over the append-only event store.
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Appends one event with a generated event id and timestamp.
    pub async fn record(
        &self,
        request_id: Uuid,
        event_type: AuditEventType,
        account_id: &str,
        channel_id: &str,
        actor: AuditActor<'_>,
        details: BTreeMap<String, String>,
    ) -> AppResult<()> {
        let (actor_chat_id, actor_email) = match actor {
            AuditActor::User(actor) => (
                Some(actor.chat_user_id().to_owned()),
                actor.email().to_owned(),
            ),
            AuditActor::System(label) => (None, label.to_owned()),
        };

        let event = AuditEvent {
            request_id,
            event_id: Uuid::new_v4(),
            event_time: Utc::now(),
            event_type,
            account_id: account_id.to_owned(),
            channel_id: channel_id.to_owned(),
            actor_chat_id,
            actor_email,
            details,
        };

        self.repository.append(&event).await?;

        info!(
            request_id = %request_id,
            event_type = event_type.as_str(),
            event_id = %event.event_id,
            "audit event recorded"
        );
        Ok(())
    }
}
