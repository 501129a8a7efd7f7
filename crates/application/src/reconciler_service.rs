use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jitgate_core::AppResult;
use jitgate_domain::{AccessRequest, AuditEventType, CallbackPayload, RequestStatus};
use tracing::{info, warn};

use crate::audit_service::{AuditActor, AuditService};
use crate::identity_ports::IdentityProvider;
use crate::notify_ports::CallbackNotifier;
use crate::store_ports::{NonceRepository, RequestRepository, StatusUpdate};

/// Actor label for reconciler-driven transitions.
const RECONCILER_ACTOR: &str = "reconciler";

/// Outcome of one reconciler sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    /// Overdue grants the sweep looked at.
    pub processed: usize,
    /// Grants whose revoke failed; they were moved to ERROR and skipped.
    pub errored: usize,
    /// Expired replay nonces removed.
    pub purged_nonces: u64,
}

/// Sweeps overdue grants so expiry holds even when the workflow has failed.
///
/// The reconciler only ever revokes; a grant that never reached GRANTED stays
/// in ERROR until human action.
#[derive(Clone)]
pub struct ReconcilerService {
    requests: Arc<dyn RequestRepository>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn CallbackNotifier>,
    nonces: Arc<dyn NonceRepository>,
    audit: AuditService,
}

impl ReconcilerService {
    /// Creates a reconciler service.
    #[must_use]
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn CallbackNotifier>,
        nonces: Arc<dyn NonceRepository>,
        audit: AuditService,
    ) -> Self {
        Self {
            requests,
            identity,
            notifier,
            nonces,
            audit,
        }
    }

    /// Runs one sweep: revokes every GRANTED request whose end time passed,
    /// then purges expired nonces.
    ///
    /// A request whose revoke fails is moved to ERROR and the sweep carries
    /// on; the summary reports partial failure instead of aborting the tick.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> AppResult<SweepSummary> {
        info!(now = %now, "reconciler sweep starting");

        let overdue = self.requests.list_expired_grants(now).await?;
        info!(count = overdue.len(), "found expired grants");

        let processed = overdue.len();
        let mut errored = 0_usize;
        for request in overdue {
            if let Err(error) = self.revoke_expired(&request).await {
                warn!(
                    request_id = %request.request_id,
                    account_id = request.account_id.as_str(),
                    error = %error,
                    "failed to revoke expired grant"
                );
                errored += 1;
            }
        }

        let purged_nonces = match self.nonces.purge_expired(now.timestamp()).await {
            Ok(purged) => purged,
            Err(error) => {
                warn!(error = %error, "failed to purge expired nonces");
                0
            }
        };

        if errored > 0 {
            warn!(total = processed, errors = errored, "reconciler completed with errors");
        } else {
            info!(processed, purged_nonces, "reconciler sweep completed");
        }

        Ok(SweepSummary {
            processed,
            errored,
            purged_nonces,
        })
    }

    async fn revoke_expired(&self, request: &AccessRequest) -> AppResult<()> {
        if let Err(error) = self
            .identity
            .revoke(
                request.account_id.as_str(),
                request.identity_user_id.as_str(),
            )
            .await
        {
            let errored = self
                .requests
                .conditional_update_status(
                    request.request_id,
                    RequestStatus::Granted,
                    StatusUpdate::errored(format!("reconciler revoke failed: {error}")),
                )
                .await;
            if let Err(update_error) = errored {
                warn!(
                    request_id = %request.request_id,
                    error = %update_error,
                    "failed to record reconciler revoke error"
                );
            }
            self.record_audit(
                request,
                AuditEventType::Error,
                BTreeMap::from([("error".to_owned(), error.to_string())]),
            )
            .await;
            return Err(error);
        }

        if let Err(error) = self
            .requests
            .conditional_update_status(
                request.request_id,
                RequestStatus::Granted,
                StatusUpdate::expired(Utc::now()),
            )
            .await
        {
            if error.is_conflict() {
                // Another actor already moved the request, typically a manual
                // revoke; the access is gone and their audit stands.
                warn!(
                    request_id = %request.request_id,
                    "conditional update to EXPIRED conflicted, likely revoked already"
                );
                return Ok(());
            }
            return Err(error);
        }

        self.record_audit(request, AuditEventType::Expired, BTreeMap::new())
            .await;

        let payload = CallbackPayload {
            request_id: request.request_id,
            status: RequestStatus::Expired,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor: RECONCILER_ACTOR.to_owned(),
            details: None,
        };
        if let Err(error) = self.notifier.notify(&payload).await {
            warn!(
                request_id = %request.request_id,
                error = %error,
                "expiry callback delivery failed"
            );
        }

        info!(
            request_id = %request.request_id,
            account_id = request.account_id.as_str(),
            requester = request.requester_email.as_str(),
            "expired grant revoked"
        );
        Ok(())
    }

    async fn record_audit(
        &self,
        request: &AccessRequest,
        event_type: AuditEventType,
        details: BTreeMap<String, String>,
    ) {
        if let Err(error) = self
            .audit
            .record(
                request.request_id,
                event_type,
                request.account_id.as_str(),
                request.channel_id.as_str(),
                AuditActor::System(RECONCILER_ACTOR),
                details,
            )
            .await
        {
            warn!(
                request_id = %request.request_id,
                event_type = event_type.as_str(),
                error = %error,
                "failed to write audit event"
            );
        }
    }
}
