//! Synchronization engine.
//!
//! Single entry point for reconciling identity-provider events with the
//! local user record. Reconciliation is keyed on the provider id first and
//! the email second:
//!
//! - provider id already linked: nothing to do,
//! - email matches an unlinked row: relink it, keeping owned history,
//! - neither matches: create the account, consulting the auto-approval
//!   oracle when manual review is required.
//!
//! Every committed mutation is reported to the mass-sync breaker, and
//! every entry point checks it first.

use offerdesk_db::{
    ApprovalStatus, CreateModerationLogEntry, CreateUserRecord, CreditTransaction,
    ModerationLogEntry, UserRecord, TX_INITIAL_GRANT,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalStateMachine, TransitionActor, TransitionOutcome};
use crate::breaker::MassSyncBreaker;
use crate::error::SyncError;
use crate::occ;
use crate::oracle::{AutoApprovalClient, OracleDecision};
use crate::plans::{PlanResolver, UserRole};
use crate::provider::{IdentityProfile, IdentityProvider, ProviderError};
use crate::retry::RetryPolicy;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// When false, new accounts are created directly in `default_status`
    /// and the oracle is never consulted.
    pub approval_required: bool,
    /// Status for new accounts when approval is not required.
    pub default_status: ApprovalStatus,
    /// Credits granted on first approval.
    pub credit_grant_amount: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            approval_required: true,
            default_status: ApprovalStatus::Approved,
            credit_grant_amount: 100,
        }
    }
}

/// Profile fields carried by a provider `updated` event.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub external_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Status mirrored from provider metadata, when present.
    pub approval_status: Option<ApprovalStatus>,
}

impl ProfileUpdate {
    fn has_profile_fields(&self) -> bool {
        self.first_name.is_some() || self.last_name.is_some() || self.avatar_url.is_some()
    }
}

/// Initial status for a newly created account. The boolean reports
/// whether the oracle drove the approval (for the audit trail).
fn initial_status(
    settings: &SyncSettings,
    decision: Option<&OracleDecision>,
) -> (ApprovalStatus, bool) {
    if !settings.approval_required {
        return (settings.default_status, false);
    }
    match decision {
        Some(d) if d.approved => (ApprovalStatus::Approved, true),
        _ => (ApprovalStatus::Pending, false),
    }
}

/// Reconciles provider events against the local user table.
pub struct SyncEngine {
    pool: PgPool,
    provider: Arc<dyn IdentityProvider>,
    oracle: Option<AutoApprovalClient>,
    breaker: Arc<MassSyncBreaker>,
    resolver: Arc<PlanResolver>,
    approvals: ApprovalStateMachine,
    settings: SyncSettings,
    db_retry: RetryPolicy<sqlx::Error>,
    outbound_retry: RetryPolicy<ProviderError>,
}

impl SyncEngine {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn IdentityProvider>,
        oracle: Option<AutoApprovalClient>,
        breaker: Arc<MassSyncBreaker>,
        settings: SyncSettings,
    ) -> Self {
        let resolver = Arc::new(PlanResolver::new(pool.clone()));
        let approvals = ApprovalStateMachine::new(
            pool.clone(),
            settings.credit_grant_amount,
            Arc::clone(&resolver),
        );
        Self {
            pool,
            provider,
            oracle,
            breaker,
            resolver,
            approvals,
            settings,
            db_retry: RetryPolicy::database(),
            outbound_retry: RetryPolicy::outbound(),
        }
    }

    /// Synchronize one provider account into the local table.
    ///
    /// Returns the id of the local row the account resolved to. Safe to
    /// call repeatedly for the same account.
    pub async fn sync(&self, external_id: &str) -> Result<Uuid, SyncError> {
        self.breaker.check()?;

        let profile = self
            .outbound_retry
            .execute("fetch_profile", || {
                self.provider.fetch_profile(external_id)
            })
            .await?;

        // Case A: already linked.
        if let Some(existing) = self
            .db_retry
            .execute("find_by_external_id", || {
                UserRecord::find_by_external_id(&self.pool, external_id)
            })
            .await?
        {
            debug!(user_id = %existing.id, external_id, "Account already linked");
            return Ok(existing.id);
        }

        // Case B: an unlinked row owns this email.
        if let Some(by_email) = self
            .db_retry
            .execute("find_by_email", || {
                UserRecord::find_by_email(&self.pool, &profile.email)
            })
            .await?
        {
            return self.relink(by_email, &profile).await;
        }

        // Case C: first contact.
        self.create_account(&profile).await
    }

    /// Apply a provider `updated` event: refresh profile fields and, when
    /// the event carries a status, drive the transition through the state
    /// machine. A status change for a locked account is ignored with a
    /// warning rather than rejected; the provider is not allowed to
    /// release local locks.
    pub async fn handle_updated(&self, update: &ProfileUpdate) -> Result<Uuid, SyncError> {
        self.breaker.check()?;

        let user = match self
            .db_retry
            .execute("find_by_external_id", || {
                UserRecord::find_by_external_id(&self.pool, &update.external_id)
            })
            .await?
        {
            Some(user) => user,
            None => {
                // Out-of-order delivery: updated arrived before created.
                debug!(
                    external_id = %update.external_id,
                    "Update for unknown account; running full sync first"
                );
                let id = self.sync(&update.external_id).await?;
                self.db_retry
                    .execute("find_by_id", || UserRecord::find_by_id(&self.pool, id))
                    .await?
                    .ok_or(SyncError::RecordVanished)?
            }
        };

        let user = if update.has_profile_fields() {
            self.refresh_profile(user, update).await?
        } else {
            user
        };

        if let Some(target) = update.approval_status {
            if target != user.approval_status {
                if !system_transition_permitted(user.approval_status, target) {
                    warn!(
                        user_id = %user.id,
                        current = %user.approval_status,
                        requested = %target,
                        "Ignoring provider status change not permitted for automated actors"
                    );
                } else {
                    let outcome = self
                        .approvals
                        .transition(
                            &user,
                            target,
                            &TransitionActor::System,
                            Some("identity provider event"),
                            UserRole::Member,
                        )
                        .await?;
                    if outcome.changed {
                        self.breaker.record_mutation();
                    }
                    return Ok(outcome.user.id);
                }
            }
        }

        Ok(user.id)
    }

    /// Apply a provider `deleted` event. Idempotent: an already-absent
    /// account resolves to `Ok(false)`.
    pub async fn handle_deleted(&self, external_id: &str) -> Result<bool, SyncError> {
        self.breaker.check()?;

        let Some(user) = self
            .db_retry
            .execute("find_by_external_id", || {
                UserRecord::find_by_external_id(&self.pool, external_id)
            })
            .await?
        else {
            debug!(external_id, "Deletion for unknown account; nothing to do");
            return Ok(false);
        };

        let deleted = self
            .db_retry
            .execute("delete_user", || UserRecord::delete(&self.pool, user.id))
            .await?;

        if deleted {
            self.breaker.record_mutation();
            info!(user_id = %user.id, external_id, "User deleted; owned rows cascade");
        }
        Ok(deleted)
    }

    /// Administrator-requested transition by local user id. Mirrors the
    /// resulting status to the provider best-effort.
    pub async fn admin_transition(
        &self,
        user_id: Uuid,
        target: ApprovalStatus,
        admin: &str,
        reason: Option<&str>,
        role: UserRole,
    ) -> Result<TransitionOutcome, SyncError> {
        let user = self
            .db_retry
            .execute("find_by_id", || UserRecord::find_by_id(&self.pool, user_id))
            .await?
            .ok_or(SyncError::RecordVanished)?;

        let actor = TransitionActor::Admin(admin.to_string());
        let outcome = self
            .approvals
            .transition(&user, target, &actor, reason, role)
            .await?;

        if outcome.changed {
            self.breaker.record_mutation();
            if let Some(ext) = outcome.user.external_id.clone() {
                if let Err(e) = self
                    .outbound_retry
                    .execute("mirror_status", || self.provider.mirror_status(&ext, target))
                    .await
                {
                    warn!(%user_id, error = %e, "Failed to mirror status to identity provider");
                }
            }
        }
        Ok(outcome)
    }

    /// Case B: adopt an existing email-matched row. The conditioned write
    /// links the provider id, refreshes profile fields and leaves owned
    /// child rows untouched.
    async fn relink(
        &self,
        existing: UserRecord,
        profile: &IdentityProfile,
    ) -> Result<Uuid, SyncError> {
        let id = existing.id;
        let target = profile.external_id.clone();
        let attempt_pool = self.pool.clone();
        let refetch_pool = self.pool.clone();
        let p = profile.clone();

        let committed = occ::commit_versioned(
            "relink_external_id",
            existing,
            move |row: UserRecord| {
                let pool = attempt_pool.clone();
                let p = p.clone();
                async move {
                    UserRecord::link_external_id(
                        &pool,
                        row.id,
                        row.version,
                        &p.external_id,
                        p.first_name.as_deref(),
                        p.last_name.as_deref(),
                        p.avatar_url.as_deref(),
                    )
                    .await
                }
            },
            move || {
                let pool = refetch_pool.clone();
                async move { UserRecord::find_by_id(&pool, id).await }
            },
            move |row| row.external_id.as_deref() == Some(target.as_str()),
        )
        .await?;

        if committed.was_applied() {
            self.breaker.record_mutation();
            info!(
                user_id = %id,
                external_id = %profile.external_id,
                "Linked existing account to provider identity"
            );
        }
        Ok(id)
    }

    /// Case C: create the account, consult the oracle, grant credits when
    /// born approved, then run the non-fatal tail (audit entry, status
    /// mirror, plan assignment).
    async fn create_account(&self, profile: &IdentityProfile) -> Result<Uuid, SyncError> {
        let decision: Option<OracleDecision> = match (&self.oracle, self.settings.approval_required)
        {
            (Some(client), true) => Some(client.evaluate(&profile.email).await),
            _ => None,
        };
        let (status, auto_approved) = initial_status(&self.settings, decision.as_ref());

        if let Some(d) = &decision {
            if !d.approved {
                debug!(
                    email = %profile.email,
                    diagnostic = d.diagnostic.as_deref().unwrap_or("oracle declined"),
                    "Account routed to manual review"
                );
            }
        }

        let input = CreateUserRecord {
            external_id: Some(profile.external_id.clone()),
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            approval_status: status,
            approved_by: (status == ApprovalStatus::Approved).then(|| "system".to_string()),
        };

        let user = self
            .db_retry
            .execute("create_user", || self.create_once(&input))
            .await?;
        self.breaker.record_mutation();
        info!(
            user_id = %user.id,
            external_id = %profile.external_id,
            status = %status,
            auto_approved,
            "User created from provider profile"
        );

        if auto_approved {
            let entry = CreateModerationLogEntry {
                user_id: user.id,
                action: "auto_approval".to_string(),
                previous_status: None,
                new_status: Some(ApprovalStatus::Approved),
                actor: "system".to_string(),
                reason: Some("auto-approval oracle confirmed".to_string()),
                metadata: serde_json::json!({
                    "oracle_diagnostic": decision.and_then(|d| d.diagnostic),
                }),
            };
            if let Err(e) = self
                .db_retry
                .execute("moderation_log", || {
                    ModerationLogEntry::create(&self.pool, &entry)
                })
                .await
            {
                warn!(user_id = %user.id, error = %e, "Failed to append auto-approval log entry");
            }
        }

        if let Err(e) = self
            .outbound_retry
            .execute("mirror_status", || {
                self.provider.mirror_status(&profile.external_id, status)
            })
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to mirror status to identity provider");
        }

        if let Err(e) = self.resolver.assign(user.id, status, UserRole::Member).await {
            warn!(user_id = %user.id, error = %e, "Initial plan assignment failed");
        }

        Ok(user.id)
    }

    /// One creation attempt: user row plus, when born approved, the credit
    /// grant and its ledger entry, all in a single transaction.
    async fn create_once(&self, input: &CreateUserRecord) -> Result<UserRecord, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let user = UserRecord::create_in_tx(&mut tx, input).await?;
        if input.approval_status == ApprovalStatus::Approved && self.settings.credit_grant_amount > 0
        {
            if UserRecord::grant_credit_in_tx(&mut tx, user.id, self.settings.credit_grant_amount)
                .await?
            {
                CreditTransaction::create_in_tx(
                    &mut tx,
                    user.id,
                    self.settings.credit_grant_amount,
                    TX_INITIAL_GRANT,
                    Some("initial approval grant"),
                )
                .await?;
            }
        }
        tx.commit().await?;
        Ok(user)
    }

    async fn refresh_profile(
        &self,
        user: UserRecord,
        update: &ProfileUpdate,
    ) -> Result<UserRecord, SyncError> {
        let id = user.id;
        let attempt_pool = self.pool.clone();
        let refetch_pool = self.pool.clone();
        let fields = update.clone();
        let applied = update.clone();

        let committed = occ::commit_versioned(
            "refresh_profile",
            user,
            move |row: UserRecord| {
                let pool = attempt_pool.clone();
                let fields = fields.clone();
                async move {
                    UserRecord::update_profile(
                        &pool,
                        row.id,
                        row.version,
                        fields.first_name.as_deref(),
                        fields.last_name.as_deref(),
                        fields.avatar_url.as_deref(),
                    )
                    .await
                }
            },
            move || {
                let pool = refetch_pool.clone();
                async move { UserRecord::find_by_id(&pool, id).await }
            },
            move |row| profile_matches(row, &applied),
        )
        .await?;

        if committed.was_applied() {
            self.breaker.record_mutation();
            debug!(user_id = %id, "Profile fields refreshed from provider event");
        }
        Ok(committed.into_inner())
    }
}

/// Provider events run as the system actor. A transition the rules forbid
/// (releasing a locked account, demoting to pending) is dropped with a
/// warning instead of erroring: the delivery is acknowledged, so a poison
/// event is not redelivered forever.
fn system_transition_permitted(current: ApprovalStatus, target: ApprovalStatus) -> bool {
    crate::approval::validate_transition(current, target, false).is_ok()
}

/// True when every field the update carries already matches the row.
fn profile_matches(row: &UserRecord, update: &ProfileUpdate) -> bool {
    let field_ok = |updated: &Option<String>, current: &Option<String>| match updated {
        Some(v) => current.as_deref() == Some(v.as_str()),
        None => true,
    };
    field_ok(&update.first_name, &row.first_name)
        && field_ok(&update.last_name, &row.last_name)
        && field_ok(&update.avatar_url, &row.avatar_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn settings(approval_required: bool) -> SyncSettings {
        SyncSettings {
            approval_required,
            default_status: ApprovalStatus::Approved,
            credit_grant_amount: 100,
        }
    }

    #[test]
    fn test_initial_status_without_approval_gate() {
        let (status, auto) = initial_status(&settings(false), None);
        assert_eq!(status, ApprovalStatus::Approved);
        assert!(!auto);
    }

    #[test]
    fn test_initial_status_oracle_confirms() {
        let decision = OracleDecision::approve();
        let (status, auto) = initial_status(&settings(true), Some(&decision));
        assert_eq!(status, ApprovalStatus::Approved);
        assert!(auto);
    }

    #[test]
    fn test_initial_status_oracle_declines() {
        let decision = OracleDecision::not_approved("oracle returned status 500");
        let (status, auto) = initial_status(&settings(true), Some(&decision));
        assert_eq!(status, ApprovalStatus::Pending);
        assert!(!auto);
    }

    #[test]
    fn test_initial_status_oracle_absent_falls_back_to_pending() {
        let (status, auto) = initial_status(&settings(true), None);
        assert_eq!(status, ApprovalStatus::Pending);
        assert!(!auto);
    }

    #[test]
    fn test_provider_status_change_for_locked_account_not_permitted() {
        for current in [ApprovalStatus::Rejected, ApprovalStatus::Suspended] {
            assert!(!system_transition_permitted(
                current,
                ApprovalStatus::Approved
            ));
        }
    }

    #[test]
    fn test_provider_demotion_to_pending_not_permitted() {
        assert!(!system_transition_permitted(
            ApprovalStatus::Approved,
            ApprovalStatus::Pending
        ));
    }

    #[test]
    fn test_provider_approval_of_pending_permitted() {
        assert!(system_transition_permitted(
            ApprovalStatus::Pending,
            ApprovalStatus::Approved
        ));
        assert!(system_transition_permitted(
            ApprovalStatus::Approved,
            ApprovalStatus::Suspended
        ));
    }

    fn row(first: Option<&str>, last: Option<&str>) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            external_id: Some("idp_1".to_string()),
            email: "a@example.com".to_string(),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            avatar_url: None,
            approval_status: ApprovalStatus::Approved,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            credit_balance: 0,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_profile_matches_ignores_absent_fields() {
        let update = ProfileUpdate {
            external_id: "idp_1".to_string(),
            first_name: Some("Ada".to_string()),
            ..ProfileUpdate::default()
        };
        assert!(profile_matches(&row(Some("Ada"), Some("Lovelace")), &update));
        assert!(!profile_matches(&row(Some("Grace"), None), &update));
    }

    #[test]
    fn test_update_without_profile_fields() {
        let update = ProfileUpdate {
            external_id: "idp_1".to_string(),
            approval_status: Some(ApprovalStatus::Approved),
            ..ProfileUpdate::default()
        };
        assert!(!update.has_profile_fields());
    }
}
