//! Subscription state machine
//! Owns lifecycle transitions (activate, renew, past_due, cancel) and
//! their side effects on the user row and the credit ledger.

use crate::config::PlanConfig;
use crate::database::credit_ledger_repository::CreditLedgerRepository;
use crate::database::error::DatabaseError;
use crate::database::subscription_repository::{Subscription, SubscriptionRepository};
use crate::database::user_repository::UserRepository;
use crate::gateways::types::GatewayName;
use crate::services::credits::{CreditLedgerService, LedgerOutcome};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

pub const FREE_PLAN: &str = "free";

const FALLBACK_PERIOD_DAYS: i64 = 30;

/// Resolve the billing window reported by a gateway. A missing start
/// defaults to `now`; a missing or inverted end collapses to thirty days
/// after the start so the stored interval is never zero-length or
/// backwards.
pub fn resolve_period(
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = period_start.unwrap_or(now);
    match period_end {
        Some(end) if end > start => (start, end),
        _ => (start, start + Duration::days(FALLBACK_PERIOD_DAYS)),
    }
}

/// A transition plus the credit grant it carried
#[derive(Debug)]
pub struct SubscriptionChange {
    pub subscription: Subscription,
    pub credits: LedgerOutcome,
}

pub struct SubscriptionService {
    subscription_repo: SubscriptionRepository,
    user_repo: UserRepository,
    credits: CreditLedgerService,
    plans: Vec<PlanConfig>,
}

impl SubscriptionService {
    pub fn new(
        subscription_repo: SubscriptionRepository,
        user_repo: UserRepository,
        ledger_repo: CreditLedgerRepository,
        plans: Vec<PlanConfig>,
    ) -> Self {
        Self {
            subscription_repo,
            user_repo,
            credits: CreditLedgerService::new(ledger_repo),
            plans,
        }
    }

    pub fn plan(&self, plan_id: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Activate (or re-point) the user's subscription after a completed
    /// checkout. The user keeps at most one live row; paying through a
    /// different gateway reuses it and clears the old gateway's id. Plan
    /// credits are granted under the checkout's idempotency key, so a
    /// replayed delivery cannot award them twice.
    pub async fn activate(
        &self,
        user_id: Uuid,
        plan: &PlanConfig,
        gateway: GatewayName,
        gateway_subscription_id: Option<&str>,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionChange, DatabaseError> {
        let (start, end) = resolve_period(None, None, now);
        let subscription = self
            .subscription_repo
            .activate(
                user_id,
                &plan.id,
                gateway.as_str(),
                gateway_subscription_id,
                start,
                end,
            )
            .await?;
        self.user_repo
            .update_plan(user_id, &plan.id, Some(end))
            .await?;

        let credits = self
            .credits
            .grant(
                user_id,
                plan.monthly_credits,
                "plan_grant",
                &format!("{} plan activation", plan.name),
                Some(idempotency_key),
            )
            .await?;

        info!(
            user_id = %user_id,
            plan = %plan.id,
            gateway = %gateway,
            subscription_id = %subscription.id,
            "subscription activated"
        );

        Ok(SubscriptionChange {
            subscription,
            credits,
        })
    }

    /// Apply a paid renewal invoice: extend the period from the gateway's
    /// authoritative bounds and grant the plan's monthly credits keyed by
    /// the invoice's transaction reference. Returns `None` when no live
    /// subscription matches the gateway reference.
    pub async fn renew(
        &self,
        gateway: GatewayName,
        subscription_ref: &str,
        idempotency_key: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionChange>, DatabaseError> {
        let subscription = match self
            .subscription_repo
            .find_by_gateway_reference(gateway.as_str(), subscription_ref)
            .await?
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let (start, end) = resolve_period(period_start, period_end, now);
        let subscription = self
            .subscription_repo
            .update_period(subscription.id, start, end)
            .await?;
        self.user_repo
            .update_plan(subscription.user_id, &subscription.plan_id, Some(end))
            .await?;

        let credits = match self.plan(&subscription.plan_id) {
            Some(plan) => {
                self.credits
                    .grant(
                        subscription.user_id,
                        plan.monthly_credits,
                        "plan_grant",
                        &format!("{} plan renewal", plan.name),
                        Some(idempotency_key),
                    )
                    .await?
            }
            None => {
                // Plan removed from config after the user subscribed. Keep
                // the access window current and let an operator sort out
                // the credits.
                warn!(
                    subscription_id = %subscription.id,
                    plan = %subscription.plan_id,
                    "renewal for a plan missing from billing config; no credits granted"
                );
                LedgerOutcome::AlreadyApplied
            }
        };

        info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            period_end = %end,
            "subscription renewed"
        );

        Ok(Some(SubscriptionChange {
            subscription,
            credits,
        }))
    }

    /// Flip to past_due after a failed renewal charge. No money moved, so
    /// no ledger row is written.
    pub async fn mark_past_due(
        &self,
        gateway: GatewayName,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let subscription = match self
            .subscription_repo
            .find_by_gateway_reference(gateway.as_str(), subscription_ref)
            .await?
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let subscription = self
            .subscription_repo
            .update_status(subscription.id, "past_due")
            .await?;
        info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            "subscription past due"
        );
        Ok(Some(subscription))
    }

    /// Cancel and drop the user back to the free tier.
    pub async fn cancel(
        &self,
        gateway: GatewayName,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let subscription = match self
            .subscription_repo
            .find_by_gateway_reference(gateway.as_str(), subscription_ref)
            .await?
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let subscription = self
            .subscription_repo
            .update_status(subscription.id, "cancelled")
            .await?;
        self.user_repo
            .update_plan(subscription.user_id, FREE_PLAN, None)
            .await?;

        info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            "subscription cancelled"
        );
        Ok(Some(subscription))
    }

    /// Record an upstream settings change (cancel-at-period-end toggled,
    /// period end moved).
    pub async fn apply_update(
        &self,
        gateway: GatewayName,
        subscription_ref: &str,
        cancel_at_period_end: bool,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let subscription = match self
            .subscription_repo
            .find_by_gateway_reference(gateway.as_str(), subscription_ref)
            .await?
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let subscription = self
            .subscription_repo
            .set_cancel_at_period_end(subscription.id, cancel_at_period_end, period_end)
            .await?;
        info!(
            subscription_id = %subscription.id,
            cancel_at_period_end = cancel_at_period_end,
            "subscription updated"
        );
        Ok(Some(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        chrono::TimeZone::timestamp_opt(&Utc, secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn period_passes_through_when_well_formed() {
        let now = at(1_700_000_000);
        let start = at(1_700_000_100);
        let end = at(1_702_000_000);
        assert_eq!(
            resolve_period(Some(start), Some(end), now),
            (start, end)
        );
    }

    #[test]
    fn inverted_period_falls_back_to_thirty_days() {
        let now = at(1_700_000_000);
        let start = at(1_700_000_100);
        let end = at(1_690_000_000);
        let (resolved_start, resolved_end) = resolve_period(Some(start), Some(end), now);
        assert_eq!(resolved_start, start);
        assert_eq!(resolved_end, start + Duration::days(30));
    }

    #[test]
    fn equal_bounds_fall_back_to_thirty_days() {
        let now = at(1_700_000_000);
        let start = at(1_700_000_100);
        let (_, resolved_end) = resolve_period(Some(start), Some(start), now);
        assert_eq!(resolved_end, start + Duration::days(30));
    }

    #[test]
    fn missing_bounds_anchor_on_now() {
        let now = at(1_700_000_000);
        let (resolved_start, resolved_end) = resolve_period(None, None, now);
        assert_eq!(resolved_start, now);
        assert_eq!(resolved_end, now + Duration::days(30));
    }

    #[test]
    fn missing_end_with_known_start() {
        let now = at(1_700_000_000);
        let start = at(1_699_000_000);
        let (resolved_start, resolved_end) = resolve_period(Some(start), None, now);
        assert_eq!(resolved_start, start);
        assert_eq!(resolved_end, start + Duration::days(30));
    }
}
