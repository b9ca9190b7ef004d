use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            billing::ProviderSubscriptionView,
            enums::subscription_statuses::SubscriptionStatus,
        },
    },
    locks::KeyedLocks,
    payments::stripe_client::StripeSubscription,
};

/// What the merge did with a provider view. Every non-`Applied` outcome is a
/// deliberate drop that has already been logged; none of them is an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    Applied,
    StaleVersion,
    CanceledTerminal,
    CustomerMismatch,
    Unmatched,
}

/// Merges provider-reported subscription state into the store.
///
/// The same function runs for pushed webhook events and for pulled provider
/// state, so ordering and idempotency live in exactly one place: a view is
/// applied only when its provider-side version is not older than the stored
/// watermark, and per-subscription application is serialized by a keyed lock.
pub struct StateReconciler<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    locks: Arc<KeyedLocks>,
}

impl<S> StateReconciler<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            subscription_repo,
            locks,
        }
    }

    pub async fn apply(
        &self,
        view: &ProviderSubscriptionView,
        user_hint: Option<Uuid>,
    ) -> Result<ReconcileOutcome> {
        let _guard = self
            .locks
            .acquire(&format!("reconcile:{}", view.subscription_ref))
            .await;

        let mut row = self
            .subscription_repo
            .find_by_subscription_ref(&view.subscription_ref)
            .await?;
        if row.is_none() {
            if let Some(customer_ref) = view.customer_ref.as_deref() {
                row = self
                    .subscription_repo
                    .find_by_customer_ref(customer_ref)
                    .await?;
            }
        }

        let Some(row) = row else {
            return self.first_contact(view, user_hint).await;
        };

        if let Some(customer_ref) = view.customer_ref.as_deref() {
            if row.customer_ref != customer_ref {
                warn!(
                    subscription_ref = %view.subscription_ref,
                    row_customer = %row.customer_ref,
                    view_customer = %customer_ref,
                    "reconciler: customer mismatch, dropping provider view"
                );
                return Ok(ReconcileOutcome::CustomerMismatch);
            }
        }

        // `canceled` is terminal per subscription identity. A view carrying a
        // different ref is a fresh subscription and may overwrite the row.
        let same_ref = row.subscription_ref.as_deref() == Some(view.subscription_ref.as_str());
        if same_ref
            && SubscriptionStatus::from_str(&row.status) == SubscriptionStatus::Canceled
            && view.status != SubscriptionStatus::Canceled
        {
            warn!(
                subscription_ref = %view.subscription_ref,
                view_status = %view.status,
                "reconciler: canceled is terminal for this subscription, dropping provider view"
            );
            return Ok(ReconcileOutcome::CanceledTerminal);
        }

        if view.version < row.updated_at {
            debug!(
                subscription_ref = %view.subscription_ref,
                view_version = %view.version,
                stored_version = %row.updated_at,
                "reconciler: provider view older than stored watermark, skipping"
            );
            return Ok(ReconcileOutcome::StaleVersion);
        }

        self.subscription_repo
            .apply_provider_view(row.id, view)
            .await?;
        info!(
            subscription_ref = %view.subscription_ref,
            user_id = %row.user_id,
            status = %view.status,
            "reconciler: provider view applied"
        );

        Ok(ReconcileOutcome::Applied)
    }

    async fn first_contact(
        &self,
        view: &ProviderSubscriptionView,
        user_hint: Option<Uuid>,
    ) -> Result<ReconcileOutcome> {
        let (Some(user_id), Some(customer_ref)) = (user_hint, view.customer_ref.as_deref())
        else {
            warn!(
                subscription_ref = %view.subscription_ref,
                "reconciler: view matches no stored row and carries no user, dropping"
            );
            return Ok(ReconcileOutcome::Unmatched);
        };

        if let Some(existing) = self.subscription_repo.find_by_user_id(user_id).await? {
            warn!(
                %user_id,
                row_customer = %existing.customer_ref,
                view_customer = %customer_ref,
                "reconciler: user already bound to another customer, dropping provider view"
            );
            return Ok(ReconcileOutcome::CustomerMismatch);
        }

        self.subscription_repo
            .insert_from_provider_view(user_id, customer_ref, view)
            .await?;
        info!(
            %user_id,
            subscription_ref = %view.subscription_ref,
            status = %view.status,
            "reconciler: first provider contact for subscription, row inserted"
        );

        Ok(ReconcileOutcome::Applied)
    }
}

/// Normalizes a fetched or event-embedded provider subscription into a view.
/// `version` is the event `created` timestamp for deltas and the fetch time
/// for pulled truth.
pub fn view_from_provider_subscription(
    subscription: &StripeSubscription,
    version: DateTime<Utc>,
) -> Result<ProviderSubscriptionView> {
    let subscription_ref = subscription
        .id
        .clone()
        .context("provider subscription is missing an id")?;

    Ok(ProviderSubscriptionView {
        subscription_ref,
        customer_ref: subscription.customer.clone(),
        status: subscription
            .status
            .as_deref()
            .map(SubscriptionStatus::from_provider)
            .unwrap_or_default(),
        period_start: subscription.period_start().and_then(ts_to_datetime),
        period_end: subscription.period_end().and_then(ts_to_datetime),
        version,
    })
}

pub fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::subscriptions::SubscriptionEntity;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use chrono::Duration;
    use std::sync::Mutex;

    fn sample_row(
        subscription_ref: Option<&str>,
        status: SubscriptionStatus,
        updated_at: DateTime<Utc>,
    ) -> SubscriptionEntity {
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            customer_ref: "cus_1".to_string(),
            subscription_ref: subscription_ref.map(|s| s.to_string()),
            status: status.to_string(),
            period_start: None,
            period_end: None,
            created_at: updated_at,
            updated_at,
        }
    }

    fn sample_view(
        subscription_ref: &str,
        status: SubscriptionStatus,
        version: DateTime<Utc>,
    ) -> ProviderSubscriptionView {
        ProviderSubscriptionView {
            subscription_ref: subscription_ref.to_string(),
            customer_ref: Some("cus_1".to_string()),
            status,
            period_start: Some(version - Duration::days(1)),
            period_end: Some(version + Duration::days(29)),
            version,
        }
    }

    fn reconciler_with(
        subscription_repo: MockSubscriptionRepository,
    ) -> StateReconciler<MockSubscriptionRepository> {
        StateReconciler::new(Arc::new(subscription_repo), Arc::new(KeyedLocks::new()))
    }

    #[tokio::test]
    async fn applies_view_with_newer_version() {
        let stored_at = Utc::now() - Duration::hours(2);
        let row = sample_row(Some("sub_1"), SubscriptionStatus::Incomplete, stored_at);
        let row_id = row.id;
        let view = sample_view("sub_1", SubscriptionStatus::Active, Utc::now());

        let applied: Arc<Mutex<Vec<ProviderSubscriptionView>>> = Arc::default();
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |_| Ok(Some(row.clone())));
        let applied_writer = Arc::clone(&applied);
        subscription_repo
            .expect_apply_provider_view()
            .returning(move |id, view| {
                assert_eq!(id, row_id);
                applied_writer.lock().unwrap().push(view.clone());
                Ok(())
            });

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(*applied.lock().unwrap(), vec![view]);
    }

    #[tokio::test]
    async fn reapplying_equal_version_is_a_no_op_write() {
        // Redelivery of the same event carries the same version; it must be
        // safe to apply twice.
        let version = Utc::now();
        let row = sample_row(Some("sub_1"), SubscriptionStatus::Active, version);
        let view = sample_view("sub_1", SubscriptionStatus::Active, version);

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |_| Ok(Some(row.clone())));
        subscription_repo
            .expect_apply_provider_view()
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
    }

    #[tokio::test]
    async fn discards_view_older_than_stored_watermark() {
        // A late "payment failed" must not regress a later "active" state.
        let stored_at = Utc::now();
        let row = sample_row(Some("sub_1"), SubscriptionStatus::Active, stored_at);
        let view = sample_view(
            "sub_1",
            SubscriptionStatus::PastDue,
            stored_at - Duration::minutes(10),
        );

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |_| Ok(Some(row.clone())));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::StaleVersion);
    }

    #[tokio::test]
    async fn canceled_is_terminal_for_the_same_subscription_ref() {
        let stored_at = Utc::now() - Duration::hours(1);
        let row = sample_row(Some("sub_1"), SubscriptionStatus::Canceled, stored_at);
        let view = sample_view("sub_1", SubscriptionStatus::Active, Utc::now());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |_| Ok(Some(row.clone())));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::CanceledTerminal);
    }

    #[tokio::test]
    async fn resubscription_with_new_ref_overwrites_canceled_row() {
        let stored_at = Utc::now() - Duration::hours(1);
        let row = sample_row(Some("sub_1"), SubscriptionStatus::Canceled, stored_at);
        let view = sample_view("sub_2", SubscriptionStatus::Active, Utc::now());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(None));
        let row_for_customer = row.clone();
        subscription_repo
            .expect_find_by_customer_ref()
            .returning(move |_| Ok(Some(row_for_customer.clone())));
        subscription_repo
            .expect_apply_provider_view()
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
    }

    #[tokio::test]
    async fn drops_view_whose_customer_does_not_match_the_row() {
        let row = sample_row(
            Some("sub_1"),
            SubscriptionStatus::Active,
            Utc::now() - Duration::hours(1),
        );
        let mut view = sample_view("sub_1", SubscriptionStatus::Active, Utc::now());
        view.customer_ref = Some("cus_other".to_string());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |_| Ok(Some(row.clone())));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::CustomerMismatch);
    }

    #[tokio::test]
    async fn first_contact_with_user_hint_inserts_a_row() {
        let user_id = Uuid::new_v4();
        let view = sample_view("sub_external", SubscriptionStatus::Active, Utc::now());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_find_by_customer_ref()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_find_by_user_id()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_insert_from_provider_view()
            .times(1)
            .returning(|_, _, _| Ok(Uuid::new_v4()));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, Some(user_id))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
    }

    #[tokio::test]
    async fn view_without_any_match_is_dropped() {
        let view = sample_view("sub_unknown", SubscriptionStatus::Active, Utc::now());

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_find_by_customer_ref()
            .returning(|_| Ok(None));

        let outcome = reconciler_with(subscription_repo)
            .apply(&view, None)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unmatched);
    }

    /// Shared-state mock: the row behaves like a real store so version
    /// ordering can be exercised end to end.
    fn stateful_repo(
        state: Arc<Mutex<SubscriptionEntity>>,
    ) -> MockSubscriptionRepository {
        let mut subscription_repo = MockSubscriptionRepository::new();

        let by_ref = Arc::clone(&state);
        subscription_repo
            .expect_find_by_subscription_ref()
            .returning(move |subscription_ref| {
                let row = by_ref.lock().unwrap().clone();
                if row.subscription_ref.as_deref() == Some(subscription_ref) {
                    Ok(Some(row))
                } else {
                    Ok(None)
                }
            });

        let by_customer = Arc::clone(&state);
        subscription_repo
            .expect_find_by_customer_ref()
            .returning(move |customer_ref| {
                let row = by_customer.lock().unwrap().clone();
                if row.customer_ref == customer_ref {
                    Ok(Some(row))
                } else {
                    Ok(None)
                }
            });

        let on_apply = Arc::clone(&state);
        subscription_repo
            .expect_apply_provider_view()
            .returning(move |_, view| {
                let mut row = on_apply.lock().unwrap();
                row.subscription_ref = Some(view.subscription_ref.clone());
                row.status = view.status.to_string();
                if let (Some(period_start), Some(period_end)) =
                    (view.period_start, view.period_end)
                {
                    row.period_start = Some(period_start);
                    row.period_end = Some(period_end);
                }
                row.updated_at = view.version;
                Ok(())
            });

        subscription_repo
    }

    #[tokio::test]
    async fn out_of_order_delivery_converges_to_the_newest_version() {
        let base = Utc::now();
        let v1 = sample_view("sub_1", SubscriptionStatus::PastDue, base);
        let v2 = sample_view("sub_1", SubscriptionStatus::Active, base + Duration::minutes(5));

        let in_order = {
            let state = Arc::new(Mutex::new(sample_row(
                Some("sub_1"),
                SubscriptionStatus::Incomplete,
                base - Duration::hours(1),
            )));
            let reconciler = reconciler_with(stateful_repo(Arc::clone(&state)));
            reconciler.apply(&v1, None).await.unwrap();
            reconciler.apply(&v2, None).await.unwrap();
            state.lock().unwrap().clone()
        };

        let out_of_order = {
            let state = Arc::new(Mutex::new(sample_row(
                Some("sub_1"),
                SubscriptionStatus::Incomplete,
                base - Duration::hours(1),
            )));
            let reconciler = reconciler_with(stateful_repo(Arc::clone(&state)));
            reconciler.apply(&v2, None).await.unwrap();
            reconciler.apply(&v1, None).await.unwrap();
            state.lock().unwrap().clone()
        };

        assert_eq!(in_order.status, SubscriptionStatus::Active.to_string());
        assert_eq!(out_of_order.status, in_order.status);
        assert_eq!(out_of_order.period_end, in_order.period_end);
        assert_eq!(out_of_order.updated_at, v2.version);
        assert_eq!(in_order.updated_at, v2.version);
    }

    #[tokio::test]
    async fn reapplying_the_same_view_leaves_state_unchanged() {
        let state = Arc::new(Mutex::new(sample_row(
            Some("sub_1"),
            SubscriptionStatus::Incomplete,
            Utc::now() - Duration::hours(1),
        )));
        let reconciler = reconciler_with(stateful_repo(Arc::clone(&state)));
        let view = sample_view("sub_1", SubscriptionStatus::Active, Utc::now());

        reconciler.apply(&view, None).await.unwrap();
        let after_first = state.lock().unwrap().clone();

        let outcome = reconciler.apply(&view, None).await.unwrap();
        let after_second = state.lock().unwrap().clone();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(after_second.status, after_first.status);
        assert_eq!(after_second.period_start, after_first.period_start);
        assert_eq!(after_second.period_end, after_first.period_end);
        assert_eq!(after_second.updated_at, after_first.updated_at);
    }

    #[test]
    fn provider_subscription_normalizes_into_a_view() {
        let subscription: StripeSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "past_due",
            "current_period_start": 1700000000,
            "current_period_end": 1702592000
        }))
        .unwrap();

        let version = Utc::now();
        let view = view_from_provider_subscription(&subscription, version).unwrap();

        assert_eq!(view.subscription_ref, "sub_1");
        assert_eq!(view.customer_ref.as_deref(), Some("cus_1"));
        assert_eq!(view.status, SubscriptionStatus::PastDue);
        assert_eq!(view.period_start, ts_to_datetime(1700000000));
        assert_eq!(view.period_end, ts_to_datetime(1702592000));
        assert_eq!(view.version, version);
    }
}
