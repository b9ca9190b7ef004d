use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

/// The provider's view of one subscription, normalized for the reconciler.
///
/// `version` is the provider-side ordering key: the event `created`
/// timestamp for pushed deltas, the fetch time for pulled truth. Views with
/// a version older than the stored watermark are discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscriptionView {
    pub subscription_ref: String,
    pub customer_ref: Option<String>,
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub version: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingStatusDto {
    pub status: Option<SubscriptionStatus>,
    pub period_end: Option<DateTime<Utc>>,
    pub entitled: bool,
}
