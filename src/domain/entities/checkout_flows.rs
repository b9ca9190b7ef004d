use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::postgres::schema::checkout_flows;

/// Provider-hosted checkout session issued for a user, kept so a retried
/// checkout inside the reuse window returns the same flow.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = checkout_flows)]
pub struct CheckoutFlowEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub customer_ref: String,
    pub session_ref: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = checkout_flows)]
pub struct InsertCheckoutFlowEntity {
    pub user_id: Uuid,
    pub customer_ref: String,
    pub session_ref: String,
    pub url: String,
}
