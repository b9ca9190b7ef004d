pub mod billing_events;
pub mod checkout;
pub mod customer_resolver;
pub mod entitlement;
pub mod gateway;
pub mod reconciler;
pub mod videos;
