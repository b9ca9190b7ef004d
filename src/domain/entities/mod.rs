pub mod checkout_flows;
pub mod subscriptions;
pub mod users;
pub mod videos;
