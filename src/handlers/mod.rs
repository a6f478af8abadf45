pub mod admin_orders;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
