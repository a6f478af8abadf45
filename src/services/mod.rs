pub mod order_status;
pub mod orders;
pub mod payment_readiness;
pub mod payments;
pub mod quote;
