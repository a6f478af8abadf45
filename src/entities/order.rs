use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Fulfillment stage of an order. The variants before `Cancelled` form the
/// forward delivery sequence used by the public tracking timeline.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "Order Confirmed")]
    #[serde(rename = "Order Confirmed")]
    Confirmed,
    #[sea_orm(string_value = "Packed and Ready")]
    #[serde(rename = "Packed and Ready")]
    Packed,
    #[sea_orm(string_value = "Shipped to Courier")]
    #[serde(rename = "Shipped to Courier")]
    Shipped,
    #[sea_orm(string_value = "In Transit")]
    #[serde(rename = "In Transit")]
    InTransit,
    #[sea_orm(string_value = "Out for Delivery")]
    #[serde(rename = "Out for Delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl FulfillmentStatus {
    /// Forward delivery sequence, in order. `Cancelled` sits outside it.
    pub const SEQUENCE: [FulfillmentStatus; 6] = [
        FulfillmentStatus::Confirmed,
        FulfillmentStatus::Packed,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::InTransit,
        FulfillmentStatus::OutForDelivery,
        FulfillmentStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Confirmed => "Order Confirmed",
            FulfillmentStatus::Packed => "Packed and Ready",
            FulfillmentStatus::Shipped => "Shipped to Courier",
            FulfillmentStatus::InTransit => "In Transit",
            FulfillmentStatus::OutForDelivery => "Out for Delivery",
            FulfillmentStatus::Delivered => "Delivered",
            FulfillmentStatus::Cancelled => "Cancelled",
        }
    }

    /// Index in the forward sequence; `None` for `Cancelled`.
    pub fn sequence_position(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    /// Whether the move from `self` to `to` is accepted. Every move is
    /// currently allowed (operators fix mis-clicks by moving backwards);
    /// callers log a warning for non-forward moves.
    pub fn can_transition(&self, to: &FulfillmentStatus) -> bool {
        let _ = to;
        true
    }

    pub fn is_forward_move(&self, to: &FulfillmentStatus) -> bool {
        match (self.sequence_position(), to.sequence_position()) {
            (Some(from), Some(dest)) => dest >= from,
            // Any move involving Cancelled is not a forward delivery move
            _ => false,
        }
    }
}

/// Payment lifecycle state, reconciled by provider webhooks and admins.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "pending_cod")]
    PendingCod,
    #[sea_orm(string_value = "pending_online")]
    PendingOnline,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::PendingCod => "pending_cod",
            PaymentStatus::PendingOnline => "pending_online",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Customer-selected payment method, stored under its storefront label.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "Cash on Delivery")]
    #[serde(rename = "Cash on Delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "Stripe (Card)")]
    #[serde(rename = "Stripe (Card)")]
    Stripe,
    #[sea_orm(string_value = "PayPal")]
    PayPal,
    #[sea_orm(string_value = "EasyPaisa")]
    EasyPaisa,
    #[sea_orm(string_value = "JazzCash")]
    JazzCash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "Cash on Delivery",
            PaymentMethod::Stripe => "Stripe (Card)",
            PaymentMethod::PayPal => "PayPal",
            PaymentMethod::EasyPaisa => "EasyPaisa",
            PaymentMethod::JazzCash => "JazzCash",
        }
    }

    /// Everything except cash on delivery settles through a provider.
    pub fn is_online(&self) -> bool {
        !matches!(self, PaymentMethod::CashOnDelivery)
    }

    /// Parses the storefront label a client sends in a checkout request.
    pub fn from_label(label: &str) -> Option<PaymentMethod> {
        match label {
            "Cash on Delivery" => Some(PaymentMethod::CashOnDelivery),
            "Stripe (Card)" => Some(PaymentMethod::Stripe),
            "PayPal" => Some(PaymentMethod::PayPal),
            "EasyPaisa" => Some(PaymentMethod::EasyPaisa),
            "JazzCash" => Some(PaymentMethod::JazzCash),
            _ => None,
        }
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOption {
    #[sea_orm(string_value = "standard")]
    Standard,
    #[sea_orm(string_value = "express")]
    Express,
}

impl DeliveryOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOption::Standard => "standard",
            DeliveryOption::Express => "express",
        }
    }

    pub fn from_label(label: &str) -> Option<DeliveryOption> {
        match label {
            "standard" => Some(DeliveryOption::Standard),
            "express" => Some(DeliveryOption::Express),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub city: String,
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub delivery_option: DeliveryOption,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub status: FulfillmentStatus,
    pub tracking_code: Option<String>,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub total: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    OrderStatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderStatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_positions_are_ordered() {
        let confirmed = FulfillmentStatus::Confirmed.sequence_position().unwrap();
        let delivered = FulfillmentStatus::Delivered.sequence_position().unwrap();
        assert_eq!(confirmed, 0);
        assert_eq!(delivered, 5);
        assert_eq!(FulfillmentStatus::Cancelled.sequence_position(), None);
    }

    #[test]
    fn backwards_moves_are_allowed_but_not_forward() {
        let from = FulfillmentStatus::Shipped;
        assert!(from.can_transition(&FulfillmentStatus::Packed));
        assert!(!from.is_forward_move(&FulfillmentStatus::Packed));
        assert!(from.is_forward_move(&FulfillmentStatus::Delivered));
        assert!(!from.is_forward_move(&FulfillmentStatus::Cancelled));
    }

    #[test]
    fn payment_method_labels_round_trip() {
        for method in [
            PaymentMethod::CashOnDelivery,
            PaymentMethod::Stripe,
            PaymentMethod::PayPal,
            PaymentMethod::EasyPaisa,
            PaymentMethod::JazzCash,
        ] {
            assert_eq!(PaymentMethod::from_label(method.as_str()), Some(method));
        }
        assert_eq!(PaymentMethod::from_label("Bank Transfer"), None);
    }

    #[test]
    fn only_cod_is_offline() {
        assert!(!PaymentMethod::CashOnDelivery.is_online());
        assert!(PaymentMethod::Stripe.is_online());
        assert!(PaymentMethod::JazzCash.is_online());
    }
}
