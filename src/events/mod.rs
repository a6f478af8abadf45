use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{FulfillmentStatus, PaymentStatus};

/// Events emitted by the order pipeline. Consumed by a single in-process
/// task; delivery is best-effort and never blocks the request path outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        payment_status: PaymentStatus,
        payment_reference: Option<String>,
    },
    StockDepleted {
        product_id: Uuid,
        slug: String,
    },
    WebhookProcessed {
        provider: String,
        event_type: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; a full or closed channel is logged, not surfaced.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Event processing loop. Today every event is logged; side effects such as
/// notification emails hang off this loop rather than off request handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
            } => {
                info!(%order_id, %order_number, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    %order_id,
                    old_status = old_status.as_str(),
                    new_status = new_status.as_str(),
                    "order status changed"
                );
            }
            Event::PaymentStatusChanged {
                order_id,
                payment_status,
                payment_reference,
            } => {
                info!(
                    %order_id,
                    payment_status = payment_status.as_str(),
                    payment_reference = payment_reference.as_deref().unwrap_or("-"),
                    "payment status changed"
                );
            }
            Event::StockDepleted { product_id, slug } => {
                warn!(%product_id, %slug, "product stock depleted");
            }
            Event::WebhookProcessed {
                provider,
                event_type,
            } => {
                info!(%provider, %event_type, "webhook processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
