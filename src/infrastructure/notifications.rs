//! Outbound customer notifications.
//!
//! Actual email dispatch belongs to the notification service outside this
//! backend; the sink here records the event so the seam stays exercised
//! and a real transport can be dropped in behind the port.

use async_trait::async_trait;
use tracing::info;

use crate::domain::order::{Order, OrderLine};
use crate::domain::ports::ConfirmationSink;

pub struct LoggingConfirmationSink;

#[async_trait]
impl ConfirmationSink for LoggingConfirmationSink {
    async fn order_confirmed(&self, order: &Order, lines: &[OrderLine]) -> anyhow::Result<()> {
        let recipient = order
            .guest_email
            .as_deref()
            .or(order.user_id.as_deref())
            .unwrap_or("unknown");
        info!(
            "Checkout confirmed: order {} ({} line(s), total {} {}) for {}",
            order.order_number,
            lines.len(),
            order.total,
            order.currency,
            recipient
        );
        Ok(())
    }
}
