//! Invoice document generation.

use std::fmt::Write as _;

use async_trait::async_trait;
use domain::Order;

use crate::error::{FulfillmentError, Result};

/// Produces a document for a finalized order. Never mutates the order.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, order: &Order) -> Result<Vec<u8>>;
}

/// Renders a plain-text invoice.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextInvoiceRenderer;

#[async_trait]
impl InvoiceRenderer for PlainTextInvoiceRenderer {
    async fn render(&self, order: &Order) -> Result<Vec<u8>> {
        render_text(order)
            .map(String::into_bytes)
            .map_err(|e| FulfillmentError::Invoice(e.to_string()))
    }
}

fn render_text(order: &Order) -> std::result::Result<String, std::fmt::Error> {
    let mut out = String::new();
    let billing = order.shipping().billing_address();
    let totals = order.totals();

    writeln!(out, "INVOICE {}", order.order_number())?;
    writeln!(out, "Date: {}", order.timestamps().created_at.format("%Y-%m-%d"))?;
    writeln!(out, "Bill to: {}", billing.recipient)?;
    writeln!(out, "         {}", billing.street)?;
    writeln!(
        out,
        "         {} {}, {}",
        billing.postal_code, billing.city, billing.country
    )?;
    writeln!(out)?;

    for line in order.lines() {
        writeln!(
            out,
            "{:>3}  {:<12} {:<24} {:>4} x {:>10} = {:>10}",
            line.line_no(),
            line.product_id(),
            line.snapshot().name,
            line.quantity(),
            line.unit_price(),
            line.line_total()
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Subtotal: {:>10}", totals.subtotal)?;
    writeln!(out, "Tax:      {:>10}", totals.tax)?;
    writeln!(out, "Shipping: {:>10}", totals.shipping)?;
    if totals.discount.is_positive() {
        writeln!(out, "Discount: {:>10}", format!("-{}", totals.discount))?;
    }
    writeln!(out, "Total:    {:>10}", totals.total)?;
    writeln!(out, "Payment:  {} ({})", order.payment_status(), order.payment_method())?;

    Ok(out)
}
