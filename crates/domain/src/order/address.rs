use serde::{Deserialize, Serialize};

/// A postal address, stored on the order as a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Delivery details supplied with a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub shipping_address: Address,
    /// Defaults to the shipping address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ShippingInfo {
    pub fn new(shipping_address: Address) -> Self {
        Self {
            shipping_address,
            billing_address: None,
            notes: None,
        }
    }

    /// The address to bill, falling back to the shipping address.
    pub fn billing_address(&self) -> &Address {
        self.billing_address
            .as_ref()
            .unwrap_or(&self.shipping_address)
    }
}
