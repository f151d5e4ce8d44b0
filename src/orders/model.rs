use crate::models::Rfc3339Millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "orderNumber")]
    pub order_number: String,
    pub customer: Option<String>,
    #[serde(rename = "guestCustomer")]
    pub guest_customer: Option<GuestCustomer>,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    #[serde(rename = "shippingAddress")]
    pub shipping_address: ShippingAddress,
    #[serde(default, rename = "billingAddress")]
    pub billing_address: BillingAddress,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub notes: Notes,
    #[serde(rename = "createdAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestCustomer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: String,
    #[serde(rename = "productSnapshot")]
    pub product_snapshot: ProductSnapshot,
    pub quantity: u32,
    pub price: f64,
    #[serde(default)]
    pub customizations: Customizations,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub title: String,
    pub price: f64,
    pub image: Option<String>,
    pub sku: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customizations {
    pub color: Option<String>,
    pub size: Option<String>,
    #[serde(rename = "personalMessage")]
    pub personal_message: Option<String>,
    #[serde(rename = "specialInstructions")]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    #[serde(default)]
    pub discount: f64,
    pub total: f64,
}

impl Pricing {
    /// Totals from line items: `subtotal = Σ price × qty`,
    /// `total = subtotal + tax + shipping − discount`.
    pub fn from_items(items: &[OrderItem], tax: f64, shipping: f64, discount: f64) -> Self {
        let subtotal = items
            .iter()
            .map(|item| item.price * f64::from(item.quantity))
            .sum::<f64>();
        Self {
            subtotal,
            tax,
            shipping,
            discount,
            total: subtotal + tax + shipping - discount,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default, rename = "fullName")]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub landmark: Option<String>,
}

impl ShippingAddress {
    /// Name of the first required field left blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("fullName", &self.full_name),
            ("phone", &self.phone),
            ("email", &self.email),
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("pincode", &self.pincode),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAddress {
    #[serde(default = "default_true")]
    pub same: bool,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub country: Option<String>,
}

impl Default for BillingAddress {
    fn default() -> Self {
        Self {
            same: true,
            full_name: None,
            phone: None,
            email: None,
            street: None,
            city: None,
            state: None,
            pincode: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PaymentMethod {
    #[default]
    #[serde(rename = "COD")]
    Cod,
    #[serde(rename = "UPI")]
    Upi,
    Card,
    NetBanking,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default)]
    pub method: PaymentMethod,
    #[serde(default)]
    pub status: PaymentStatus,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(rename = "paidAt")]
    #[serde_as(as = "Option<Rfc3339Millis>")]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Returned => "Returned",
        }
    }

    pub fn customer_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracking {
    pub carrier: Option<String>,
    #[serde(rename = "trackingNumber")]
    pub tracking_number: Option<String>,
    #[serde(rename = "estimatedDelivery")]
    #[serde_as(as = "Option<Rfc3339Millis>")]
    pub estimated_delivery: Option<DateTime<Utc>>,
    #[serde(rename = "actualDelivery")]
    #[serde_as(as = "Option<Rfc3339Millis>")]
    pub actual_delivery: Option<DateTime<Utc>>,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: String,
    #[serde_as(as = "Rfc3339Millis")]
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
    #[serde(rename = "updatedBy")]
    pub updated_by: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notes {
    pub customer: Option<String>,
    pub admin: Option<String>,
    pub internal: Option<String>,
}

fn default_country() -> String {
    "India".into()
}

fn default_true() -> bool {
    true
}

/// `ORD-<millis>-<sequence padded to 4>`.
pub fn order_number(now: DateTime<Utc>, existing_orders: u64) -> String {
    format!(
        "ORD-{}-{:04}",
        now.timestamp_millis(),
        existing_orders.saturating_add(1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(price: f64, quantity: u32) -> OrderItem {
        OrderItem {
            product: "p".into(),
            product_snapshot: ProductSnapshot {
                title: "t".into(),
                price,
                image: None,
                sku: "s".into(),
            },
            quantity,
            price,
            customizations: Customizations::default(),
        }
    }

    #[test]
    fn totals_include_tax_shipping_and_discount() {
        let pricing = Pricing::from_items(&[item(250.0, 2), item(100.0, 1)], 18.0, 50.0, 20.0);
        assert_eq!(pricing.subtotal, 600.0);
        assert_eq!(pricing.total, 648.0);
    }

    #[test]
    fn order_numbers_pad_the_sequence() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(order_number(now, 6), "ORD-1700000000000-0007");
        assert_eq!(order_number(now, 12_344), "ORD-1700000000000-12345");
    }

    #[test]
    fn shipping_address_reports_first_gap() {
        let address = ShippingAddress {
            full_name: "Asha".into(),
            phone: "99999".into(),
            email: "a@b.co".into(),
            street: "1 Main".into(),
            city: " ".into(),
            ..ShippingAddress::default()
        };
        assert_eq!(address.missing_field(), Some("city"));
    }

    #[test]
    fn only_early_orders_are_customer_cancellable() {
        assert!(OrderStatus::Pending.customer_cancellable());
        assert!(OrderStatus::Confirmed.customer_cancellable());
        assert!(!OrderStatus::Shipped.customer_cancellable());
    }
}
