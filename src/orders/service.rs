use crate::catalog::product::{Availability, Product};
use crate::error::ServiceError;
use crate::models::new_object_id;
use crate::orders::model::{
    BillingAddress, Customizations, GuestCustomer, Notes, Order, OrderItem, OrderStatus, Payment,
    PaymentMethod, PaymentStatus, Pricing, ProductSnapshot, ShippingAddress, TimelineEntry,
    Tracking, order_number,
};
use crate::store::{Database, OrderQuery, StoreError};
use crate::users::{Role, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SCOPE: &str = "orders";
const ORDER_NUMBER_ATTEMPTS: usize = 3;
const DEFAULT_ADMIN_LIMIT: u64 = 50;
const MAX_ADMIN_LIMIT: u64 = 200;
const RECENT_ORDERS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderLine>,
    #[serde(rename = "shippingAddress")]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default, rename = "billingAddress")]
    pub billing_address: Option<BillingAddress>,
    #[serde(rename = "guestCustomer")]
    pub guest_customer: Option<GuestCustomer>,
    #[serde(rename = "paymentMethod")]
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub product: String,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub customizations: Customizations,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderListParams {
    pub status: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
    #[serde(rename = "adminNote")]
    pub admin_note: Option<String>,
    pub tracking: Option<TrackingUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingUpdate {
    pub carrier: Option<String>,
    #[serde(rename = "trackingNumber")]
    pub tracking_number: Option<String>,
    #[serde(rename = "estimatedDelivery")]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    #[serde(rename = "totalProducts")]
    pub total_products: u64,
    #[serde(rename = "totalOrders")]
    pub total_orders: u64,
    #[serde(rename = "totalCustomers")]
    pub total_customers: u64,
    #[serde(rename = "totalRevenue")]
    pub total_revenue: f64,
    #[serde(rename = "recentOrders")]
    pub recent_orders: Vec<Order>,
}

impl PlaceOrderRequest {
    /// Replay scope for an anonymous checkout, derived from the contact,
    /// delivery and basket details. Two guests only share it when they send
    /// the same order to the same person.
    pub fn guest_scope(&self) -> String {
        let address = self.shipping_address.as_ref();
        let email = self
            .guest_customer
            .as_ref()
            .map(|g| g.email.as_str())
            .filter(|email| !email.trim().is_empty())
            .or(address.map(|a| a.email.as_str()));
        let mut parts: Vec<String> = [
            email,
            address.map(|a| a.full_name.as_str()),
            address.map(|a| a.phone.as_str()),
            address.map(|a| a.street.as_str()),
            address.map(|a| a.city.as_str()),
            address.map(|a| a.pincode.as_str()),
        ]
        .into_iter()
        .map(|part| part.unwrap_or_default().trim().to_lowercase())
        .collect();
        parts.extend(
            self.items
                .iter()
                .map(|line| format!("{}x{}", line.product.trim(), line.quantity)),
        );
        let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, parts.join("\n").as_bytes());
        format!("guest-{}", id.simple())
    }
}

/// Places a cash-on-delivery order. Prices come from the catalog, never
/// from the request.
pub async fn place_order(
    db: &Database,
    request: PlaceOrderRequest,
    user: Option<&User>,
) -> Result<Order, ServiceError> {
    if request.items.is_empty() {
        return Err(ServiceError::invalid_input(
            SCOPE,
            "Order must contain at least one item",
        ));
    }
    let Some(shipping_address) = request.shipping_address else {
        return Err(ServiceError::invalid_input(SCOPE, "Shipping address is required"));
    };
    if let Some(field) = shipping_address.missing_field() {
        return Err(ServiceError::invalid_input(
            SCOPE,
            format!("Shipping address {field} is required"),
        ));
    }
    match request.payment_method.as_deref().map(str::trim) {
        None | Some("") | Some("COD") => {}
        Some(other) => {
            return Err(ServiceError::invalid_input(
                SCOPE,
                "Only Cash on Delivery (COD) is currently supported",
            )
            .with_detail(format!("unsupported payment method {other}")));
        }
    }

    let mut items = Vec::with_capacity(request.items.len());
    for line in request.items {
        if line.quantity == 0 {
            return Err(ServiceError::invalid_input(
                SCOPE,
                "Quantity must be at least 1",
            ));
        }
        let product = orderable_product(db, &line.product).await?;
        let price = product.price.current();
        items.push(OrderItem {
            product: product.id.clone(),
            product_snapshot: ProductSnapshot {
                title: product.title.clone(),
                price,
                image: product.primary_image().map(|img| img.url.clone()),
                sku: product.sku.clone(),
            },
            quantity: line.quantity,
            price,
            customizations: line.customizations,
        });
    }

    let (customer, guest_customer) = match user {
        Some(user) => (Some(user.id.clone()), None),
        None => (None, Some(guest_details(request.guest_customer, &shipping_address)?)),
    };

    let now = Utc::now();
    let mut order = Order {
        id: new_object_id(),
        order_number: String::new(),
        customer,
        guest_customer,
        pricing: Pricing::from_items(&items, 0.0, 0.0, 0.0),
        items,
        shipping_address,
        billing_address: request.billing_address.unwrap_or_default(),
        payment: Payment {
            method: PaymentMethod::Cod,
            ..Payment::default()
        },
        status: OrderStatus::Pending,
        tracking: Tracking::default(),
        timeline: vec![TimelineEntry {
            status: "Order Placed".into(),
            timestamp: now,
            note: Some("Order has been successfully placed".into()),
            updated_by: None,
        }],
        notes: Notes {
            customer: request.notes.filter(|n| !n.trim().is_empty()),
            ..Notes::default()
        },
        created_at: now,
        updated_at: now,
    };

    // concurrent checkouts can race for the same sequence number
    let mut attempt = 0;
    loop {
        attempt += 1;
        let existing = db
            .count_orders()
            .await
            .map_err(|err| ServiceError::from_store(SCOPE, err))?;
        order.order_number = order_number(Utc::now(), existing);
        match db.insert_order(&order).await {
            Ok(()) => break,
            Err(StoreError::Duplicate { field })
                if field == "orderNumber" && attempt < ORDER_NUMBER_ATTEMPTS =>
            {
                warn!(target = "storefront.orders", attempt, "order number taken; retrying");
            }
            Err(err) => return Err(ServiceError::from_store(SCOPE, err)),
        }
    }

    info!(
        target = "storefront.orders",
        order_id = %order.id,
        order_number = %order.order_number,
        guest = order.customer.is_none(),
        total = order.pricing.total,
        "order placed"
    );
    Ok(order)
}

pub async fn get_order(db: &Database, id: &str, user: &User) -> Result<Order, ServiceError> {
    let order = find_order(db, id).await?;
    let owns = order.customer.as_deref() == Some(user.id.as_str());
    if !owns && !user.is_admin() {
        return Err(ServiceError::forbidden(
            SCOPE,
            "Not authorized to view this order",
        ));
    }
    Ok(order)
}

pub async fn my_orders(db: &Database, user: &User) -> Result<Vec<Order>, ServiceError> {
    db.list_orders(&OrderQuery {
        customer: Some(user.id.clone()),
        ..OrderQuery::default()
    })
    .await
    .map_err(|err| ServiceError::from_store(SCOPE, err))
}

pub async fn list_orders(
    db: &Database,
    params: &OrderListParams,
) -> Result<Vec<Order>, ServiceError> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_status(raw)?),
    };
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<u64>().ok())
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_ADMIN_LIMIT)
        .min(MAX_ADMIN_LIMIT);
    db.list_orders(&OrderQuery {
        customer: None,
        status,
        limit: Some(limit),
    })
    .await
    .map_err(|err| ServiceError::from_store(SCOPE, err))
}

/// Admin status change. Every change lands in the timeline; cancelled
/// orders no longer move.
pub async fn update_status(
    db: &Database,
    id: &str,
    request: UpdateStatusRequest,
    admin: &User,
) -> Result<Order, ServiceError> {
    let mut order = find_order(db, id).await?;
    if order.status == OrderStatus::Cancelled {
        return Err(ServiceError::invalid_input(
            SCOPE,
            "Cancelled orders cannot be updated",
        ));
    }

    let now = Utc::now();
    let previous = order.status;
    order.status = request.status;
    order.timeline.push(TimelineEntry {
        status: request.status.as_str().to_string(),
        timestamp: now,
        note: request.note.filter(|n| !n.trim().is_empty()),
        updated_by: Some(admin.id.clone()),
    });

    if let Some(tracking) = request.tracking {
        if let Some(carrier) = tracking.carrier {
            order.tracking.carrier = Some(carrier);
        }
        if let Some(number) = tracking.tracking_number {
            order.tracking.tracking_number = Some(number);
        }
        if let Some(eta) = tracking.estimated_delivery {
            order.tracking.estimated_delivery = Some(eta);
        }
    }
    if let Some(note) = request.admin_note {
        order.notes.admin = Some(note);
    }
    if request.status == OrderStatus::Delivered {
        order.tracking.actual_delivery = Some(now);
        if order.payment.method == PaymentMethod::Cod
            && order.payment.status != PaymentStatus::Paid
        {
            order.payment.status = PaymentStatus::Paid;
            order.payment.paid_at = Some(now);
        }
    }
    order.updated_at = now;

    db.replace_order(&order)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    info!(
        target = "storefront.orders",
        order_id = %order.id,
        from = previous.as_str(),
        to = order.status.as_str(),
        admin = %admin.id,
        "order status changed"
    );
    Ok(order)
}

pub async fn cancel_order(
    db: &Database,
    id: &str,
    request: CancelRequest,
    user: &User,
) -> Result<Order, ServiceError> {
    let mut order = find_order(db, id).await?;
    if order.customer.as_deref() != Some(user.id.as_str()) {
        return Err(ServiceError::forbidden(
            SCOPE,
            "Not authorized to cancel this order",
        ));
    }
    if !order.status.customer_cancellable() {
        return Err(ServiceError::invalid_input(
            SCOPE,
            format!("Order cannot be cancelled once it is {}", order.status.as_str()),
        ));
    }

    let now = Utc::now();
    order.status = OrderStatus::Cancelled;
    order.timeline.push(TimelineEntry {
        status: OrderStatus::Cancelled.as_str().to_string(),
        timestamp: now,
        note: Some(
            request
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Cancelled by customer".into()),
        ),
        updated_by: Some(user.id.clone()),
    });
    order.updated_at = now;
    db.replace_order(&order)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    info!(target = "storefront.orders", order_id = %order.id, "order cancelled by customer");
    Ok(order)
}

pub async fn dashboard_stats(db: &Database) -> Result<DashboardStats, ServiceError> {
    let store = |err| ServiceError::from_store("dashboard", err);
    Ok(DashboardStats {
        total_products: db.count_products(true).await.map_err(store)?,
        total_orders: db.count_orders().await.map_err(store)?,
        total_customers: db.count_users(Some(Role::Customer)).await.map_err(store)?,
        total_revenue: db.revenue().await.map_err(store)?,
        recent_orders: db
            .list_orders(&OrderQuery {
                limit: Some(RECENT_ORDERS),
                ..OrderQuery::default()
            })
            .await
            .map_err(store)?,
    })
}

async fn find_order(db: &Database, id: &str) -> Result<Order, ServiceError> {
    db.find_order(id)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?
        .ok_or_else(|| ServiceError::not_found(SCOPE, "Order not found"))
}

async fn orderable_product(db: &Database, id: &str) -> Result<Product, ServiceError> {
    let product = db
        .find_product(id)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    match product {
        Some(product) if product.is_active => {
            if product.inventory.availability == Availability::OutOfStock {
                return Err(ServiceError::invalid_input(
                    SCOPE,
                    format!("{} is out of stock", product.title),
                ));
            }
            Ok(product)
        }
        _ => Err(ServiceError::invalid_input(
            SCOPE,
            format!("Product {id} is not available"),
        )),
    }
}

/// Guest contact details, filled from the shipping address where the
/// checkout form left them out.
fn guest_details(
    guest: Option<GuestCustomer>,
    shipping: &ShippingAddress,
) -> Result<GuestCustomer, ServiceError> {
    let guest = guest.unwrap_or_default();
    let pick = |value: String, fallback: &str| {
        if value.trim().is_empty() {
            fallback.trim().to_string()
        } else {
            value.trim().to_string()
        }
    };
    let details = GuestCustomer {
        name: pick(guest.name, &shipping.full_name),
        email: pick(guest.email, &shipping.email).to_lowercase(),
        phone: guest
            .phone
            .filter(|p| !p.trim().is_empty())
            .or_else(|| Some(shipping.phone.clone())),
    };
    if details.name.is_empty() || details.email.is_empty() {
        return Err(ServiceError::invalid_input(
            SCOPE,
            "Guest name and email are required",
        ));
    }
    Ok(details)
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ServiceError::invalid_input(SCOPE, format!("Unknown order status {raw}")))
}

fn one() -> u32 {
    1
}
