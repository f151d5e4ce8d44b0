use crate::error::ServiceError;
use crate::idempotency::Claim;
use crate::models::ApiResponse;
use crate::orders::model::Order;
use crate::orders::service::{
    self, CancelRequest, DashboardStats, OrderListParams, PlaceOrderRequest, UpdateStatusRequest,
};
use crate::security::{AuthUser, MaybeUser};
use crate::state::AppState;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use tracing::info;

type OrderResponse = Json<ApiResponse<Order>>;

/// Place a cash-on-delivery order as a signed-in customer or a guest.
///
/// - Method: `POST`
/// - Path: `/api/orders`
/// - Auth: optional bearer token
/// - Headers: `Idempotency-Key` replays the first response for the same
///   caller; guests are told apart by their contact and basket details
pub async fn place_order(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    headers: HeaderMap,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, OrderResponse), ServiceError> {
    crate::metrics::inc_requests("POST /api/orders");
    let created = |order: Order| {
        (
            StatusCode::CREATED,
            Json(ApiResponse::data(order).with_message("Order placed successfully")),
        )
    };

    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let Some(key) = key else {
        let order = service::place_order(&state.db, payload, user.as_ref()).await?;
        return Ok(created(order));
    };

    let scope = match &user {
        Some(user) => user.id.clone(),
        None => payload.guest_scope(),
    };
    match state.order_replays.claim(&scope, &key).await {
        Claim::Replay(existing) => {
            info!(target = "storefront.orders", order_id = %existing.id, "replaying idempotent order");
            return Ok(created(existing));
        }
        Claim::InFlight => {
            return Err(ServiceError::conflict_on(
                "orders",
                "Idempotency-Key",
                "A request with this Idempotency-Key is still being processed",
            ));
        }
        Claim::Fresh => {}
    }

    match service::place_order(&state.db, payload, user.as_ref()).await {
        Ok(order) => {
            state.order_replays.complete(&scope, &key, &order).await;
            Ok(created(order))
        }
        Err(err) => {
            state.order_replays.release(&scope, &key).await;
            Err(err)
        }
    }
}

pub async fn my_orders(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = service::my_orders(&state.db, &user).await?;
    let count = orders.len();
    Ok(Json(ApiResponse::data(orders).with_count(count)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<OrderResponse, ServiceError> {
    let order = service::get_order(&state.db, &id, &user).await?;
    Ok(Json(ApiResponse::data(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<OrderResponse, ServiceError> {
    // the body is optional; an empty one means no reason given
    let request: CancelRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            ServiceError::invalid_input("orders", "Invalid request body").with_detail(err.to_string())
        })?
    };
    let order = service::cancel_order(&state.db, &id, request, &user).await?;
    Ok(Json(
        ApiResponse::data(order).with_message("Order cancelled successfully"),
    ))
}

/// Admin order list, newest first; `status` and `limit` query filters.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<OrderListParams>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = service::list_orders(&state.db, &params).await?;
    let count = orders.len();
    Ok(Json(ApiResponse::data(orders).with_count(count)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(AuthUser(admin)): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<OrderResponse, ServiceError> {
    let order = service::update_status(&state.db, &id, payload, &admin).await?;
    Ok(Json(
        ApiResponse::data(order).with_message("Order status updated"),
    ))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DashboardStats>>, ServiceError> {
    crate::metrics::inc_requests("/api/dashboard/stats");
    let stats = service::dashboard_stats(&state.db).await?;
    Ok(Json(ApiResponse::data(stats)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::{StatusCode, header};
    use serde_json::{Value, json};

    async fn seed_product(app: &TestApp, token: &str) -> String {
        let (status, body) = app
            .send(json_request(
                "POST",
                "/api/products",
                Some(token),
                product_body("Peony Bunch", "FL-900"),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["_id"].as_str().unwrap().to_string()
    }

    fn checkout(product: &str) -> Value {
        json!({
            "items": [{ "product": product, "quantity": 2, "customizations": { "color": "pink" } }],
            "shippingAddress": {
                "fullName": "Guest Shopper",
                "phone": "9000000000",
                "email": "guest@example.com",
                "street": "4 Lake View",
                "city": "Kochi",
                "state": "KL",
                "pincode": "682001"
            },
            "paymentMethod": "COD"
        })
    }

    #[tokio::test]
    async fn guest_checkout_with_idempotency_key() {
        let app = TestApp::new().await;
        let admin = app.admin_token().await;
        let product = seed_product(&app, &admin).await;

        let request = || {
            let mut request = json_request("POST", "/api/orders", None, checkout(&product));
            request
                .headers_mut()
                .insert("Idempotency-Key", header::HeaderValue::from_static("checkout-1"));
            request
        };
        let (status, first) = app.send(request()).await;
        assert_eq!(status, StatusCode::CREATED, "{first}");
        assert_eq!(first["data"]["pricing"]["total"], 700.0);
        assert_eq!(first["data"]["guestCustomer"]["email"], "guest@example.com");
        assert_eq!(first["data"]["items"][0]["customizations"]["color"], "pink");

        let (status, second) = app.send(request()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["data"]["_id"], first["data"]["_id"]);

        let (_, stats) = app.send(get("/api/dashboard/stats", Some(&admin))).await;
        assert_eq!(stats["data"]["totalOrders"], 1);
        assert_eq!(stats["data"]["totalRevenue"], 700.0);
    }

    fn keyed(body: Value, key: &'static str) -> axum::http::Request<axum::body::Body> {
        let mut request = json_request("POST", "/api/orders", None, body);
        request
            .headers_mut()
            .insert("Idempotency-Key", header::HeaderValue::from_static(key));
        request
    }

    #[tokio::test]
    async fn guests_sharing_a_key_get_their_own_orders() {
        let app = TestApp::new().await;
        let admin = app.admin_token().await;
        let product = seed_product(&app, &admin).await;

        let mut alice = checkout(&product);
        alice["shippingAddress"]["fullName"] = json!("Alice");
        alice["shippingAddress"]["email"] = json!("alice@example.com");
        let mut bob = checkout(&product);
        bob["shippingAddress"]["fullName"] = json!("Bob");
        bob["shippingAddress"]["email"] = json!("bob@example.com");
        bob["shippingAddress"]["street"] = json!("9 Hill Road");

        let (status, first) = app.send(keyed(alice, "1")).await;
        assert_eq!(status, StatusCode::CREATED, "{first}");
        let (status, second) = app.send(keyed(bob, "1")).await;
        assert_eq!(status, StatusCode::CREATED, "{second}");

        assert_ne!(second["data"]["_id"], first["data"]["_id"]);
        assert_eq!(second["data"]["guestCustomer"]["email"], "bob@example.com");
        assert_eq!(second["data"]["shippingAddress"]["fullName"], "Bob");
        assert_eq!(app.state.db.count_orders().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_keyed_checkouts_place_one_order() {
        let app = TestApp::new().await;
        let admin = app.admin_token().await;
        let product = seed_product(&app, &admin).await;

        let ((first_status, first), (second_status, second)) = tokio::join!(
            app.send(keyed(checkout(&product), "double-click")),
            app.send(keyed(checkout(&product), "double-click")),
        );

        assert_eq!(app.state.db.count_orders().await.unwrap(), 1);
        let placed: Vec<&Value> = [(first_status, &first), (second_status, &second)]
            .into_iter()
            .filter(|(status, _)| *status == StatusCode::CREATED)
            .map(|(_, body)| body)
            .collect();
        assert!(!placed.is_empty());
        assert!(placed.iter().all(|body| body["data"]["_id"] == placed[0]["data"]["_id"]));
        for (status, body) in [(first_status, &first), (second_status, &second)] {
            if status != StatusCode::CREATED {
                assert_eq!(status, StatusCode::CONFLICT, "{body}");
            }
        }
    }

    #[tokio::test]
    async fn failed_keyed_checkout_can_be_retried() {
        let app = TestApp::new().await;
        let admin = app.admin_token().await;
        let product = seed_product(&app, &admin).await;
        let customer = app.customer_token("meera").await;
        let with_token = |body: Value| {
            let mut request = json_request("POST", "/api/orders", Some(&customer), body);
            request
                .headers_mut()
                .insert("Idempotency-Key", header::HeaderValue::from_static("retry-me"));
            request
        };

        let mut broken = checkout(&product);
        broken["items"][0]["quantity"] = json!(0);
        let (status, body) = app.send(with_token(broken)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Quantity must be at least 1");

        let (status, body) = app.send(with_token(checkout(&product))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(app.state.db.count_orders().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn customer_order_lifecycle() {
        let app = TestApp::new().await;
        let admin = app.admin_token().await;
        let product = seed_product(&app, &admin).await;
        let customer = app.customer_token("devi").await;

        let (status, body) = app
            .send(json_request("POST", "/api/orders", Some(&customer), checkout(&product)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"].get("guestCustomer").is_none());
        let id = body["data"]["_id"].as_str().unwrap().to_string();

        let (status, body) = app.send(get("/api/orders/mine", Some(&customer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = app
            .send(json_request(
                "PUT",
                &format!("/api/orders/{id}/status"),
                Some(&admin),
                json!({ "status": "Shipped", "tracking": { "carrier": "BlueDart", "trackingNumber": "BD42" } }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["tracking"]["trackingNumber"], "BD42");

        let (status, body) = app
            .send(json_request(
                "PUT",
                &format!("/api/orders/{id}/cancel"),
                Some(&customer),
                json!({ "reason": "too slow" }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Order cannot be cancelled once it is Shipped");

        let (status, body) = app
            .send(get(&format!("/api/orders/{id}"), Some(&customer)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "Shipped");
        assert_eq!(body["data"]["timeline"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn admin_routes_reject_customers() {
        let app = TestApp::new().await;
        let customer = app.customer_token("arjun").await;
        let (status, _) = app.send(get("/api/orders", Some(&customer))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.send(get("/api/dashboard/stats", Some(&customer))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.admin_token().await;
        let (status, body) = app.send(get("/api/orders?status=Pending", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn invalid_token_on_checkout_is_rejected() {
        let app = TestApp::new().await;
        let (status, _) = app
            .send(json_request(
                "POST",
                "/api/orders",
                Some("garbage"),
                checkout("65f0c0ffee0000000000dead"),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
