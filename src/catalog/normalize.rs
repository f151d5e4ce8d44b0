//! Folds the many shapes a product write can arrive in into the canonical
//! document shape.
//!
//! Admin forms post `multipart/form-data`, so nested objects come in as
//! JSON-encoded strings next to older flat fields (`shortDescription`,
//! `availability`, `leadTime`, `imageUrl`). Everything here operates on the
//! raw JSON map; typed validation happens afterwards in the service.

use crate::catalog::product::{DEFAULT_IMAGE_ALT, ProductImage};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Fields that may arrive JSON-encoded inside a form string.
pub const JSON_ENCODED_FIELDS: [&str; 6] = [
    "price",
    "description",
    "inventory",
    "specifications",
    "tags",
    "images",
];

/// Fields the server owns; clients cannot set them.
pub const SERVER_OWNED_FIELDS: [&str; 8] = [
    "_id",
    "id",
    "slug",
    "createdBy",
    "createdAt",
    "updatedAt",
    "ratings",
    "__v",
];

pub type Payload = Map<String, Value>;

/// Runs every normalization rule over `payload`.
///
/// `uploaded` holds images stored for this request; when non-empty they win
/// over any `images`/`imageUrl` in the body. `title` feeds default alt text.
pub fn build_product_payload(
    mut payload: Payload,
    uploaded: &[ProductImage],
    title: Option<&str>,
) -> Payload {
    let alt = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_IMAGE_ALT)
        .to_string();

    for field in JSON_ENCODED_FIELDS {
        if let Some(Value::String(raw)) = payload.get(field) {
            match serde_json::from_str::<Value>(raw) {
                Ok(parsed) => {
                    payload.insert(field.to_string(), parsed);
                }
                Err(err) => {
                    debug!(
                        target = "storefront.catalog",
                        field,
                        error = %err,
                        "form field is not JSON; keeping raw string"
                    );
                }
            }
        }
    }

    merge_short_description(&mut payload);
    merge_inventory(&mut payload);
    normalize_price(&mut payload);
    normalize_images(&mut payload, uploaded, &alt);
    normalize_tags(&mut payload);

    payload
}

pub fn strip_server_owned(payload: &mut Payload) {
    for field in SERVER_OWNED_FIELDS {
        payload.remove(field);
    }
}

/// Images for files stored during this request. On create the first one is
/// primary; on update they are appended behind existing images and never
/// take the primary flag.
pub fn uploaded_images(urls: &[String], alt: &str, first_is_primary: bool) -> Vec<ProductImage> {
    urls.iter()
        .enumerate()
        .map(|(index, url)| ProductImage {
            url: url.clone(),
            alt: alt.to_string(),
            is_primary: first_is_primary && index == 0,
        })
        .collect()
}

fn merge_short_description(payload: &mut Payload) {
    let Some(short) = payload.remove("shortDescription") else {
        return;
    };
    if !truthy(&short) {
        return;
    }
    let mut description = take_object(payload, "description");
    description.insert("short".into(), short);
    payload.insert("description".into(), Value::Object(description));
}

fn merge_inventory(payload: &mut Payload) {
    let availability = payload.remove("availability").filter(truthy);
    let lead_time = payload.remove("leadTime").filter(truthy);
    if availability.is_none() && lead_time.is_none() {
        return;
    }
    let mut inventory = take_object(payload, "inventory");
    if let Some(value) = availability {
        inventory.insert("availability".into(), value);
    }
    if let Some(value) = lead_time {
        inventory.insert("lead_time".into(), value);
    }
    payload.insert("inventory".into(), Value::Object(inventory));
}

fn normalize_price(payload: &mut Payload) {
    let Some(price) = payload.get_mut("price") else {
        return;
    };
    let reshaped = match &*price {
        Value::Number(n) => Some(json!({ "regular": n })),
        Value::String(raw) => Some(json!({ "regular": parse_number(raw) })),
        _ => None,
    };
    if let Some(value) = reshaped {
        *price = value;
        return;
    }
    if let Value::Object(obj) = price {
        let coerced = match obj.get("regular") {
            Some(Value::String(raw)) => Some(parse_number(raw)),
            _ => None,
        };
        if let Some(regular) = coerced {
            obj.insert("regular".into(), regular);
        }
    }
}

fn normalize_images(payload: &mut Payload, uploaded: &[ProductImage], alt: &str) {
    let explicit = match payload.get("images") {
        Some(Value::Array(items)) => Some(items.clone()),
        _ => None,
    };
    let had_array = explicit.is_some();
    let mut images = explicit.unwrap_or_default();

    if let Some(url) = payload.remove("imageUrl").filter(truthy)
        && images.is_empty()
    {
        images.push(json!({ "url": url, "alt": alt, "isPrimary": true }));
    }

    let resolved: Vec<ProductImage> = if !uploaded.is_empty() {
        uploaded.to_vec()
    } else {
        let candidates: Vec<(String, Option<String>, Option<bool>)> =
            images.iter().filter_map(image_candidate).collect();
        candidates
            .into_iter()
            .enumerate()
            .map(|(index, (url, image_alt, primary))| ProductImage {
                url,
                alt: image_alt.unwrap_or_else(|| alt.to_string()),
                is_primary: primary.unwrap_or(index == 0),
            })
            .collect()
    };

    if had_array || !resolved.is_empty() {
        let value = serde_json::to_value(&resolved).unwrap_or_else(|_| Value::Array(vec![]));
        payload.insert("images".into(), value);
    }
}

/// `(url, alt, isPrimary)` from a string or object image entry.
fn image_candidate(entry: &Value) -> Option<(String, Option<String>, Option<bool>)> {
    match entry {
        Value::String(url) if !url.trim().is_empty() => Some((url.trim().to_string(), None, None)),
        Value::Object(obj) => {
            let url = obj
                .get("url")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|u| !u.is_empty())?;
            let alt = obj
                .get("alt")
                .and_then(Value::as_str)
                .filter(|a| !a.trim().is_empty())
                .map(str::to_string);
            let primary = match obj.get("isPrimary") {
                Some(Value::Bool(flag)) => Some(*flag),
                Some(Value::String(raw)) => raw.trim().parse::<bool>().ok(),
                _ => None,
            };
            Some((url.to_string(), alt, primary))
        }
        _ => None,
    }
}

fn normalize_tags(payload: &mut Payload) {
    let Some(tags) = payload.get_mut("tags") else {
        return;
    };
    if tags.is_array() {
        return;
    }
    let reparsed = match &*tags {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_array),
        _ => None,
    };
    *tags = reparsed.unwrap_or_else(|| Value::Array(vec![]));
}

fn take_object(payload: &mut Payload, key: &str) -> Map<String, Value> {
    match payload.remove(key) {
        Some(Value::Object(obj)) => obj,
        _ => Map::new(),
    }
}

fn parse_number(raw: &str) -> Value {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn json_encoded_fields_are_parsed() {
        let out = build_product_payload(
            payload(json!({
                "title": "Tulip",
                "description": "{\"short\":\"Pink tulip\",\"full\":\"Long text\"}",
                "specifications": "{\"materials\":[\"cotton\"]}",
            })),
            &[],
            Some("Tulip"),
        );
        assert_eq!(out["description"]["short"], json!("Pink tulip"));
        assert_eq!(out["specifications"]["materials"], json!(["cotton"]));
        assert_eq!(out["title"], json!("Tulip"));
    }

    #[test]
    fn unparseable_json_field_keeps_raw_string() {
        let out = build_product_payload(
            payload(json!({ "specifications": "{not json" })),
            &[],
            None,
        );
        assert_eq!(out["specifications"], json!("{not json"));
    }

    #[test]
    fn short_description_overwrites_only_short() {
        let out = build_product_payload(
            payload(json!({
                "description": { "short": "old", "full": "keep me" },
                "shortDescription": "new",
            })),
            &[],
            None,
        );
        assert_eq!(out["description"], json!({ "short": "new", "full": "keep me" }));
        assert!(out.get("shortDescription").is_none());
    }

    #[test]
    fn short_description_replaces_non_object_description() {
        let out = build_product_payload(
            payload(json!({ "description": "plain text", "shortDescription": "short" })),
            &[],
            None,
        );
        assert_eq!(out["description"], json!({ "short": "short" }));
    }

    #[test]
    fn legacy_inventory_fields_merge() {
        let out = build_product_payload(
            payload(json!({
                "inventory": "{\"quantity\":3,\"lead_time\":\"2 weeks\"}",
                "availability": "In Stock",
            })),
            &[],
            None,
        );
        assert_eq!(
            out["inventory"],
            json!({ "quantity": 3, "availability": "In Stock", "lead_time": "2 weeks" })
        );
        assert!(out.get("availability").is_none());
    }

    #[test]
    fn lead_time_alone_builds_inventory() {
        let out = build_product_payload(payload(json!({ "leadTime": "3 days" })), &[], None);
        assert_eq!(out["inventory"], json!({ "lead_time": "3 days" }));
    }

    #[test]
    fn price_shapes_normalize_to_regular() {
        let numeric = build_product_payload(payload(json!({ "price": 450 })), &[], None);
        assert_eq!(numeric["price"], json!({ "regular": 450 }));

        let form = build_product_payload(payload(json!({ "price": "450" })), &[], None);
        assert_eq!(form["price"]["regular"].as_f64(), Some(450.0));

        let decimal = build_product_payload(payload(json!({ "price": "99.5" })), &[], None);
        assert_eq!(decimal["price"]["regular"].as_f64(), Some(99.5));

        let nested = build_product_payload(
            payload(json!({ "price": "{\"regular\":\"300\",\"sale\":250}" })),
            &[],
            None,
        );
        assert_eq!(nested["price"]["regular"].as_f64(), Some(300.0));
        assert_eq!(nested["price"]["sale"], json!(250));
    }

    #[test]
    fn non_numeric_price_becomes_null() {
        let out = build_product_payload(payload(json!({ "price": "free" })), &[], None);
        assert_eq!(out["price"], json!({ "regular": null }));
    }

    #[test]
    fn uploaded_images_replace_body_images() {
        let uploaded = uploaded_images(&["/uploads/products/a.jpg".into()], "Bag", true);
        let out = build_product_payload(
            payload(json!({
                "images": "[\"https://cdn.example.com/x.jpg\"]",
                "imageUrl": "https://cdn.example.com/legacy.jpg",
            })),
            &uploaded,
            Some("Bag"),
        );
        assert_eq!(
            out["images"],
            json!([{ "url": "/uploads/products/a.jpg", "alt": "Bag", "isPrimary": true }])
        );
        assert!(out.get("imageUrl").is_none());
    }

    #[test]
    fn explicit_images_beat_legacy_image_url() {
        let out = build_product_payload(
            payload(json!({
                "images": ["https://cdn.example.com/1.jpg", { "url": "https://cdn.example.com/2.jpg", "alt": "side" }],
                "imageUrl": "https://cdn.example.com/legacy.jpg",
            })),
            &[],
            Some("Rose"),
        );
        assert_eq!(
            out["images"],
            json!([
                { "url": "https://cdn.example.com/1.jpg", "alt": "Rose", "isPrimary": true },
                { "url": "https://cdn.example.com/2.jpg", "alt": "side", "isPrimary": false },
            ])
        );
    }

    #[test]
    fn image_url_used_when_no_images() {
        let out = build_product_payload(
            payload(json!({ "imageUrl": "https://cdn.example.com/legacy.jpg" })),
            &[],
            None,
        );
        assert_eq!(
            out["images"],
            json!([{ "url": "https://cdn.example.com/legacy.jpg", "alt": "Product image", "isPrimary": true }])
        );
    }

    #[test]
    fn explicit_primary_flag_is_respected() {
        let out = build_product_payload(
            payload(json!({
                "images": [
                    { "url": "/a.jpg", "isPrimary": false },
                    { "url": "/b.jpg", "isPrimary": true },
                ]
            })),
            &[],
            None,
        );
        assert_eq!(out["images"][0]["isPrimary"], json!(false));
        assert_eq!(out["images"][1]["isPrimary"], json!(true));
    }

    #[test]
    fn images_without_url_are_dropped() {
        let out = build_product_payload(
            payload(json!({ "images": [{ "alt": "ghost" }, 42, "/real.jpg"] })),
            &[],
            None,
        );
        assert_eq!(
            out["images"],
            json!([{ "url": "/real.jpg", "alt": "Product image", "isPrimary": true }])
        );
    }

    #[test]
    fn tags_fall_back_to_empty_list() {
        let parsed = build_product_payload(payload(json!({ "tags": "[\"gift\",\"pink\"]" })), &[], None);
        assert_eq!(parsed["tags"], json!(["gift", "pink"]));

        let junk = build_product_payload(payload(json!({ "tags": "gift, pink" })), &[], None);
        assert_eq!(junk["tags"], json!([]));

        let scalar = build_product_payload(payload(json!({ "tags": 7 })), &[], None);
        assert_eq!(scalar["tags"], json!([]));
    }

    #[test]
    fn server_owned_fields_are_stripped() {
        let mut map = payload(json!({
            "_id": "x",
            "slug": "forged",
            "createdBy": "someone",
            "ratings": { "average": 5 },
            "title": "ok",
        }));
        strip_server_owned(&mut map);
        assert_eq!(Value::Object(map), json!({ "title": "ok" }));
    }

    #[test]
    fn update_uploads_never_claim_primary() {
        let images = uploaded_images(&["/u/1.jpg".into(), "/u/2.jpg".into()], "Bag", false);
        assert!(images.iter().all(|img| !img.is_primary));
    }
}
