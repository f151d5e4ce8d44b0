use crate::models::Rfc3339Millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as, skip_serializing_none};
use thiserror::Error;

pub const TITLE_MAX: usize = 200;
pub const SHORT_DESCRIPTION_MAX: usize = 500;
pub const FULL_DESCRIPTION_MAX: usize = 2000;
pub const DEFAULT_IMAGE_ALT: &str = "Product image";

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    pub description: ProductDescription,
    pub category: Category,
    pub subcategory: Option<String>,
    pub price: ProductPrice,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    pub specifications: Option<Specifications>,
    pub seo: Option<Seo>,
    pub sku: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub featured: bool,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default = "default_true", rename = "isActive")]
    pub is_active: bool,
    #[serde(default)]
    pub ratings: Ratings,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    #[serde_as(as = "Rfc3339Millis")]
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDescription {
    #[serde(default)]
    pub short: String,
    pub full: Option<String>,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPrice {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub regular: f64,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub sale: Option<f64>,
}

impl ProductPrice {
    /// A zero sale price means no sale is running.
    fn has_discount(&self) -> Option<f64> {
        self.sale.filter(|sale| *sale > 0.0 && *sale < self.regular)
    }

    /// Sale price when it undercuts the regular price.
    pub fn current(&self) -> f64 {
        self.has_discount().unwrap_or(self.regular)
    }

    pub fn discount_percentage(&self) -> u32 {
        match self.has_discount() {
            Some(sale) if self.regular > 0.0 => {
                (((self.regular - sale) / self.regular) * 100.0).round() as u32
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    Keychains,
    Flowers,
    #[serde(rename = "Home Decor")]
    HomeDecor,
    Bags,
    Toys,
    Accessories,
    Custom,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Keychains => "Keychains",
            Category::Flowers => "Flowers",
            Category::HomeDecor => "Home Decor",
            Category::Bags => "Bags",
            Category::Toys => "Toys",
            Category::Accessories => "Accessories",
            Category::Custom => "Custom",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        [
            Category::Keychains,
            Category::Flowers,
            Category::HomeDecor,
            Category::Bags,
            Category::Toys,
            Category::Accessories,
            Category::Custom,
        ]
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(input.trim()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Availability {
    #[serde(rename = "In Stock")]
    InStock,
    #[default]
    #[serde(rename = "Made to Order")]
    MadeToOrder,
    #[serde(rename = "Out of Stock")]
    OutOfStock,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub availability: Availability,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub quantity: u32,
    #[serde(default = "default_lead_time")]
    pub lead_time: String,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            availability: Availability::default(),
            quantity: 0,
            lead_time: default_lead_time(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductImage {
    pub url: String,
    #[serde(default)]
    pub alt: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default, rename = "isPrimary")]
    pub is_primary: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Specifications {
    #[serde(default)]
    pub materials: Vec<String>,
    pub dimensions: Option<Dimensions>,
    pub weight: Option<Weight>,
    #[serde(default)]
    pub colors: Vec<String>,
    pub care_instructions: Option<String>,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub length: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub width: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub height: Option<f64>,
    #[serde(default = "default_length_unit")]
    pub unit: String,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weight {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub value: Option<f64>,
    #[serde(default = "default_weight_unit")]
    pub unit: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seo {
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default)]
    pub average: f64,
    #[serde(default)]
    pub count: u32,
}

fn default_currency() -> String {
    "INR".into()
}

fn default_lead_time() -> String {
    "7-10 days".into()
}

fn default_length_unit() -> String {
    "cm".into()
}

fn default_weight_unit() -> String {
    "g".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} cannot be longer than {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{0} must be a non-negative number")]
    Negative(&'static str),
    #[error("ratings.average must be between 0 and 5")]
    RatingOutOfRange,
}

impl Product {
    /// Field-level rules that serde cannot express on its own.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        if self.title.trim().is_empty() {
            return Err(SchemaViolation::Required("title"));
        }
        if self.title.chars().count() > TITLE_MAX {
            return Err(SchemaViolation::TooLong {
                field: "title",
                max: TITLE_MAX,
            });
        }
        if self.description.short.trim().is_empty() {
            return Err(SchemaViolation::Required("description.short"));
        }
        if self.description.short.chars().count() > SHORT_DESCRIPTION_MAX {
            return Err(SchemaViolation::TooLong {
                field: "description.short",
                max: SHORT_DESCRIPTION_MAX,
            });
        }
        if let Some(full) = &self.description.full
            && full.chars().count() > FULL_DESCRIPTION_MAX
        {
            return Err(SchemaViolation::TooLong {
                field: "description.full",
                max: FULL_DESCRIPTION_MAX,
            });
        }
        if !self.price.regular.is_finite() || self.price.regular < 0.0 {
            return Err(SchemaViolation::Negative("price.regular"));
        }
        if let Some(sale) = self.price.sale
            && (!sale.is_finite() || sale < 0.0)
        {
            return Err(SchemaViolation::Negative("price.sale"));
        }
        if self.sku.trim().is_empty() {
            return Err(SchemaViolation::Required("sku"));
        }
        if !(0.0..=5.0).contains(&self.ratings.average) {
            return Err(SchemaViolation::RatingOutOfRange);
        }
        Ok(())
    }

    pub fn primary_image(&self) -> Option<&ProductImage> {
        self.images
            .iter()
            .find(|img| img.is_primary)
            .or_else(|| self.images.first())
    }

    pub fn view(self) -> ProductView {
        ProductView {
            current_price: self.price.current(),
            discount_percentage: self.price.discount_percentage(),
            product: self,
        }
    }
}

/// API representation: the stored document plus derived pricing.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    #[serde(rename = "currentPrice")]
    pub current_price: f64,
    #[serde(rename = "discountPercentage")]
    pub discount_percentage: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Product {
        serde_json::from_value(json!({
            "_id": "65f0c0ffee0000000000abcd",
            "title": "Tulip Keychain",
            "description": { "short": "Crocheted tulip" },
            "category": "Keychains",
            "price": { "regular": 250 },
            "sku": "KC-TULIP",
            "createdBy": "65f0c0ffee0000000000aaaa",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-01T10:00:00Z"
        }))
        .expect("sample product")
    }

    #[test]
    fn schema_defaults_apply() {
        let product = sample();
        assert_eq!(product.currency, "INR");
        assert_eq!(product.inventory.availability, Availability::MadeToOrder);
        assert_eq!(product.inventory.lead_time, "7-10 days");
        assert_eq!(product.inventory.quantity, 0);
        assert!(product.is_active);
        assert!(!product.featured);
        assert!(product.validate().is_ok());
    }

    #[test]
    fn form_strings_coerce_into_scalars() {
        let product: Product = serde_json::from_value(json!({
            "_id": "65f0c0ffee0000000000abcd",
            "title": "Sunflower Pot",
            "description": { "short": "Bright" },
            "category": "Home Decor",
            "price": { "regular": "900", "sale": "750" },
            "inventory": { "availability": "In Stock", "quantity": "4" },
            "featured": "true",
            "sku": "HD-SUN",
            "createdBy": "65f0c0ffee0000000000aaaa",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-01T10:00:00Z"
        }))
        .expect("coerced product");
        assert_eq!(product.category, Category::HomeDecor);
        assert_eq!(product.price.regular, 900.0);
        assert_eq!(product.price.sale, Some(750.0));
        assert_eq!(product.inventory.quantity, 4);
        assert!(product.featured);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["category"] = json!("Furniture");
        assert!(serde_json::from_value::<Product>(value).is_err());
    }

    #[test]
    fn derived_pricing_follows_sale() {
        let mut product = sample();
        product.price = ProductPrice {
            regular: 400.0,
            sale: Some(300.0),
        };
        let view = serde_json::to_value(product.clone().view()).unwrap();
        assert_eq!(view["currentPrice"], json!(300.0));
        assert_eq!(view["discountPercentage"], json!(25));
        assert_eq!(view["sku"], json!("KC-TULIP"));

        product.price.sale = Some(500.0);
        assert_eq!(product.price.current(), 400.0);
        assert_eq!(product.price.discount_percentage(), 0);
    }

    #[test]
    fn zero_sale_is_not_a_discount() {
        let price: ProductPrice =
            serde_json::from_value(json!({ "regular": 100, "sale": "0" })).unwrap();
        assert_eq!(price.sale, Some(0.0));
        assert_eq!(price.current(), 100.0);
        assert_eq!(price.discount_percentage(), 0);
    }

    #[test]
    fn validation_catches_long_titles_and_blank_descriptions() {
        let mut product = sample();
        product.title = "x".repeat(TITLE_MAX + 1);
        assert_eq!(
            product.validate(),
            Err(SchemaViolation::TooLong {
                field: "title",
                max: TITLE_MAX
            })
        );

        let mut product = sample();
        product.description.short = "   ".into();
        assert_eq!(
            product.validate(),
            Err(SchemaViolation::Required("description.short"))
        );
    }

    #[test]
    fn primary_image_falls_back_to_first() {
        let mut product = sample();
        product.images = vec![
            ProductImage {
                url: "/a.jpg".into(),
                alt: "a".into(),
                is_primary: false,
            },
            ProductImage {
                url: "/b.jpg".into(),
                alt: "b".into(),
                is_primary: false,
            },
        ];
        assert_eq!(product.primary_image().unwrap().url, "/a.jpg");
        product.images[1].is_primary = true;
        assert_eq!(product.primary_image().unwrap().url, "/b.jpg");
    }
}
