//! Document storage for products, users and orders.
//!
//! Two backends share one surface: MongoDB when a connection string is
//! configured, an in-process store otherwise. Both enforce the same unique
//! keys (`products.sku`, `products.slug`, `users.username`, `users.email`,
//! `orders.orderNumber`) and report violations as [`StoreError::Duplicate`].

pub mod memory;
pub mod mongo;

use crate::catalog::product::{Category, Product};
use crate::orders::model::{Order, OrderStatus};
use crate::users::{Role, User};
use thiserror::Error;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for unique field `{field}`")]
    Duplicate { field: String },
    #[error("document not found")]
    NotFound,
    #[error("database error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProductSort {
    /// Featured first, newest first within each group.
    #[default]
    Featured,
    Newest,
    PriceAsc,
    PriceDesc,
}

impl ProductSort {
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "price_asc" => ProductSort::PriceAsc,
            "price_desc" => ProductSort::PriceDesc,
            "newest" => ProductSort::Newest,
            _ => ProductSort::Featured,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductQuery {
    pub active_only: bool,
    pub category: Option<Category>,
    pub featured: Option<bool>,
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort: ProductSort,
    pub skip: u64,
    pub limit: u64,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            active_only: true,
            category: None,
            featured: None,
            search: None,
            min_price: None,
            max_price: None,
            sort: ProductSort::default(),
            skip: 0,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub customer: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: Option<u64>,
}

#[derive(Clone)]
pub enum Database {
    Memory(MemoryStore),
    Mongo(MongoStore),
}

impl Database {
    pub fn in_memory() -> Self {
        Database::Memory(MemoryStore::default())
    }

    pub async fn connect(uri: Option<&str>, db_name: &str) -> Result<Self, StoreError> {
        match uri {
            Some(uri) => Ok(Database::Mongo(MongoStore::connect(uri, db_name).await?)),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Database::Memory(_) => "memory",
            Database::Mongo(_) => "mongodb",
        }
    }

    pub async fn ping(&self) -> bool {
        match self {
            Database::Memory(_) => true,
            Database::Mongo(store) => store.ping().await,
        }
    }

    pub async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.insert_product(product).await,
            Database::Mongo(store) => store.insert_product(product).await,
        }
    }

    pub async fn replace_product(&self, product: &Product) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.replace_product(product).await,
            Database::Mongo(store) => store.replace_product(product).await,
        }
    }

    pub async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        match self {
            Database::Memory(store) => store.find_product(id).await,
            Database::Mongo(store) => store.find_product(id).await,
        }
    }

    pub async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError> {
        match self {
            Database::Memory(store) => store.find_product_by_slug(slug).await,
            Database::Mongo(store) => store.find_product_by_slug(slug).await,
        }
    }

    /// Matching page plus the total match count.
    pub async fn list_products(
        &self,
        query: &ProductQuery,
    ) -> Result<(Vec<Product>, u64), StoreError> {
        match self {
            Database::Memory(store) => store.list_products(query).await,
            Database::Mongo(store) => store.list_products(query).await,
        }
    }

    pub async fn count_products(&self, active_only: bool) -> Result<u64, StoreError> {
        match self {
            Database::Memory(store) => store.count_products(active_only).await,
            Database::Mongo(store) => store.count_products(active_only).await,
        }
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.insert_user(user).await,
            Database::Mongo(store) => store.insert_user(user).await,
        }
    }

    pub async fn replace_user(&self, user: &User) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.replace_user(user).await,
            Database::Mongo(store) => store.replace_user(user).await,
        }
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        match self {
            Database::Memory(store) => store.find_user(id).await,
            Database::Mongo(store) => store.find_user(id).await,
        }
    }

    /// Looks an account up by username or (case-insensitively) email.
    pub async fn find_user_by_login(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        match self {
            Database::Memory(store) => store.find_user_by_login(identifier).await,
            Database::Mongo(store) => store.find_user_by_login(identifier).await,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        match self {
            Database::Memory(store) => store.list_users().await,
            Database::Mongo(store) => store.list_users().await,
        }
    }

    pub async fn count_users(&self, role: Option<Role>) -> Result<u64, StoreError> {
        match self {
            Database::Memory(store) => store.count_users(role).await,
            Database::Mongo(store) => store.count_users(role).await,
        }
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.insert_order(order).await,
            Database::Mongo(store) => store.insert_order(order).await,
        }
    }

    pub async fn replace_order(&self, order: &Order) -> Result<(), StoreError> {
        match self {
            Database::Memory(store) => store.replace_order(order).await,
            Database::Mongo(store) => store.replace_order(order).await,
        }
    }

    pub async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        match self {
            Database::Memory(store) => store.find_order(id).await,
            Database::Mongo(store) => store.find_order(id).await,
        }
    }

    /// Newest first.
    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError> {
        match self {
            Database::Memory(store) => store.list_orders(query).await,
            Database::Mongo(store) => store.list_orders(query).await,
        }
    }

    pub async fn count_orders(&self) -> Result<u64, StoreError> {
        match self {
            Database::Memory(store) => store.count_orders().await,
            Database::Mongo(store) => store.count_orders().await,
        }
    }

    /// Sum of `pricing.total` over orders that were not cancelled.
    pub async fn revenue(&self) -> Result<f64, StoreError> {
        match self {
            Database::Memory(store) => store.revenue().await,
            Database::Mongo(store) => store.revenue().await,
        }
    }
}
