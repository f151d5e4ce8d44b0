use super::{OrderQuery, ProductQuery, ProductSort, StoreError};
use crate::catalog::product::Product;
use crate::orders::model::{Order, OrderStatus};
use crate::users::{Role, User};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    bson::{Bson, Document, doc},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tracing::{info, warn};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: mongodb::Database,
    products: Collection<Product>,
    users: Collection<User>,
    orders: Collection<Order>,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(map_err)?;
        let db = client.database(db_name);
        let store = Self {
            products: db.collection("products"),
            users: db.collection("users"),
            orders: db.collection("orders"),
            db,
        };
        store.ensure_indexes().await?;
        info!(target = "storefront.store", database = db_name, "connected to MongoDB");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        for field in ["sku", "slug"] {
            self.products
                .create_index(unique_index(field))
                .await
                .map_err(map_err)?;
        }
        for keys in [
            doc! { "category": 1, "isActive": 1 },
            doc! { "featured": 1, "isActive": 1 },
            doc! { "price.regular": 1 },
        ] {
            self.products
                .create_index(IndexModel::builder().keys(keys).build())
                .await
                .map_err(map_err)?;
        }
        for field in ["username", "email"] {
            self.users
                .create_index(unique_index(field))
                .await
                .map_err(map_err)?;
        }
        self.orders
            .create_index(unique_index("orderNumber"))
            .await
            .map_err(map_err)?;
        for keys in [
            doc! { "customer": 1, "createdAt": -1 },
            doc! { "status": 1, "createdAt": -1 },
        ] {
            self.orders
                .create_index(IndexModel::builder().keys(keys).build())
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        match self.db.run_command(doc! { "ping": 1 }).await {
            Ok(_) => true,
            Err(err) => {
                warn!(target = "storefront.store", error = %err, "mongodb ping failed");
                false
            }
        }
    }

    pub async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        self.products
            .insert_one(product)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    pub async fn replace_product(&self, product: &Product) -> Result<(), StoreError> {
        let result = self
            .products
            .replace_one(doc! { "_id": product.id.as_str() }, product)
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        self.products
            .find_one(doc! { "_id": id })
            .await
            .map_err(map_err)
    }

    pub async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError> {
        self.products
            .find_one(doc! { "slug": slug })
            .await
            .map_err(map_err)
    }

    pub async fn list_products(
        &self,
        query: &ProductQuery,
    ) -> Result<(Vec<Product>, u64), StoreError> {
        let filter = product_filter(query);
        let total = self
            .products
            .count_documents(filter.clone())
            .await
            .map_err(map_err)?;
        let cursor = self
            .products
            .find(filter)
            .sort(product_sort(query.sort))
            .skip(query.skip)
            .limit(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .await
            .map_err(map_err)?;
        let page = cursor.try_collect().await.map_err(map_err)?;
        Ok((page, total))
    }

    pub async fn count_products(&self, active_only: bool) -> Result<u64, StoreError> {
        let filter = if active_only {
            doc! { "isActive": true }
        } else {
            doc! {}
        };
        self.products
            .count_documents(filter)
            .await
            .map_err(map_err)
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.users
            .insert_one(user)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    pub async fn replace_user(&self, user: &User) -> Result<(), StoreError> {
        let result = self
            .users
            .replace_one(doc! { "_id": user.id.as_str() }, user)
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.users
            .find_one(doc! { "_id": id })
            .await
            .map_err(map_err)
    }

    pub async fn find_user_by_login(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        self.users
            .find_one(doc! {
                "$or": [
                    { "username": identifier },
                    { "email": identifier.to_lowercase() },
                ]
            })
            .await
            .map_err(map_err)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let cursor = self
            .users
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .await
            .map_err(map_err)?;
        cursor.try_collect().await.map_err(map_err)
    }

    pub async fn count_users(&self, role: Option<Role>) -> Result<u64, StoreError> {
        let filter = match role {
            Some(role) => doc! { "role": role.as_str() },
            None => doc! {},
        };
        self.users.count_documents(filter).await.map_err(map_err)
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.orders
            .insert_one(order)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    pub async fn replace_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = self
            .orders
            .replace_one(doc! { "_id": order.id.as_str() }, order)
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.orders
            .find_one(doc! { "_id": id })
            .await
            .map_err(map_err)
    }

    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError> {
        let mut filter = Document::new();
        if let Some(customer) = &query.customer {
            filter.insert("customer", customer.as_str());
        }
        if let Some(status) = query.status {
            filter.insert("status", status.as_str());
        }
        let mut find = self
            .orders
            .find(filter)
            .sort(doc! { "createdAt": -1, "orderNumber": -1 });
        if let Some(limit) = query.limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let cursor = find.await.map_err(map_err)?;
        cursor.try_collect().await.map_err(map_err)
    }

    pub async fn count_orders(&self) -> Result<u64, StoreError> {
        self.orders
            .count_documents(doc! {})
            .await
            .map_err(map_err)
    }

    pub async fn revenue(&self) -> Result<f64, StoreError> {
        let pipeline = vec![
            doc! { "$match": { "status": { "$ne": OrderStatus::Cancelled.as_str() } } },
            doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$pricing.total" } } },
        ];
        let mut cursor = self.orders.aggregate(pipeline).await.map_err(map_err)?;
        let Some(group) = cursor.try_next().await.map_err(map_err)? else {
            return Ok(0.0);
        };
        Ok(match group.get("total") {
            Some(Bson::Double(v)) => *v,
            Some(Bson::Int32(v)) => f64::from(*v),
            Some(Bson::Int64(v)) => *v as f64,
            _ => 0.0,
        })
    }
}

fn unique_index(field: &str) -> IndexModel {
    let mut keys = Document::new();
    keys.insert(field, 1);
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn product_filter(query: &ProductQuery) -> Document {
    let mut filter = Document::new();
    if query.active_only {
        filter.insert("isActive", true);
    }
    if let Some(category) = query.category {
        filter.insert("category", category.as_str());
    }
    if let Some(featured) = query.featured {
        filter.insert("featured", featured);
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = regex::escape(search.trim());
        let matcher = doc! { "$regex": pattern, "$options": "i" };
        filter.insert(
            "$or",
            vec![
                doc! { "title": matcher.clone() },
                doc! { "description.short": matcher.clone() },
                doc! { "tags": matcher },
            ],
        );
    }
    let mut price = Document::new();
    if let Some(min) = query.min_price {
        price.insert("$gte", min);
    }
    if let Some(max) = query.max_price {
        price.insert("$lte", max);
    }
    if !price.is_empty() {
        filter.insert("price.regular", price);
    }
    filter
}

fn product_sort(sort: ProductSort) -> Document {
    match sort {
        ProductSort::Featured => doc! { "featured": -1, "createdAt": -1 },
        ProductSort::Newest => doc! { "createdAt": -1 },
        ProductSort::PriceAsc => doc! { "price.regular": 1, "createdAt": -1 },
        ProductSort::PriceDesc => doc! { "price.regular": -1, "createdAt": -1 },
    }
}

fn map_err(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write)) = *err.kind
        && write.code == DUPLICATE_KEY
    {
        return StoreError::Duplicate {
            field: duplicate_field(&write.message),
        };
    }
    StoreError::Backend(err.to_string())
}

/// Field behind an E11000 message such as
/// `... index: sku_1 dup key: { sku: "KC-01" }`.
fn duplicate_field(message: &str) -> String {
    message
        .split("index: ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|index| index.strip_suffix("_1").unwrap_or(index).to_string())
        .unwrap_or_else(|| "key".to_string())
}
