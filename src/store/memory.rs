use super::{OrderQuery, ProductQuery, ProductSort, StoreError};
use crate::catalog::product::Product;
use crate::orders::model::{Order, OrderStatus};
use crate::users::{Role, User};
use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Collections>>,
}

#[derive(Default)]
struct Collections {
    products: HashMap<String, Product>,
    users: HashMap<String, User>,
    orders: HashMap<String, Order>,
}

fn duplicate(field: &str) -> StoreError {
    StoreError::Duplicate {
        field: field.to_string(),
    }
}

impl Collections {
    fn product_conflict(&self, candidate: &Product) -> Option<StoreError> {
        self.products
            .values()
            .filter(|p| p.id != candidate.id)
            .find_map(|p| {
                if p.sku == candidate.sku {
                    Some(duplicate("sku"))
                } else if p.slug == candidate.slug {
                    Some(duplicate("slug"))
                } else {
                    None
                }
            })
    }

    fn user_conflict(&self, candidate: &User) -> Option<StoreError> {
        self.users
            .values()
            .filter(|u| u.id != candidate.id)
            .find_map(|u| {
                if u.username == candidate.username {
                    Some(duplicate("username"))
                } else if u.email == candidate.email {
                    Some(duplicate("email"))
                } else {
                    None
                }
            })
    }
}

impl MemoryStore {
    pub async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.products.contains_key(&product.id) {
            return Err(duplicate("_id"));
        }
        if let Some(err) = guard.product_conflict(product) {
            return Err(err);
        }
        guard.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    pub async fn replace_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if !guard.products.contains_key(&product.id) {
            return Err(StoreError::NotFound);
        }
        if let Some(err) = guard.product_conflict(product) {
            return Err(err);
        }
        guard.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    pub async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.inner.lock().await.products.get(id).cloned())
    }

    pub async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.products.values().find(|p| p.slug == slug).cloned())
    }

    pub async fn list_products(
        &self,
        query: &ProductQuery,
    ) -> Result<(Vec<Product>, u64), StoreError> {
        let guard = self.inner.lock().await;
        let needle = query
            .search
            .as_deref()
            .map(str::to_lowercase)
            .filter(|s| !s.is_empty());
        let mut matches: Vec<Product> = guard
            .products
            .values()
            .filter(|p| !query.active_only || p.is_active)
            .filter(|p| query.category.is_none_or(|c| p.category == c))
            .filter(|p| query.featured.is_none_or(|f| p.featured == f))
            .filter(|p| query.min_price.is_none_or(|min| p.price.regular >= min))
            .filter(|p| query.max_price.is_none_or(|max| p.price.regular <= max))
            .filter(|p| match &needle {
                Some(needle) => {
                    p.title.to_lowercase().contains(needle)
                        || p.description.short.to_lowercase().contains(needle)
                        || p.tags.iter().any(|t| t.to_lowercase().contains(needle))
                }
                None => true,
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| compare_products(a, b, query.sort));
        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(query.skip as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    pub async fn count_products(&self, active_only: bool) -> Result<u64, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .products
            .values()
            .filter(|p| !active_only || p.is_active)
            .count() as u64)
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.users.contains_key(&user.id) {
            return Err(duplicate("_id"));
        }
        if let Some(err) = guard.user_conflict(user) {
            return Err(err);
        }
        guard.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    pub async fn replace_user(&self, user: &User) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if !guard.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        if let Some(err) = guard.user_conflict(user) {
            return Err(err);
        }
        guard.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(id).cloned())
    }

    pub async fn find_user_by_login(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let email = identifier.to_lowercase();
        let guard = self.inner.lock().await;
        Ok(guard
            .users
            .values()
            .find(|u| u.username == identifier || u.email == email)
            .cloned())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let guard = self.inner.lock().await;
        let mut users: Vec<User> = guard.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    pub async fn count_users(&self, role: Option<Role>) -> Result<u64, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .users
            .values()
            .filter(|u| role.is_none_or(|r| u.role == r))
            .count() as u64)
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.orders.contains_key(&order.id) {
            return Err(duplicate("_id"));
        }
        if guard
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(duplicate("orderNumber"));
        }
        guard.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    pub async fn replace_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        match guard.orders.get_mut(&order.id) {
            Some(slot) => {
                *slot = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    pub async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().await.orders.get(id).cloned())
    }

    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError> {
        let guard = self.inner.lock().await;
        let mut orders: Vec<Order> = guard
            .orders
            .values()
            .filter(|o| {
                query
                    .customer
                    .as_ref()
                    .is_none_or(|c| o.customer.as_ref() == Some(c))
            })
            .filter(|o| query.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_number.cmp(&a.order_number))
        });
        if let Some(limit) = query.limit {
            orders.truncate(limit as usize);
        }
        Ok(orders)
    }

    pub async fn count_orders(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().await.orders.len() as u64)
    }

    pub async fn revenue(&self) -> Result<f64, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .orders
            .values()
            .filter(|o| o.status != OrderStatus::Cancelled)
            .map(|o| o.pricing.total)
            .sum())
    }
}

fn compare_products(a: &Product, b: &Product, sort: ProductSort) -> Ordering {
    let newest = b.created_at.cmp(&a.created_at);
    match sort {
        ProductSort::Featured => b.featured.cmp(&a.featured).then(newest),
        ProductSort::Newest => newest,
        ProductSort::PriceAsc => a
            .price
            .regular
            .total_cmp(&b.price.regular)
            .then(newest),
        ProductSort::PriceDesc => b
            .price
            .regular
            .total_cmp(&a.price.regular)
            .then(newest),
    }
}
