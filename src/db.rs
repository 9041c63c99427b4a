//! In-memory stores. Each store owns its records and its id counter.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    errors::AppError,
    structs::{
        Cart, CartItem, CartListQuery, Item, ItemListQuery, ItemPatch, RegisterUser,
        User, UserLookup, UserRole,
    },
    utils::check_password_policy,
};

/// Returns the `[offset, offset + limit)` window of an already filtered sequence.
pub fn paginate<T>(records: impl Iterator<Item = T>, offset: usize, limit: usize) -> Vec<T> {
    records.skip(offset).take(limit).collect()
}

fn validate_price(price: f64) -> Result<f64, AppError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(AppError::Validation("price must be greater than 0".to_owned()))
    }
}

fn validate_window(offset: i64, limit: i64) -> Result<(usize, usize), AppError> {
    if offset < 0 {
        return Err(AppError::Validation("offset must be >= 0".to_owned()));
    }
    if limit <= 0 {
        return Err(AppError::Validation("limit must be > 0".to_owned()));
    }
    let offset = usize::try_from(offset).map_err(|_| AppError::InternalServerError)?;
    let limit = usize::try_from(limit).map_err(|_| AppError::InternalServerError)?;
    Ok((offset, limit))
}

fn validate_price_bound(name: &str, value: Option<f64>) -> Result<(), AppError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(AppError::Validation(format!("{} must be a finite number >= 0", name)))
        }
        _ => Ok(()),
    }
}

fn validate_quantity_bound(name: &str, value: Option<i64>) -> Result<(), AppError> {
    match value {
        Some(v) if v < 0 => Err(AppError::Validation(format!("{} must be >= 0", name))),
        _ => Ok(()),
    }
}

/// Accepts an ISO-8601 date, a local date-time, or a date-time with offset.
fn validate_birthdate(birthdate: &str) -> Result<(), AppError> {
    let value = birthdate.trim();
    let parsed = NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || value.parse::<NaiveDateTime>().is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok();
    if parsed {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "birthdate '{}' is not an ISO-8601 date or date-time",
            birthdate
        )))
    }
}

fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
}

#[derive(Debug, Default)]
pub struct ItemStore {
    items: BTreeMap<i64, Item>,
    next_id: i64,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: String, price: f64) -> Result<Item, AppError> {
        let price = validate_price(price)?;
        let id = self.next_id;
        self.next_id += 1;

        let item = Item {
            id,
            name,
            price,
            deleted: false,
        };
        self.items.insert(id, item.clone());
        log::info!("Item created: {:?}", item);
        Ok(item)
    }

    fn visible_mut(&mut self, id: i64) -> Result<&mut Item, AppError> {
        self.items
            .get_mut(&id)
            .filter(|item| item.is_visible(false))
            .ok_or_else(|| AppError::NotFound("Item not found".to_owned()))
    }

    pub fn get(&self, id: i64) -> Result<Item, AppError> {
        self.items
            .get(&id)
            .filter(|item| item.is_visible(false))
            .cloned()
            .ok_or_else(|| AppError::NotFound("Item not found".to_owned()))
    }

    pub fn replace(&mut self, id: i64, name: String, price: f64) -> Result<Item, AppError> {
        let item = self.visible_mut(id)?;
        let price = validate_price(price)?;
        item.name = name;
        item.price = price;
        log::info!("Item replaced: {:?}", item);
        Ok(item.clone())
    }

    pub fn patch(&mut self, id: i64, patch: ItemPatch) -> Result<Item, AppError> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Item not found".to_owned()))?;
        if item.deleted {
            return Err(AppError::NotModified);
        }
        if let Some(field) = patch.unknown.keys().next() {
            return Err(AppError::Validation(format!("Field {} is not allowed", field)));
        }
        let price = patch.price.map(validate_price).transpose()?;

        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(price) = price {
            item.price = price;
        }
        log::info!("Item patched: {:?}", item);
        Ok(item.clone())
    }

    pub fn delete(&mut self, id: i64) -> Result<(), AppError> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Item not found".to_owned()))?;
        item.deleted = true;
        log::info!("Item with id {} deleted", id);
        Ok(())
    }

    pub fn list(&self, query: &ItemListQuery) -> Result<Vec<Item>, AppError> {
        let (offset, limit) = validate_window(query.offset, query.limit)?;
        validate_price_bound("min_price", query.min_price)?;
        validate_price_bound("max_price", query.max_price)?;

        let filtered = self
            .items
            .values()
            .filter(|item| item.is_visible(query.show_deleted))
            .filter(|item| query.min_price.map_or(true, |min| item.price >= min))
            .filter(|item| query.max_price.map_or(true, |max| item.price <= max))
            .cloned();
        Ok(paginate(filtered, offset, limit))
    }
}

#[derive(Debug, Default)]
pub struct CartStore {
    carts: BTreeMap<i64, Cart>,
    next_id: i64,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> Cart {
        let id = self.next_id;
        self.next_id += 1;

        let cart = Cart {
            id,
            items: Vec::new(),
            price: 0.0,
        };
        self.carts.insert(id, cart.clone());
        log::info!("Cart created with id {}", id);
        cart
    }

    pub fn get(&self, id: i64) -> Result<Cart, AppError> {
        self.carts
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Cart not found".to_owned()))
    }

    /// Adds one unit of `item_id` to the cart. The cart price accumulates the
    /// item's unit price at the moment of addition.
    pub fn add_item(
        &mut self,
        cart_id: i64,
        item_id: i64,
        items: &ItemStore,
    ) -> Result<Cart, AppError> {
        let cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| AppError::NotFound("Cart not found".to_owned()))?;
        let item = items
            .get(item_id)
            .map_err(|_| AppError::NotFound("Item not found or deleted".to_owned()))?;

        match cart.items.iter_mut().find(|entry| entry.id == item.id) {
            Some(entry) => {
                entry.quantity = entry.quantity.checked_add(1).ok_or_else(|| {
                    AppError::Validation(format!("quantity of item {} is at its maximum", item.id))
                })?;
            }
            None => cart.items.push(CartItem {
                id: item.id,
                name: item.name.clone(),
                quantity: 1,
                available: true,
            }),
        }
        cart.price += item.price;
        log::info!("Item {} added to cart {}", item_id, cart_id);
        Ok(cart.clone())
    }

    pub fn list(&self, query: &CartListQuery) -> Result<Vec<Cart>, AppError> {
        let (offset, limit) = validate_window(query.offset, query.limit)?;
        validate_price_bound("min_price", query.min_price)?;
        validate_price_bound("max_price", query.max_price)?;
        validate_quantity_bound("min_quantity", query.min_quantity)?;
        validate_quantity_bound("max_quantity", query.max_quantity)?;

        // bounds are non-negative at this point
        let min_quantity = query.min_quantity.map(|q| q.unsigned_abs());
        let max_quantity = query.max_quantity.map(|q| q.unsigned_abs());

        let filtered = self
            .carts
            .values()
            .filter(|cart| within(cart.price, query.min_price, query.max_price))
            .filter(|cart| within(cart.quantity(), min_quantity, max_quantity))
            .cloned();
        Ok(paginate(filtered, offset, limit))
    }
}

#[derive(Debug)]
pub struct UserStore {
    users: BTreeMap<i64, User>,
    next_id: i64,
    password_min_length: usize,
}

impl UserStore {
    pub fn new(password_min_length: usize) -> Self {
        Self {
            users: BTreeMap::new(),
            next_id: 1,
            password_min_length,
        }
    }

    fn insert(
        &mut self,
        username: String,
        name: String,
        birthdate: String,
        role: UserRole,
        password: SecretString,
    ) -> Result<User, AppError> {
        validate_birthdate(&birthdate)?;
        if self.find_by_username(&username).is_some() {
            return Err(AppError::BadRequest("username is already taken".to_owned()));
        }
        check_password_policy(password.expose_secret(), self.password_min_length)
            .map_err(AppError::BadRequest)?;

        let uid = self.next_id;
        self.next_id += 1;
        let user = User {
            uid,
            username,
            name,
            birthdate,
            role,
            password,
        };
        self.users.insert(uid, user.clone());
        log::info!("User created: uid {} ({:?})", uid, user.role);
        Ok(user)
    }

    pub fn register(&mut self, form: RegisterUser) -> Result<User, AppError> {
        self.insert(
            form.username,
            form.name,
            form.birthdate,
            UserRole::User,
            form.password,
        )
    }

    /// Creates the initial administrator account.
    pub fn seed_admin(&mut self, username: &str, password: &SecretString) -> Result<User, AppError> {
        self.insert(
            username.to_owned(),
            "admin".to_owned(),
            "1970-01-01T00:00:00".to_owned(),
            UserRole::Admin,
            password.clone(),
        )
    }

    pub fn find_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|user| user.username == username)
    }

    pub fn get(&self, lookup: &UserLookup) -> Result<User, AppError> {
        let found = match (lookup.id, lookup.username.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "both id and username are provided".to_owned(),
                ))
            }
            (None, None) => {
                return Err(AppError::BadRequest(
                    "neither id nor username are provided".to_owned(),
                ))
            }
            (Some(id), None) => self.users.get(&id),
            (None, Some(username)) => self.find_by_username(username),
        };
        found
            .cloned()
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))
    }

    pub fn promote(&mut self, id: i64) -> Result<User, AppError> {
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::BadRequest("user not found".to_owned()))?;
        user.role = UserRole::Admin;
        log::info!("User {} promoted to admin", id);
        Ok(user.clone())
    }
}
