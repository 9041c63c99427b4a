use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub deleted: bool,
}

impl Item {
    /// Soft-deleted items are only visible when explicitly requested.
    pub fn is_visible(&self, show_deleted: bool) -> bool {
        show_deleted || !self.deleted
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CartItem {
    pub id: i64,
    pub name: String,
    pub quantity: u32,
    pub available: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Cart {
    pub id: i64,
    pub items: Vec<CartItem>,
    pub price: f64,
}

impl Cart {
    pub fn quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone)]
pub struct User {
    pub uid: i64,
    pub username: String,
    pub name: String,
    /// ISO-8601 date or date-time, kept exactly as submitted.
    pub birthdate: String,
    pub role: UserRole,
    pub password: SecretString,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResponse {
    pub uid: i64,
    pub username: String,
    pub name: String,
    pub birthdate: String,
    pub role: UserRole,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid,
            username: user.username.clone(),
            name: user.name.clone(),
            birthdate: user.birthdate.clone(),
            role: user.role,
        }
    }
}

// Request payloads

#[derive(Deserialize, Debug, Clone)]
pub struct ItemPost {
    pub name: String,
    pub price: f64,
}

/// Partial update body. Keys outside the allow-list land in `unknown`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub price: Option<f64>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RegisterUser {
    pub username: String,
    pub name: String,
    pub birthdate: String,
    #[serde(deserialize_with = "secret_string")]
    pub password: SecretString,
}

fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct UserLookup {
    pub id: Option<i64>,
    pub username: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromoteQuery {
    pub id: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Deserialize, Debug, Clone)]
pub struct ItemListQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub show_deleted: bool,
}

impl Default for ItemListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            min_price: None,
            max_price: None,
            show_deleted: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct CartListQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_quantity: Option<i64>,
    pub max_quantity: Option<i64>,
}

impl Default for CartListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            min_price: None,
            max_price: None,
            min_quantity: None,
            max_quantity: None,
        }
    }
}
