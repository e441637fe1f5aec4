//! Menu item model

use serde::{Deserialize, Serialize};

/// A menu item as published by the backend
///
/// Read-only on the client: only the realtime reconciler (event fold or
/// full refetch) writes the local mirror, never a user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    /// Unit price, two decimal places
    pub price: f64,
    pub is_available: bool,
    /// Kitchen preparation time in minutes
    #[serde(default)]
    pub preparation_time: u32,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}
