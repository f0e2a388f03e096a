use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::command::{AnyData, PRODUCT_TYPE_URL};
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Price {
    pub currency: String,
    /// Minor units, e.g. cents.
    pub current: i64,
    pub original: Option<i64>,
}

/// Terminal item a crawler yields for a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Product {
    pub source: String,
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    pub brand: String,
    pub description: String,
    pub price: Option<Price>,
    pub images: Vec<String>,
    pub stock: Option<u32>,
    pub attributes: BTreeMap<String, String>,
}

impl Product {
    pub fn new(source: impl AsRef<str>, source_id: impl AsRef<str>) -> Self {
        Product {
            source: source.as_ref().into(),
            source_id: source_id.as_ref().into(),
            ..Default::default()
        }
    }

    pub fn to_any(&self) -> Result<AnyData> {
        Ok(AnyData {
            type_url: PRODUCT_TYPE_URL.to_string(),
            value: serde_json::to_value(self)?,
        })
    }
}
