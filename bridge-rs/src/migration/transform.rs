//! WooCommerce / WordPress to BigCommerce record transforms

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use super::types::{DependencyMappings, EntityKind};
use crate::clients::SourceRecord;

/// Why a single record could not be transformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("{entity} {source_id} has not been migrated yet")]
    UnmappedReference { entity: EntityKind, source_id: u64 },
}

/// Target payload plus anything that was dropped on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub payload: Value,
    pub warnings: Vec<String>,
}

impl Transformed {
    fn new(payload: Value) -> Self {
        Self {
            payload,
            warnings: Vec::new(),
        }
    }
}

type TransformResult = std::result::Result<Transformed, TransformError>;

/// Convert one source record to the target schema
pub fn transform(
    kind: EntityKind,
    record: &SourceRecord,
    mappings: &DependencyMappings,
) -> TransformResult {
    let body = &record.body;
    match kind {
        EntityKind::Categories => category(body, mappings),
        EntityKind::Products => product(body, mappings),
        EntityKind::Customers => customer(body),
        EntityKind::Orders => order(record.id, body, mappings),
        EntityKind::Coupons => coupon(body),
        EntityKind::Reviews => review(body, mappings),
        EntityKind::Pages => page(body),
        EntityKind::Posts => post(body),
    }
}

/// Order categories so every parent comes before its children
pub fn parents_first(records: &mut [SourceRecord]) {
    let parents: HashMap<u64, u64> = records
        .iter()
        .map(|r| (r.id, u64_field(&r.body, "parent")))
        .collect();

    let depth = |mut id: u64| {
        let mut depth = 0usize;
        while let Some(&parent) = parents.get(&id) {
            if parent == 0 || depth > parents.len() {
                break;
            }
            depth += 1;
            id = parent;
        }
        depth
    };

    records.sort_by_cached_key(|r| (depth(r.id), r.id));
}

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn required_str<'a>(body: &'a Value, field: &'static str) -> Result<&'a str, TransformError> {
    let value = str_field(body, field).trim();
    if value.is_empty() {
        Err(TransformError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn u64_field(body: &Value, field: &str) -> u64 {
    body.get(field).and_then(Value::as_u64).unwrap_or_default()
}

/// WooCommerce sends prices and weights as strings
fn decimal_field(body: &Value, field: &str) -> f64 {
    match body.get(field) {
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        _ => 0.0,
    }
}

fn rendered(body: &Value, field: &str) -> String {
    body.get(field)
        .and_then(|v| v.get("rendered").or(Some(v)))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.trim().to_string()
}

fn content_url(body: &Value) -> Result<String, TransformError> {
    let slug = required_str(body, "slug")?;
    Ok(format!("/{}/", slug.trim_matches('/')))
}

fn category(body: &Value, mappings: &DependencyMappings) -> TransformResult {
    let name = required_str(body, "name")?;
    let parent = u64_field(body, "parent");

    let mut warnings = Vec::new();
    let parent_id = match parent {
        0 => 0,
        parent => mappings.categories.get(parent).unwrap_or_else(|| {
            warnings.push(format!(
                "{}: parent category {} not migrated, created at top level",
                name, parent
            ));
            0
        }),
    };

    Ok(Transformed {
        payload: json!({
            "name": name,
            "parent_id": parent_id,
            "description": str_field(body, "description"),
            "is_visible": true,
        }),
        warnings,
    })
}

fn product(body: &Value, mappings: &DependencyMappings) -> TransformResult {
    let name = required_str(body, "name")?;
    let mut warnings = Vec::new();

    let categories: Vec<u64> = body
        .get("categories")
        .and_then(Value::as_array)
        .map(|cats| {
            cats.iter()
                .filter_map(|c| c.get("id").and_then(Value::as_u64))
                .filter_map(|id| {
                    let mapped = mappings.categories.get(id);
                    if mapped.is_none() {
                        warnings.push(format!("{}: category {} not migrated, dropped", name, id));
                    }
                    mapped
                })
                .collect()
        })
        .unwrap_or_default();

    let mut payload = Map::new();
    payload.insert("name".into(), json!(name));
    payload.insert("type".into(), json!("physical"));
    payload.insert("price".into(), json!(decimal_field(body, "regular_price").max(decimal_field(body, "price"))));
    payload.insert("weight".into(), json!(decimal_field(body, "weight")));
    payload.insert("description".into(), json!(str_field(body, "description")));
    payload.insert("categories".into(), json!(categories));
    payload.insert("is_visible".into(), json!(str_field(body, "status") == "publish"));

    let sale_price = decimal_field(body, "sale_price");
    if sale_price > 0.0 {
        payload.insert("sale_price".into(), json!(sale_price));
    }
    let sku = str_field(body, "sku").trim();
    if !sku.is_empty() {
        payload.insert("sku".into(), json!(sku));
    }

    Ok(Transformed {
        payload: Value::Object(payload),
        warnings,
    })
}

fn customer(body: &Value) -> TransformResult {
    let email = required_str(body, "email")?;
    let billing = body.get("billing").cloned().unwrap_or(Value::Null);

    Ok(Transformed::new(json!({
        "email": email,
        "first_name": str_field(body, "first_name"),
        "last_name": str_field(body, "last_name"),
        "company": str_field(&billing, "company"),
        "phone": str_field(&billing, "phone"),
    })))
}

/// BigCommerce order status ID for a WooCommerce status
fn order_status_id(status: &str) -> u64 {
    match status {
        "pending" => 7,
        "processing" => 11,
        "on-hold" => 1,
        "completed" => 10,
        "cancelled" => 5,
        "refunded" => 4,
        "failed" => 6,
        _ => 1,
    }
}

fn order(source_id: u64, body: &Value, mappings: &DependencyMappings) -> TransformResult {
    let customer_id = match u64_field(body, "customer_id") {
        0 => 0,
        id => mappings
            .customers
            .get(id)
            .ok_or(TransformError::UnmappedReference {
                entity: EntityKind::Customers,
                source_id: id,
            })?,
    };

    let products = body
        .get("line_items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|item| {
            let product_id = u64_field(item, "product_id");
            let target_id = mappings
                .products
                .get(product_id)
                .ok_or(TransformError::UnmappedReference {
                    entity: EntityKind::Products,
                    source_id: product_id,
                })?;
            let price = decimal_field(item, "price");
            Ok(json!({
                "product_id": target_id,
                "quantity": u64_field(item, "quantity").max(1),
                "price_inc_tax": price,
                "price_ex_tax": price,
            }))
        })
        .collect::<Result<Vec<_>, TransformError>>()?;

    let billing = body.get("billing").cloned().unwrap_or(Value::Null);

    Ok(Transformed::new(json!({
        "external_id": source_id.to_string(),
        "customer_id": customer_id,
        "status_id": order_status_id(str_field(body, "status")),
        "date_created": str_field(body, "date_created_gmt"),
        "billing_address": {
            "first_name": str_field(&billing, "first_name"),
            "last_name": str_field(&billing, "last_name"),
            "street_1": str_field(&billing, "address_1"),
            "city": str_field(&billing, "city"),
            "state": str_field(&billing, "state"),
            "zip": str_field(&billing, "postcode"),
            "country_iso2": str_field(&billing, "country"),
            "email": str_field(&billing, "email"),
        },
        "products": products,
    })))
}

fn coupon(body: &Value) -> TransformResult {
    let code = required_str(body, "code")?;
    let mut warnings = Vec::new();

    let kind = match str_field(body, "discount_type") {
        "percent" => "percentage_discount",
        "fixed_cart" => "per_total_discount",
        "fixed_product" => "per_item_discount",
        other => {
            warnings.push(format!(
                "{}: unknown discount type '{}', using per_total_discount",
                code, other
            ));
            "per_total_discount"
        }
    };

    let mut payload = json!({
        "name": code,
        "code": code,
        "type": kind,
        "amount": decimal_field(body, "amount").to_string(),
        "min_purchase": decimal_field(body, "minimum_amount").to_string(),
        "enabled": true,
        "applies_to": {"entity": "categories", "ids": [0]},
    });
    if let Some(limit) = body.get("usage_limit").and_then(Value::as_u64) {
        payload["max_uses"] = json!(limit);
    }

    Ok(Transformed { payload, warnings })
}

fn review(body: &Value, mappings: &DependencyMappings) -> TransformResult {
    let product = u64_field(body, "product_id");
    let product_id = mappings
        .products
        .get(product)
        .ok_or(TransformError::UnmappedReference {
            entity: EntityKind::Products,
            source_id: product,
        })?;

    let text = strip_tags(str_field(body, "review"));
    let title: String = text.chars().take(40).collect();
    let status = if str_field(body, "status") == "approved" {
        "approved"
    } else {
        "pending"
    };

    Ok(Transformed::new(json!({
        "product_id": product_id,
        "title": if title.is_empty() { "Review".to_string() } else { title },
        "text": text,
        "status": status,
        "rating": u64_field(body, "rating").clamp(1, 5),
        "name": str_field(body, "reviewer"),
        "email": str_field(body, "reviewer_email"),
        "date_reviewed": str_field(body, "date_created_gmt"),
    })))
}

fn page(body: &Value) -> TransformResult {
    let title = rendered(body, "title");
    if title.trim().is_empty() {
        return Err(TransformError::MissingField("title"));
    }

    Ok(Transformed::new(json!({
        "name": title,
        "body": rendered(body, "content"),
        "type": "page",
        "is_visible": str_field(body, "status") == "publish",
        "url": content_url(body)?,
    })))
}

fn post(body: &Value) -> TransformResult {
    let title = rendered(body, "title");
    if title.trim().is_empty() {
        return Err(TransformError::MissingField("title"));
    }

    Ok(Transformed::new(json!({
        "title": title,
        "body": rendered(body, "content"),
        "url": content_url(body)?,
        "is_published": str_field(body, "status") == "publish",
        "published_date": str_field(body, "date_gmt"),
    })))
}
