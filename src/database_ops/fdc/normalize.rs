//! Validation of raw `/foods/list` records into typed rows.
//!
//! Required: `fdcId`, `description`, `dataType`. Everything else is optional
//! and defaults to None. Nutrient entries come either abridged
//! (`{number,name,amount,unitName,...}`) or nested
//! (`{nutrient:{number,name,unitName},amount}`).
use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FoodRecord {
    pub fdc_id: i64,
    pub description: String,
    pub data_type: String,
    pub food_category: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub brand_owner: Option<String>,
    pub gtin_upc: Option<String>,
    pub ndb_number: Option<String>,
    pub food_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NutrientEntry {
    pub number: String,
    pub name: String,
    pub amount: Option<f64>,
    pub unit_name: Option<String>,
    pub derivation_code: Option<String>,
    pub derivation_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub food: FoodRecord,
    pub nutrients: Vec<NutrientEntry>,
    /// Written as a food with no links.
    pub no_attributes: bool,
    /// Nutrient entries that were unusable or repeated a number.
    pub dropped_nutrients: usize,
}

/// Why a record was left out. Never fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Skip {
    #[error("malformed record")]
    Malformed,
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {0}")]
    InvalidField(&'static str),
}

#[derive(Debug, Default)]
pub struct NormalizedPage {
    pub records: Vec<ValidRecord>,
    pub skipped: usize,
    pub no_nutrients: usize,
}

pub fn normalize(raw: &Value) -> Result<ValidRecord, Skip> {
    let obj = raw.as_object().ok_or(Skip::Malformed)?;

    let fdc_id = required_id(obj, "fdcId")?;
    let description = required_text(obj, "description")?;
    let data_type = required_text(obj, "dataType")?;

    let publication_date = obj
        .get("publicationDate")
        .and_then(Value::as_str)
        .and_then(|raw_date| {
            let parsed = parse_publication_date(raw_date);
            if parsed.is_none() {
                debug!(fdc_id, raw_date, "unparseable publicationDate; storing null");
            }
            parsed
        });

    let food = FoodRecord {
        fdc_id,
        description,
        data_type,
        food_category: food_category(obj),
        publication_date,
        brand_owner: opt_text(obj, "brandOwner"),
        gtin_upc: opt_text(obj, "gtinUpc"),
        ndb_number: opt_text(obj, "ndbNumber"),
        food_code: opt_text(obj, "foodCode"),
    };

    let entries: &[Value] = match obj.get("foodNutrients") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => return Err(Skip::InvalidField("foodNutrients")),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut nutrients = Vec::with_capacity(entries.len());
    let mut dropped_nutrients = 0usize;
    for entry in entries {
        match nutrient_entry(entry) {
            Some(n) if seen.insert(n.number.clone()) => nutrients.push(n),
            _ => dropped_nutrients += 1,
        }
    }

    Ok(ValidRecord {
        food,
        no_attributes: nutrients.is_empty(),
        nutrients,
        dropped_nutrients,
    })
}

/// Normalize a fetched page, logging and counting what gets skipped.
pub fn normalize_page(page: u32, raw: &[Value]) -> NormalizedPage {
    let mut out = NormalizedPage::default();
    for (index, item) in raw.iter().enumerate() {
        match normalize(item) {
            Ok(record) => {
                if record.dropped_nutrients > 0 {
                    debug!(
                        page,
                        fdc_id = record.food.fdc_id,
                        dropped = record.dropped_nutrients,
                        "dropped unusable nutrient entries"
                    );
                }
                if record.no_attributes {
                    out.no_nutrients += 1;
                }
                out.records.push(record);
            }
            Err(reason) => {
                out.skipped += 1;
                warn!(
                    page,
                    index,
                    fdc_id = ?item.get("fdcId"),
                    reason = %reason,
                    "skipping record"
                );
            }
        }
    }
    out
}

fn required_id(obj: &Map<String, Value>, key: &'static str) -> Result<i64, Skip> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Skip::MissingField(key)),
        Some(Value::Number(n)) => n.as_i64().ok_or(Skip::InvalidField(key)),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| Skip::InvalidField(key)),
        Some(_) => Err(Skip::InvalidField(key)),
    }
}

fn required_text(obj: &Map<String, Value>, key: &'static str) -> Result<String, Skip> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(Skip::MissingField(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(Skip::MissingField(key)),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(Skip::InvalidField(key)),
    }
}

/// Strings and numbers become text; anything else is treated as absent.
fn value_as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(number_text(n)),
        _ => None,
    }
}

// `203.0` and `203` name the same nutrient.
fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

fn opt_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(value_as_text)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str().and_then(|s| s.trim().parse::<f64>().ok())
}

// Branded foods carry a plain string; survey/foundation foods an object.
fn food_category(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("foodCategory")? {
        Value::Object(cat) => cat.get("description").and_then(value_as_text),
        other => value_as_text(other),
    }
}

fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

fn nutrient_entry(entry: &Value) -> Option<NutrientEntry> {
    let obj = entry.as_object()?;
    let amount = obj.get("amount").and_then(value_as_f64);

    if let Some(nested) = obj.get("nutrient").and_then(Value::as_object) {
        let derivation = obj.get("foodNutrientDerivation").and_then(Value::as_object);
        return Some(NutrientEntry {
            number: nested.get("number").and_then(value_as_text)?,
            name: nested.get("name").and_then(value_as_text)?,
            amount,
            unit_name: nested.get("unitName").and_then(value_as_text),
            derivation_code: derivation.and_then(|d| d.get("code")).and_then(value_as_text),
            derivation_description: derivation
                .and_then(|d| d.get("description"))
                .and_then(value_as_text),
        });
    }

    Some(NutrientEntry {
        number: opt_text(obj, "number")?,
        name: opt_text(obj, "name")?,
        amount,
        unit_name: opt_text(obj, "unitName"),
        derivation_code: opt_text(obj, "derivationCode"),
        derivation_description: opt_text(obj, "derivationDescription"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apple() -> Value {
        json!({
            "fdcId": 1,
            "description": "Apple",
            "dataType": "Food",
            "foodNutrients": [
                {"name": "Protein", "number": "203", "amount": 0.3, "unitName": "g"}
            ]
        })
    }

    #[test]
    fn normalizes_minimal_record() {
        let rec = normalize(&apple()).expect("valid");
        assert_eq!(rec.food.fdc_id, 1);
        assert_eq!(rec.food.description, "Apple");
        assert_eq!(rec.food.data_type, "Food");
        assert_eq!(rec.food.publication_date, None);
        assert_eq!(rec.food.brand_owner, None);
        assert!(!rec.no_attributes);
        assert_eq!(
            rec.nutrients,
            vec![NutrientEntry {
                number: "203".into(),
                name: "Protein".into(),
                amount: Some(0.3),
                unit_name: Some("g".into()),
                derivation_code: None,
                derivation_description: None,
            }]
        );
    }

    #[test]
    fn non_objects_are_malformed() {
        assert_eq!(normalize(&json!([1, 2])), Err(Skip::Malformed));
        assert_eq!(normalize(&json!("food")), Err(Skip::Malformed));
        assert_eq!(normalize(&Value::Null), Err(Skip::Malformed));
    }

    #[test]
    fn missing_required_fields_skip_the_record() {
        for key in ["fdcId", "description", "dataType"] {
            let mut raw = apple();
            raw.as_object_mut().unwrap().remove(key);
            assert_eq!(normalize(&raw), Err(Skip::MissingField(key)), "{key}");
        }

        let mut blank = apple();
        blank["description"] = json!("   ");
        assert_eq!(normalize(&blank), Err(Skip::MissingField("description")));
    }

    #[test]
    fn wrong_types_are_invalid() {
        let mut raw = apple();
        raw["fdcId"] = json!(1.5);
        assert_eq!(normalize(&raw), Err(Skip::InvalidField("fdcId")));

        let mut raw = apple();
        raw["dataType"] = json!(7);
        assert_eq!(normalize(&raw), Err(Skip::InvalidField("dataType")));

        let mut raw = apple();
        raw["foodNutrients"] = json!({"203": 0.3});
        assert_eq!(normalize(&raw), Err(Skip::InvalidField("foodNutrients")));
    }

    #[test]
    fn string_ids_are_accepted() {
        let mut raw = apple();
        raw["fdcId"] = json!(" 12345 ");
        assert_eq!(normalize(&raw).expect("valid").food.fdc_id, 12345);
    }

    #[test]
    fn empty_or_absent_nutrients_flag_no_attributes() {
        let mut raw = apple();
        raw["foodNutrients"] = json!([]);
        let rec = normalize(&raw).expect("valid");
        assert!(rec.no_attributes);
        assert!(rec.nutrients.is_empty());

        raw.as_object_mut().unwrap().remove("foodNutrients");
        assert!(normalize(&raw).expect("valid").no_attributes);
    }

    #[test]
    fn optional_fields_are_extracted() {
        let raw = json!({
            "fdcId": 2,
            "description": "Cereal",
            "dataType": "Branded",
            "publicationDate": "4/1/2019",
            "brandOwner": "Acme",
            "gtinUpc": "00012345",
            "ndbNumber": 45001,
            "foodCategory": {"description": "Breakfast Cereals"},
        });
        let food = normalize(&raw).expect("valid").food;
        assert_eq!(food.publication_date, NaiveDate::from_ymd_opt(2019, 4, 1));
        assert_eq!(food.brand_owner.as_deref(), Some("Acme"));
        assert_eq!(food.gtin_upc.as_deref(), Some("00012345"));
        assert_eq!(food.ndb_number.as_deref(), Some("45001"));
        assert_eq!(food.food_category.as_deref(), Some("Breakfast Cereals"));
        assert_eq!(food.food_code, None);
    }

    #[test]
    fn bad_dates_become_null() {
        let mut raw = apple();
        raw["publicationDate"] = json!("2020-13-45");
        assert_eq!(normalize(&raw).expect("valid").food.publication_date, None);

        raw["publicationDate"] = json!("2020-02-29");
        assert_eq!(
            normalize(&raw).expect("valid").food.publication_date,
            NaiveDate::from_ymd_opt(2020, 2, 29)
        );
    }

    #[test]
    fn nested_nutrients_and_bad_entries() {
        let mut raw = apple();
        raw["foodNutrients"] = json!([
            {
                "nutrient": {"number": "208", "name": "Energy", "unitName": "kcal"},
                "amount": "52",
                "foodNutrientDerivation": {"code": "A", "description": "Analytical"}
            },
            {"name": "No number", "amount": 1.0},
            "garbage",
            {"number": 208, "name": "Energy again", "amount": 60}
        ]);
        let rec = normalize(&raw).expect("valid");
        assert_eq!(rec.nutrients.len(), 1);
        assert_eq!(rec.dropped_nutrients, 3);
        let energy = &rec.nutrients[0];
        assert_eq!(energy.number, "208");
        assert_eq!(energy.amount, Some(52.0));
        assert_eq!(energy.unit_name.as_deref(), Some("kcal"));
        assert_eq!(energy.derivation_code.as_deref(), Some("A"));
        assert!(!rec.no_attributes);
    }

    #[test]
    fn page_normalization_counts_skips() {
        let mut no_nutrients = apple();
        no_nutrients["fdcId"] = json!(9);
        no_nutrients["foodNutrients"] = json!([]);
        let raw = vec![apple(), json!({"description": "no id"}), json!(42), no_nutrients];

        let page = normalize_page(1, &raw);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.skipped, 2);
        assert_eq!(page.no_nutrients, 1);
        assert_eq!(page.records[1].food.fdc_id, 9);
    }

    #[test]
    fn integral_float_numbers_share_the_integer_key() {
        let mut raw = apple();
        raw["foodNutrients"] = json!([
            {"number": 203.0, "name": "Protein", "amount": 0.3},
            {"number": "203", "name": "Protein", "amount": 0.4},
            {"number": 1008.5, "name": "Odd", "amount": 1}
        ]);
        let rec = normalize(&raw).expect("valid");
        let numbers: Vec<&str> = rec.nutrients.iter().map(|n| n.number.as_str()).collect();
        assert_eq!(numbers, vec!["203", "1008.5"]);
        assert_eq!(rec.nutrients[0].amount, Some(0.3));
        assert_eq!(rec.dropped_nutrients, 1);
    }
}
