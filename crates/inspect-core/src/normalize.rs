//! Raw upstream records and their mapping onto [`ItemDetails`].
//!
//! The coordinator and the REST service name their fields differently but
//! describe the same item. Missing optional fields fall back to zero values;
//! a sticker without a usable name is reported under its numeric id.

use serde::{Deserialize, Serialize};

use crate::{Fingerprint, ItemDetails, Sticker};

/// Item record pushed by the coordinator service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorItemInfo {
    pub itemid: u64,
    #[serde(default)]
    pub paintwear: Option<f64>,
    #[serde(default)]
    pub paintseed: Option<i32>,
    #[serde(default)]
    pub paintindex: Option<i32>,
    #[serde(default)]
    pub stickers: Option<Vec<CoordinatorSticker>>,
}

impl CoordinatorItemInfo {
    /// Correlation key of the request this record answers.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from(self.itemid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSticker {
    #[serde(default)]
    pub sticker_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wear: Option<f64>,
}

/// The `iteminfo` object returned by the REST lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestItemInfo {
    #[serde(default)]
    pub floatvalue: Option<f64>,
    #[serde(default)]
    pub paintseed: Option<i32>,
    #[serde(default)]
    pub paintindex: Option<i32>,
    #[serde(default)]
    pub stickers: Option<Vec<RestSticker>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestSticker {
    #[serde(default, rename = "stickerId")]
    pub sticker_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wear: Option<f64>,
}

pub fn normalize_coordinator(raw: CoordinatorItemInfo) -> ItemDetails {
    let stickers = raw
        .stickers
        .unwrap_or_default()
        .into_iter()
        .map(|sticker| sticker_from_parts(sticker.name, sticker.sticker_id, sticker.wear))
        .collect();
    ItemDetails::new(
        raw.paintwear.unwrap_or_default(),
        raw.paintseed.unwrap_or_default(),
        raw.paintindex.unwrap_or_default(),
        stickers,
    )
}

pub fn normalize_rest(raw: RestItemInfo) -> ItemDetails {
    let stickers = raw
        .stickers
        .unwrap_or_default()
        .into_iter()
        .map(|sticker| sticker_from_parts(sticker.name, sticker.sticker_id, sticker.wear))
        .collect();
    ItemDetails::new(
        raw.floatvalue.unwrap_or_default(),
        raw.paintseed.unwrap_or_default(),
        raw.paintindex.unwrap_or_default(),
        stickers,
    )
}

fn sticker_from_parts(name: Option<String>, id: Option<u64>, wear: Option<f64>) -> Sticker {
    let name = match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => id.unwrap_or_default().to_string(),
    };
    Sticker::new(name, wear.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn coordinator_record_maps_fields() {
        let raw: CoordinatorItemInfo = serde_json::from_value(json!({
            "itemid": 12345,
            "paintwear": 0.234,
            "paintseed": 7,
            "paintindex": 179,
            "stickers": [{ "sticker_id": 201, "wear": 0.1 }]
        }))
        .expect("decode");

        assert_eq!(raw.fingerprint().as_str(), "12345");
        assert_eq!(
            normalize_coordinator(raw),
            ItemDetails::new(0.234, 7, 179, vec![Sticker::new("201", 0.1)])
        );
    }

    #[test_timeout::timeout]
    fn rest_record_maps_fields() {
        let raw: RestItemInfo = serde_json::from_value(json!({
            "floatvalue": 0.0712,
            "paintseed": 661,
            "paintindex": 44,
            "stickers": [
                { "stickerId": 5, "name": "Crown (Foil)", "wear": 0.5 },
                { "stickerId": 76 }
            ]
        }))
        .expect("decode");

        let details = normalize_rest(raw);
        assert_eq!(details.float_value(), 0.0712);
        assert_eq!(details.paint_seed(), 661);
        assert_eq!(details.paint_index(), 44);
        assert_eq!(
            details.stickers(),
            &[Sticker::new("Crown (Foil)", 0.5), Sticker::new("76", 0.0)]
        );
    }

    #[test_timeout::timeout]
    fn missing_fields_default_to_zero_values() {
        let coordinator: CoordinatorItemInfo =
            serde_json::from_value(json!({ "itemid": 1, "stickers": null })).expect("decode");
        assert_eq!(
            normalize_coordinator(coordinator),
            ItemDetails::new(0.0, 0, 0, Vec::new())
        );

        let rest: RestItemInfo = serde_json::from_value(json!({})).expect("decode");
        assert_eq!(normalize_rest(rest), ItemDetails::new(0.0, 0, 0, Vec::new()));
    }

    #[test_timeout::timeout]
    fn blank_sticker_name_falls_back_to_id() {
        let raw = CoordinatorItemInfo {
            itemid: 9,
            stickers: Some(vec![
                CoordinatorSticker {
                    sticker_id: Some(310),
                    name: Some("  ".into()),
                    wear: Some(0.3),
                },
                CoordinatorSticker::default(),
            ]),
            ..CoordinatorItemInfo::default()
        };

        let details = normalize_coordinator(raw);
        assert_eq!(
            details.stickers(),
            &[Sticker::new("310", 0.3), Sticker::new("0", 0.0)]
        );
    }
}
