use serde::{Deserialize, Serialize};

/// Normalized attributes of one inspected item.
///
/// Fields are private so a value cannot change once built; the HTTP surface
/// serializes it with camelCase names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
    float_value: f64,
    paint_seed: i32,
    paint_index: i32,
    #[serde(default)]
    stickers: Vec<Sticker>,
}

impl ItemDetails {
    pub fn new(float_value: f64, paint_seed: i32, paint_index: i32, stickers: Vec<Sticker>) -> Self {
        Self {
            float_value,
            paint_seed,
            paint_index,
            stickers,
        }
    }

    /// Wear value; meaningful in `[0.0, 1.0]` but not validated here.
    pub fn float_value(&self) -> f64 {
        self.float_value
    }

    pub fn paint_seed(&self) -> i32 {
        self.paint_seed
    }

    pub fn paint_index(&self) -> i32 {
        self.paint_index
    }

    pub fn stickers(&self) -> &[Sticker] {
        &self.stickers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    name: String,
    wear: f64,
}

impl Sticker {
    pub fn new(name: impl Into<String>, wear: f64) -> Self {
        Self {
            name: name.into(),
            wear,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wear(&self) -> f64 {
        self.wear
    }
}
