//! Fixed-offset field extraction for standard instruction codes.
//!
//! A standard instruction payload is a fixed-layout record: every field lives
//! at a known byte offset with a known length. Extraction validates that each
//! field is fully present (a payload even one character short is rejected, not
//! silently truncated) and that the production date parses.

use chrono::NaiveDate;
use thiserror::Error;

/// Minimum payload length covering every field span.
pub const MIN_PAYLOAD_LEN: usize = 259;

/// Maximum payload length the record store accepts for the raw code column.
pub const MAX_PAYLOAD_LEN: usize = 400;

/// Field layout: name → one or more `(offset, length)` spans. Multi-span
/// fields are concatenated in span order (`check_no` is assembled from two
/// disjoint regions of the payload).
pub const LAYOUT: &[(&str, &[(usize, usize)])] = &[
    ("order_no", &[(0, 12)]),
    ("order_sub_no", &[(12, 3)]),
    ("check_no", &[(45, 5), (20, 6)]),
    ("unit_no", &[(27, 7)]),
    ("site_code", &[(39, 6)]),
    ("load_proc_code", &[(45, 6)]),
    ("pre_proc_code", &[(69, 6)]),
    ("post_proc_code", &[(45, 6)]),
    ("product_group", &[(51, 1)]),
    ("production_date", &[(52, 6)]),
    ("check_sub_no", &[(58, 3)]),
    ("ship_date", &[(61, 6)]),
    ("ship_place", &[(67, 2)]),
    ("customer_order_no", &[(81, 11)]),
    ("body_class", &[(92, 1)]),
    ("product_name", &[(105, 23)]),
    ("model_code", &[(125, 2)]),
    ("width", &[(127, 5)]),
    ("height", &[(132, 5)]),
    ("origin_code", &[(152, 4)]),
    ("category_code", &[(256, 3)]),
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("payload too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("payload too long for record store: {len} bytes, max {max}")]
    TooLong { len: usize, max: usize },
    #[error("field {name} spans a non-character boundary")]
    Boundary { name: &'static str },
    #[error("invalid production date: {value}")]
    BadDate { value: String },
}

/// All named fields of one standard instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionFields {
    pub order_no: String,
    pub order_sub_no: String,
    pub check_no: String,
    pub unit_no: String,
    pub site_code: String,
    pub load_proc_code: String,
    pub pre_proc_code: String,
    pub post_proc_code: String,
    pub product_group: String,
    pub production_date_raw: String,
    pub production_date: NaiveDate,
    pub check_sub_no: String,
    pub ship_date: String,
    pub ship_place: String,
    pub customer_order_no: String,
    pub body_class: String,
    pub product_name: String,
    pub model_code: String,
    pub width: String,
    pub height: String,
    pub origin_code: String,
    pub category_code: String,
    /// The raw payload as scanned, kept for persistence and duplicate detection.
    pub payload: String,
}

impl InstructionFields {
    /// Look up an extracted field by its layout name.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "order_no" => &self.order_no,
            "order_sub_no" => &self.order_sub_no,
            "check_no" => &self.check_no,
            "unit_no" => &self.unit_no,
            "site_code" => &self.site_code,
            "load_proc_code" => &self.load_proc_code,
            "pre_proc_code" => &self.pre_proc_code,
            "post_proc_code" => &self.post_proc_code,
            "product_group" => &self.product_group,
            "production_date" => &self.production_date_raw,
            "check_sub_no" => &self.check_sub_no,
            "ship_date" => &self.ship_date,
            "ship_place" => &self.ship_place,
            "customer_order_no" => &self.customer_order_no,
            "body_class" => &self.body_class,
            "product_name" => &self.product_name,
            "model_code" => &self.model_code,
            "width" => &self.width,
            "height" => &self.height,
            "origin_code" => &self.origin_code,
            "category_code" => &self.category_code,
            _ => return None,
        };
        Some(value)
    }
}

fn span<'a>(payload: &'a str, name: &'static str, start: usize, len: usize) -> Result<&'a str, ExtractError> {
    payload
        .get(start..start + len)
        .ok_or(ExtractError::Boundary { name })
}

fn multi(
    payload: &str,
    name: &'static str,
    spans: &[(usize, usize)],
) -> Result<String, ExtractError> {
    let mut out = String::new();
    for &(start, len) in spans {
        out.push_str(span(payload, name, start, len)?);
    }
    Ok(out)
}

fn layout_spans(name: &str) -> &'static [(usize, usize)] {
    LAYOUT
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, spans)| *spans)
        .expect("field name present in layout")
}

fn one(payload: &str, name: &'static str) -> Result<String, ExtractError> {
    multi(payload, name, layout_spans(name))
}

/// Extract all fields from one standard instruction payload.
pub fn extract(payload: &str) -> Result<InstructionFields, ExtractError> {
    let len = payload.len();
    if len < MIN_PAYLOAD_LEN {
        return Err(ExtractError::TooShort {
            len,
            min: MIN_PAYLOAD_LEN,
        });
    }
    if len > MAX_PAYLOAD_LEN {
        return Err(ExtractError::TooLong {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let production_date_raw = one(payload, "production_date")?;
    let production_date = NaiveDate::parse_from_str(&production_date_raw, "%y%m%d").map_err(
        |_| ExtractError::BadDate {
            value: production_date_raw.clone(),
        },
    )?;

    Ok(InstructionFields {
        order_no: one(payload, "order_no")?,
        order_sub_no: one(payload, "order_sub_no")?,
        check_no: one(payload, "check_no")?,
        unit_no: one(payload, "unit_no")?,
        site_code: one(payload, "site_code")?,
        load_proc_code: one(payload, "load_proc_code")?,
        pre_proc_code: one(payload, "pre_proc_code")?,
        post_proc_code: one(payload, "post_proc_code")?,
        product_group: one(payload, "product_group")?,
        production_date_raw,
        production_date,
        check_sub_no: one(payload, "check_sub_no")?,
        ship_date: one(payload, "ship_date")?,
        ship_place: one(payload, "ship_place")?,
        customer_order_no: one(payload, "customer_order_no")?,
        body_class: one(payload, "body_class")?,
        product_name: one(payload, "product_name")?,
        model_code: one(payload, "model_code")?,
        width: one(payload, "width")?,
        height: one(payload, "height")?,
        origin_code: one(payload, "origin_code")?,
        category_code: one(payload, "category_code")?,
        payload: payload.to_string(),
    })
}

/// Shared fixtures for unit and integration tests.
#[doc(hidden)]
pub mod tests_support {
    /// A syntactically valid 300-byte instruction payload with a parseable
    /// production date at offset 52.
    pub fn sample_payload() -> String {
        let mut bytes: Vec<u8> = (0..300u32).map(|i| b'0' + (i % 10) as u8).collect();
        bytes[52..58].copy_from_slice(b"240115");
        String::from_utf8(bytes).expect("ascii payload")
    }
}
