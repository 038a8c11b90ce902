//! Vendor and category resolution for sighted devices.

use std::collections::BTreeMap;
use std::fmt;

use crate::vendors::COMPANY_IDENTIFIERS;

/// Coarse device category derived from the advertised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    HeartRateMonitor,
    Thermometer,
    BloodPressureMonitor,
    Envy,
    Samsung,
    Bose,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::HeartRateMonitor => "Heart Rate Monitor",
            Category::Thermometer => "Thermometer",
            Category::BloodPressureMonitor => "Blood Pressure Monitor",
            Category::Envy => "ENVY Device",
            Category::Samsung => "Samsung Device",
            Category::Bose => "Bose Device",
            Category::Unknown => "Unknown Device",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a name is matched against a rule.
enum Match {
    Prefix(&'static str),
    Contains(&'static str),
}

/// Evaluated top to bottom; first hit wins.
const CATEGORY_RULES: &[(Match, Category)] = &[
    (Match::Prefix("HRM"), Category::HeartRateMonitor),
    (Match::Prefix("TMP"), Category::Thermometer),
    (Match::Prefix("BPM"), Category::BloodPressureMonitor),
    (Match::Contains("ENVY"), Category::Envy),
    (Match::Contains("Samsung"), Category::Samsung),
    (Match::Contains("Bose"), Category::Bose),
];

/// Classify a device by its advertised name.
pub fn categorize(name: Option<&str>) -> Category {
    let Some(name) = name else {
        return Category::Unknown;
    };
    CATEGORY_RULES
        .iter()
        .find(|(rule, _)| match rule {
            Match::Prefix(p) => name.starts_with(p),
            Match::Contains(s) => name.contains(s),
        })
        .map(|(_, category)| *category)
        .unwrap_or(Category::Unknown)
}

/// Look up a company identifier in the static table.
pub fn vendor_name(code: u16) -> Option<&'static str> {
    COMPANY_IDENTIFIERS
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|i| COMPANY_IDENTIFIERS[i].1)
}

/// Resolve a company identifier, producing a placeholder for unknown codes.
pub fn resolve_vendor(code: u16) -> String {
    match vendor_name(code) {
        Some(name) => name.to_string(),
        None => format!("Unknown vendor, code=0x{code:04X}"),
    }
}

/// Resolve the vendor from the first (lowest) code in a payload map.
pub fn resolve_payload_vendor(payload: &BTreeMap<u16, Vec<u8>>) -> Option<String> {
    payload.keys().next().map(|&code| resolve_vendor(code))
}
