//! Structural mapping keys.
//!
//! A key is the join identity used to line up source and target metadata
//! before any persistent identifier exists on the target side. Two options
//! are the same candidate exactly when their keys are byte-equal, so key
//! generation must be pure and deterministic: label plus every identifying
//! code, joined positionally so an absent code still occupies its slot.

use crate::meta::{FilterMeta, FilterOptionMeta, IndicatorMeta, LocationLevelMeta,
    LocationOptionMeta, TimePeriodMeta};

const SEPARATOR: &str = " :: ";

/// Filters are grouped by the data column they are read from.
pub fn filter_group_key(filter: &FilterMeta) -> String {
    filter.column.trim().to_string()
}

/// A filter option has no identifying code beyond its label.
pub fn filter_option_key(option: &FilterOptionMeta) -> String {
    option.label.trim().to_string()
}

/// Location mappings are grouped by geographic level code.
pub fn location_group_key(level: &LocationLevelMeta) -> String {
    level.code.trim().to_string()
}

/// Label plus every geographic code field, positionally.
pub fn location_option_key(option: &LocationOptionMeta) -> String {
    [
        option.label.trim(),
        option.code.as_deref().unwrap_or("").trim(),
        option.old_code.as_deref().unwrap_or("").trim(),
        option.urn.as_deref().unwrap_or("").trim(),
        option.ukprn.as_deref().unwrap_or("").trim(),
    ]
    .join(SEPARATOR)
}

/// Indicators carry no mapping UI; their cross-version identity is the data
/// column alone, so a renamed column reads as a deletion plus an addition.
pub fn indicator_key(indicator: &IndicatorMeta) -> String {
    indicator.column.trim().to_string()
}

/// Time periods are identified by their natural key of code plus period.
pub fn time_period_key(period: &TimePeriodMeta) -> String {
    format!("{}{}{}", period.code.trim(), SEPARATOR, period.period.trim())
}
