//! Carat-range bucketing
//!
//! Weights are graded to the hundredth of a carat, so a band labelled
//! `1.40-1.69` covers every weight in `[1.40, 1.70)`.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Label for weights outside every configured band
pub const OTHER_RANGE: &str = "Other";

const STANDARD_BANDS: &[&str] = &[
    "0.70-0.79",
    "0.80-0.89",
    "0.90-0.97",
    "1.40-1.69",
    "1.70-1.99",
    "2.70-2.99",
    "3.40-3.69",
    "3.70-3.99",
    "4.00-4.19",
    "4.40-4.69",
    "4.70-4.99",
    "5.00-5.19",
    "5.40-5.69",
    "5.70-5.99",
    "6.00-6.19",
    "6.40-6.69",
    "6.70-6.99",
    "7.00-7.19",
    "7.40-7.69",
    "7.70-7.99",
    "8.00-8.19",
    "8.40-8.69",
    "8.70-8.99",
    "9.00-9.19",
    "9.40-9.69",
    "9.70-9.99",
    "10.00-10.19",
    "10.40-10.69",
    "10.70-10.99",
];

/// One band, bounds in hundredths of a carat (both inclusive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaratBand {
    pub label: String,
    low: i64,
    high: i64,
}

impl CaratBand {
    /// Parse a `lo-hi` label such as `0.90-0.97`
    pub fn parse(label: &str) -> Result<Self> {
        let label = label.trim();
        let (lo, hi) = label
            .split_once('-')
            .ok_or_else(|| AppError::Config(format!("Carat band '{}' is not lo-hi", label)))?;

        let low = to_hundredths(lo.trim())
            .ok_or_else(|| AppError::Config(format!("Bad lower bound in carat band '{}'", label)))?;
        let high = to_hundredths(hi.trim())
            .ok_or_else(|| AppError::Config(format!("Bad upper bound in carat band '{}'", label)))?;

        if high < low {
            return Err(AppError::Config(format!("Carat band '{}' is inverted", label)));
        }

        Ok(Self {
            label: format!("{:.2}-{:.2}", low as f64 / 100.0, high as f64 / 100.0),
            low,
            high,
        })
    }

    fn contains(&self, hundredths: i64) -> bool {
        hundredths >= self.low && hundredths <= self.high
    }

    /// Lower bound in carats, used for ordering grid axes
    pub fn lower_bound(&self) -> f64 {
        self.low as f64 / 100.0
    }
}

/// The deployment's set of carat bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaratBands {
    bands: Vec<CaratBand>,
}

impl CaratBands {
    /// Build from labels; overlapping bands are rejected so bucketing stays
    /// unambiguous.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let mut bands = labels
            .iter()
            .map(|label| CaratBand::parse(label.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        bands.sort_by_key(|band| band.low);

        for pair in bands.windows(2) {
            if pair[1].low <= pair[0].high {
                return Err(AppError::Config(format!(
                    "Carat bands '{}' and '{}' overlap",
                    pair[0].label, pair[1].label
                )));
            }
        }

        Ok(Self { bands })
    }

    pub fn standard() -> Self {
        let bands = STANDARD_BANDS
            .iter()
            .filter_map(|label| CaratBand::parse(label).ok())
            .collect();
        Self { bands }
    }

    pub fn bands(&self) -> &[CaratBand] {
        &self.bands
    }

    /// Map a weight to its band label, or [`OTHER_RANGE`]. Total: NaN,
    /// negative and out-of-band weights all land in `Other`.
    pub fn bucket(&self, carat_weight: f64) -> String {
        if !carat_weight.is_finite() || carat_weight < 0.0 {
            return OTHER_RANGE.to_string();
        }
        // Small epsilon absorbs binary representation error (1.7 -> 169.999...)
        let hundredths = (carat_weight * 100.0 + 1e-6).floor() as i64;

        self.bands
            .iter()
            .find(|band| band.contains(hundredths))
            .map(|band| band.label.clone())
            .unwrap_or_else(|| OTHER_RANGE.to_string())
    }
}

impl Default for CaratBands {
    fn default() -> Self {
        Self::standard()
    }
}

fn to_hundredths(value: &str) -> Option<i64> {
    let parsed: f64 = value.parse().ok()?;
    if !parsed.is_finite() || parsed < 0.0 {
        return None;
    }
    Some((parsed * 100.0).round() as i64)
}

/// Sort key for a carat-range label: numeric lower bound, `Other` and
/// unparsable labels last.
pub fn range_sort_key(label: &str) -> (u8, i64, String) {
    let lower = label
        .split_once('-')
        .and_then(|(lo, _)| to_hundredths(lo.trim()));
    match lower {
        Some(low) => (0, low, label.to_string()),
        None => (1, 0, label.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_bands_is_other() {
        let bands = CaratBands::from_labels(&["0.90-0.97", "1.40-1.69"]).unwrap();
        assert_eq!(bands.bucket(1.05), OTHER_RANGE);
        assert_eq!(bands.bucket(1.55), "1.40-1.69");
    }

    #[test]
    fn test_band_edges_are_half_open() {
        let bands = CaratBands::from_labels(&["1.40-1.69", "1.70-1.99"]).unwrap();
        assert_eq!(bands.bucket(1.40), "1.40-1.69");
        assert_eq!(bands.bucket(1.69), "1.40-1.69");
        assert_eq!(bands.bucket(1.695), "1.40-1.69");
        assert_eq!(bands.bucket(1.70), "1.70-1.99");
        assert_eq!(bands.bucket(1.3999), OTHER_RANGE);
    }

    #[test]
    fn test_bucketing_is_total() {
        let bands = CaratBands::standard();
        assert_eq!(bands.bucket(f64::NAN), OTHER_RANGE);
        assert_eq!(bands.bucket(-1.0), OTHER_RANGE);
        assert_eq!(bands.bucket(f64::INFINITY), OTHER_RANGE);
        assert_eq!(bands.bucket(0.0), OTHER_RANGE);
        assert_eq!(bands.bucket(10.75), "10.70-10.99");
    }

    #[test]
    fn test_overlapping_bands_rejected() {
        assert!(CaratBands::from_labels(&["1.00-1.50", "1.40-1.69"]).is_err());
        assert!(CaratBands::from_labels(&["1.69-1.40"]).is_err());
        assert!(CaratBands::from_labels(&["heavy"]).is_err());
    }

    #[test]
    fn test_labels_are_normalized() {
        let bands = CaratBands::from_labels(&[" 1.4 - 1.69 "]).unwrap();
        assert_eq!(bands.bands()[0].label, "1.40-1.69");
    }

    #[test]
    fn test_range_sort_key_orders_numerically() {
        let mut labels = vec!["Other", "10.00-10.19", "1.40-1.69", "0.70-0.79"];
        labels.sort_by_key(|l| range_sort_key(l));
        assert_eq!(labels, vec!["0.70-0.79", "1.40-1.69", "10.00-10.19", "Other"]);
    }
}
