//! Ranking and savings across source records.
//!
//! Everything here is pure and synchronous: records in, ordering/savings/
//! report text out. The comparison basis is per-normalized-unit price
//! whenever at least two found records carry that metric (fair comparison
//! across different pack sizes), absolute price otherwise.

use crate::extract::{RecordStatus, SourceRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(kg|gm|g|ml|l)\s*$").expect("quantity regex is valid")
});

/// Which metric a ranking or savings figure was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonBasis {
    /// Price per normalized unit (per kg / per l).
    PerUnit,
    /// Absolute selling price.
    Absolute,
}

/// Savings between the best and worst found record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    /// Metric the figures were computed over.
    pub basis: ComparisonBasis,
    /// `max - min` over the chosen metric.
    pub amount: f64,
    /// `amount / max * 100`, or 0 when max is 0.
    pub percentage: f64,
}

impl Savings {
    fn none(basis: ComparisonBasis) -> Self {
        Self { basis, amount: 0.0, percentage: 0.0 }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derives a per-normalized-unit price from a price and quantity text.
///
/// Quantity must look like `<number><unit>` with unit in kg/g/gm/l/ml
/// (case-insensitive); g, gm, and ml are converted to kg/l by dividing by
/// 1000. Returns `None` on any parse or arithmetic failure — including a
/// non-positive normalized quantity — and never panics. The result is
/// rounded to 2 decimal places.
#[must_use]
pub fn unit_price(price: f64, quantity: &str) -> Option<f64> {
    let caps = QUANTITY_RE.captures(quantity)?;
    let magnitude: f64 = caps.get(1)?.as_str().parse().ok()?;
    let normalized = match caps.get(2)?.as_str().to_lowercase().as_str() {
        "kg" | "l" => magnitude,
        "g" | "gm" | "ml" => magnitude / 1000.0,
        _ => return None,
    };
    if normalized <= 0.0 || !price.is_finite() || price < 0.0 {
        return None;
    }
    Some(round2(price / normalized))
}

fn absolute_price(record: &SourceRecord) -> Option<f64> {
    record.price.as_deref().and_then(|p| p.parse().ok())
}

fn metric_under(record: &SourceRecord, basis: ComparisonBasis) -> Option<f64> {
    match basis {
        ComparisonBasis::PerUnit => record.unit_price,
        ComparisonBasis::Absolute => absolute_price(record),
    }
}

/// Chooses the comparison basis for a set of found records.
fn choose_basis(found: &[&SourceRecord]) -> ComparisonBasis {
    let with_metric = found.iter().filter(|r| r.unit_price.is_some()).count();
    if with_metric >= 2 { ComparisonBasis::PerUnit } else { ComparisonBasis::Absolute }
}

/// Ranks found records ascending under the chosen basis.
///
/// Stable: records with equal keys (or no key under the chosen basis)
/// keep their original relative order. Records not `Found` are dropped.
#[must_use]
pub fn rank(records: &[SourceRecord]) -> Vec<SourceRecord> {
    let found: Vec<&SourceRecord> = records.iter().filter(|r| r.is_found()).collect();
    let basis = choose_basis(&found);

    let mut ranked: Vec<SourceRecord> = found.into_iter().cloned().collect();
    ranked.sort_by(|a, b| {
        let ka = metric_under(a, basis).unwrap_or(f64::INFINITY);
        let kb = metric_under(b, basis).unwrap_or(f64::INFINITY);
        ka.total_cmp(&kb)
    });
    ranked
}

/// Computes savings between the best and worst found record.
///
/// Requires at least two found records carrying the chosen metric;
/// otherwise reports a zero result rather than failing.
#[must_use]
pub fn savings(records: &[SourceRecord]) -> Savings {
    let found: Vec<&SourceRecord> = records.iter().filter(|r| r.is_found()).collect();
    let basis = choose_basis(&found);

    let values: Vec<f64> = found.iter().filter_map(|r| metric_under(r, basis)).collect();
    if values.len() < 2 {
        return Savings::none(basis);
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let amount = round2(max - min);
    let percentage = if max > 0.0 { round2(amount / max * 100.0) } else { 0.0 };
    Savings { basis, amount, percentage }
}

/// Renders a deterministic comparison report.
///
/// Found records appear in rank order with the top entry marked; records
/// not found are listed separately with their notes. Pure: no side
/// effects, no calls to external services.
#[must_use]
pub fn render(records: &[SourceRecord]) -> String {
    let ranked = rank(records);
    let mut out = String::from("GROCERY PRICE COMPARISON\n");
    out.push_str(&"=".repeat(40));
    out.push_str("\n\n");

    if ranked.is_empty() {
        out.push_str("No prices found on any platform\n\n");
    }

    for (idx, record) in ranked.iter().enumerate() {
        if idx == 0 {
            out.push_str("*BEST PRICE*\n");
        }
        out.push_str(&format!("Platform: {}\n", record.platform));
        if let Some(price) = &record.price {
            out.push_str(&format!("Price: ₹{price}\n"));
        }
        if let Some(title) = &record.title {
            out.push_str(&format!("Product: {title}\n"));
        }
        if let Some(quantity) = &record.quantity {
            out.push_str(&format!("Quantity: {quantity}\n"));
        }
        if let Some(unit) = record.unit_price {
            out.push_str(&format!("Per unit: ₹{unit:.2}/kg-or-l\n"));
        }
        if let Some(delivery) = &record.delivery {
            out.push_str(&format!("Delivery: {delivery}\n"));
        }
        if let Some(availability) = &record.availability {
            out.push_str(&format!("Stock: {availability}\n"));
        }
        out.push('\n');
    }

    let figures = savings(records);
    if figures.amount > 0.0 {
        let basis = match figures.basis {
            ComparisonBasis::PerUnit => "per unit",
            ComparisonBasis::Absolute => "absolute",
        };
        out.push_str(&format!(
            "Savings ({basis}): ₹{:.2} ({:.1}%)\n\n",
            figures.amount, figures.percentage
        ));
    }

    let issues: Vec<&SourceRecord> = records.iter().filter(|r| !r.is_found()).collect();
    if !issues.is_empty() {
        out.push_str("Issues:\n");
        for record in issues {
            let note = record.note.as_deref().unwrap_or(match record.status {
                RecordStatus::NotFound => "not found",
                _ => "error",
            });
            out.push_str(&format!("- {}: {}\n", record.platform, note));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(platform: &str, price: &str, quantity: Option<&str>) -> SourceRecord {
        let unit = quantity.and_then(|q| unit_price(price.parse().unwrap(), q));
        SourceRecord {
            platform: platform.to_string(),
            price: Some(price.to_string()),
            list_price: None,
            quantity: quantity.map(str::to_string),
            unit_price: unit,
            availability: None,
            delivery: None,
            title: None,
            status: RecordStatus::Found,
            note: None,
        }
    }

    #[test]
    fn test_unit_price_conversions() {
        assert_eq!(unit_price(49.0, "300g"), Some(163.33));
        assert_eq!(unit_price(144.0, "500g"), Some(288.0));
        assert_eq!(unit_price(80.0, "1l"), Some(80.0));
        assert_eq!(unit_price(60.0, "500ml"), Some(120.0));
        assert_eq!(unit_price(30.0, "250gm"), Some(120.0));
        assert_eq!(unit_price(30.0, "1.5 kg"), Some(20.0));
    }

    #[test]
    fn test_unit_price_is_scale_consistent() {
        assert_eq!(unit_price(50.0, "500g"), unit_price(100.0, "1kg"));
        assert_eq!(unit_price(25.0, "250ml"), unit_price(100.0, "1l"));
    }

    #[test]
    fn test_unit_price_rejects_garbage() {
        assert_eq!(unit_price(50.0, "a dozen"), None);
        assert_eq!(unit_price(50.0, "0g"), None);
        assert_eq!(unit_price(50.0, ""), None);
        assert_eq!(unit_price(-5.0, "1kg"), None);
        assert_eq!(unit_price(f64::NAN, "1kg"), None);
    }

    #[test]
    fn test_rank_prefers_per_unit_basis() {
        // A is cheaper both absolutely and per kg:
        // 49/300g -> 163.33, 144/500g -> 288.00.
        let records =
            vec![found("A", "49", Some("300g")), found("B", "144", Some("500g"))];
        let ranked = rank(&records);
        assert_eq!(ranked[0].platform, "A");
        assert_eq!(ranked[0].unit_price, Some(163.33));
        assert_eq!(ranked[1].unit_price, Some(288.0));
    }

    #[test]
    fn test_rank_falls_back_to_absolute_price() {
        // Only one record carries a per-unit metric, so absolute wins.
        let records = vec![found("A", "90", None), found("B", "40", Some("1kg"))];
        let ranked = rank(&records);
        assert_eq!(ranked[0].platform, "B");
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let records = vec![
            found("First", "50", Some("1kg")),
            found("Second", "50", Some("1kg")),
            found("Third", "50", Some("1kg")),
        ];
        let ranked = rank(&records);
        let order: Vec<&str> = ranked.iter().map(|r| r.platform.as_str()).collect();
        assert_eq!(order, ["First", "Second", "Third"]);
    }

    #[test]
    fn test_rank_drops_non_found_records() {
        let records = vec![
            SourceRecord::error("Broken", "parse failed"),
            found("A", "20", None),
            SourceRecord::not_found("Empty", "out of stock"),
        ];
        let ranked = rank(&records);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].platform, "A");
    }

    #[test]
    fn test_top_ranked_metric_is_minimal() {
        let records = vec![
            found("A", "70", Some("500g")),
            found("B", "120", Some("1kg")),
            found("C", "200", Some("2kg")),
        ];
        let ranked = rank(&records);
        let top = ranked[0].unit_price.unwrap();
        for record in &ranked {
            assert!(top <= record.unit_price.unwrap());
        }
    }

    #[test]
    fn test_savings_per_unit_worked_example() {
        let records =
            vec![found("A", "49", Some("300g")), found("B", "144", Some("500g"))];
        let figures = savings(&records);
        assert_eq!(figures.basis, ComparisonBasis::PerUnit);
        assert_eq!(figures.amount, 124.67);
        assert!((figures.percentage - 43.3).abs() < 0.1);
    }

    #[test]
    fn test_savings_needs_two_found_records() {
        let records = vec![found("A", "49", Some("300g"))];
        let figures = savings(&records);
        assert_eq!(figures.amount, 0.0);
        assert_eq!(figures.percentage, 0.0);
    }

    #[test]
    fn test_savings_zero_max_reports_zero_percentage() {
        let records = vec![found("A", "0", None), found("B", "0", None)];
        let figures = savings(&records);
        assert_eq!(figures.amount, 0.0);
        assert_eq!(figures.percentage, 0.0);
    }

    #[test]
    fn test_render_marks_best_and_lists_issues() {
        let records = vec![
            found("B", "144", Some("500g")),
            found("A", "49", Some("300g")),
            SourceRecord::error("C", "App Timeout"),
        ];
        let text = render(&records);
        // A ranks first despite appearing second in the input.
        let best_pos = text.find("*BEST PRICE*").unwrap();
        let a_pos = text.find("Platform: A").unwrap();
        let b_pos = text.find("Platform: B").unwrap();
        assert!(best_pos < a_pos && a_pos < b_pos);
        assert!(text.contains("- C: App Timeout"));
        assert!(text.contains("Savings (per unit)"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let records =
            vec![found("A", "49", Some("300g")), found("B", "144", Some("500g"))];
        assert_eq!(render(&records), render(&records));
    }

    #[test]
    fn test_render_with_no_found_records() {
        let records = vec![SourceRecord::not_found("A", "sold out")];
        let text = render(&records);
        assert!(text.contains("No prices found"));
        assert!(text.contains("- A: sold out"));
    }
}
