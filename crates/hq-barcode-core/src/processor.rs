//! Processor / business rules.
//!
//! A pure, deterministic filter: all five rules in §4.I must hold for a
//! declaration to pass. `filter` preserves input order and is idempotent
//! (testable property #6).

use std::collections::HashSet;

use crate::model::{Channel, Declaration};

/// Applies the §4.I filtering rules, excluding declarations already present
/// in `already_processed` (a set of declaration ids, as produced by
/// [`crate::tracking::TrackingStore::get_all_processed`]).
pub fn filter(candidates: &[Declaration], already_processed: &HashSet<String>) -> Vec<Declaration> {
    candidates
        .iter()
        .filter(|d| passes_business_rules(d) && !already_processed.contains(&d.id()))
        .cloned()
        .collect()
}

/// Caps the number of eligible declarations a single scheduler tick
/// processes (SPEC_FULL §B batch limiter, recovered from
/// `processors/batch_limiter.py`). `None` is unbounded. Applied after
/// [`filter`], preserving order.
pub fn limit_batch(eligible: Vec<Declaration>, max_batch_size: Option<usize>) -> Vec<Declaration> {
    match max_batch_size {
        Some(max) if eligible.len() > max => {
            eligible.into_iter().take(max).collect()
        }
        _ => eligible,
    }
}

/// The four purely data-driven rules (everything except the
/// already-processed check, which requires external state).
fn passes_business_rules(d: &Declaration) -> bool {
    matches!(d.channel(), Some(Channel::Green) | Some(Channel::Yellow))
        && d.is_cleared()
        && !d.is_transport_excluded()
        && !d.has_exclusion_marker()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base(channel: &str, status: &str, transport: &str, desc: Option<&str>) -> Declaration {
        Declaration {
            declaration_number: "1".into(),
            tax_code: "1".into(),
            declaration_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            customs_office_code: "18A3".into(),
            transport_method: transport.into(),
            channel: channel.into(),
            status: status.into(),
            goods_description: desc.map(String::from),
        }
    }

    #[test]
    fn s5_business_rule_matrix_exactly_two_pass() {
        let candidates = vec![
            base("Xanh", "T", "1", None),             // pass: green, cleared
            base("Vang", "T", "1", None),              // pass: yellow, cleared
            base("Do", "T", "1", None),                 // fail: red
            base("Xanh", "K", "1", None),               // fail: not cleared
            base("Xanh", "T", "9999", None),            // fail: excluded transport
            base("Xanh", "T", "1", Some("x #&NKTC y")), // fail: NKTC marker
            base("Xanh", "T", "1", Some("x #&XKTC y")), // fail: XKTC marker
        ];
        let result = filter(&candidates, &HashSet::new());
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn filter_is_idempotent_and_order_preserving() {
        let candidates = vec![
            base("Xanh", "T", "1", None),
            base("Do", "T", "1", None),
            base("Vang", "T", "1", None),
        ];
        let once = filter(&candidates, &HashSet::new());
        let twice = filter(&once, &HashSet::new());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn excludes_already_processed() {
        let d = base("Xanh", "T", "1", None);
        let mut processed = HashSet::new();
        processed.insert(d.id());
        assert!(filter(&[d], &processed).is_empty());
    }

    #[test]
    fn limit_batch_truncates_and_preserves_order() {
        let candidates: Vec<Declaration> = (0..5)
            .map(|i| {
                let mut d = base("Xanh", "T", "1", None);
                d.declaration_number = i.to_string();
                d
            })
            .collect();
        let limited = limit_batch(candidates.clone(), Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].declaration_number, "0");
        assert_eq!(limited[1].declaration_number, "1");
        assert_eq!(limit_batch(candidates.clone(), None).len(), 5);
        assert_eq!(limit_batch(candidates, Some(100)).len(), 5);
    }
}
