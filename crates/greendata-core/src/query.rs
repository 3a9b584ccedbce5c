//! Query and aggregation over a repository snapshot
//!
//! Every function here is pure: the same records, parameters and evaluation
//! time always give the same result.

use serde::Serialize;

use crate::Record;

/// Aggregate statistics over all records
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyStats {
    pub total_records: usize,
    pub verified_records: usize,
    /// Mean of `public_value1`; 0 when there are no records
    pub avg_consumption: f64,
    /// Sum of `public_value2`
    pub total_carbon_tax: u64,
    /// Records created within the trailing window
    pub recent_uploads: usize,
}

/// Compute statistics as of `now` (seconds since epoch).
///
/// A record is recent when `now - created_at < window_secs`. Records
/// timestamped after `now` count as recent.
pub fn stats(records: &[Record], now: u64, window_secs: u64) -> EnergyStats {
    let total_records = records.len();
    if total_records == 0 {
        return EnergyStats::default();
    }

    let verified_records = records.iter().filter(|r| r.is_verified()).count();
    let consumption_sum: u128 = records.iter().map(|r| r.public_value1 as u128).sum();
    let total_carbon_tax = records
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.public_value2));
    let recent_uploads = records
        .iter()
        .filter(|r| now.saturating_sub(r.created_at) < window_secs)
        .count();

    EnergyStats {
        total_records,
        verified_records,
        avg_consumption: consumption_sum as f64 / total_records as f64,
        total_carbon_tax,
        recent_uploads,
    }
}

/// Case-insensitive substring match on name or description.
///
/// An empty term matches every record.
pub fn search<'a>(records: &'a [Record], term: &str) -> Vec<&'a Record> {
    let needle = term.to_lowercase();
    records
        .iter()
        .filter(|r| {
            needle.is_empty()
                || r.name.to_lowercase().contains(&needle)
                || r.description.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Number of pages needed for `len` items
pub fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// Clamp a requested 1-indexed page into `[1, page_count]`
pub fn clamp_page(page: usize, page_count: usize) -> usize {
    page.clamp(1, page_count.max(1))
}

/// Slice out a 1-indexed page. Out-of-range pages are empty.
pub fn paginate<T>(items: &[T], page_size: usize, page: usize) -> &[T] {
    if page == 0 || page_size == 0 {
        return &[];
    }
    let start = match (page - 1).checked_mul(page_size) {
        Some(start) if start < items.len() => start,
        _ => return &[],
    };
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CiphertextHandle, DisclosureProof, RecordId, Verification};
    use alloy_primitives::Address;

    const NOW: u64 = 1_700_000_000;
    const WEEK: u64 = 60 * 60 * 24 * 7;

    fn record(n: u8, name: &str, description: &str, consumption: u64, age: u64) -> Record {
        Record {
            id: RecordId::new(format!("energy-{n}")).unwrap(),
            name: name.into(),
            description: description.into(),
            ciphertext: CiphertextHandle::from([n; 32]),
            public_value1: consumption,
            public_value2: (consumption as f64 * 0.15).round() as u64,
            creator: Address::ZERO,
            created_at: NOW - age,
            verification: Verification::Unverified,
        }
    }

    #[test]
    fn test_stats_empty() {
        let s = stats(&[], NOW, WEEK);
        assert_eq!(s.total_records, 0);
        assert_eq!(s.verified_records, 0);
        assert_eq!(s.avg_consumption, 0.0);
        assert_eq!(s.total_carbon_tax, 0);
        assert_eq!(s.recent_uploads, 0);
    }

    #[test]
    fn test_stats_aggregates() {
        let mut records = vec![
            record(1, "A", "", 100, 60),
            record(2, "B", "", 200, WEEK),
            record(3, "C", "", 0, WEEK - 1),
        ];
        records[1].verification = Verification::Verified {
            plaintext: 200,
            proof: DisclosureProof::LedgerAttested,
        };

        let s = stats(&records, NOW, WEEK);
        assert_eq!(s.total_records, 3);
        assert_eq!(s.verified_records, 1);
        assert!((s.avg_consumption - 100.0).abs() < f64::EPSILON);
        assert_eq!(s.total_carbon_tax, 15 + 30);
        // exactly one week old falls outside the window
        assert_eq!(s.recent_uploads, 2);
    }

    #[test]
    fn test_stats_serialize_field_names() {
        let json = serde_json::to_value(stats(&[], NOW, WEEK)).unwrap();
        for key in [
            "totalRecords",
            "verifiedRecords",
            "avgConsumption",
            "totalCarbonTax",
            "recentUploads",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_search() {
        let records = vec![
            record(1, "Steel Mill", "furnace line", 1, 0),
            record(2, "Bakery", "ovens, STEEL racks", 1, 0),
            record(3, "Office", "hvac", 1, 0),
        ];

        assert_eq!(search(&records, "").len(), 3);

        let hits: Vec<_> = search(&records, "steel").iter().map(|r| r.public_value1).collect();
        assert_eq!(hits.len(), 2);

        let by_name = search(&records, "OFFICE");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "Office");

        let by_description = search(&records, "Furnace");
        assert_eq!(by_description.len(), 1);
        assert_eq!(by_description[0].name, "Steel Mill");

        assert!(search(&records, "nuclear").is_empty());
    }

    #[test]
    fn test_paginate_sizes() {
        let items: Vec<u32> = (0..12).collect();
        let sizes: Vec<usize> = (1..=3).map(|p| paginate(&items, 5, p).len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert!(paginate(&items, 5, 4).is_empty());
        assert!(paginate(&items, 5, 0).is_empty());
        assert_eq!(paginate(&items, 5, 3), &[10, 11]);
        assert!(paginate(&items, 0, 1).is_empty());
        assert!(paginate(&items, 5, usize::MAX).is_empty());
    }

    #[test]
    fn test_page_helpers() {
        assert_eq!(page_count(12, 5), 3);
        assert_eq!(page_count(10, 5), 2);
        assert_eq!(page_count(0, 5), 0);
        assert_eq!(page_count(3, 0), 0);

        assert_eq!(clamp_page(0, 3), 1);
        assert_eq!(clamp_page(9, 3), 3);
        assert_eq!(clamp_page(2, 3), 2);
        assert_eq!(clamp_page(4, 0), 1);
    }
}
