//! Statistics over the stored listings
//!
//! This module computes a snapshot of the listing store for the `stats`
//! command: totals per source, price and mileage averages, freshness.

use crate::model::Listing;
use crate::storage::{ListingStore, PersistenceResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Store statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatistics {
    pub total_listings: u64,

    /// Listing count per source
    pub by_source: BTreeMap<String, u64>,

    /// Listing count per brand, brands as stored
    pub by_brand: BTreeMap<String, u64>,

    /// Mean over listings with a known price
    pub average_price: Option<f64>,
    pub average_mileage: Option<f64>,

    pub with_local_images: u64,

    /// Listings first stored within the last 24 hours
    pub new_last_day: u64,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Computes statistics over `listings` as of `now`
pub fn compute_statistics(listings: &[Listing], now: DateTime<Utc>) -> StoreStatistics {
    let mut stats = StoreStatistics {
        total_listings: listings.len() as u64,
        ..Default::default()
    };
    let day_ago = now - Duration::hours(24);

    for listing in listings {
        *stats.by_source.entry(listing.source.clone()).or_default() += 1;
        if let Some(brand) = &listing.brand {
            *stats.by_brand.entry(brand.clone()).or_default() += 1;
        }
        if !listing.local_images.is_empty() {
            stats.with_local_images += 1;
        }
        if listing.created_at.map_or(false, |created| created >= day_ago) {
            stats.new_last_day += 1;
        }
    }

    stats.average_price = mean(listings.iter().filter_map(|l| l.price));
    stats.average_mileage = mean(listings.iter().filter_map(|l| l.mileage.map(|m| m as f64)));
    stats
}

/// Loads statistics from a store
pub fn load_statistics(store: &dyn ListingStore) -> PersistenceResult<StoreStatistics> {
    Ok(compute_statistics(&store.all()?, Utc::now()))
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Listing Statistics ===\n");

    println!("Overview:");
    println!("  Total listings: {}", stats.total_listings);
    println!("  New in the last 24h: {}", stats.new_last_day);
    println!("  With stored images: {}", stats.with_local_images);
    if let Some(price) = stats.average_price {
        println!("  Average price: {:.0} €", price);
    }
    if let Some(mileage) = stats.average_mileage {
        println!("  Average mileage: {:.0} km", mileage);
    }
    println!();

    println!("Listings by Source:");
    for (source, count) in &stats.by_source {
        let percentage = if stats.total_listings > 0 {
            (*count as f64 / stats.total_listings as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", source, count, percentage);
    }
    println!();

    if !stats.by_brand.is_empty() {
        println!("Top Brands:");
        let mut brands: Vec<_> = stats.by_brand.iter().collect();
        brands.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (brand, count) in brands.into_iter().take(10) {
            println!("  {}: {}", brand, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_statistics() {
        let now = Utc::now();
        let mut a = Listing::new("lacentrale_1", "lacentrale", "https://x/1");
        a.brand = Some("Renault".into());
        a.price = Some(10000.0);
        a.mileage = Some(50000);
        a.created_at = Some(now - Duration::hours(2));
        a.local_images = vec!["lacentrale_1/a.jpg".into()];

        let mut b = Listing::new("leboncoin_2", "leboncoin", "https://x/2");
        b.brand = Some("Renault".into());
        b.price = Some(20000.0);
        b.created_at = Some(now - Duration::days(3));

        let c = Listing::new("lacentrale_3", "lacentrale", "https://x/3");

        let stats = compute_statistics(&[a, b, c], now);
        assert_eq!(stats.total_listings, 3);
        assert_eq!(stats.by_source["lacentrale"], 2);
        assert_eq!(stats.by_brand["Renault"], 2);
        assert_eq!(stats.average_price, Some(15000.0));
        assert_eq!(stats.average_mileage, Some(50000.0));
        assert_eq!(stats.with_local_images, 1);
        assert_eq!(stats.new_last_day, 1);
    }

    #[test]
    fn test_empty_store() {
        let stats = compute_statistics(&[], Utc::now());
        assert_eq!(stats, StoreStatistics::default());
    }
}
