//! Normalized vehicle listing record
//!
//! Every marketplace is mapped onto [`Listing`]. Search-result cards produce a
//! [`PartialListing`], detail pages a [`ListingDetail`]; [`Listing::assemble`]
//! combines both with detail values taking precedence.

use crate::ParseError;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Oldest plausible model year
pub const MIN_YEAR: i32 = 1900;

/// A normalized used-vehicle listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Deterministic id, `<source>_<native id>`
    pub id: String,
    pub source: String,
    pub url: String,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub mileage: Option<u64>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,

    /// Free-form equipment and spec attributes from the detail page
    #[serde(default)]
    pub features: BTreeMap<String, String>,

    /// Image URLs as published by the site
    #[serde(default)]
    pub remote_images: Vec<String>,

    /// Downloaded image paths, relative to the image root
    #[serde(default)]
    pub local_images: Vec<String>,

    #[serde(default)]
    pub seller_type: Option<String>,
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_phone: Option<String>,

    /// Set by the store on first insert
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Set by the store on every upsert
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields readable from a search-result card
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialListing {
    pub url: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub price: Option<f64>,
    pub mileage: Option<f64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub location: Option<String>,
}

/// Fields readable from a listing detail page
///
/// The coarse fields (`brand` .. `transmission`) override whatever the card held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetail {
    pub description: Option<String>,
    pub images: Vec<String>,
    pub features: BTreeMap<String, String>,
    pub seller_type: Option<String>,
    pub seller_name: Option<String>,
    pub seller_phone: Option<String>,

    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<f64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
}

impl Listing {
    /// Creates an empty listing with only identity fields set
    pub fn new(id: impl Into<String>, source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            url: url.into(),
            title: None,
            brand: None,
            model: None,
            year: None,
            price: None,
            mileage: None,
            fuel_type: None,
            transmission: None,
            location: None,
            description: None,
            features: BTreeMap::new(),
            remote_images: Vec::new(),
            local_images: Vec::new(),
            seller_type: None,
            seller_name: None,
            seller_phone: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Builds a listing from card data and, when available, detail data
    pub fn assemble(
        id: String,
        source: &str,
        card: PartialListing,
        detail: Option<ListingDetail>,
    ) -> Self {
        let mut listing = Listing::new(id, source, card.url);
        listing.title = card.title;
        listing.brand = card.brand;
        listing.model = card.model;
        listing.year = card.year;
        listing.price = card.price;
        listing.mileage = non_negative_u64(card.mileage);
        listing.fuel_type = card.fuel_type;
        listing.transmission = card.transmission;
        listing.location = card.location;

        if let Some(detail) = detail {
            listing.description = detail.description;
            listing.remote_images = detail.images;
            listing.features = detail.features;
            listing.seller_type = detail.seller_type;
            listing.seller_name = detail.seller_name;
            listing.seller_phone = detail.seller_phone;

            override_with(&mut listing.brand, detail.brand);
            override_with(&mut listing.model, detail.model);
            override_with(&mut listing.fuel_type, detail.fuel_type);
            override_with(&mut listing.transmission, detail.transmission);
            if detail.year.is_some() {
                listing.year = detail.year;
            }
            if let Some(mileage) = non_negative_u64(detail.mileage) {
                listing.mileage = Some(mileage);
            }
        }

        listing.sanitize(Utc::now().year());
        listing
    }

    /// Nulls out values that cannot be right
    ///
    /// Years outside `[1900, current_year + 1]` and negative or non-finite
    /// prices are dropped; blank strings become `None`.
    pub fn sanitize(&mut self, current_year: i32) {
        if let Some(year) = self.year {
            if !(MIN_YEAR..=current_year + 1).contains(&year) {
                self.year = None;
            }
        }

        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                self.price = None;
            }
        }

        for field in [
            &mut self.title,
            &mut self.brand,
            &mut self.model,
            &mut self.fuel_type,
            &mut self.transmission,
            &mut self.location,
            &mut self.description,
            &mut self.seller_type,
            &mut self.seller_name,
            &mut self.seller_phone,
        ] {
            if field.as_deref().map_or(false, |v| v.trim().is_empty()) {
                *field = None;
            }
        }

        self.remote_images.retain(|url| !url.trim().is_empty());
        self.remote_images.dedup();
    }

    /// Checks the identity invariants
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.id.trim().is_empty() {
            return Err(ParseError::MissingField {
                field: "id",
                context: self.url.clone(),
            });
        }
        if self.source.trim().is_empty() {
            return Err(ParseError::MissingField {
                field: "source",
                context: self.url.clone(),
            });
        }
        Ok(())
    }

    /// Upsert merge: returns `existing` updated with the informative fields of `incoming`
    ///
    /// A `None`, blank or empty incoming value never erases a stored one.
    /// `created_at` is kept from the stored record, `updated_at` is set to `now`.
    pub fn merged(existing: &Listing, incoming: Listing, now: DateTime<Utc>) -> Listing {
        let mut merged = existing.clone();

        merged.url = if incoming.url.is_empty() {
            merged.url
        } else {
            incoming.url
        };

        merge_text(&mut merged.title, incoming.title);
        merge_text(&mut merged.brand, incoming.brand);
        merge_text(&mut merged.model, incoming.model);
        merge_text(&mut merged.fuel_type, incoming.fuel_type);
        merge_text(&mut merged.transmission, incoming.transmission);
        merge_text(&mut merged.location, incoming.location);
        merge_text(&mut merged.description, incoming.description);
        merge_text(&mut merged.seller_type, incoming.seller_type);
        merge_text(&mut merged.seller_name, incoming.seller_name);
        merge_text(&mut merged.seller_phone, incoming.seller_phone);

        if incoming.year.is_some() {
            merged.year = incoming.year;
        }
        if incoming.price.is_some() {
            merged.price = incoming.price;
        }
        if incoming.mileage.is_some() {
            merged.mileage = incoming.mileage;
        }
        if !incoming.features.is_empty() {
            merged.features = incoming.features;
        }
        if !incoming.remote_images.is_empty() {
            merged.remote_images = incoming.remote_images;
        }
        if !incoming.local_images.is_empty() {
            merged.local_images = incoming.local_images;
        }

        merged.created_at = existing.created_at.or(Some(now));
        merged.updated_at = Some(now);
        merged
    }
}

fn override_with(target: &mut Option<String>, value: Option<String>) {
    if value.as_deref().map_or(false, |v| !v.trim().is_empty()) {
        *target = value;
    }
}

fn merge_text(target: &mut Option<String>, incoming: Option<String>) {
    override_with(target, incoming);
}

fn non_negative_u64(value: Option<f64>) -> Option<u64> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card() -> PartialListing {
        PartialListing {
            url: "https://www.lacentrale.fr/auto-occasion-annonce-123.html".to_string(),
            title: Some("Renault Clio IV".to_string()),
            brand: Some("Renault".to_string()),
            model: Some("Clio IV".to_string()),
            year: Some(2018),
            price: Some(9500.0),
            mileage: Some(72000.0),
            fuel_type: Some("Essence".to_string()),
            transmission: None,
            location: Some("Lyon (69)".to_string()),
        }
    }

    #[test]
    fn test_assemble_card_only() {
        let listing = Listing::assemble("lacentrale_123".into(), "lacentrale", card(), None);

        assert_eq!(listing.id, "lacentrale_123");
        assert_eq!(listing.price, Some(9500.0));
        assert_eq!(listing.mileage, Some(72000));
        assert!(listing.description.is_none());
        assert!(listing.remote_images.is_empty());
    }

    #[test]
    fn test_detail_overrides_card() {
        let detail = ListingDetail {
            description: Some("Première main".to_string()),
            images: vec!["https://img/1.jpg".to_string()],
            year: Some(2019),
            mileage: Some(71000.0),
            transmission: Some("Manuelle".to_string()),
            brand: Some("  ".to_string()),
            ..Default::default()
        };

        let listing =
            Listing::assemble("lacentrale_123".into(), "lacentrale", card(), Some(detail));

        assert_eq!(listing.year, Some(2019));
        assert_eq!(listing.mileage, Some(71000));
        assert_eq!(listing.transmission.as_deref(), Some("Manuelle"));
        // Blank detail value does not erase the card value
        assert_eq!(listing.brand.as_deref(), Some("Renault"));
        assert_eq!(listing.remote_images.len(), 1);
    }

    #[test]
    fn test_sanitize_out_of_range_values() {
        let mut listing = Listing::new("a_1", "a", "https://a/1");
        listing.year = Some(1850);
        listing.price = Some(-5.0);
        listing.title = Some("   ".to_string());
        listing.sanitize(2024);

        assert_eq!(listing.year, None);
        assert_eq!(listing.price, None);
        assert_eq!(listing.title, None);

        listing.year = Some(2025);
        listing.sanitize(2024);
        assert_eq!(listing.year, Some(2025));

        listing.year = Some(2026);
        listing.sanitize(2024);
        assert_eq!(listing.year, None);
    }

    #[test]
    fn test_negative_mileage_dropped() {
        let mut partial = card();
        partial.mileage = Some(-10.0);
        let listing = Listing::assemble("x_1".into(), "x", partial, None);
        assert_eq!(listing.mileage, None);
    }

    #[test]
    fn test_validate_requires_identity() {
        assert!(Listing::new("", "lacentrale", "u").validate().is_err());
        assert!(Listing::new("id", "", "u").validate().is_err());
        assert!(Listing::new("id", "lacentrale", "u").validate().is_ok());
    }

    #[test]
    fn test_merge_keeps_stored_values_and_created_at() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let mut existing = Listing::new("s_1", "s", "https://s/1");
        existing.price = Some(10000.0);
        existing.description = Some("old".to_string());
        existing.local_images = vec!["s_1/abc.jpg".to_string()];
        existing.created_at = Some(created);
        existing.updated_at = Some(created);

        let mut incoming = Listing::new("s_1", "s", "https://s/1");
        incoming.price = Some(9000.0);
        incoming.description = Some(String::new());

        let merged = Listing::merged(&existing, incoming, now);

        assert_eq!(merged.price, Some(9000.0));
        assert_eq!(merged.description.as_deref(), Some("old"));
        assert_eq!(merged.local_images, vec!["s_1/abc.jpg"]);
        assert_eq!(merged.created_at, Some(created));
        assert_eq!(merged.updated_at, Some(now));
    }
}
