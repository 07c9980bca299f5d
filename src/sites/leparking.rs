//! LeParking (leparking.fr), a dealer-stock aggregator

use crate::config::SiteConfig;
use crate::model::{ListingDetail, PartialListing};
use crate::sites::extract::{
    classify_specs, compile_regex, compile_selector, element_text, extract_number,
    infer_brand_model, select_text, split_key_value,
};
use crate::sites::{first_text, SearchFilters, SiteBase, SiteScraper};
use crate::{ConfigError, ParseError};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Seller type when the ad does not state one
const DEFAULT_SELLER_TYPE: &str = "Professionnel";

pub struct LeParking {
    site: SiteBase,
    id_pattern: Regex,
    link: Selector,
    title: Selector,
    price: Selector,
    specs: Selector,
    location: Selector,
    next_page: Selector,
    images: Selector,
    description: Selector,
    detail_specs: Selector,
    seller: Selector,
    seller_type: Selector,
    seller_name: Selector,
    seller_phone: Selector,
}

impl LeParking {
    pub fn new(site: &SiteConfig, brands: Vec<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            site: SiteBase::new(site, ".vehicle-card", ".vehicle-detail", brands)?,
            id_pattern: compile_regex(r"/([^/]+)\.html$")?,
            link: compile_selector(".vehicle-card__link")?,
            title: compile_selector(".vehicle-card__title")?,
            price: compile_selector(".vehicle-card__price")?,
            specs: compile_selector(".vehicle-card__specs li")?,
            location: compile_selector(".vehicle-card__location")?,
            next_page: compile_selector(".pagination__next")?,
            images: compile_selector(".vehicle-detail__gallery img")?,
            description: compile_selector(".vehicle-detail__description")?,
            detail_specs: compile_selector(".vehicle-detail__specs li")?,
            seller: compile_selector(".vehicle-detail__seller")?,
            seller_type: compile_selector(".vehicle-detail__seller-type")?,
            seller_name: compile_selector(".vehicle-detail__seller-name")?,
            seller_phone: compile_selector(".vehicle-detail__seller-phone")?,
        })
    }
}

/// Lowercase, accent-free slug value used by the site's filters
fn slug(value: &str) -> Option<String> {
    let lower = value.to_lowercase().replace(['é', 'è'], "e");
    match lower.as_str() {
        "essence" | "diesel" | "hybride" | "electrique" | "manuelle" | "automatique" => Some(lower),
        _ => None,
    }
}

impl SiteScraper for LeParking {
    fn source(&self) -> &str {
        "leparking"
    }

    fn build_search_url(&self, filters: &SearchFilters, page: u32) -> String {
        let mut pairs = vec![("page", page.to_string())];

        for brand in &filters.brands {
            pairs.push(("brand", brand.to_lowercase()));
        }
        for model in &filters.models {
            pairs.push(("modele", model.to_lowercase()));
        }
        if let Some(price) = filters.max_price {
            pairs.push(("prix_max", price.to_string()));
        }
        if let Some(year) = filters.min_year {
            pairs.push(("annee_min", year.to_string()));
        }
        if let Some(year) = filters.max_year {
            pairs.push(("annee_max", year.to_string()));
        }
        if let Some(km) = filters.max_km {
            pairs.push(("km_max", km.to_string()));
        }
        for fuel in filters.fuel_types.iter().filter_map(|f| slug(f)) {
            pairs.push(("carburant", fuel));
        }
        for gearbox in filters.transmissions.iter().filter_map(|t| slug(t)) {
            pairs.push(("boite", gearbox));
        }

        self.site.search_url_with(&pairs)
    }

    fn card_selector(&self) -> &Selector {
        &self.site.card
    }

    fn parse_listing_card(&self, card: ElementRef<'_>) -> Result<PartialListing, ParseError> {
        let url = self.site.card_link(card, Some(&self.link))?;
        let title = select_text(card, &self.title);
        let (brand, model) = title
            .as_deref()
            .map(|t| infer_brand_model(t, &self.site.brands))
            .unwrap_or_default();

        let specs: Vec<String> = card.select(&self.specs).filter_map(element_text).collect();
        let fields = classify_specs(&specs);

        Ok(PartialListing {
            url,
            title,
            brand,
            model,
            year: fields.year,
            price: select_text(card, &self.price).and_then(|p| extract_number(&p)),
            mileage: fields.mileage,
            fuel_type: fields.fuel_type,
            transmission: fields.transmission,
            location: select_text(card, &self.location),
        })
    }

    fn has_next_page(&self, document: &Html) -> bool {
        document.select(&self.next_page).next().is_some()
    }

    fn parse_detail(&self, url: &str, document: &Html) -> Result<ListingDetail, ParseError> {
        let root = self.site.detail_root(url, document)?;
        let mut detail = ListingDetail {
            description: select_text(root, &self.description),
            images: self.site.image_urls(document, &self.images),
            seller_type: Some(DEFAULT_SELLER_TYPE.to_string()),
            ..Default::default()
        };

        // Specs are rendered as "Label : value"
        for line in document.select(&self.detail_specs).filter_map(element_text) {
            if let Some((key, value)) = split_key_value(&line) {
                detail.features.insert(key, value);
            }
        }

        if let Some(seller) = document.select(&self.seller).next() {
            if let Some(kind) = select_text(seller, &self.seller_type) {
                detail.seller_type = Some(kind);
            }
            detail.seller_name = select_text(seller, &self.seller_name);
            detail.seller_phone = select_text(seller, &self.seller_phone);
        } else {
            detail.seller_name = first_text(document, &self.seller_name);
        }

        Ok(detail)
    }

    fn native_id(&self, url: &str) -> Option<String> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.id_pattern
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn uses_browser(&self) -> bool {
        self.site.use_browser
    }

    fn consent_selector(&self) -> Option<&str> {
        Some(".cookie-consent__accept")
    }
}
