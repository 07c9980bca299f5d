//! leboncoin (leboncoin.fr), car category

use crate::config::SiteConfig;
use crate::model::{ListingDetail, PartialListing};
use crate::sites::extract::{
    classify_specs, compile_regex, compile_selector, element_text, extract_number,
    infer_brand_model, select_text,
};
use crate::sites::{first_text, SearchFilters, SiteBase, SiteScraper};
use crate::{ConfigError, ParseError};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Seller type when the ad does not state one
const DEFAULT_SELLER_TYPE: &str = "Particulier";

pub struct Leboncoin {
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
    key_value: Selector,
    key: Selector,
    value: Selector,
    seller: Selector,
    seller_type: Selector,
    seller_name: Selector,
}

impl Leboncoin {
    pub fn new(site: &SiteConfig, brands: Vec<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            site: SiteBase::new(site, ".styles_adCard__HQRFN", ".styles_adview__XYaZr", brands)?,
            id_pattern: compile_regex(r"/(\d+)\.htm")?,
            link: compile_selector("a")?,
            title: compile_selector(".styles_adTitle__G_bDR")?,
            price: compile_selector(".styles_price___BWAO")?,
            specs: compile_selector(".styles_adCardInfos__YVu8r p")?,
            location: compile_selector(".styles_adLocation__EQ_c5")?,
            next_page: compile_selector("button[title='Page suivante']")?,
            images: compile_selector(".styles_image__3jMPV img")?,
            description: compile_selector(".styles_description__vr9db")?,
            key_value: compile_selector(".styles_KeyValue__HjzEr")?,
            key: compile_selector(".styles_key__0SCoN")?,
            value: compile_selector(".styles_value__Hq_Hn")?,
            seller: compile_selector(".styles_seller__5Vd6q")?,
            seller_type: compile_selector(".styles_sellerType__OJmVe")?,
            seller_name: compile_selector(".styles_sellerTitle__4Dsx1")?,
        })
    }
}

fn fuel_code(fuel: &str) -> Option<&'static str> {
    match fuel.to_lowercase().as_str() {
        "essence" => Some("1"),
        "diesel" => Some("2"),
        "electrique" | "électrique" => Some("4"),
        "hybride" => Some("5"),
        _ => None,
    }
}

fn gearbox_code(transmission: &str) -> Option<&'static str> {
    match transmission.to_lowercase().as_str() {
        "manuelle" => Some("0"),
        "automatique" => Some("1"),
        _ => None,
    }
}

impl SiteScraper for Leboncoin {
    fn source(&self) -> &str {
        "leboncoin"
    }

    fn build_search_url(&self, filters: &SearchFilters, page: u32) -> String {
        let mut pairs = vec![("category", "2".to_string()), ("page", page.to_string())];

        for brand in &filters.brands {
            pairs.push(("brand", brand.to_lowercase()));
        }
        for model in &filters.models {
            pairs.push(("model", model.to_lowercase()));
        }
        if let Some(price) = filters.max_price {
            pairs.push(("price", format!("0-{}", price)));
        }
        // regdate is a closed range on this site
        if let (Some(min), Some(max)) = (filters.min_year, filters.max_year) {
            pairs.push(("regdate", format!("{}-{}", min, max)));
        }
        if let Some(km) = filters.max_km {
            pairs.push(("mileage", format!("0-{}", km)));
        }

        let fuels: Vec<&str> = filters.fuel_types.iter().filter_map(|f| fuel_code(f)).collect();
        if !fuels.is_empty() {
            pairs.push(("fuel", fuels.join(",")));
        }
        let gearboxes: Vec<&str> = filters
            .transmissions
            .iter()
            .filter_map(|t| gearbox_code(t))
            .collect();
        if !gearboxes.is_empty() {
            pairs.push(("gearbox", gearboxes.join(",")));
        }

        self.site.search_url_with(&pairs)
    }

    fn card_selector(&self) -> &Selector {
        &self.site.card
    }

    fn parse_listing_card(&self, card: ElementRef<'_>) -> Result<PartialListing, ParseError> {
        // The card may itself be the anchor
        let url = self
            .site
            .card_link(card, Some(&self.link))
            .or_else(|_| self.site.card_link(card, None))?;
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
        document.select(&self.next_page).any(|button| {
            let el = button.value();
            el.attr("disabled").is_none() && !el.classes().any(|c| c == "disabled")
        })
    }

    fn parse_detail(&self, url: &str, document: &Html) -> Result<ListingDetail, ParseError> {
        self.site.detail_root(url, document)?;
        let mut detail = ListingDetail {
            description: first_text(document, &self.description),
            images: self.site.image_urls(document, &self.images),
            seller_type: Some(DEFAULT_SELLER_TYPE.to_string()),
            ..Default::default()
        };

        for pair in document.select(&self.key_value) {
            if let (Some(key), Some(value)) =
                (select_text(pair, &self.key), select_text(pair, &self.value))
            {
                detail.features.insert(key, value);
            }
        }

        if let Some(seller) = document.select(&self.seller).next() {
            if let Some(kind) = select_text(seller, &self.seller_type) {
                detail.seller_type = Some(kind);
            }
            detail.seller_name = select_text(seller, &self.seller_name);
        }

        Ok(detail)
    }

    fn native_id(&self, url: &str) -> Option<String> {
        self.id_pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn uses_browser(&self) -> bool {
        self.site.use_browser
    }

    fn consent_selector(&self) -> Option<&str> {
        Some("#didomi-notice-agree-button")
    }
}
