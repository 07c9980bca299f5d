//! AutoScout24 (autoscout24.fr)

use crate::config::SiteConfig;
use crate::model::{ListingDetail, PartialListing};
use crate::sites::extract::{
    classify_specs, compile_regex, compile_selector, element_text, extract_number,
    infer_brand_model, select_text,
};
use crate::sites::{SearchFilters, SiteBase, SiteScraper};
use crate::{ConfigError, ParseError};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Numeric make ids used by the `mmvmk0` filter
const MAKE_IDS: &[(&str, u32)] = &[
    ("renault", 54),
    ("peugeot", 49),
    ("citroen", 14),
    ("volkswagen", 74),
    ("audi", 9),
    ("bmw", 13),
    ("mercedes", 47),
    ("ford", 22),
    ("toyota", 69),
    ("nissan", 48),
    ("opel", 50),
    ("fiat", 21),
    ("seat", 59),
    ("skoda", 62),
    ("hyundai", 31),
    ("kia", 35),
    ("dacia", 121),
    ("volvo", 73),
];

pub struct AutoScout24 {
    site: SiteBase,
    id_pattern: Regex,
    link: Selector,
    make_model: Selector,
    version: Selector,
    price: Selector,
    specs: Selector,
    location: Selector,
    next_page: Selector,
    images: Selector,
    description: Selector,
    param_item: Selector,
    param_label: Selector,
    param_value: Selector,
    vendor: Selector,
    vendor_type: Selector,
    vendor_name: Selector,
    vendor_phone: Selector,
}

impl AutoScout24 {
    pub fn new(site: &SiteConfig, brands: Vec<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            site: SiteBase::new(site, ".cldt-summary-full-item", ".cldt-detail", brands)?,
            id_pattern: compile_regex(r"-(\d+)$")?,
            link: compile_selector("a.cldt-summary-full-item-main")?,
            make_model: compile_selector("h2.cldt-summary-makemodel")?,
            version: compile_selector("h2.cldt-summary-version")?,
            price: compile_selector("span.cldt-price")?,
            specs: compile_selector(".cldt-summary-vehicle-data span")?,
            location: compile_selector(".cldt-summary-seller-contact-address")?,
            next_page: compile_selector("a.next-page")?,
            images: compile_selector(".gallery-picture img")?,
            description: compile_selector(".cldt-detail-description")?,
            param_item: compile_selector(".cldt-detail-section .cldt-detail-params-item")?,
            param_label: compile_selector(".cldt-detail-params-item-label")?,
            param_value: compile_selector(".cldt-detail-params-item-value")?,
            vendor: compile_selector(".cldt-vendor-contact-box")?,
            vendor_type: compile_selector(".cldt-vendor-type")?,
            vendor_name: compile_selector(".cldt-vendor-name")?,
            vendor_phone: compile_selector(".cldt-vendor-phone")?,
        })
    }
}

fn make_id(brand: &str) -> Option<u32> {
    let key = brand.to_lowercase().replace(['ë', 'é'], "e");
    MAKE_IDS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, id)| *id)
}

fn fuel_code(fuel: &str) -> Option<&'static str> {
    match fuel.to_lowercase().as_str() {
        "essence" => Some("B"),
        "diesel" => Some("D"),
        "hybride" => Some("2"),
        "electrique" | "électrique" => Some("E"),
        _ => None,
    }
}

fn gear_code(transmission: &str) -> Option<&'static str> {
    match transmission.to_lowercase().as_str() {
        "manuelle" => Some("M"),
        "automatique" => Some("A"),
        _ => None,
    }
}

impl SiteScraper for AutoScout24 {
    fn source(&self) -> &str {
        "autoscout24"
    }

    fn build_search_url(&self, filters: &SearchFilters, page: u32) -> String {
        let mut pairs = vec![("page", page.to_string())];
        let makes: Vec<u32> = filters.brands.iter().filter_map(|b| make_id(b)).collect();
        if makes.is_empty() {
            // Make 0 searches every make
            pairs.push(("mmvmk0", "0".to_string()));
        }
        for make in makes {
            pairs.push(("mmvmk0", make.to_string()));
        }
        if let Some(price) = filters.max_price {
            pairs.push(("priceto", price.to_string()));
        }
        if let Some(year) = filters.min_year {
            pairs.push(("fregfrom", year.to_string()));
        }
        if let Some(year) = filters.max_year {
            pairs.push(("fregto", year.to_string()));
        }
        if let Some(km) = filters.max_km {
            pairs.push(("kmto", km.to_string()));
        }
        for fuel in filters.fuel_types.iter().filter_map(|f| fuel_code(f)) {
            pairs.push(("fuel", fuel.to_string()));
        }
        for gear in filters.transmissions.iter().filter_map(|t| gear_code(t)) {
            pairs.push(("gear", gear.to_string()));
        }
        pairs.push(("sort", "age".to_string()));
        pairs.push(("desc", "1".to_string()));
        pairs.push(("atype", "C".to_string()));

        self.site.search_url_with(&pairs)
    }

    fn card_selector(&self) -> &Selector {
        &self.site.card
    }

    fn parse_listing_card(&self, card: ElementRef<'_>) -> Result<PartialListing, ParseError> {
        let url = self.site.card_link(card, Some(&self.link))?;

        let make_model = select_text(card, &self.make_model);
        let title = match (make_model.as_deref(), select_text(card, &self.version)) {
            (Some(head), Some(version)) => Some(format!("{} {}", head, version)),
            (Some(head), None) => Some(head.to_string()),
            (None, version) => version,
        };
        let (brand, model) = make_model
            .as_deref()
            .map(|t| infer_brand_model(t, &self.site.brands))
            .unwrap_or_default();

        // Registration dates are shown as MM/YYYY
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
            ..Default::default()
        };

        for item in document.select(&self.param_item) {
            if let (Some(label), Some(value)) = (
                select_text(item, &self.param_label),
                select_text(item, &self.param_value),
            ) {
                detail.features.insert(label, value);
            }
        }

        if let Some(vendor) = document.select(&self.vendor).next() {
            detail.seller_type = select_text(vendor, &self.vendor_type);
            detail.seller_name = select_text(vendor, &self.vendor_name);
            detail.seller_phone = select_text(vendor, &self.vendor_phone);
        }

        Ok(detail)
    }

    fn native_id(&self, url: &str) -> Option<String> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.id_pattern
            .captures(path.trim_end_matches('/'))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn uses_browser(&self) -> bool {
        self.site.use_browser
    }

    fn consent_selector(&self) -> Option<&str> {
        Some("#onetrust-accept-btn-handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::{parse_detail_page, parse_search_page};

    fn scraper() -> AutoScout24 {
        let site = SiteConfig::builtin("autoscout24").unwrap();
        AutoScout24::new(&site, vec![]).unwrap()
    }

    #[test]
    fn test_build_search_url_encodes_every_make() {
        let filters = SearchFilters {
            brands: vec!["Peugeot".into(), "Renault".into()],
            max_price: Some(20000),
            min_year: Some(2016),
            fuel_types: vec!["Diesel".into()],
            transmissions: vec!["Automatique".into()],
            ..Default::default()
        };

        assert_eq!(
            scraper().build_search_url(&filters, 3),
            "https://www.autoscout24.fr/lst?page=3&mmvmk0=49&mmvmk0=54&priceto=20000&fregfrom=2016\
             &fuel=D&gear=A&sort=age&desc=1&atype=C"
        );
    }

    #[test]
    fn test_unknown_make_searches_all() {
        let filters = SearchFilters {
            brands: vec!["Lada".into()],
            ..Default::default()
        };
        assert!(scraper()
            .build_search_url(&filters, 1)
            .starts_with("https://www.autoscout24.fr/lst?page=1&mmvmk0=0&sort=age"));

        let mixed = SearchFilters {
            brands: vec!["Lada".into(), "Dacia".into()],
            ..Default::default()
        };
        let url = scraper().build_search_url(&mixed, 1);
        assert!(url.starts_with("https://www.autoscout24.fr/lst?page=1&mmvmk0=121&sort=age"));
        assert_eq!(url.matches("mmvmk0=").count(), 1);
    }

    #[test]
    fn test_parse_card_joins_make_model_and_version() {
        let html = r#"
<div class="cldt-summary-full-item">
  <a class="cldt-summary-full-item-main" href="/offres/volkswagen-golf-tsi-essence-gris-1234567"></a>
  <h2 class="cldt-summary-makemodel">Volkswagen Golf</h2>
  <h2 class="cldt-summary-version">1.5 TSI Life</h2>
  <span class="cldt-price">€ 21.990,-</span>
  <div class="cldt-summary-vehicle-data">
    <span>45.000 km</span><span>03/2020</span><span>Essence</span><span>Manuelle</span>
  </div>
  <span class="cldt-summary-seller-contact-address">FR-69003 Lyon</span>
</div>
<a class="next-page" href="?page=2">Suivant</a>"#;

        let s = scraper();
        let page = parse_search_page(&s, 1, html);
        assert!(page.has_next);
        let card = &page.cards[0];
        assert_eq!(card.title.as_deref(), Some("Volkswagen Golf 1.5 TSI Life"));
        assert_eq!(card.brand.as_deref(), Some("Volkswagen"));
        assert_eq!(card.model.as_deref(), Some("Golf"));
        assert_eq!(card.price, Some(21990.0));
        assert_eq!(card.mileage, Some(45000.0));
        assert_eq!(card.year, Some(2020));
        assert_eq!(s.derive_id(&card.url), "autoscout24_1234567");
    }

    #[test]
    fn test_parse_detail_params() {
        let html = r#"
<div class="cldt-detail">
  <div class="gallery-picture"><img src="https://prod.pictures.autoscout24.net/a.jpg"></div>
  <div class="cldt-detail-description">Première main</div>
  <div class="cldt-detail-section">
    <div class="cldt-detail-params-item">
      <span class="cldt-detail-params-item-label">Carburant</span>
      <span class="cldt-detail-params-item-value">Essence</span>
    </div>
  </div>
  <div class="cldt-vendor-contact-box">
    <span class="cldt-vendor-type">Professionnel</span>
    <span class="cldt-vendor-name">Garage du Rhône</span>
  </div>
</div>"#;
        let url = "https://www.autoscout24.fr/offres/x-1";
        let detail = parse_detail_page(&scraper(), url, html).unwrap();

        assert_eq!(detail.images.len(), 1);
        assert_eq!(detail.description.as_deref(), Some("Première main"));
        assert_eq!(detail.fuel_type.as_deref(), Some("Essence"));
        assert_eq!(detail.seller_type.as_deref(), Some("Professionnel"));
        assert_eq!(detail.seller_phone, None);
    }

    #[test]
    fn test_missing_detail_root() {
        let err = parse_detail_page(&scraper(), "https://x/y-1", "<html></html>").unwrap_err();
        assert!(matches!(err, ParseError::MissingField { field: "detail", .. }));
    }
}
