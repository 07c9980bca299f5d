//! La Centrale (lacentrale.fr)

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

pub struct LaCentrale {
    site: SiteBase,
    id_pattern: Regex,
    link: Selector,
    title: Selector,
    price: Selector,
    specs: Selector,
    location: Selector,
    next_page: Selector,
    detail_title: Selector,
    description: Selector,
    images: Selector,
    options: Selector,
    option_label: Selector,
    option_value: Selector,
    seller_type: Selector,
    seller_name: Selector,
    seller_phone: Selector,
}

impl LaCentrale {
    pub fn new(site: &SiteConfig, brands: Vec<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            site: SiteBase::new(site, ".searchCard", ".adview", brands)?,
            id_pattern: compile_regex(r"annonce-(\d+)\.html")?,
            link: compile_selector(".searchCard__link")?,
            title: compile_selector(".searchCard__title")?,
            price: compile_selector(".searchCard__price")?,
            specs: compile_selector(".searchCard__characteristic")?,
            location: compile_selector(".searchCard__dptCont")?,
            next_page: compile_selector(".pagination__next:not(.pagination__next--disabled)")?,
            detail_title: compile_selector(".adview_header__title")?,
            description: compile_selector(".adview_description__content")?,
            images: compile_selector(".carousel-item img")?,
            options: compile_selector(".optionsList li")?,
            option_label: compile_selector(".optionsList_label")?,
            option_value: compile_selector(".optionsList_value")?,
            seller_type: compile_selector(".sellerInfos_type")?,
            seller_name: compile_selector(".sellerInfos_name")?,
            seller_phone: compile_selector(".sellerInfos_phone")?,
        })
    }
}

fn fuel_code(fuel: &str) -> Option<&'static str> {
    match fuel.to_lowercase().as_str() {
        "essence" => Some("ess"),
        "diesel" => Some("dies"),
        "hybride" => Some("hyb"),
        "electrique" | "électrique" => Some("elec"),
        _ => None,
    }
}

fn gearbox_code(transmission: &str) -> Option<&'static str> {
    match transmission.to_lowercase().as_str() {
        "manuelle" => Some("MANUAL"),
        "automatique" => Some("AUTO"),
        _ => None,
    }
}

impl SiteScraper for LaCentrale {
    fn source(&self) -> &str {
        "lacentrale"
    }

    fn build_search_url(&self, filters: &SearchFilters, page: u32) -> String {
        let mut pairs = vec![("page", page.to_string())];

        // makesModelsCommercialNames takes BRAND or BRAND:MODEL
        for brand in &filters.brands {
            if filters.models.is_empty() {
                pairs.push(("makesModelsCommercialNames", brand.clone()));
            } else {
                for model in &filters.models {
                    pairs.push(("makesModelsCommercialNames", format!("{}:{}", brand, model)));
                }
            }
        }
        if let Some(price) = filters.max_price {
            pairs.push(("priceMax", price.to_string()));
        }
        if let Some(year) = filters.min_year {
            pairs.push(("yearMin", year.to_string()));
        }
        if let Some(year) = filters.max_year {
            pairs.push(("yearMax", year.to_string()));
        }
        if let Some(km) = filters.max_km {
            pairs.push(("mileageMax", km.to_string()));
        }

        let fuels: Vec<&str> = filters.fuel_types.iter().filter_map(|f| fuel_code(f)).collect();
        if !fuels.is_empty() {
            pairs.push(("energies", fuels.join(",")));
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
        let mut detail = ListingDetail::default();

        if let Some(title) = select_text(root, &self.detail_title) {
            let (brand, model) = infer_brand_model(&title, &self.site.brands);
            match (brand, model) {
                (Some(brand), model) => {
                    detail.brand = Some(brand);
                    detail.model = model;
                }
                (None, _) => {
                    if let Some((brand, model)) = title.split_once(' ') {
                        detail.brand = Some(brand.to_string());
                        detail.model = Some(model.to_string());
                    }
                }
            }
        }

        detail.description = first_text(document, &self.description);
        detail.images = self.site.image_urls(document, &self.images);

        for option in document.select(&self.options) {
            let label = select_text(option, &self.option_label);
            let value = select_text(option, &self.option_value);
            if let (Some(label), Some(value)) = (label, value) {
                detail.features.insert(label, value);
            }
        }

        detail.seller_type = first_text(document, &self.seller_type);
        detail.seller_name = first_text(document, &self.seller_name);
        detail.seller_phone = first_text(document, &self.seller_phone);

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::{parse_detail_page, parse_search_page};

    fn scraper() -> LaCentrale {
        let site = SiteConfig::builtin("lacentrale").unwrap();
        LaCentrale::new(&site, vec![]).unwrap()
    }

    const SEARCH_PAGE: &str = r#"
<html><body>
  <div class="searchCard">
    <a class="searchCard__link" href="/auto-occasion-annonce-69103841.html">voir</a>
    <h3 class="searchCard__title">PEUGEOT 308 1.5 BlueHDi 130ch</h3>
    <span class="searchCard__price">15 990 €</span>
    <div class="searchCard__characteristic">2019</div>
    <div class="searchCard__characteristic">48 200 km</div>
    <div class="searchCard__characteristic">Diesel</div>
    <div class="searchCard__characteristic">Manuelle</div>
    <div class="searchCard__dptCont">Gironde (33)</div>
  </div>
  <nav><a class="pagination__next" href="?page=2">Suivant</a></nav>
</body></html>
"#;

    #[test]
    fn test_build_search_url() {
        let filters = SearchFilters {
            brands: vec!["Renault".into(), "Peugeot".into()],
            max_price: Some(30000),
            min_year: Some(2015),
            max_year: Some(2023),
            max_km: Some(120000),
            fuel_types: vec!["Diesel".into(), "Essence".into(), "Ethanol".into()],
            transmissions: vec!["Automatique".into()],
            ..Default::default()
        };

        let url = scraper().build_search_url(&filters, 2);
        assert_eq!(
            url,
            "https://www.lacentrale.fr/listing?page=2\
             &makesModelsCommercialNames=Renault&makesModelsCommercialNames=Peugeot\
             &priceMax=30000&yearMin=2015&yearMax=2023&mileageMax=120000\
             &energies=dies%2Cess&gearbox=AUTO"
        );
    }

    #[test]
    fn test_build_search_url_is_pure() {
        let filters = SearchFilters {
            brands: vec!["Renault".into()],
            models: vec!["Clio".into()],
            ..Default::default()
        };
        let s = scraper();
        assert_eq!(s.build_search_url(&filters, 1), s.build_search_url(&filters, 1));
        assert!(s
            .build_search_url(&filters, 1)
            .ends_with("makesModelsCommercialNames=Renault%3AClio"));
    }

    #[test]
    fn test_parse_card() {
        let s = scraper();
        let page = parse_search_page(&s, 1, SEARCH_PAGE);

        assert!(page.has_next);
        assert_eq!(page.cards.len(), 1);
        let card = &page.cards[0];
        assert_eq!(
            card.url,
            "https://www.lacentrale.fr/auto-occasion-annonce-69103841.html"
        );
        assert_eq!(card.brand.as_deref(), Some("Peugeot"));
        assert_eq!(card.model.as_deref(), Some("308 1.5 BlueHDi 130ch"));
        assert_eq!(card.price, Some(15990.0));
        assert_eq!(card.year, Some(2019));
        assert_eq!(card.mileage, Some(48200.0));
        assert_eq!(card.fuel_type.as_deref(), Some("Diesel"));
        assert_eq!(card.transmission.as_deref(), Some("Manuelle"));
        assert_eq!(card.location.as_deref(), Some("Gironde (33)"));
        assert_eq!(s.derive_id(&card.url), "lacentrale_69103841");
    }

    #[test]
    fn test_disabled_next_button() {
        let html = r#"<a class="pagination__next pagination__next--disabled">Suivant</a>"#;
        let page = parse_search_page(&scraper(), 3, html);
        assert!(!page.has_next);
        assert!(page.cards.is_empty());
    }

    #[test]
    fn test_parse_detail() {
        let html = r#"
<div class="adview">
  <h1 class="adview_header__title">Peugeot 308 SW</h1>
  <div class="adview_description__content">  Très bon état,
     carnet d'entretien à jour </div>
  <div class="carousel-item"><img src="https://img.lacentrale.fr/1.jpg"></div>
  <div class="carousel-item"><img data-src="https://img.lacentrale.fr/2.webp"></div>
  <ul class="optionsList">
    <li><span class="optionsList_label">Kilométrage</span><span class="optionsList_value">47 900 km</span></li>
    <li><span class="optionsList_label">Couleur</span><span class="optionsList_value">Blanc</span></li>
  </ul>
  <div class="sellerInfos_type">Professionnel</div>
  <div class="sellerInfos_name">Garage du Centre</div>
</div>"#;
        let url = "https://www.lacentrale.fr/auto-occasion-annonce-1.html";
        let detail = parse_detail_page(&scraper(), url, html).unwrap();

        assert_eq!(detail.brand.as_deref(), Some("Peugeot"));
        assert_eq!(detail.model.as_deref(), Some("308 SW"));
        assert_eq!(
            detail.description.as_deref(),
            Some("Très bon état, carnet d'entretien à jour")
        );
        assert_eq!(detail.images.len(), 2);
        assert_eq!(detail.features.get("Couleur").map(String::as_str), Some("Blanc"));
        // Feature key overrides the card mileage
        assert_eq!(detail.mileage, Some(47900.0));
        assert_eq!(detail.seller_type.as_deref(), Some("Professionnel"));
        assert_eq!(detail.seller_phone, None);
    }

    #[test]
    fn test_detail_without_root_is_parse_error() {
        let result = parse_detail_page(&scraper(), "https://x/annonce-1.html", "<p>Oops</p>");
        assert!(matches!(result, Err(ParseError::MissingField { field: "detail", .. })));
    }

    #[test]
    fn test_native_id_fallback() {
        let s = scraper();
        assert_eq!(
            s.native_id("https://www.lacentrale.fr/auto-occasion-annonce-42.html"),
            Some("42".to_string())
        );
        let id = s.derive_id("https://www.lacentrale.fr/fiche-sans-id");
        assert!(id.starts_with("lacentrale_"));
        assert_eq!(id, s.derive_id("https://www.lacentrale.fr/fiche-sans-id"));
    }
}
