//! Text extraction helpers shared by every site scraper
//!
//! Marketplace markup is noisy: prices come as "25 000 €", mileages as
//! "72.000 km" or "30k km", and spec lists mix years, mileage, fuel and
//! gearbox in one unlabeled list. The helpers here normalize those.

use crate::model::{ListingDetail, MIN_YEAR};
use crate::ConfigError;
use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{ElementRef, Selector};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// Brands recognized in free-text titles, multi-word names first
pub const KNOWN_BRANDS: &[&str] = &[
    "Mercedes-Benz",
    "Alfa Romeo",
    "Land Rover",
    "Aston Martin",
    "Renault",
    "Peugeot",
    "Citroen",
    "Citroën",
    "Volkswagen",
    "Audi",
    "BMW",
    "Mercedes",
    "Ford",
    "Toyota",
    "Nissan",
    "Opel",
    "Fiat",
    "Seat",
    "Skoda",
    "Hyundai",
    "Kia",
    "Dacia",
    "Volvo",
    "Mini",
    "Mazda",
    "Honda",
    "Suzuki",
    "Tesla",
    "Porsche",
    "Jeep",
    "Mitsubishi",
    "Lexus",
    "Jaguar",
    "Cupra",
];

const FUEL_WORDS: &[&str] = &[
    "essence",
    "diesel",
    "hybride",
    "hybrid",
    "électrique",
    "electrique",
    "electric",
    "gpl",
    "lpg",
    "ethanol",
    "éthanol",
    "hydrogène",
    "gnv",
];

const TRANSMISSION_WORDS: &[&str] = &[
    "manuelle",
    "automatique",
    "manual",
    "automatic",
    "séquentielle",
    "auto",
];

/// Collapses runs of whitespace (including non-breaking spaces) into one space
pub fn clean_text(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}' || c == '\u{202f}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cleaned text content of an element, `None` when blank
pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = clean_text(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Cleaned text of the first match of `selector` under `element`
pub fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).find_map(element_text)
}

/// Compiles a CSS selector, mapping failures to a configuration error
pub fn compile_selector(css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", css, e)))
}

/// Compiles a regular expression, mapping failures to a configuration error
pub fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidSelector(format!("'{}': {}", pattern, e)))
}

/// Resolves a possibly-relative link against the site base URL
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
        return None;
    }
    base.join(href).ok().map(String::from)
}

fn is_group_space(c: char) -> bool {
    c == ' ' || c == '\u{a0}' || c == '\u{202f}'
}

fn digit_run(chars: &[char], from: usize) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count()
}

/// Parses the first number in a free-text string
///
/// - spaces, `.` and `,` followed by exactly three digits are thousands separators
/// - otherwise the first `.` or `,` followed by digits is the decimal point
/// - a `k` directly after the number (and not starting a word such as "km")
///   multiplies by 1000
///
/// Returns `None` when the text holds no digit.
///
/// ```
/// use car_harvest::sites::extract::extract_number;
///
/// assert_eq!(extract_number("25 000 €"), Some(25000.0));
/// assert_eq!(extract_number("30k km"), Some(30000.0));
/// assert_eq!(extract_number("Prix sur demande"), None);
/// ```
pub fn extract_number(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;

    let mut number = String::new();
    let mut decimal_seen = false;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            number.push(c);
            i += 1;
            continue;
        }

        let run = digit_run(&chars, i + 1);
        if !decimal_seen && run == 3 && (is_group_space(c) || c == '.' || c == ',') {
            i += 1;
            continue;
        }
        if !decimal_seen && run > 0 && (c == '.' || c == ',') {
            decimal_seen = true;
            number.push('.');
            i += 1;
            continue;
        }
        break;
    }

    let mut value: f64 = number.parse().ok()?;

    let thousands_suffix = matches!(chars.get(i), Some('k') | Some('K'))
        && !chars.get(i + 1).map_or(false, |c| c.is_alphabetic());
    if thousands_suffix {
        value *= 1000.0;
    }

    Some(value)
}

/// Extracts a plausible model year from text such as "2018" or "03/2018"
///
/// Only standalone four-digit runs within `[1900, current_year + 1]` qualify.
pub fn extract_year(text: &str) -> Option<i32> {
    let max_year = Utc::now().year() + 1;
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<i32>().ok())
        .find(|year| (MIN_YEAR..=max_year).contains(year))
}

fn contains_word(haystack: &str, words: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| words.contains(&token))
}

/// Coarse fields recovered from an unlabeled spec list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecFields {
    pub year: Option<i32>,
    pub mileage: Option<f64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
}

/// Classifies spec strings into year, mileage, fuel and transmission
///
/// Each item is tested in that order and claimed by the first category it
/// matches; a category that is already filled is never overwritten.
pub fn classify_specs<S: AsRef<str>>(specs: &[S]) -> SpecFields {
    let mut fields = SpecFields::default();

    for spec in specs {
        let text = clean_text(spec.as_ref());
        if text.is_empty() {
            continue;
        }
        if let Some(year) = extract_year(&text) {
            if fields.year.is_none() {
                fields.year = Some(year);
            }
            continue;
        }

        if text.to_lowercase().contains("km") {
            if fields.mileage.is_none() {
                fields.mileage = extract_number(&text);
            }
            continue;
        }

        if contains_word(&text, FUEL_WORDS) {
            fields.fuel_type.get_or_insert(text);
            continue;
        }

        if contains_word(&text, TRANSMISSION_WORDS) {
            fields.transmission.get_or_insert(text);
        }
    }

    fields
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let needle = needle.to_lowercase();
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        haystack
            .get(i..)
            .map_or(false, |rest| rest.to_lowercase().starts_with(&needle))
    })
}

/// Splits a title into `(brand, model)`
///
/// The vocabulary is the configured brands followed by [`KNOWN_BRANDS`]. The
/// first entry found as a case-insensitive substring of the title is the brand;
/// the trimmed rest of the title after it is the model.
pub fn infer_brand_model(title: &str, configured: &[String]) -> (Option<String>, Option<String>) {
    let vocabulary = configured
        .iter()
        .map(String::as_str)
        .chain(KNOWN_BRANDS.iter().copied());

    for brand in vocabulary {
        let Some(index) = find_ignore_case(title, brand) else {
            continue;
        };
        // Byte length may differ after case folding; walk chars instead
        let skip = brand.chars().count();
        let rest: String = title[index..].chars().skip(skip).collect();
        let rest = clean_text(rest.trim_start_matches(|c: char| !c.is_alphanumeric()));
        let model = (!rest.is_empty()).then_some(rest);
        return (Some(brand.to_string()), model);
    }
    (None, None)
}

/// Builds the deterministic listing id
///
/// `<source>_<native id>` when the site pattern yields one, otherwise
/// `<source>_<first 16 hex chars of sha256(url)>`.
pub fn derive_listing_id(source: &str, url: &str, native: Option<&str>) -> String {
    match native.map(str::trim).filter(|n| !n.is_empty()) {
        Some(native) => format!("{}_{}", source, native),
        None => {
            let digest = Sha256::digest(url.trim().as_bytes());
            format!("{}_{}", source, &hex::encode(digest)[..16])
        }
    }
}

fn normalize_key(key: &str) -> String {
    clean_text(key)
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
        .replace('î', "i")
        .replace(['é', 'è'], "e")
}

/// Fills the coarse detail fields from labeled feature pairs
///
/// Recognized keys: Marque, Modèle, Année / Année-modèle / Première
/// immatriculation, Kilométrage, Carburant / Énergie, Boîte de vitesse(s).
pub fn apply_feature_overrides(detail: &mut ListingDetail) {
    let features: &BTreeMap<String, String> = &detail.features;
    let mut brand = None;
    let mut model = None;
    let mut year = None;
    let mut mileage = None;
    let mut fuel = None;
    let mut transmission = None;

    for (key, value) in features {
        let value = clean_text(value);
        if value.is_empty() {
            continue;
        }
        match normalize_key(key).as_str() {
            "marque" => brand = Some(value),
            "modele" => model = Some(value),
            "annee" | "annee-modele" | "annee modele" | "premiere immatriculation"
            | "mise en circulation" => year = year.or_else(|| extract_year(&value)),
            "kilometrage" => mileage = extract_number(&value),
            "carburant" | "energie" => fuel = Some(value),
            "boite de vitesse" | "boite de vitesses" | "boite" | "transmission" => {
                transmission = Some(value)
            }
            _ => {}
        }
    }

    detail.brand = brand.or(detail.brand.take());
    detail.model = model.or(detail.model.take());
    detail.year = year.or(detail.year);
    detail.mileage = mileage.or(detail.mileage);
    detail.fuel_type = fuel.or(detail.fuel_type.take());
    detail.transmission = transmission.or(detail.transmission.take());
}

/// Splits a "key: value" spec line
pub fn split_key_value(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = clean_text(key);
    let value = clean_text(value);
    (!key.is_empty() && !value.is_empty()).then_some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Renault \n\t Clio\u{a0}IV  "), "Renault Clio IV");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn test_extract_number_prices() {
        assert_eq!(extract_number("25 000 €"), Some(25000.0));
        assert_eq!(extract_number("25\u{a0}000\u{a0}€"), Some(25000.0));
        assert_eq!(extract_number("€ 12.490,-"), Some(12490.0));
        assert_eq!(extract_number("1 234 567"), Some(1234567.0));
        assert_eq!(extract_number("Prix sur demande"), None);
        assert_eq!(extract_number(""), None);
    }

    #[test]
    fn test_extract_number_mileage() {
        assert_eq!(extract_number("30k km"), Some(30000.0));
        assert_eq!(extract_number("72 000 km"), Some(72000.0));
        assert_eq!(extract_number("150,000 km"), Some(150000.0));
        assert_eq!(extract_number("15 km"), Some(15.0));
    }

    #[test]
    fn test_extract_number_decimals() {
        assert_eq!(extract_number("1,6 L"), Some(1.6));
        assert_eq!(extract_number("3,000.50"), Some(3000.5));
        assert_eq!(extract_number("Consommation 4.5 l/100"), Some(4.5));
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year("03/2018"), Some(2018));
        assert_eq!(extract_year("Année 1850"), None);
        assert_eq!(extract_year("12345"), None);
    }

    #[test]
    fn test_classify_specs_first_match_wins() {
        let specs = [
            "2018",
            "72 000 km",
            "Diesel",
            "Manuelle",
            "2020",
            "10 km",
            "Essence",
        ];
        let fields = classify_specs(&specs);

        assert_eq!(fields.year, Some(2018));
        assert_eq!(fields.mileage, Some(72000.0));
        assert_eq!(fields.fuel_type.as_deref(), Some("Diesel"));
        assert_eq!(fields.transmission.as_deref(), Some("Manuelle"));
    }

    #[test]
    fn test_classify_specs_year_rule_comes_before_distance() {
        let fields = classify_specs(&["2019 km", "8 500 km", "Boîte automatique"]);
        assert_eq!(fields.year, Some(2019));
        assert_eq!(fields.mileage, Some(8500.0));
        assert_eq!(fields.transmission.as_deref(), Some("Boîte automatique"));

        // Out of the plausible year range, so a distance
        let fields = classify_specs(&["5000 km"]);
        assert_eq!(fields.year, None);
        assert_eq!(fields.mileage, Some(5000.0));
    }

    #[test]
    fn test_infer_brand_model() {
        assert_eq!(
            infer_brand_model("Peugeot 308 1.6 BlueHDi", &[]),
            (Some("Peugeot".to_string()), Some("308 1.6 BlueHDi".to_string()))
        );
        assert_eq!(
            infer_brand_model("MERCEDES-BENZ Classe A", &[]),
            (Some("Mercedes-Benz".to_string()), Some("Classe A".to_string()))
        );
        assert_eq!(
            infer_brand_model("Superbe citadine renault", &[]),
            (Some("Renault".to_string()), None)
        );
        assert_eq!(infer_brand_model("Véhicule inconnu", &[]), (None, None));
    }

    #[test]
    fn test_configured_brands_take_precedence() {
        let configured = vec!["Lynk & Co".to_string()];
        assert_eq!(
            infer_brand_model("LYNK & CO 01 hybride", &configured),
            (Some("Lynk & Co".to_string()), Some("01 hybride".to_string()))
        );
    }

    #[test]
    fn test_listing_id_is_stable() {
        let url = "https://www.leparking.fr/voiture-occasion/renault-clio.html";
        let a = derive_listing_id("leparking", url, None);
        let b = derive_listing_id("leparking", url, None);
        assert_eq!(a, b);
        assert!(a.starts_with("leparking_"));
        assert_eq!(a.len(), "leparking_".len() + 16);

        assert_ne!(a, derive_listing_id("leparking", "https://other", None));
        assert_eq!(
            derive_listing_id("lacentrale", url, Some("123")),
            "lacentrale_123"
        );
        assert_eq!(
            derive_listing_id("lacentrale", url, Some(" ")),
            derive_listing_id("lacentrale", url, None)
        );
    }

    #[test]
    fn test_apply_feature_overrides() {
        let mut detail = ListingDetail::default();
        detail.features.insert("Année-modèle".into(), "2017".into());
        detail.features.insert("Kilométrage".into(), "88 500 km".into());
        detail.features.insert("Boîte de vitesse".into(), "Automatique".into());
        detail.features.insert("Marque".into(), "Renault".into());
        detail.features.insert("Couleur".into(), "Gris".into());
        detail.fuel_type = Some("Essence".into());

        apply_feature_overrides(&mut detail);

        assert_eq!(detail.year, Some(2017));
        assert_eq!(detail.mileage, Some(88500.0));
        assert_eq!(detail.transmission.as_deref(), Some("Automatique"));
        assert_eq!(detail.brand.as_deref(), Some("Renault"));
        assert_eq!(detail.fuel_type.as_deref(), Some("Essence"));
    }

    #[test]
    fn test_split_key_value() {
        assert_eq!(
            split_key_value("Année : 2019"),
            Some(("Année".to_string(), "2019".to_string()))
        );
        assert_eq!(split_key_value("Sans séparateur"), None);
        assert_eq!(split_key_value("Clé:"), None);
    }

    #[test]
    fn test_select_text_and_absolutize() {
        let html = Html::parse_fragment(
            r#"<div class="card"><a href="/annonce-1.html"> Voir  </a><span class="p">9 990 €</span></div>"#,
        );
        let root = html.root_element();
        let price = compile_selector(".p").unwrap();
        assert_eq!(select_text(root, &price).as_deref(), Some("9 990 €"));

        let base = Url::parse("https://www.lacentrale.fr").unwrap();
        assert_eq!(
            absolutize(&base, "/annonce-1.html").as_deref(),
            Some("https://www.lacentrale.fr/annonce-1.html")
        );
        assert_eq!(absolutize(&base, "javascript:void(0)"), None);
    }
}
