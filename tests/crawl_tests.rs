//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for a marketplace and run the whole
//! cycle end-to-end: search pages, detail pages, images, store and jobs.

use car_harvest::config::{Config, SiteConfig, StorageBackend};
use car_harvest::model::{JobStatus, Termination};
use car_harvest::orchestrator::Orchestrator;
use car_harvest::storage::{self, open_store, shared, ListingQuery, SharedStore};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing lacentrale at the mock server
fn create_test_config(server: &MockServer, dir: &TempDir, backend: StorageBackend) -> Config {
    let mut config = Config::default();
    config.sources = vec!["lacentrale".to_string()];
    config.scraping.delay_between_requests = 0.0;
    config.scraping.retry_backoff_base = 0.0;
    config.scraping.max_retries = 3;
    config.scraping.timeout = 5;
    config.scraping.max_pages_per_source = 1;
    config.images.path = dir.path().join("images").display().to_string();
    config.images.timeout = 5;
    config.storage.backend = backend;
    config.storage.path = dir
        .path()
        .join(match backend {
            StorageBackend::Json => "cars.json",
            StorageBackend::Sqlite => "cars.db",
        })
        .display()
        .to_string();
    config.site_configs.insert(
        "lacentrale".to_string(),
        SiteConfig {
            base_url: server.uri(),
            search_url: format!("{}/listing", server.uri()),
            listing_selector: None,
            detail_selector: None,
            rate_limit: Some(0.0),
            use_browser: false,
        },
    );
    config
}

fn open(config: &Config) -> SharedStore {
    shared(open_store(&config.storage).expect("store opens"))
}

fn card(id: u32, title: &str, price: &str) -> String {
    format!(
        r#"<div class="searchCard">
             <a class="searchCard__link" href="/auto-occasion-annonce-{id}.html">voir</a>
             <h3 class="searchCard__title">{title}</h3>
             <span class="searchCard__price">{price}</span>
             <div class="searchCard__characteristic">2019</div>
             <div class="searchCard__characteristic">48 200 km</div>
             <div class="searchCard__characteristic">Diesel</div>
             <div class="searchCard__dptCont">Gironde (33)</div>
           </div>"#
    )
}

fn search_page(cards: &[String], next: bool) -> String {
    let next = if next {
        r#"<a class="pagination__next" href="?page=next">Suivant</a>"#
    } else {
        ""
    };
    format!("<html><body>{}{}</body></html>", cards.concat(), next)
}

fn detail_page(title: &str, description: &str, images: &[&str]) -> String {
    let images: String = images
        .iter()
        .map(|src| format!(r#"<div class="carousel-item"><img src="{}"></div>"#, src))
        .collect();
    format!(
        r#"<html><body><div class="adview">
             <h1 class="adview_header__title">{title}</h1>
             <div class="adview_description__content">{description}</div>
             {images}
             <ul class="optionsList">
               <li><span class="optionsList_label">Couleur</span><span class="optionsList_value">Gris</span></li>
             </ul>
             <div class="sellerInfos_type">Professionnel</div>
             <div class="sellerInfos_name">Garage du Centre</div>
           </div></body></html>"#
    )
}

fn png() -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([10u8, 20, 30])));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_search_page(server: &MockServer, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path("/listing"))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_single_source() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server, &dir, StorageBackend::Json);

    mount_search_page(
        &server,
        1,
        search_page(
            &[
                card(101, "PEUGEOT 308 1.5 BlueHDi", "15 990 €"),
                card(102, "RENAULT Clio V", "12 500 €"),
            ],
            true,
        ),
    )
    .await;
    mount_html(
        &server,
        "/auto-occasion-annonce-101.html",
        detail_page("Peugeot 308 GT Line", "Première main", &["/img/a.png", "/img/b.png"]),
    )
    .await;
    mount_html(&server, "/auto-occasion-annonce-102.html", detail_page("Renault Clio V", "Garantie 12 mois", &[])).await;
    Mock::given(method("GET"))
        .and(path("/img/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/b.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = open(&config);
    let orchestrator = Orchestrator::new(config, Some("hash".into()), store.clone()).unwrap();
    let report = orchestrator.run(None).await.unwrap();

    let job = report.jobs().next().expect("one job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.listings_count, 2);
    assert_eq!(job.images_count, 1);
    assert_eq!(job.counters.images_failed, 1);
    assert_eq!(job.termination, Some(Termination::PageCap));
    assert_eq!(job.config_hash.as_deref(), Some("hash"));

    let store = storage::lock(&store);
    assert_eq!(store.count().unwrap(), 2);

    let listing = store.get("lacentrale_101").unwrap().expect("stored");
    assert_eq!(listing.source, "lacentrale");
    assert_eq!(listing.url, format!("{}/auto-occasion-annonce-101.html", server.uri()));
    assert_eq!(listing.brand.as_deref(), Some("Peugeot"));
    assert_eq!(listing.model.as_deref(), Some("308 GT Line"));
    assert_eq!(listing.price, Some(15990.0));
    assert_eq!(listing.year, Some(2019));
    assert_eq!(listing.mileage, Some(48200));
    assert_eq!(listing.location.as_deref(), Some("Gironde (33)"));
    assert_eq!(listing.description.as_deref(), Some("Première main"));
    assert_eq!(listing.features.get("Couleur").map(String::as_str), Some("Gris"));
    assert_eq!(listing.seller_name.as_deref(), Some("Garage du Centre"));
    assert_eq!(listing.remote_images.len(), 2);
    assert_eq!(listing.local_images.len(), 1);
    assert!(listing.local_images[0].starts_with("lacentrale_101/"));
    assert!(listing.created_at.is_some());

    let jobs = store.jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_pagination_stops_without_next_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server, &dir, StorageBackend::Sqlite);
    config.scraping.max_pages_per_source = 10;
    config.images.download = false;

    mount_search_page(&server, 1, search_page(&[card(1, "RENAULT Megane", "9 000 €")], true)).await;
    mount_search_page(&server, 2, search_page(&[card(2, "RENAULT Scenic", "11 000 €")], false)).await;
    mount_html(&server, "/auto-occasion-annonce-1.html", detail_page("Renault Megane", "Bon état", &[])).await;
    mount_html(&server, "/auto-occasion-annonce-2.html", detail_page("Renault Scenic", "Bon état", &[])).await;

    let store = open(&config);
    let orchestrator = Orchestrator::new(config, None, store.clone()).unwrap();
    let report = orchestrator.run(Some("lacentrale")).await.unwrap();

    let job = report.jobs().next().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.termination, Some(Termination::NoNextPage));
    assert_eq!(job.counters.pages_fetched, 2);
    assert_eq!(job.listings_count, 2);

    let renaults = storage::lock(&store)
        .query(&ListingQuery {
            brand: Some("renault".into()),
            max_price: Some(10000.0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(renaults.len(), 1);
    assert_eq!(renaults[0].id, "lacentrale_1");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server, &dir, StorageBackend::Json);
    config.images.download = false;

    // Mounted first, so it answers the first two requests
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_search_page(&server, 1, search_page(&[card(7, "PEUGEOT 208", "8 000 €")], false)).await;
    mount_html(&server, "/auto-occasion-annonce-7.html", detail_page("Peugeot 208", "Révisée", &[])).await;

    let store = open(&config);
    let orchestrator = Orchestrator::new(config, None, store.clone()).unwrap();
    let report = orchestrator.run(None).await.unwrap();

    let job = report.jobs().next().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.pages_failed, 0);
    assert_eq!(job.listings_count, 1);
}

#[tokio::test]
async fn test_failed_detail_keeps_card_data() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server, &dir, StorageBackend::Json);
    config.images.download = false;
    config.scraping.max_retries = 1;

    mount_search_page(&server, 1, search_page(&[card(9, "PEUGEOT 2008", "19 000 €")], false)).await;
    Mock::given(method("GET"))
        .and(path("/auto-occasion-annonce-9.html"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = open(&config);
    let orchestrator = Orchestrator::new(config, None, store.clone()).unwrap();
    let report = orchestrator.run(None).await.unwrap();

    let job = report.jobs().next().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.details_failed, 1);

    let listing = storage::lock(&store).get("lacentrale_9").unwrap().unwrap();
    assert_eq!(listing.price, Some(19000.0));
    assert_eq!(listing.description, None);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server, &dir, StorageBackend::Sqlite);
    config.images.download = false;

    mount_search_page(&server, 1, search_page(&[card(5, "CITROEN C4", "14 000 €")], false)).await;
    mount_html(&server, "/auto-occasion-annonce-5.html", detail_page("Citroen C4", "Toit ouvrant", &[])).await;

    let store = open(&config);
    let orchestrator = Orchestrator::new(config, None, store.clone()).unwrap();

    orchestrator.run(None).await.unwrap();
    let first = storage::lock(&store).get("lacentrale_5").unwrap().unwrap();

    orchestrator.run(None).await.unwrap();
    let second = storage::lock(&store).get("lacentrale_5").unwrap().unwrap();

    let store = storage::lock(&store);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(first.created_at, second.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(store.jobs().unwrap().len(), 2);
}
