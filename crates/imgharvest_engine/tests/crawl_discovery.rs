mod support;

use std::time::Duration;

use imgharvest_engine::discovery::{CrawlDiscovery, CrawlSettings, Discovery};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use support::{FakeBrowser, FakePage, RecordingSink};

const SEED: &str = "https://gallery.example/";

fn fast_settings() -> CrawlSettings {
    CrawlSettings {
        scroll_passes: 1,
        scroll_pause: Duration::ZERO,
        ..CrawlSettings::default()
    }
}

fn site() -> FakeBrowser {
    FakeBrowser::site(vec![
        (
            SEED,
            FakePage::new()
                .img(&[("src", "/img/zebra.jpg")])
                .img(&[("data-src", "https://cdn.gallery.example/lazy/apple.png")])
                .img(&[("srcset", "/s/small.jpg 1x, /s/large.jpg 2x")])
                .img(&[("src", "ftp://gallery.example/skip.jpg")])
                .link("/animals")
                .link("/login")
                .link("https://elsewhere.example/page")
                .link("#top"),
        ),
        (
            "https://gallery.example/animals",
            FakePage::new()
                .img(&[("src", "/img/zebra.jpg")])
                .img(&[("data-original", "/img/yak.webp")])
                .link("/")
                .link("/broken"),
        ),
    ])
}

async fn crawl(browser: &FakeBrowser, seed: &str, depth: u32) -> (RecordingSink, Vec<String>) {
    let settings = fast_settings();
    let mut sink = RecordingSink::new();
    let report = CrawlDiscovery::new(browser, &settings, seed, depth)
        .discover(&mut sink, &CancellationToken::new())
        .await
        .expect("crawl ok");
    (sink, report.errors)
}

#[tokio::test]
async fn depth_zero_visits_only_the_seed() {
    let browser = site();
    let (sink, errors) = crawl(&browser, "gallery.example", 0).await;

    assert_eq!(browser.visits(), vec![SEED.to_string()]);
    assert!(errors.is_empty());
    assert_eq!(
        sink.urls(),
        vec![
            "https://cdn.gallery.example/lazy/apple.png".to_string(),
            "https://gallery.example/img/zebra.jpg".to_string(),
            "https://gallery.example/s/large.jpg".to_string(),
        ]
    );
    assert!(sink.accepted.iter().all(|c| c.referrer_page == SEED));
}

#[tokio::test]
async fn follows_same_host_links_breadth_first() {
    let browser = site();
    let (sink, errors) = crawl(&browser, SEED, 1).await;

    assert_eq!(
        browser.visits(),
        vec![SEED.to_string(), "https://gallery.example/animals".to_string()]
    );
    assert!(errors.is_empty());

    let urls = sink.urls();
    assert_eq!(urls.len(), 4);
    assert!(urls.windows(2).all(|pair| pair[0] <= pair[1]));

    let zebra = sink
        .accepted
        .iter()
        .find(|c| c.url.ends_with("zebra.jpg"))
        .unwrap();
    assert_eq!(zebra.referrer_page, SEED);
    assert_eq!(zebra.discovered_at_depth, 0);

    let yak = sink
        .accepted
        .iter()
        .find(|c| c.url.ends_with("yak.webp"))
        .unwrap();
    assert_eq!(yak.discovered_at_depth, 1);
    assert_eq!(yak.suggested_name.as_deref(), Some("yak.webp"));
}

#[tokio::test]
async fn page_failures_are_recorded_and_skipped() {
    let browser = site();
    let (sink, errors) = crawl(&browser, SEED, 2).await;

    assert_eq!(
        errors,
        vec!["Crawl error https://gallery.example/broken: net::ERR_NAME_NOT_RESOLVED".to_string()]
    );
    assert_eq!(sink.accepted.len(), 4);
    assert_eq!(
        browser.visits(),
        vec![SEED.to_string(), "https://gallery.example/animals".to_string()]
    );
}

#[tokio::test]
async fn cancelled_crawl_visits_nothing() {
    let browser = site();
    let settings = fast_settings();
    let mut sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    CrawlDiscovery::new(&browser, &settings, SEED, 3)
        .discover(&mut sink, &cancel)
        .await
        .unwrap();

    assert!(browser.visits().is_empty());
    assert!(sink.accepted.is_empty());
}

async fn scroll_seed(browser: &FakeBrowser, passes: u32) {
    let settings = CrawlSettings {
        scroll_passes: passes,
        ..fast_settings()
    };
    let mut sink = RecordingSink::new();
    CrawlDiscovery::new(browser, &settings, SEED, 0)
        .discover(&mut sink, &CancellationToken::new())
        .await
        .expect("crawl ok");
}

#[tokio::test]
async fn scrolling_stops_once_the_page_height_settles() {
    let browser = site();
    scroll_seed(&browser, 3).await;
    assert_eq!(browser.bottom_scrolls(), 1);
}

#[tokio::test]
async fn growing_pages_are_scrolled_until_stable_or_out_of_passes() {
    let growing = site().with_heights(&[1000, 1500, 2000, 2000]);
    scroll_seed(&growing, 5).await;
    assert_eq!(growing.bottom_scrolls(), 3);

    let endless = site().with_heights(&[1000, 2000, 3000, 4000, 5000]);
    scroll_seed(&endless, 3).await;
    assert_eq!(endless.bottom_scrolls(), 3);
}
