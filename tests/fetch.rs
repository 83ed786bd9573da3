use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use logomatch::{fetcher::Fetcher, stats::FetchCounters, types::FetchFailure};
use reqwest::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

mod common;
use common::*;

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[test]
fn retryable_failure_is_attempted_retries_plus_one_times() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let options = fast_options().max_retries(2usize).build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let res = fetcher.fetch_image(&url(&server, "/logo.png")).await;
        assert_eq!(res.err(), Some(FetchFailure::HttpStatus(503)));

        let s = fetcher.counters().snapshot();
        assert_eq!(s.requests, 3);
        assert_eq!(s.retries, 2);
        assert_eq!(s.image_fetches, 1);
        assert_eq!(s.image_failures.get("http_server_error"), Some(&1));
    });
}

#[test]
fn not_found_is_never_retried() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let options = fast_options().max_retries(3usize).build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let res = fetcher.fetch_image(&url(&server, "/logo.png")).await;
        assert_eq!(res.err(), Some(FetchFailure::HttpStatus(404)));
        assert_eq!(fetcher.counters().snapshot().retries, 0);
    });
}

#[test]
fn slow_response_times_out_and_is_retried() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let options = fast_options()
            .timeout(Duration::from_millis(200))
            .max_retries(1usize)
            .build()
            .unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let started = Instant::now();
        let res = fetcher.fetch_image(&url(&server, "/logo.png")).await;
        assert_eq!(res.err(), Some(FetchFailure::Timeout));
        assert!(started.elapsed() < Duration::from_secs(3));

        let s = fetcher.counters().snapshot();
        assert_eq!(s.requests, 2);
        assert_eq!(s.image_failures.get("timeout"), Some(&1));
    });
}

#[test]
fn redirect_loop_is_not_retried() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/logo.png"))
            .mount(&server)
            .await;

        let options = fast_options().max_retries(2usize).build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let res = fetcher.fetch_image(&url(&server, "/logo.png")).await;
        assert_eq!(res.err(), Some(FetchFailure::TooManyRedirects));

        // the chain is followed once, never again on retry
        assert!(server.received_requests().await.unwrap().len() <= 6);
        let s = fetcher.counters().snapshot();
        assert_eq!(s.requests, 1);
        assert_eq!(s.retries, 0);
        assert_eq!(s.image_failures.get("too_many_redirects"), Some(&1));
    });
}

#[test]
fn html_is_not_an_image() {
    aw!(async {
        let server = MockServer::start().await;
        serve_html(&server, "/logo.png", "<html><body>moved</body></html>").await;

        let options = fast_options().build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let res = fetcher.fetch_image(&url(&server, "/logo.png")).await;
        assert_eq!(
            res.err(),
            Some(FetchFailure::InvalidContentType(
                "text/html; charset=utf-8".into()
            ))
        );
        assert_eq!(fetcher.counters().snapshot().retries, 0);
    });
}

#[test]
fn image_bytes_are_accepted_whatever_the_content_type() {
    aw!(async {
        let server = MockServer::start().await;
        let png = logo_png(32, false);
        serve_image(&server, "/favicon.ico", png.clone(), "application/octet-stream").await;

        let options = fast_options().build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let res = fetcher
            .fetch_image(&url(&server, "/favicon.ico"))
            .await
            .unwrap();
        assert_eq!(res.bytes, png);
        assert_eq!(res.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(fetcher.counters().snapshot().image_successes, 1);
    });
}

#[test]
fn pages_report_where_redirects_ended() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/home/"),
            )
            .mount(&server)
            .await;
        serve_html(&server, "/home/", "<html><head><title>home</title></head></html>").await;

        let options = fast_options().build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let (html, final_url) = fetcher.fetch_page(&url(&server, "/")).await.unwrap();
        assert!(html.contains("<title>home</title>"));
        assert_eq!(final_url.path(), "/home/");
    });
}

#[test]
fn probes_need_an_image_content_type() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/logo.svg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        not_found_otherwise(&server).await;

        let options = fast_options().build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        assert!(fetcher.probe(&url(&server, "/logo.png")).await);
        assert!(!fetcher.probe(&url(&server, "/logo.svg")).await);
        assert!(!fetcher.probe(&url(&server, "/img/logo.png")).await);
        // probes are not image downloads
        assert_eq!(fetcher.counters().snapshot().image_fetches, 0);
    });
}

#[test]
fn in_flight_requests_are_capped() {
    aw!(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(logo_png(16, false))
                    .insert_header("content-type", "image/png")
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let options = fast_options().max_concurrent(2usize).build().unwrap();
        let fetcher = Fetcher::new(&options, Arc::new(FetchCounters::default())).unwrap();
        let urls: Vec<Url> = (0..6)
            .map(|i| url(&server, &format!("/logo-{}.png", i)))
            .collect();

        let started = Instant::now();
        let results = join_all(urls.iter().map(|u| fetcher.fetch_image(u))).await;
        // six requests two at a time take at least three rounds
        assert!(started.elapsed() >= Duration::from_millis(450));
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.in_flight(), 0);
    });
}
