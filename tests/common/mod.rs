#![allow(dead_code)]

use std::{io::Cursor, time::Duration};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use logomatch::pipeline::{PipelineOptions, PipelineOptionsBuilder};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Half dark, half light square; `inverted` swaps the halves.
pub fn logo_png(size: u32, inverted: bool) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, _y| {
        if (x < size / 2) != inverted {
            Rgb([20, 40, 160])
        } else {
            Rgb([250, 250, 250])
        }
    }));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Mock servers are addressed as plain-http domains with a port.
pub fn domain_of(server: &MockServer) -> String {
    server.address().to_string()
}

/// Options tuned for local mock servers: http only, short timeout and delay.
pub fn fast_options() -> PipelineOptionsBuilder {
    let mut builder = PipelineOptions::default_builder();
    builder
        .schemes(vec!["http".to_string()])
        .timeout(Duration::from_secs(2))
        .retry_delay(Duration::from_millis(10))
        .max_retries(1usize);
    builder
}

pub async fn serve_image(server: &MockServer, at: &str, bytes: Vec<u8>, content_type: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(bytes)
                .insert_header("content-type", content_type),
        )
        .mount(server)
        .await;
}

pub async fn serve_html(server: &MockServer, at: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Answers 404 to anything no other mock claimed.
pub async fn not_found_otherwise(server: &MockServer) {
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(server)
        .await;
}
