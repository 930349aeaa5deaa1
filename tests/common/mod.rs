#![allow(dead_code)]

use std::io::Cursor;

use actix_web::web;
use assert_fs::TempDir;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use images_emulator::config::Config;
use images_emulator::AppState;

pub const ACCOUNT: &str = "acct-1";
pub const AUTH: (&str, &str) = ("Authorization", "Bearer test-token");

pub struct TestApp {
    pub state: web::Data<AppState>,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(temp_dir.path());
        config.base_url = "http://images.test".to_string();
        adjust(&mut config);

        TestApp {
            state: web::Data::new(AppState::in_memory(config)),
            temp_dir,
        }
    }

    pub fn v1(&self, rest: &str) -> String {
        format!("/accounts/{}/images/v1{}", ACCOUNT, rest)
    }

    pub fn v2(&self, rest: &str) -> String {
        format!("/accounts/{}/images/v2{}", ACCOUNT, rest)
    }
}

// Create a sample image for testing
pub fn create_test_image(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 160])));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .expect("Failed to create test image");
    buffer
}

/// One part of a `multipart/form-data` body
pub struct Part {
    name: String,
    filename: Option<String>,
    data: Vec<u8>,
}

impl Part {
    pub fn file(filename: &str, data: &[u8]) -> Self {
        Part {
            name: "file".to_string(),
            filename: Some(filename.to_string()),
            data: data.to_vec(),
        }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Part {
            name: name.to_string(),
            filename: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

const BOUNDARY: &str = "integration-form-boundary";

/// Encodes `parts`, returning the `Content-Type` header and the body.
pub fn multipart_body(parts: &[Part]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{}\"\r\nContent-Type: application/octet-stream", filename));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}
