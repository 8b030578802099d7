//! Deterministic stand-in for a real decode/render backend.
//!
//! Documents are plain text; a form feed (`\x0c`) starts a new page. Pages
//! are rasterized as a grid of character cells, each non-blank character
//! filling its cell with a gray level derived from the character.
//!
//! Rasters leave the unit as a base64 string under `pixels`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::worker::TaskHandler;

/// Page size in pixels at scale 1.0.
pub const BASE_WIDTH: u32 = 120;
pub const BASE_HEIGHT: u32 = 160;
/// Character cell size in pixels at scale 1.0.
const CELL_WIDTH: f32 = 6.0;
const CELL_HEIGHT: f32 = 10.0;
/// Largest accepted render scale.
pub const MAX_SCALE: f32 = 4.0;

const PAGE_BREAK: char = '\x0c';

/// Task kinds understood by [`SyntheticBackend`].
pub mod kind {
    pub const DECODE: &str = "decode";
    pub const PAGE: &str = "page";
    pub const RENDER: &str = "render";
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticBackend;

impl TaskHandler for SyntheticBackend {
    fn handle(&self, kind: &str, payload: &Value) -> Result<Value, String> {
        match kind {
            kind::DECODE => decode(payload),
            kind::PAGE => page(payload),
            kind::RENDER => render(payload),
            other => Err(format!("unsupported task kind '{other}'")),
        }
    }
}

fn source(payload: &Value) -> Result<&str, String> {
    payload["source"]
        .as_str()
        .ok_or_else(|| "payload is missing 'source'".to_string())
}

fn page_text<'a>(source: &'a str, payload: &Value) -> Result<&'a str, String> {
    let number = payload["page"]
        .as_u64()
        .ok_or_else(|| "payload is missing 'page'".to_string())? as usize;
    number
        .checked_sub(1)
        .and_then(|index| source.split(PAGE_BREAK).nth(index))
        .ok_or_else(|| format!("page {number} does not exist"))
}

fn decode(payload: &Value) -> Result<Value, String> {
    let source = source(payload)?;
    if source.trim().is_empty() {
        return Err("document is empty".to_string());
    }
    let page_count = source.split(PAGE_BREAK).count();
    let title = source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.contains(PAGE_BREAK));
    Ok(json!({ "page_count": page_count, "title": title }))
}

fn page(payload: &Value) -> Result<Value, String> {
    let text = page_text(source(payload)?, payload)?;
    Ok(json!({ "text": text, "line_count": text.lines().count() }))
}

fn render(payload: &Value) -> Result<Value, String> {
    let text = page_text(source(payload)?, payload)?;
    let scale = payload["scale"].as_f64().unwrap_or(1.0) as f32;
    if !scale.is_finite() || scale <= 0.0 || scale > MAX_SCALE {
        return Err(format!("scale {scale} outside (0, {MAX_SCALE}]"));
    }

    let width = ((BASE_WIDTH as f32 * scale).round() as u32).max(1);
    let height = ((BASE_HEIGHT as f32 * scale).round() as u32).max(1);
    let cell_w = ((CELL_WIDTH * scale).round() as u32).max(1);
    let cell_h = ((CELL_HEIGHT * scale).round() as u32).max(1);
    let columns = (width / cell_w).max(1);
    let rows = height / cell_h;

    let mut pixels = vec![255u8; (width * height) as usize];
    for (row, line) in text.lines().take(rows as usize).enumerate() {
        for (col, ch) in line.chars().take(columns as usize).enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let shade = 160 - (ch as u32 % 128) as u8;
            let x0 = col as u32 * cell_w;
            let y0 = row as u32 * cell_h;
            for y in y0..(y0 + cell_h).min(height) {
                let start = (y * width + x0) as usize;
                let end = (y * width + (x0 + cell_w).min(width)) as usize;
                pixels[start..end].fill(shade);
            }
        }
    }

    Ok(json!({ "width": width, "height": height, "pixels": BASE64.encode(&pixels) }))
}
