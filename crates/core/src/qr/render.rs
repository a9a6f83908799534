//! Rendering raw QR challenges into display forms.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Luma};
use qrcode::render::svg;
use qrcode::{Color, QrCode};
use tracing::warn;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";
/// Pixels per module in the PNG form.
const PNG_SCALE: u32 = 8;
/// Quiet-zone width in modules.
const MARGIN: u32 = 1;

/// Display forms of one challenge. A form that failed to render is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedQr {
	pub png_data_url: Option<String>,
	pub svg: Option<String>,
}

/// Turns a raw challenge payload into display forms.
pub trait QrRenderer: Send + Sync + 'static {
	fn render(&self, payload: &str) -> RenderedQr;
}

/// Renders PNG data URLs and SVG documents with the `qrcode` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrCodeRenderer;

impl QrRenderer for QrCodeRenderer {
	fn render(&self, payload: &str) -> RenderedQr {
		let code = match QrCode::new(payload.as_bytes()) {
			Ok(code) => code,
			Err(err) => {
				warn!(target = "lydia.qr", error = %err, len = payload.len(), "challenge cannot be encoded as a QR code");
				return RenderedQr::default();
			}
		};

		let png_data_url = match encode_png(&code) {
			Ok(bytes) => Some(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(bytes))),
			Err(err) => {
				warn!(target = "lydia.qr", error = %err, "PNG rendering failed");
				None
			}
		};

		let svg = code.render::<svg::Color<'_>>().quiet_zone(true).min_dimensions(256, 256).build();

		RenderedQr {
			png_data_url,
			svg: Some(svg),
		}
	}
}

/// Keeps only the raw payload; used where no image output is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOnlyRenderer;

impl QrRenderer for RawOnlyRenderer {
	fn render(&self, _payload: &str) -> RenderedQr {
		RenderedQr::default()
	}
}

fn encode_png(code: &QrCode) -> image::ImageResult<Vec<u8>> {
	let width = code.width() as u32;
	let colors = code.to_colors();
	let side = (width + 2 * MARGIN) * PNG_SCALE;

	let image = GrayImage::from_fn(side, side, |x, y| {
		let (mx, my) = (x / PNG_SCALE, y / PNG_SCALE);
		let inside = (MARGIN..MARGIN + width).contains(&mx) && (MARGIN..MARGIN + width).contains(&my);
		let dark = inside && colors[((my - MARGIN) * width + (mx - MARGIN)) as usize] == Color::Dark;
		if dark { Luma([0]) } else { Luma([255]) }
	});

	let mut bytes = Vec::new();
	PngEncoder::new(&mut bytes).write_image(image.as_raw(), side, side, ExtendedColorType::L8)?;
	Ok(bytes)
}

/// Extracts the PNG bytes from a `data:image/png;base64,` URL.
pub fn decode_png_data_url(url: &str) -> Option<Vec<u8>> {
	STANDARD.decode(url.strip_prefix(PNG_DATA_URL_PREFIX)?).ok()
}
