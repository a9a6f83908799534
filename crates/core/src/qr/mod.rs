//! QR challenge rendering and the bounded QR wait.

mod render;
mod wait;

pub use render::{QrCodeRenderer, QrRenderer, RawOnlyRenderer, RenderedQr, decode_png_data_url};
pub use wait::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, QrWaitOptions, QrWaitOutcome, WaitReason, wait_for_qr};
