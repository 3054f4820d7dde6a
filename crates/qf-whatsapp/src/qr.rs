//! Terminal QR rendering for device linking

use qrcode::QrCode;
use qrcode::render::unicode;

use crate::error::{Result, WhatsAppError};

/// Render a QR payload as half-height unicode blocks
pub fn render(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| WhatsAppError::Qr(e.to_string()))?;

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
