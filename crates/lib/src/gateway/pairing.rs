//! Pairing page: shows the relay URL and a QR code the phone scans to connect.
//!
//! Before the endpoint is known the page only says the tunnel is starting; the gateway serves it with 503.

use crate::tunnel::TunnelEndpoint;
use base64::Engine;
use qrcode::render::{svg, unicode};
use qrcode::QrCode;

const QR_MIN_SIZE: u32 = 250;

/// Turns a URL into a scannable image.
pub trait PairingCodeRenderer: Send + Sync {
    /// Value for an `<img src=...>` attribute (typically a data URI).
    fn image_src(&self, url: &str) -> Result<String, String>;
}

/// QR code rendered as SVG, embedded as a base64 data URI.
#[derive(Debug, Clone, Default)]
pub struct SvgQrRenderer;

impl PairingCodeRenderer for SvgQrRenderer {
    fn image_src(&self, url: &str) -> Result<String, String> {
        let code = QrCode::new(url.as_bytes()).map_err(|e| format!("qr encode: {}", e))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
            .build();
        Ok(format!(
            "data:image/svg+xml;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        ))
    }
}

/// QR code drawn with half-block characters, for printing in a terminal.
pub fn terminal_code(url: &str) -> Result<String, String> {
    let code = QrCode::new(url.as_bytes()).map_err(|e| format!("qr encode: {}", e))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Page with the relay URL and its QR code. If the image cannot be rendered the URL is still shown.
pub fn pairing_page(endpoint: &TunnelEndpoint, renderer: &dyn PairingCodeRenderer) -> String {
    let url = escape_html(endpoint.relay_url());
    let image = match renderer.image_src(endpoint.relay_url()) {
        Ok(src) => format!(
            r#"<img src="{}" width="{}" alt="pairing code"/>"#,
            escape_html(&src),
            QR_MIN_SIZE
        ),
        Err(e) => {
            log::warn!("pairing code render failed: {}", e);
            "<p>(pairing code unavailable, enter the URL manually)</p>".to_string()
        }
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>edgelink</title>
</head>
<body style="font-family:Arial;background:#ffffff;text-align:center;padding-top:50px;">
    <h2>Scan QR to Connect</h2>
    <p>{url}</p>
    {image}
</body>
</html>
"#
    )
}

/// Page served while no endpoint has been published.
pub fn not_ready_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>edgelink</title>
    <meta http-equiv="refresh" content="3"/>
</head>
<body style="font-family:Arial;text-align:center;padding-top:50px;">
    <h3>Starting tunnel... please refresh</h3>
</body>
</html>
"#
    .to_string()
}
