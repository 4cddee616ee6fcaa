/*!
QR check-in token generation and PNG rendering.

A teacher "opens" check-in for a class, which mints a random token, stores
it (bound to the class, with an expiry), and hands back a check-in URL both
as text and as a QR code PNG packed into a `data:` URL the dashboard can
drop straight into an `<img>` tag.
*/
use base64::Engine;
use image::{codecs::png::PngEncoder, ImageEncoder, Luma};
use qrcode::QrCode;
use rand::{distributions::Slice, Rng};
use time::Duration;

/// How long an issued check-in token stays honored.
pub const TOKEN_TTL: Duration = Duration::minutes(10);

const TOKEN_CHARS: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];
const TOKEN_LENGTH: usize = 26;

#[derive(Debug, PartialEq)]
pub struct QrError(String);

impl QrError {
    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for QrError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

/// A fresh random check-in token.
pub fn generate_token() -> String {
    // TOKEN_CHARS never has zero length.
    let dist = Slice::new(TOKEN_CHARS).unwrap();
    let rng = rand::thread_rng();
    rng.sample_iter(&dist).take(TOKEN_LENGTH).collect()
}

/// Render `url` as a QR code and pack the PNG into a
/// `data:image/png;base64,...` URL.
pub fn render_data_url(url: &str) -> Result<String, QrError> {
    log::trace!("qr::render_data_url( {:?} ) called.", url);

    let code = QrCode::new(url.as_bytes())
        .map_err(|e| QrError(format!("Error building QR code: {}", &e)))?;
    let img = code.render::<Luma<u8>>().build();

    let mut png: Vec<u8> = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::L8,
        )
        .map_err(|e| QrError(format!("Error encoding QR PNG: {}", &e)))?;

    let mut data_url = String::from("data:image/png;base64,");
    base64::engine::general_purpose::STANDARD.encode_string(&png, &mut data_url);

    Ok(data_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let a = generate_token();
        let b = generate_token();

        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| TOKEN_CHARS.contains(&c)));
        // Not a proof of randomness, but a collision here means the
        // generator is badly broken.
        assert_ne!(a, b);
    }

    #[test]
    fn data_url_shape() {
        let url = "https://rollcall.example.edu/check-in?class=12&token=abc123";
        let data_url = render_data_url(url).unwrap();

        assert!(data_url.starts_with("data:image/png;base64,"));
        let b64 = &data_url["data:image/png;base64,".len()..];
        let png = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        // PNG magic.
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }
}
