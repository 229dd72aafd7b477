// Copyright 2023 Remi Bernotavicius

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

const DATA_URI_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeImage {
    pub bytes: Vec<u8>,
    /// File extension of the sniffed format, e.g. `png`.
    pub format: String,
}

fn invalid_image() -> Error {
    Error::validation(
        "image",
        "Upload a valid image. The data is either not an image or a corrupted image.",
    )
}

impl RecipeImage {
    /// Decodes `data:image/<fmt>;base64,<payload>`. The declared format is not trusted; the
    /// stored format is whatever the decoded bytes turn out to be.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri.trim().strip_prefix(DATA_URI_PREFIX).ok_or_else(|| {
            Error::validation("image", "Expected a data:image/...;base64 URI.")
        })?;
        let (_declared, payload) = rest.split_once(BASE64_MARKER).ok_or_else(invalid_image)?;

        let bytes = BASE64.decode(payload.trim()).map_err(|_| invalid_image())?;
        let format = image::guess_format(&bytes).map_err(|_| invalid_image())?;
        let extension = format
            .extensions_str()
            .first()
            .copied()
            .ok_or_else(invalid_image)?;

        Ok(Self {
            bytes,
            format: extension.into(),
        })
    }
}

pub fn data_uri(format: &str, bytes: &[u8]) -> String {
    format!("{DATA_URI_PREFIX}{format}{BASE64_MARKER}{}", BASE64.encode(bytes))
}

#[cfg(test)]
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

#[cfg(test)]
pub fn png_data_uri() -> String {
    data_uri("png", PNG_BYTES)
}

#[test]
fn decode_png() {
    let image = RecipeImage::from_data_uri(&png_data_uri()).unwrap();
    assert_eq!(image.format, "png");
    assert_eq!(image.bytes, PNG_BYTES);
    assert_eq!(data_uri(&image.format, &image.bytes), png_data_uri());
}

#[test]
fn declared_format_is_not_trusted() {
    let uri = format!("data:image/gif;base64,{}", BASE64.encode(PNG_BYTES));
    assert_eq!(RecipeImage::from_data_uri(&uri).unwrap().format, "png");
}

#[test]
fn rejects_bad_images() {
    for uri in [
        String::from("https://example.com/cake.png"),
        String::from("data:image/png,rawbytes"),
        String::from("data:image/png;base64,***"),
        format!("data:image/png;base64,{}", BASE64.encode(b"just some text")),
    ] {
        assert!(
            matches!(
                RecipeImage::from_data_uri(&uri),
                Err(Error::Validation { ref field, .. }) if field == "image"
            ),
            "{uri}"
        );
    }
}
