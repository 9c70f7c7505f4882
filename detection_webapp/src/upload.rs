use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use bytes::Bytes;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No image uploaded")]
    NoImage,
    #[error("Unsupported file type {0:?}; expected one of jpg, jpeg, png")]
    UnsupportedExtension(String),
    #[error("Failed to read upload: {message}")]
    Multipart { status: StatusCode, message: String },
    #[error("Error decoding image: {0}")]
    Decode(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        UploadError::Multipart {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

pub fn check_extension(file_name: &str) -> Result<(), UploadError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    if ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(UploadError::UnsupportedExtension(file_name.to_string()))
    }
}

#[derive(Debug)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Bytes,
    pub image: DynamicImage,
}

impl UploadedImage {
    pub fn decode(file_name: String, bytes: Bytes) -> Result<Self, UploadError> {
        check_extension(&file_name)?;

        let image = image::ImageReader::new(std::io::Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| UploadError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| UploadError::Decode(e.to_string()))?;

        Ok(Self {
            file_name,
            bytes,
            image,
        })
    }

    /// Takes the `image` field, or the first file field when none is named so.
    pub async fn from_multipart(multipart: &mut Multipart) -> Result<Self, UploadError> {
        let mut upload: Option<(String, Bytes)> = None;

        while let Some(field) = multipart.next_field().await? {
            let Some(file_name) = field.file_name().map(str::to_string) else {
                continue;
            };
            let is_image_field = field.name() == Some(IMAGE_FIELD);
            if upload.is_some() && !is_image_field {
                continue;
            }

            let data = field.bytes().await?;
            if data.is_empty() {
                continue;
            }
            upload = Some((file_name, data));
            if is_image_field {
                break;
            }
        }

        let (file_name, bytes) = upload.ok_or(UploadError::NoImage)?;
        tracing::info!("Received upload {:?} ({} bytes)", file_name, bytes.len());
        check_extension(&file_name)?;

        tokio::task::spawn_blocking(move || Self::decode(file_name, bytes))
            .await
            .map_err(|e| UploadError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::tests::png_bytes;

    #[test]
    fn test_check_extension() {
        assert!(check_extension("photo.jpg").is_ok());
        assert!(check_extension("photo.JPEG").is_ok());
        assert!(check_extension("scan.png").is_ok());
        assert!(matches!(
            check_extension("anim.gif"),
            Err(UploadError::UnsupportedExtension(_))
        ));
        assert!(check_extension("no_extension").is_err());
    }

    #[test]
    fn test_decode_png() {
        let upload = UploadedImage::decode("scan.png".to_string(), Bytes::from(png_bytes(640, 480)))
            .unwrap();

        assert_eq!((upload.image.width(), upload.image.height()), (640, 480));
    }

    #[test]
    fn test_decode_failure() {
        let result = UploadedImage::decode("broken.jpg".to_string(), Bytes::from_static(b"not an image"));

        assert!(matches!(result, Err(UploadError::Decode(_))));
    }
}
