//! Artifact storage for page images and cropped answer snippets.

use crate::error::AnswersheetError;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Mutex;

/// Blob store that hands back a stable, fetchable reference per upload.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store JPEG bytes under `key` and return the artifact reference.
    async fn put_jpeg(&self, key: &str, bytes: Vec<u8>) -> Result<String, AnswersheetError>;
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Key for a cropped answer: `{student}/{question}[-cont]-{timestamp}-{uuid}.jpg`.
pub fn artifact_key(student_id: &str, question_no: &str, continuation: bool) -> String {
    format!(
        "{}/{}{}-{}-{}.jpg",
        student_id,
        question_no,
        if continuation { "-cont" } else { "" },
        timestamp(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Key for a full page image: `{student}/{page_no}-{timestamp}.jpg`.
pub fn page_key(student_id: &str, page_no: &str) -> String {
    format!("{}/{}-{}.jpg", student_id, page_no, timestamp())
}

pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, AnswersheetError> {
    let mut buf = Vec::new();
    // JPEG has no alpha channel.
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
    Ok(buf)
}

/// S3 bucket settings.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint (MinIO and friends); `None` for AWS.
    pub endpoint: Option<String>,
}

/// Public-read S3 bucket storage.
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3ArtifactStore {
    pub fn new(settings: S3Settings) -> Result<Self, AnswersheetError> {
        if settings.bucket.is_empty() || settings.region.is_empty() {
            return Err(AnswersheetError::Config(
                "S3 bucket and region must both be set".into(),
            ));
        }

        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "answersheet",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .behavior_version_latest();
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(S3ArtifactStore {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            region: settings.region,
            endpoint: settings.endpoint,
        })
    }

    fn url_for(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put_jpeg(&self, key: &str, bytes: Vec<u8>) -> Result<String, AnswersheetError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("image/jpeg")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AnswersheetError::Storage {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self.url_for(key))
    }
}

/// In-process store; references are `memory://{key}`.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.objects.lock() {
            Ok(objects) => objects.iter().map(|(k, _)| k.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put_jpeg(&self, key: &str, bytes: Vec<u8>) -> Result<String, AnswersheetError> {
        let mut objects = self.objects.lock().map_err(|_| AnswersheetError::Storage {
            key: key.to_string(),
            reason: "memory store lock poisoned".into(),
        })?;
        objects.push((key.to_string(), bytes));
        Ok(format!("memory://{}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn test_artifact_key_layout() {
        let key = artifact_key("S1", "4b", false);
        assert!(key.starts_with("S1/4b-"));
        assert!(key.ends_with(".jpg"));
        // student / question - date_time - uuid . jpg
        let stem = key.trim_start_matches("S1/").trim_end_matches(".jpg");
        let parts: Vec<&str> = stem.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 15);
        assert_eq!(parts[2].len(), 32);
    }

    #[test]
    fn test_continuation_key_marker() {
        let key = artifact_key("S1", "2", true);
        assert!(key.starts_with("S1/2-cont-"));
        assert_ne!(key, artifact_key("S1", "2", true));
    }

    #[test]
    fn test_page_key_layout() {
        let key = page_key("unknown", "3");
        assert!(key.starts_with("unknown/3-"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn test_encode_jpeg_drops_alpha() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(8, 8));
        let bytes = encode_jpeg(&image).unwrap();
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_memory_store_references() {
        let store = MemoryArtifactStore::new();
        let url = store.put_jpeg("S1/1.jpg", vec![1]).await.unwrap();
        assert_eq!(url, "memory://S1/1.jpg");
        assert_eq!(store.keys(), vec!["S1/1.jpg"]);
    }
}
