use garde::Validate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::job::Params;

/// A random photo from a Picsum-compatible service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RandomPhotoSpec {
    #[garde(range(min = 16, max = 4096))]
    pub width: u32,

    #[garde(range(min = 16, max = 4096))]
    pub height: u32,
}

/// A QR code rendered by a QRServer-compatible service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QrCodeSpec {
    #[garde(length(min = 1, max = 2048))]
    pub text: String,

    #[garde(range(min = 64, max = 1024))]
    pub size: u32,
}

/// What to fetch for a `RemoteFetch` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FetchSpec {
    RandomPhoto(RandomPhotoSpec),
    QrCode(QrCodeSpec),
}

impl FetchSpec {
    pub fn validate(&self) -> Result<(), FetchSpecError> {
        let report = match self {
            FetchSpec::RandomPhoto(spec) => spec.validate(),
            FetchSpec::QrCode(spec) => spec.validate(),
        };
        report.map_err(|e| FetchSpecError::Invalid(e.to_string()))
    }

    /// Content type the source normally serves.
    pub fn expected_mime(&self) -> &'static str {
        match self {
            FetchSpec::RandomPhoto(_) => "image/jpeg",
            FetchSpec::QrCode(_) => "image/png",
        }
    }

    /// Source description stored under the job's `params.fetch`.
    pub fn describe(&self) -> Params {
        let value = match self {
            FetchSpec::RandomPhoto(spec) => json!({
                "source": "picsum",
                "width": spec.width,
                "height": spec.height,
            }),
            FetchSpec::QrCode(spec) => json!({
                "source": "qrserver",
                "size": spec.size,
                "text_len": spec.text.chars().count(),
            }),
        };
        match value {
            serde_json::Value::Object(map) => map,
            _ => Params::new(),
        }
    }
}

/// Base URLs of the third-party image services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSources {
    pub picsum_base_url: String,
    pub qrserver_base_url: String,
}

impl Default for RemoteSources {
    fn default() -> Self {
        Self {
            picsum_base_url: "https://picsum.photos".to_string(),
            qrserver_base_url: "https://api.qrserver.com".to_string(),
        }
    }
}

impl RemoteSources {
    pub fn url_for(&self, spec: &FetchSpec) -> Result<Url, FetchSpecError> {
        let url = match spec {
            FetchSpec::RandomPhoto(photo) => Url::parse(&format!(
                "{}/{}/{}",
                self.picsum_base_url.trim_end_matches('/'),
                photo.width,
                photo.height
            )),
            FetchSpec::QrCode(qr) => Url::parse(&format!(
                "{}/v1/create-qr-code/",
                self.qrserver_base_url.trim_end_matches('/')
            ))
            .map(|mut url| {
                url.query_pairs_mut()
                    .append_pair("size", &format!("{0}x{0}", qr.size))
                    .append_pair("data", &qr.text);
                url
            }),
        };
        url.map_err(|e| FetchSpecError::Url(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchSpecError {
    #[error("invalid fetch spec: {0}")]
    Invalid(String),

    #[error("invalid source URL: {0}")]
    Url(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_photo_bounds() {
        let ok = FetchSpec::RandomPhoto(RandomPhotoSpec { width: 16, height: 4096 });
        assert!(ok.validate().is_ok());

        let too_small = FetchSpec::RandomPhoto(RandomPhotoSpec { width: 15, height: 512 });
        assert!(matches!(too_small.validate(), Err(FetchSpecError::Invalid(_))));
    }

    #[test]
    fn test_qr_code_bounds() {
        let empty = FetchSpec::QrCode(QrCodeSpec { text: String::new(), size: 256 });
        assert!(empty.validate().is_err());

        let big = FetchSpec::QrCode(QrCodeSpec { text: "hi".into(), size: 2048 });
        assert!(big.validate().is_err());
    }

    #[test]
    fn test_urls() {
        let sources = RemoteSources {
            picsum_base_url: "http://localhost:9000/".to_string(),
            qrserver_base_url: "http://localhost:9001".to_string(),
        };

        let photo = FetchSpec::RandomPhoto(RandomPhotoSpec { width: 64, height: 32 });
        assert_eq!(sources.url_for(&photo).unwrap().as_str(), "http://localhost:9000/64/32");

        let qr = FetchSpec::QrCode(QrCodeSpec { text: "a b&c".into(), size: 128 });
        let url = sources.url_for(&qr).unwrap();
        assert_eq!(url.path(), "/v1/create-qr-code/");
        assert_eq!(url.query(), Some("size=128x128&data=a+b%26c"));
    }

    #[test]
    fn test_spec_json_shape() {
        let spec: FetchSpec =
            serde_json::from_str(r#"{"source":"qr_code","text":"hello","size":64}"#).unwrap();
        assert_eq!(spec, FetchSpec::QrCode(QrCodeSpec { text: "hello".into(), size: 64 }));
        assert_eq!(spec.describe()["text_len"], 5);
    }
}
