// Drive v3 REST client over reqwest.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use super::{BackendError, DriveClient, DriveFileMeta};
use crate::config::DriveConfig;

const META_FIELDS: &str = "id,name,trashed";
const JSON_MIME: &str = "application/json";

pub struct HttpDriveClient {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFileMeta>,
}

impl HttpDriveClient {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{base}/{path}"))
            .map_err(|error| BackendError::Transport(format!("invalid drive url: {error}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }
}

/// Map a non-success status onto the backend error vocabulary.
async fn check(response: Response, file_id: &str) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(BackendError::NotFound(file_id.to_string())),
        StatusCode::UNAUTHORIZED => Err(BackendError::Unauthorized),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(BackendError::Remote { status: status.as_u16(), message })
        }
    }
}

/// `multipart/related` upload body: metadata part, then media part.
fn related_body(boundary: &str, metadata: &serde_json::Value, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(media.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {JSON_MIME}; charset=UTF-8\r\n\r\n").as_bytes());
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {JSON_MIME}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Drive query literal: single quotes and backslashes are escaped.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl DriveClient for HttpDriveClient {
    async fn get_metadata(&self, token: &str, file_id: &str) -> Result<Option<DriveFileMeta>, BackendError> {
        let url = self.url(&self.api_base, &format!("files/{file_id}"), &[("fields", META_FIELDS)])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        match check(response, file_id).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, BackendError> {
        let url = self.url(&self.api_base, &format!("files/{file_id}"), &[("alt", "media")])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let response = check(response, file_id).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn find_by_name(&self, token: &str, name: &str) -> Result<Option<DriveFileMeta>, BackendError> {
        let query = format!("name = {} and trashed = false", quote(name));
        let url = self.url(
            &self.api_base,
            "files",
            &[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id,name,trashed)"),
                ("pageSize", "10"),
            ],
        )?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let list: FileList = check(response, name).await?.json().await?;
        Ok(list.files.into_iter().find(|file| !file.trashed))
    }

    async fn update(&self, token: &str, file_id: &str, body: &[u8]) -> Result<(), BackendError> {
        let url = self.url(&self.upload_base, &format!("files/{file_id}"), &[("uploadType", "media")])?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, JSON_MIME)
            .body(body.to_vec())
            .send()
            .await?;
        check(response, file_id).await?;
        Ok(())
    }

    /// Metadata and content go up in one request, so a failed upload never
    /// leaves an empty file behind.
    async fn create(&self, token: &str, name: &str, body: &[u8]) -> Result<DriveFileMeta, BackendError> {
        let url = self.url(&self.upload_base, "files", &[("uploadType", "multipart"), ("fields", META_FIELDS)])?;
        let boundary = format!("storyverse-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "mimeType": JSON_MIME });
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(related_body(&boundary, &metadata, body))
            .send()
            .await?;
        Ok(check(response, name).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_literals_are_escaped() {
        assert_eq!(quote("storyverse_project.json"), "'storyverse_project.json'");
        assert_eq!(quote("it's"), "'it\\'s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn create_body_holds_metadata_then_media() {
        let metadata = json!({ "name": "storyverse_project.json", "mimeType": JSON_MIME });
        let body = related_body("b0undary", &metadata, b"{\"novels\":[]}");
        let text = String::from_utf8(body).unwrap();

        let parts: Vec<&str> = text.split("--b0undary").collect();
        assert_eq!(parts.len(), 4, "two parts between three delimiters: {text}");
        assert_eq!(parts[0], "");
        assert!(parts[1].starts_with("\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n"));
        assert!(parts[1].contains("\"name\":\"storyverse_project.json\""));
        assert_eq!(parts[2], "\r\nContent-Type: application/json\r\n\r\n{\"novels\":[]}\r\n");
        assert_eq!(parts[3], "--\r\n");
    }

    #[test]
    fn urls_carry_query_pairs() {
        let client = HttpDriveClient::new(&DriveConfig {
            api_base: "https://drive.example.test/v3/".into(),
            ..DriveConfig::default()
        });
        let url = client.url(&client.api_base, "files/abc", &[("alt", "media")]).unwrap();
        assert_eq!(url.as_str(), "https://drive.example.test/v3/files/abc?alt=media");

        let url = client.url(&client.upload_base, "files/abc", &[]).unwrap();
        assert_eq!(url.as_str(), "https://www.googleapis.com/upload/drive/v3/files/abc");
    }
}
