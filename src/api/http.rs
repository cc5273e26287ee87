use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::de::DeserializeOwned;

use super::types::{JobList, LlmModelList, SampleList, ServerList};
use super::{
    error_detail, ApiError, AudioFile, CatalogApi, CatalogSnapshot, Sample, ServerApi,
    ServerRecord, ServerUpsert, VoiceApi, VoiceJob,
};

/// reqwest client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim()).map_err(|e| {
            ApiError::InvalidRequest(format!("Invalid API base URL {base_url:?}: {e}"))
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "Invalid API base URL {base_url:?}"
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Append path segments (percent-encoded) and query pairs to the base URL.
    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest(format!("Invalid API base URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Pass 2xx responses through; turn anything else into `ApiError::Status`.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let url = resp.url().clone();
        let body = resp.text().await.unwrap_or_default();
        let detail = error_detail(status.as_u16(), &body);
        log::warn!("{url} returned {status}: {detail}");
        Err(ApiError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        log::debug!("GET {url}");
        let resp = self.client.get(url).send().await?;
        let resp = Self::check(resp).await?;
        Self::read_json(resp).await
    }
}

#[async_trait(?Send)]
impl CatalogApi for HttpApi {
    async fn catalog(&self) -> Result<CatalogSnapshot, ApiError> {
        self.get_json(self.url(&["catalog"], &[])?).await
    }

    async fn install(&self, model: &str) -> Result<(), ApiError> {
        let url = self.url(&["install"], &[])?;
        log::info!("POST {url} model={model}");
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn llm_models(&self) -> Result<Vec<String>, ApiError> {
        let list: LlmModelList = self.get_json(self.url(&["llm", "models"], &[])?).await?;
        Ok(list.models)
    }
}

#[async_trait(?Send)]
impl ServerApi for HttpApi {
    async fn servers(&self) -> Result<Vec<ServerRecord>, ApiError> {
        let list: ServerList = self.get_json(self.url(&["servers"], &[])?).await?;
        Ok(list.into_vec())
    }

    async fn upsert_server(&self, server: &ServerUpsert) -> Result<(), ApiError> {
        let url = self.url(&["servers"], &[])?;
        log::info!("POST {url} name={}", server.name);
        let resp = self.client.post(url).json(server).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_server(&self, name: &str) -> Result<(), ApiError> {
        let url = self.url(&["servers", name], &[])?;
        log::info!("DELETE {url}");
        let resp = self.client.delete(url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl VoiceApi for HttpApi {
    async fn samples(&self, project: &str) -> Result<Vec<Sample>, ApiError> {
        let url = self.url(&["voice", "samples"], &[("project", project)])?;
        let list: SampleList = self.get_json(url).await?;
        Ok(list.samples)
    }

    async fn upload_samples(&self, project: &str, files: Vec<AudioFile>) -> Result<(), ApiError> {
        let url = self.url(&["voice", "samples"], &[])?;
        log::info!("POST {url} project={project} files={}", files.len());
        let mut form = Form::new().text("project", project.to_string());
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.filename)
                .mime_str(&file.mime)?;
            form = form.part("files", part);
        }
        let resp = self.client.post(url).multipart(form).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_sample(&self, project: &str, id: &str) -> Result<(), ApiError> {
        let url = self.url(&["voice", "samples", id], &[("project", project)])?;
        log::info!("DELETE {url}");
        let resp = self.client.delete(url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn jobs(&self, project: &str, limit: u32) -> Result<Vec<VoiceJob>, ApiError> {
        let limit = limit.to_string();
        let url = self.url(
            &["voice", "jobs"],
            &[("project", project), ("limit", limit.as_str())],
        )?;
        let list: JobList = self.get_json(url).await?;
        Ok(list.jobs)
    }

    async fn train(&self, project: &str) -> Result<Option<VoiceJob>, ApiError> {
        let url = self.url(&["voice", "train"], &[])?;
        log::info!("POST {url} project={project}");
        let form = Form::new().text("project", project.to_string());
        let resp = self.client.post(url).multipart(form).send().await?;
        let resp = Self::check(resp).await?;
        let body: serde_json::Value = match Self::read_json(resp).await {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let job = body.get("job").cloned().unwrap_or(body);
        Ok(serde_json::from_value(job).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_and_encoded() {
        let api = HttpApi::new("http://127.0.0.1:8000/api/", Duration::from_secs(5)).unwrap();
        let url = api.url(&["servers", "gpu box/1"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/api/servers/gpu%20box%2F1");

        let url = api
            .url(&["voice", "jobs"], &[("project", "a&b"), ("limit", "5")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8000/api/voice/jobs?project=a%26b&limit=5"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(HttpApi::new("not a url", Duration::from_secs(5)).is_err());
        assert!(HttpApi::new("mailto:me@example.com", Duration::from_secs(5)).is_err());
    }
}
