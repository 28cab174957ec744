//! Supabase (PostgREST) record sink.

use super::RecordSink;
use crate::config::SupabaseSettings;
use crate::error::SinkError;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

/// Writes imported records to Supabase tables with the service-role key.
#[derive(Clone)]
pub struct SupabaseSink {
    client: Client,
    base_url: String,
    service_role_key: String,
    schema: Option<String>,
}

impl SupabaseSink {
    pub fn new(settings: &SupabaseSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.url.trim_end_matches('/').to_string(),
            service_role_key: settings.service_role_key.clone(),
            schema: settings.schema.clone(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder, profile_header: &str) -> RequestBuilder {
        let builder = builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key));
        match &self.schema {
            Some(schema) => builder.header(profile_header, schema),
            None => builder,
        }
    }

    /// Map a non-2xx response to a row-level rejection carrying the backend's message.
    async fn check(resp: Response) -> Result<Response, SinkError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(SinkError::Rejected(format!("{} - {}", status, text)))
    }
}

#[async_trait::async_trait]
impl RecordSink for SupabaseSink {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn create(&self, table: &str, data: Value) -> Result<(), SinkError> {
        debug!("Inserting record into {}", table);
        let req = self
            .client
            .post(self.table_url(table))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&data);
        let resp = self.authorized(req, "Content-Profile").send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, data: Value) -> Result<(), SinkError> {
        debug!("Updating record {} in {}", id, table);
        let req = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(&data);
        let resp = self.authorized(req, "Content-Profile").send().await?;
        let updated: Vec<Value> = Self::check(resp).await?.json().await?;
        if updated.is_empty() {
            return Err(SinkError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }

    async fn records(&self, table: &str) -> Result<Vec<Value>, SinkError> {
        let req = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")]);
        let resp = self.authorized(req, "Accept-Profile").send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url_trims_trailing_slash() {
        let sink = SupabaseSink::new(&SupabaseSettings {
            url: "https://example.supabase.co/".to_string(),
            service_role_key: "key".to_string(),
            schema: Some("hera".to_string()),
        });
        assert_eq!(sink.table_url("core_entities"), "https://example.supabase.co/rest/v1/core_entities");
        assert_eq!(sink.name(), "supabase");
    }
}
