//! REST implementation of [`CrmClient`]

use super::models::ListResponse;
use super::{Constituent, CrmClient, CrmEvent, CrmParkingPass, Ticket};
use crate::config::CrmConfig;
use crate::events::DateRange;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{IntoUrl, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

const SUBSCRIPTION_KEY_HEADER: &str = "Bb-Api-Subscription-Key";

/// CRM client authenticating with a pre-issued bearer token
pub struct HttpCrmClient {
    http_client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    subscription_key: Option<String>,
    constituents_path: String,
    events_path: String,
    tickets_path: String,
    parking_passes_path: String,
}

impl HttpCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("crm.base_url is required".to_string()));
        }
        if config.access_token.is_none() {
            warn!("crm.access_token is not set; CRM requests will be unauthenticated");
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("msync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            subscription_key: config.subscription_key.clone(),
            constituents_path: config.constituents_path.clone(),
            events_path: config.events_path.clone(),
            tickets_path: config.tickets_path.clone(),
            parking_passes_path: config.parking_passes_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        match &self.subscription_key {
            Some(key) => request.header(SUBSCRIPTION_KEY_HEADER, key),
            None => request,
        }
    }

    async fn get<U: IntoUrl>(&self, url: U, query: &[(&str, String)]) -> Result<Response> {
        let url = url.into_url()?;
        debug!(url = %url, "CRM request");
        let response = self
            .authorized(self.http_client.get(url).query(query))
            .send()
            .await?;
        Ok(response)
    }

    /// Constituent URL with the id as one escaped path segment
    fn constituent_url(&self, altru_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url(&self.constituents_path))
            .map_err(|e| Error::Config(format!("invalid CRM constituents URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("CRM base_url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(altru_id);
        Ok(url)
    }

    async fn get_list<T>(&self, path: &str, range: &DateRange) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Default,
    {
        let url = self.url(path);
        let query = [("start_date", range.start_str()), ("end_date", range.end_str())];
        let response = ensure_success(self.get(&url, &query).await?).await?;

        let list: ListResponse = response
            .json()
            .await
            .map_err(|e| Error::Crm(format!("invalid response from {}: {}", url, e)))?;
        Ok(list.into_records())
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Crm(format!("HTTP {}: {}", status.as_u16(), body)))
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn get_constituent(&self, altru_id: &str) -> Result<Option<Constituent>> {
        let url = self.constituent_url(altru_id)?;
        let response = self.get(url, &[]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(altru_id = %altru_id, "Constituent not found");
            return Ok(None);
        }

        let constituent = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Crm(format!("invalid constituent {}: {}", altru_id, e)))?;
        Ok(Some(constituent))
    }

    async fn get_events(&self, range: &DateRange) -> Result<Vec<CrmEvent>> {
        self.get_list(&self.events_path, range).await
    }

    async fn get_tickets(&self, range: &DateRange) -> Result<Vec<Ticket>> {
        self.get_list(&self.tickets_path, range).await
    }

    async fn get_parking_passes(&self, range: &DateRange) -> Result<Vec<CrmParkingPass>> {
        self.get_list(&self.parking_passes_path, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{bearer_token, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    async fn client_for(server: &MockServer) -> HttpCrmClient {
        let config = CrmConfig {
            base_url: format!("{}/altru/v1", server.uri()),
            access_token: Some("tok".to_string()),
            subscription_key: Some("key".to_string()),
            timeout_secs: 5,
            ..Default::default()
        };
        HttpCrmClient::new(&config).unwrap()
    }

    fn range() -> DateRange {
        DateRange::parse("2025-01-01", "2025-01-02").unwrap()
    }

    #[tokio::test]
    async fn test_list_request_sends_auth_and_dates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/altru/v1/events"))
            .and(query_param("start_date", "2025-01-01"))
            .and(query_param("end_date", "2025-01-02"))
            .and(bearer_token("tok"))
            .and(header("Bb-Api-Subscription-Key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "value": [{"id": 1, "name": "Gala"}, {"id": "EV2"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let events = client_for(&server).await.get_events(&range()).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "EV2"]);
        assert_eq!(events[0].name.as_deref(), Some("Gala"));
    }

    #[tokio::test]
    async fn test_list_keeps_records_around_a_bad_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/altru/v1/registrants/tickets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "T1", "event_id": "EV1", "issued_at": "2025-01-01T10:00:00"},
                    {"id": "T2", "event_id": "EV1"},
                    {"id": "T3", "event_id": "EV1", "issued_at": "2025-01-01T12:00:00"}
                ]
            })))
            .mount(&server)
            .await;

        let tickets = client_for(&server).await.get_tickets(&range()).await.unwrap();
        assert_eq!(tickets.len(), 3);
        let valid = tickets.iter().filter(|t| t.validate().is_ok()).count();
        assert_eq!(valid, 2);
    }

    #[tokio::test]
    async fn test_missing_constituent_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/altru/v1/constituents/A404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = client_for(&server).await.get_constituent("A404").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_constituent_id_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/altru/v1/constituents/a%2Fb%3Fc"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "first_name": "Ada",
                "member_id": 7
            })))
            .expect(1)
            .mount(&server)
            .await;

        let constituent = client_for(&server)
            .await
            .get_constituent("a/b?c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(constituent.first_name.as_deref(), Some("Ada"));
        assert_eq!(constituent.member_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_error_status_carries_code_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/altru/v1/parkingpasses"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_parking_passes(&range())
            .await
            .unwrap_err();
        match err {
            Error::Crm(msg) => {
                assert!(msg.contains("HTTP 500"), "{}", msg);
                assert!(msg.contains("upstream exploded"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let config = CrmConfig {
            base_url: "https://crm.example.org/v1/".to_string(),
            ..Default::default()
        };
        let client = HttpCrmClient::new(&config).unwrap();
        assert_eq!(client.url("/events"), "https://crm.example.org/v1/events");
        assert_eq!(client.url("constituents/42"), "https://crm.example.org/v1/constituents/42");
    }

    #[test]
    fn test_empty_base_url_is_config_error() {
        let config = CrmConfig {
            base_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(HttpCrmClient::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_crm_error() {
        let config = CrmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = HttpCrmClient::new(&config).unwrap();
        let range = DateRange::parse("2025-01-01", "2025-01-02").unwrap();

        let err = client.get_events(&range).await.unwrap_err();
        assert!(matches!(err, Error::Crm(_)));
    }
}
