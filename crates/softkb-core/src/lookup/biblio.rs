//! Bibliographic reference resolution
//!
//! A reference is resolved by trying, in order: biblio-glutton with a DOI,
//! PMID, PMC id or ISTEX id; Crossref by DOI; biblio-glutton with title and
//! first author (plus the raw string when known); and finally biblio-glutton
//! with the raw string alone and post-validation. The first success wins.

use serde_json::Value as Json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::{ApiRequest, WebApi};
use crate::config::LookupConfig;

const GLUTTON: &str = "biblio-glutton";
const CROSSREF: &str = "crossref";

/// What is known about a reference to resolve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BiblioQuery {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub istex_id: Option<String>,
    pub title: Option<String>,
    pub first_author: Option<String>,
    /// Raw reference string
    pub raw: Option<String>,
}

impl BiblioQuery {
    pub fn is_empty(&self) -> bool {
        [
            &self.doi,
            &self.pmid,
            &self.pmcid,
            &self.istex_id,
            &self.title,
            &self.first_author,
            &self.raw,
        ]
        .iter()
        .all(|field| present(field).is_none())
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Resolver running the lookup fallback chain against a [`WebApi`]
#[derive(Clone)]
pub struct BiblioResolver {
    api: Arc<dyn WebApi>,
    glutton_url: String,
    crossref_base: String,
    crossref_email: Option<String>,
}

impl BiblioResolver {
    pub fn new(
        api: Arc<dyn WebApi>,
        glutton_url: impl Into<String>,
        crossref_base: impl Into<String>,
    ) -> Self {
        Self {
            api,
            glutton_url: glutton_url.into(),
            crossref_base: crossref_base.into(),
            crossref_email: None,
        }
    }

    pub fn from_config(api: Arc<dyn WebApi>, config: &LookupConfig) -> Self {
        Self::new(api, &config.biblio_glutton_url, &config.crossref_base)
            .with_crossref_email(config.crossref_email.clone())
    }

    pub fn with_crossref_email(mut self, email: Option<String>) -> Self {
        self.crossref_email = email;
        self
    }

    /// Resolve a reference to its bibliographic record
    ///
    /// Service failures are logged and the next fallback is tried. The
    /// `reference` list of the record, when present, is dropped.
    pub async fn lookup(&self, query: &BiblioQuery) -> Option<Json> {
        let mut result = None;

        let strong_ids = [
            ("doi", present(&query.doi)),
            ("pmid", present(&query.pmid)),
            ("pmc", present(&query.pmcid)),
            ("istexid", present(&query.istex_id)),
        ];
        for (param, value) in strong_ids {
            let Some(value) = value else { continue };
            let request = ApiRequest::new(&self.glutton_url).param(param, value);
            result = self.call(GLUTTON, request).await;
            if result.is_some() {
                break;
            }
        }

        if result.is_none() {
            if let Some(doi) = present(&query.doi) {
                result = self
                    .call(CROSSREF, self.crossref_request(doi))
                    .await
                    .and_then(|mut data| data.get_mut("message").map(Json::take));
            }
        }

        if result.is_none() {
            let title_author = (present(&query.title), present(&query.first_author));
            if let (Some(title), Some(author)) = title_author {
                let mut request = ApiRequest::new(&self.glutton_url);
                if let Some(raw) = present(&query.raw) {
                    request = request.param("biblio", raw);
                }
                request = request.param("atitle", title).param("firstAuthor", author);
                result = self.call(GLUTTON, request).await;
            }
        }

        if result.is_none() {
            if let Some(raw) = present(&query.raw) {
                let request = ApiRequest::new(&self.glutton_url)
                    .param("biblio", raw)
                    .param("postValidate", "true");
                result = self.call(GLUTTON, request).await;
            }
        }

        let mut record = result?;
        if let Some(fields) = record.as_object_mut() {
            fields.remove("reference");
        }
        Some(record)
    }

    fn crossref_request(&self, doi: &str) -> ApiRequest {
        let base = self.crossref_base.trim_end_matches('/');
        let request = ApiRequest::new(format!("{}/works/{}", base, doi));
        match &self.crossref_email {
            Some(email) => request.header("User-Agent", format!("softkb (mailto:{})", email)),
            None => request,
        }
    }

    async fn call(&self, service: &str, request: ApiRequest) -> Option<Json> {
        match self.api.get(&request).await {
            Ok(response) if response.is_success() => {
                debug!(service, url = %request.url, "Reference resolved");
                response.data
            }
            Ok(response) => {
                debug!(
                    service,
                    url = %request.url,
                    status = response.status,
                    "Reference not found"
                );
                None
            }
            Err(e) => {
                warn!(
                    service,
                    url = %request.url,
                    error = %e,
                    "Lookup failed, trying next fallback"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for BiblioResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiblioResolver")
            .field("glutton_url", &self.glutton_url)
            .field("crossref_base", &self.crossref_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::lookup::ApiResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers only the requests accepted by `answer`, recording every call
    struct ScriptedApi {
        calls: Mutex<Vec<ApiRequest>>,
        answer: fn(&ApiRequest) -> Result<ApiResponse>,
    }

    impl ScriptedApi {
        fn new(answer: fn(&ApiRequest) -> Result<ApiResponse>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                answer,
            })
        }

        fn calls(&self) -> Vec<ApiRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebApi for ScriptedApi {
        async fn get(&self, request: &ApiRequest) -> Result<ApiResponse> {
            self.calls.lock().unwrap().push(request.clone());
            (self.answer)(request)
        }
    }

    fn resolver(api: Arc<ScriptedApi>) -> BiblioResolver {
        BiblioResolver::new(api, "http://glutton/lookup", "https://crossref")
            .with_crossref_email(Some("kb@example.org".to_string()))
    }

    #[tokio::test]
    async fn test_fallback_order() {
        let api = ScriptedApi::new(|_| Ok(ApiResponse::failed(404)));
        let query = BiblioQuery {
            doi: Some("10.1/x".to_string()),
            pmid: Some("123".to_string()),
            pmcid: Some("PMC9".to_string()),
            istex_id: Some("ABC".to_string()),
            title: Some("A title".to_string()),
            first_author: Some("Smith".to_string()),
            raw: Some("Smith. A title. 2020".to_string()),
        };

        assert!(resolver(api.clone()).lookup(&query).await.is_none());

        let calls = api.calls();
        let steps: Vec<String> = calls
            .iter()
            .map(|c| {
                let names: Vec<&str> = c.params.iter().map(|(name, _)| name.as_str()).collect();
                format!("{}?{}", c.url, names.join("&"))
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                "http://glutton/lookup?doi",
                "http://glutton/lookup?pmid",
                "http://glutton/lookup?pmc",
                "http://glutton/lookup?istexid",
                "https://crossref/works/10.1/x?",
                "http://glutton/lookup?biblio&atitle&firstAuthor",
                "http://glutton/lookup?biblio&postValidate",
            ]
        );
        assert_eq!(calls[4].headers[0].1, "softkb (mailto:kb@example.org)");
    }

    #[tokio::test]
    async fn test_first_success_wins_and_reference_is_dropped() {
        let api = ScriptedApi::new(|request| match request.get_param("pmid") {
            Some(_) => Ok(ApiResponse::ok(json!({"title": "Found", "reference": [1, 2]}))),
            None => Ok(ApiResponse::failed(404)),
        });
        let query = BiblioQuery {
            doi: Some("10.1/x".to_string()),
            pmid: Some("123".to_string()),
            raw: Some("raw".to_string()),
            ..BiblioQuery::default()
        };

        let record = resolver(api.clone()).lookup(&query).await.unwrap();
        assert_eq!(record, json!({"title": "Found"}));
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_crossref_message_and_failures() {
        let api = ScriptedApi::new(|request| {
            if request.url.starts_with("https://crossref") {
                Ok(ApiResponse::ok(json!({"status": "ok", "message": {"DOI": "10.1/x"}})))
            } else {
                Err(Error::lookup("biblio-glutton", "connection refused"))
            }
        });
        let query = BiblioQuery {
            doi: Some("10.1/x".to_string()),
            ..BiblioQuery::default()
        };

        let record = resolver(api).lookup(&query).await.unwrap();
        assert_eq!(record, json!({"DOI": "10.1/x"}));
    }

    #[tokio::test]
    async fn test_title_without_author_is_not_queried() {
        let api = ScriptedApi::new(|_| Ok(ApiResponse::failed(404)));
        let query = BiblioQuery {
            title: Some("Only a title".to_string()),
            ..BiblioQuery::default()
        };
        assert!(!query.is_empty());
        assert!(resolver(api.clone()).lookup(&query).await.is_none());
        assert!(api.calls().is_empty());
        assert!(BiblioQuery::default().is_empty());
    }
}
