//! [`RemoteAuthority`] over the board REST API
//!
//! Route map (relative to the configured base url):
//! - `GET /boards`, `GET /boards/favourites`, `GET /boards/:id`
//! - `PUT /boards` and `PUT /boards/favourites` with `{boards: [{id}]}`
//! - `PUT /boards/:b/sections` with `{sections: [{id}]}`
//! - `PUT /boards/:b/tasks/update-position` with both task lists
//! - `POST`, `PUT`, `DELETE` on boards, sections and tasks
//!
//! Section and task lists have no listing route of their own; they are read
//! out of the board record.

use crate::config::HttpConfig;
use crate::error::{classify, transport, HttpError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use taskboard_model::{EntityKind, FieldMap, Identifier};
use taskboard_sync::{
    AuthorityError, CreateRequest, EntityRef, OrderAck, OrderRequest, Record, RemoteAuthority,
    Scope,
};
use tracing::{debug, info};

/// HTTP client for the board API
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    base: Url,
}

impl HttpAuthority {
    /// Build a client from connection settings
    ///
    /// # Errors
    /// - `HttpError::InvalidConfig` or `HttpError::Url` for unusable settings
    /// - `HttpError::Token` if the token cannot be sent as a header
    /// - `HttpError::Client` if the TLS backend fails to initialize
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        config.validate()?;
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|err| HttpError::Url(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(HttpError::Url(config.base_url.clone()));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        info!(base = %base, "http authority ready");
        Ok(Self {
            client: builder.build()?,
            base,
        })
    }

    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, AuthorityError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| AuthorityError::transient("base url cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> Result<Value, AuthorityError> {
        let url = self.url(segments)?;
        debug!(%method, %url, "request");

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| transport(&err))?;
        let status = response.status();
        let text = response.text().await.map_err(|err| transport(&err))?;

        if !status.is_success() {
            let err = classify(status, &text);
            debug!(%method, %url, %status, error = %err, "request rejected");
            return Err(err);
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let mut value: Value = serde_json::from_str(&text)
            .map_err(|err| AuthorityError::transient(format!("malformed response: {err}")))?;
        normalize_ids(&mut value);
        Ok(value)
    }
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn fetch(&self, scope: Scope) -> Result<Vec<Record>, AuthorityError> {
        match &scope {
            Scope::Boards => list(self.send(Method::GET, &["boards"], None).await?),
            Scope::Favourites => {
                list(self.send(Method::GET, &["boards", "favourites"], None).await?)
            }
            Scope::Sections { board } => {
                let mut detail = self.fetch_board(board.clone()).await?;
                list(detail["sections"].take())
            }
            Scope::Tasks { board, section } => {
                let detail = self.fetch_board(board.clone()).await?;
                let sections = list(detail["sections"].clone())?;
                let mut found = sections
                    .into_iter()
                    .find(|s| s["id"].as_str() == Some(section.as_str()))
                    .ok_or_else(|| AuthorityError::NotFound(section.to_string()))?;
                list(found["tasks"].take())
            }
        }
    }

    async fn fetch_board(&self, board: Identifier) -> Result<Record, AuthorityError> {
        object(self.send(Method::GET, &["boards", board.as_str()], None).await?)
    }

    async fn persist_order(&self, request: OrderRequest) -> Result<OrderAck, AuthorityError> {
        let (segments, body): (Vec<&str>, Value) = match &request {
            OrderRequest::Reorder { scope, order, .. } => match scope {
                Scope::Boards => (vec!["boards"], json!({ "boards": refs(order) })),
                Scope::Favourites => (
                    vec!["boards", "favourites"],
                    json!({ "boards": refs(order) }),
                ),
                Scope::Sections { board } => (
                    vec!["boards", board.as_str(), "sections"],
                    json!({ "sections": refs(order) }),
                ),
                Scope::Tasks { board, section } => (
                    vec!["boards", board.as_str(), "tasks", "update-position"],
                    json!({
                        "resourceList": refs(order),
                        "destinationList": refs(order),
                        "resourceSectionId": section,
                        "destinationSectionId": section,
                    }),
                ),
            },
            OrderRequest::Transfer(transfer) => (
                vec!["boards", transfer.board.as_str(), "tasks", "update-position"],
                json!({
                    "resourceList": refs(&transfer.source_order),
                    "destinationList": refs(&transfer.destination_order),
                    "resourceSectionId": transfer.source.as_owner(),
                    "destinationSectionId": transfer.destination.as_owner(),
                }),
            ),
        };

        self.send(Method::PUT, &segments, Some(body)).await?;
        // The API does not echo orders; a success means the request was stored as sent.
        Ok(OrderAck::echo(&request))
    }

    async fn create(&self, request: CreateRequest) -> Result<Record, AuthorityError> {
        let mut body = request.seed.to_json();
        let record = match request.kind {
            EntityKind::Board => self.send(Method::POST, &["boards"], Some(body)).await?,
            EntityKind::Section => {
                let board = required(request.board.as_ref(), "board")?;
                self.send(Method::POST, &["boards", board, "sections"], Some(body))
                    .await?
            }
            EntityKind::Task => {
                let board = required(request.board.as_ref(), "board")?;
                let section = required(request.section.as_ref(), "section")?;
                body["sectionId"] = Value::from(section);
                self.send(Method::POST, &["boards", board, "tasks"], Some(body))
                    .await?
            }
        };
        object(record)
    }

    async fn update(&self, target: EntityRef, fields: FieldMap) -> Result<Record, AuthorityError> {
        let segments = entity_path(&target)?;
        let record = self
            .send(Method::PUT, &segments, Some(fields.to_json()))
            .await?;

        if record.get("id").is_some() {
            return Ok(record);
        }
        // Some routes answer with an empty body; the stored fields are the ones sent.
        let mut echoed = fields.to_json();
        echoed["id"] = Value::from(target.id.as_str());
        Ok(echoed)
    }

    async fn delete(&self, target: EntityRef) -> Result<(), AuthorityError> {
        let segments = entity_path(&target)?;
        self.send(Method::DELETE, &segments, None).await?;
        Ok(())
    }
}

fn refs(order: &[Identifier]) -> Value {
    Value::Array(order.iter().map(|id| json!({ "id": id })).collect())
}

fn required<'a>(id: Option<&'a Identifier>, what: &str) -> Result<&'a str, AuthorityError> {
    id.map(Identifier::as_str)
        .ok_or_else(|| AuthorityError::validation(format!("missing {what} id")))
}

fn entity_path(target: &EntityRef) -> Result<Vec<&str>, AuthorityError> {
    let id = target.id.as_str();
    Ok(match target.kind {
        EntityKind::Board => vec!["boards", id],
        EntityKind::Section => vec!["boards", required(target.board.as_ref(), "board")?, "sections", id],
        EntityKind::Task => vec!["boards", required(target.board.as_ref(), "board")?, "tasks", id],
    })
}

fn list(value: Value) -> Result<Vec<Record>, AuthorityError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(AuthorityError::transient(format!(
            "expected a list, got {other}"
        ))),
    }
}

fn object(value: Value) -> Result<Record, AuthorityError> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(AuthorityError::transient(format!(
            "expected a record, got {value}"
        )))
    }
}

/// Copy document `_id` keys to `id` where a record lacks one
fn normalize_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if !map.contains_key("id") {
                if let Some(id) = map.get("_id").cloned() {
                    map.insert("id".to_string(), id);
                }
            }
            map.values_mut().for_each(normalize_ids);
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_ids),
        _ => {}
    }
}
