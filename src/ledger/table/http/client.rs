//! Table adapter over a SAS capability URL.
//!
//! Translates the `TableApi` calls into REST requests against an Azure-style
//! table endpoint. The SAS token travels in the query string of every
//! request, so there is no separate authentication step.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::ledger::domain::{TableEntity, UnlockedItem};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::table::api::{TableApi, TableConnector};

const ACCEPT: &str = "application/json;odata=nometadata";
const STORAGE_VERSION: &str = "2019-02-02";
const NEXT_PARTITION_HEADER: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_HEADER: &str = "x-ms-continuation-NextRowKey";

/// Characters escaped inside the quoted key literals of an entity path.
const KEY_LITERAL: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    value: Vec<TableEntity>,
}

/// Continuation token returned when a listing spans several pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Continuation {
    pub next_partition_key: String,
    pub next_row_key: Option<String>,
}

pub struct SasTableClient {
    /// Table URL without the query string.
    base: String,
    /// SAS token, the query string of the capability URL.
    sas: String,
    timeout: Duration,
    /// Built on first use so it is created on the thread that makes the calls.
    http: Mutex<Option<Client>>,
}

impl SasTableClient {
    pub fn new(sas_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(sas_url.trim())
            .map_err(|e| LedgerError::InvalidEndpoint(format!("{}", e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(LedgerError::InvalidEndpoint(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let sas = match url.query() {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => {
                return Err(LedgerError::InvalidEndpoint(
                    "missing SAS token in query string".to_string(),
                ))
            }
        };

        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);
        let base = base.as_str().trim_end_matches('/').to_string();

        log::debug!("[TABLE] using table endpoint {}", base);

        Ok(Self {
            base,
            sas,
            timeout,
            http: Mutex::new(None),
        })
    }

    pub(crate) fn entity_url(&self, partition_key: &str, row_key: &str) -> String {
        format!(
            "{}(PartitionKey='{}',RowKey='{}')?{}",
            self.base,
            key_literal(partition_key),
            key_literal(row_key),
            self.sas
        )
    }

    pub(crate) fn collection_url(
        &self,
        filter: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> String {
        let mut url = format!("{}?{}", self.base, self.sas);

        if let Some(filter) = filter {
            url.push_str("&$filter=");
            url.extend(utf8_percent_encode(filter, NON_ALPHANUMERIC));
        }

        if let Some(next) = continuation {
            url.push_str("&NextPartitionKey=");
            url.extend(utf8_percent_encode(&next.next_partition_key, NON_ALPHANUMERIC));
            if let Some(row) = &next.next_row_key {
                url.push_str("&NextRowKey=");
                url.extend(utf8_percent_encode(row, NON_ALPHANUMERIC));
            }
        }

        url
    }

    fn http(&self) -> Result<Client> {
        let mut guard = self.http.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder().timeout(self.timeout).build()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Accept", ACCEPT)
            .header("x-ms-version", STORAGE_VERSION)
            .header("DataServiceVersion", "3.0")
    }
}

impl TableApi for SasTableClient {
    fn get_entity(&self, partition_key: &str, row_key: &str) -> Result<Option<UnlockedItem>> {
        let url = self.entity_url(partition_key, row_key);
        log::trace!("[TABLE] GET entity {}/{}", partition_key, row_key);

        let response = self.request(self.http()?.get(url)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let entity: TableEntity = check(response)?.json()?;
        Ok(Some(UnlockedItem::try_from(entity)?))
    }

    fn list_entities(&self, filter: Option<&str>) -> Result<Vec<UnlockedItem>> {
        let http = self.http()?;
        let mut items = Vec::new();
        let mut continuation: Option<Continuation> = None;

        loop {
            let url = self.collection_url(filter, continuation.as_ref());
            log::trace!("[TABLE] GET list filter={:?} page={:?}", filter, continuation);

            let response = check(self.request(http.get(url)).send()?)?;
            continuation = continuation_of(&response);

            let page: ListResponse = response.json()?;
            for entity in page.value {
                items.push(UnlockedItem::try_from(entity)?);
            }

            if continuation.is_none() {
                break;
            }
        }

        log::debug!("[TABLE] listed {} entities", items.len());
        Ok(items)
    }

    fn insert_entity(&self, item: &UnlockedItem) -> Result<()> {
        let url = format!("{}?{}", self.base, self.sas);
        let body = serde_json::to_string(&item.to_entity())?;
        log::trace!("[TABLE] POST {}", body);

        let response = self
            .request(self.http()?.post(url))
            .header("Content-Type", "application/json")
            .header("Prefer", "return-no-content")
            .body(body)
            .send()?;
        check(response)?;
        Ok(())
    }

    fn delete_entity(&self, partition_key: &str, row_key: &str) -> Result<()> {
        let url = self.entity_url(partition_key, row_key);
        log::trace!("[TABLE] DELETE entity {}/{}", partition_key, row_key);

        let response = self
            .request(self.http()?.delete(url))
            .header("If-Match", "*")
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            log::debug!("[TABLE] entity {}/{} already absent", partition_key, row_key);
            return Ok(());
        }
        check(response)?;
        Ok(())
    }
}

/// Builds `SasTableClient`s from SAS URLs.
#[derive(Debug, Clone)]
pub struct HttpTableConnector {
    timeout: Duration,
}

impl HttpTableConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TableConnector for HttpTableConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn TableApi>> {
        Ok(Arc::new(SasTableClient::new(endpoint, self.timeout)?))
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    log::debug!("[TABLE] request failed ({}): {}", status, body);
    Err(LedgerError::Transport {
        status: status.as_u16(),
        body,
    })
}

fn continuation_of(response: &Response) -> Option<Continuation> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header(NEXT_PARTITION_HEADER).map(|next_partition_key| Continuation {
        next_partition_key,
        next_row_key: header(NEXT_ROW_HEADER),
    })
}

/// OData string literal: quotes doubled, then escaped for the URL path.
pub(crate) fn key_literal(key: &str) -> String {
    utf8_percent_encode(&key.replace('\'', "''"), KEY_LITERAL).to_string()
}
