//! Bibliographic lookup against the National Diet Library SRU endpoint,
//! used to prefill a book from its ISBN.

use crate::{
    error::{ApiError, ApiResult},
    models::book::normalize_isbn,
    settings::CatalogConfig,
};
use actix_web::web::Buf;
use anyhow::Context;
use awc::Client;
use roxmltree::Node;
use serde::Serialize;
use std::{error::Error, io::Read};

type E = Box<dyn Error>;

const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogBook {
    pub title: String,
    pub creators: Vec<String>,
    pub publishers: Vec<String>,
    pub issued_at: Option<String>,
    pub isbn: Option<String>,
    pub description: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    base_url: String,
    enabled: bool,
}

impl Catalog {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            enabled: config.enabled,
        }
    }

    pub async fn book_lookup(&self, isbn: &str) -> ApiResult<CatalogBook> {
        if !self.enabled {
            return Err(ApiError::Catalog("catalog lookup is disabled".into()));
        }
        let isbn = normalize_isbn(isbn)
            .ok_or_else(|| ApiError::bad_request(format!("invalid isbn {isbn:?}")))?;

        match self.fetch(&isbn).await {
            Ok(Some(book)) => Ok(book),
            Ok(None) => Err(ApiError::not_found(format!("no catalog record for isbn {isbn}"))),
            Err(err) => {
                tracing::warn!(%isbn, "catalog lookup failed: {err}");
                Err(ApiError::Catalog(err.to_string()))
            }
        }
    }

    async fn fetch(&self, isbn: &str) -> Result<Option<CatalogBook>, E> {
        let search_query = format!("isbn=\"{isbn}\" AND sortBy=\"issued_date/sort.descending\"");

        let mut reader = Client::default()
            .get(self.base_url.as_str())
            .query(&[
                ("operation", "searchRetrieve"),
                ("query", search_query.as_str()),
                ("maximumRecords", "1"),
                ("recordPacking", "xml"),
                ("recordSchema", "dcndl_simple"),
            ])?
            .send()
            .await?
            .body()
            .await?
            .reader();

        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let document = roxmltree::Document::parse(&text)?;
        let mut records = parse_records(document.root_element()).context("failed to parse")?;

        Ok((!records.is_empty()).then(|| records.remove(0)))
    }
}

fn texts<'a>(item: Node<'a, 'a>, tag: &'a str) -> impl Iterator<Item = String> + 'a {
    item.children()
        .filter(move |node| node.has_tag_name(tag))
        .filter_map(|node| node.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Records of an SRU `searchRetrieveResponse` in `dcndl_simple` schema.
/// `None` when the document is not such a response.
pub fn parse_records(node: Node) -> Option<Vec<CatalogBook>> {
    let records = node
        .children()
        .find(|node| node.has_tag_name("records"))?
        .children()
        .filter(|node| node.has_tag_name("record"))
        .filter_map(|node| {
            let item = node
                .children()
                .find(|node| node.has_tag_name("recordData"))?
                .children()
                .find(|node| node.has_tag_name("dc"))?;

            let title = texts(item, "title").next()?;

            let isbn = item
                .children()
                .find(|node| {
                    node.has_tag_name("identifier")
                        && node.attribute((NS_XSI, "type")) == Some("dcndl:ISBN")
                })
                .and_then(|node| node.text())
                .map(|text| normalize_isbn(text).unwrap_or_else(|| text.trim().to_string()));

            let description = texts(item, "abstract")
                .chain(texts(item, "description"))
                .collect::<Vec<_>>()
                .join("\n");

            let image_url = isbn
                .as_ref()
                .map(|text| format!("https://iss.ndl.go.jp/thumbnail/{text}"));

            Some(CatalogBook {
                title,
                creators: texts(item, "creator").collect(),
                publishers: texts(item, "publisher").collect(),
                issued_at: texts(item, "issued").next(),
                isbn,
                description,
                image_url,
            })
        })
        .collect();

    Some(records)
}
