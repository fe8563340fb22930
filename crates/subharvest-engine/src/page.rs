//! Server page decoding.
//!
//! Turns one GraphQL reply into records plus pagination verdicts: the
//! candidate next cursor (the last element's `id`, unless `pageInfo`
//! overrides it) and whether more pages are expected.

use serde_json::Value;
use subharvest_types::{Endpoint, GraphResponse, QueryKind, Record};

/// One decoded server page.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Elements skipped because they were not objects.
    pub malformed: u64,
}

/// Decode the `data[kind]` array of a reply into records.
///
/// Non-object elements are skipped and tallied. When the reply has no
/// `pageInfo`, "more pages" is inferred from a full page; the caller's
/// stuck-cursor guard remains the authoritative terminator.
#[must_use]
pub fn decode(
    response: &GraphResponse,
    kind: &QueryKind,
    endpoint: &Endpoint,
    page_size: usize,
) -> Page {
    let mut page = Page::default();
    let Some(data) = response.data.as_ref() else {
        return page;
    };

    let meta = data.get("_meta").filter(|m| m.is_object()).cloned();

    if let Some(Value::Array(items)) = data.get(kind.as_str()) {
        for item in items {
            if !item.is_object() {
                page.malformed += 1;
                continue;
            }
            let record = Record::from_element(kind, endpoint, item.clone());
            if let Some(id) = record.cursor.clone() {
                page.next_cursor = Some(id);
            }
            page.records.push(match &meta {
                Some(meta) => record.with_meta(meta.clone()),
                None => record,
            });
        }
    }

    page.has_more = !page.records.is_empty() && page.records.len() >= page_size;
    if let Some(info) = response.page_info() {
        if let Some(has_next) = info.has_next_page {
            page.has_more = has_next;
        }
        if let Some(end_cursor) = info.end_cursor.filter(|c| !c.is_empty()) {
            page.next_cursor = Some(end_cursor);
        }
    }
    page
}
