// src/feed/mod.rs
pub mod atom;
pub mod filter;
pub mod types;

use crate::feed::filter::KeywordFilter;
use crate::feed::types::{FeedProvider, Item};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_items_total", "Items parsed from feed providers.");
        describe_counter!(
            "feed_filtered_total",
            "Items dropped by the keyword filter."
        );
        describe_counter!("feed_provider_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Normalize a title: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Fetch every provider once, drop items the keyword filter rejects, and return
/// the survivors oldest-first. A failing provider is logged and skipped.
pub async fn collect(providers: &[Box<dyn FeedProvider>], filter: &KeywordFilter) -> Vec<Item> {
    ensure_metrics_described();

    let mut raw = Vec::new();
    for p in providers {
        match p.fetch_latest().await {
            Ok(mut v) => raw.append(&mut v),
            Err(e) => {
                tracing::warn!(error = ?e, source = %p.source(), "feed provider error");
                counter!("feed_provider_errors_total").increment(1);
            }
        }
    }

    let (kept, filtered) = filter_and_order(raw, filter);
    counter!("feed_filtered_total").increment(filtered as u64);
    kept
}

/// Keyword filter + stable oldest-first ordering. Identical ids reported by
/// two providers (a video in both a channel and a playlist feed) are kept once.
pub fn filter_and_order(raw: Vec<Item>, filter: &KeywordFilter) -> (Vec<Item>, usize) {
    let mut filtered = 0usize;
    let mut ids = HashSet::new();
    let mut kept = Vec::with_capacity(raw.len());
    for item in raw {
        if !filter.matches(&item.title) {
            filtered += 1;
            continue;
        }
        if ids.insert(item.id.clone()) {
            kept.push(item);
        }
    }
    kept.sort_by_key(|it| it.published_at);
    (kept, filtered)
}
