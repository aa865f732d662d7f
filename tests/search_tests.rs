use std::sync::Arc;

use dossier::db::{DateOrder, MemoryType, NewMemory};
use dossier::error::DossierError;
use dossier::search::SearchRequest;
use dossier::vec::Embedder;
use dossier::Store;

struct WordEmbedder;

impl Embedder for WordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, DossierError> {
        let mut v = vec![0.0f32; 64];
        for word in text.to_lowercase().split_whitespace() {
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100_0000_01b3);
            }
            v[(h % 64) as usize] += 1.0;
        }
        Ok(v)
    }
}

/// Always-failing embedder for degradation tests.
struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, DossierError> {
        Err(DossierError::Index("embedding backend offline".into()))
    }
}

fn store() -> Store {
    Store::in_memory(Some(Arc::new(WordEmbedder))).unwrap()
}

#[test]
fn keyword_hits_outrank_semantic_hits() {
    let s = store();
    // A matches the full query through FTS; B only shares "async", so it is
    // reachable through the semantic branch alone.
    let a = s
        .save(NewMemory::new("Prefers async communication", MemoryType::Preference))
        .unwrap();
    let b = s
        .save(NewMemory::new("Enjoys async standups", MemoryType::Preference))
        .unwrap();

    let hits = s.search(SearchRequest::with_query("async communication", 10));
    let positions: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();

    assert_eq!(hits.iter().filter(|h| h.id == a.id).count(), 1, "no duplicates");
    assert_eq!(positions[0], a.id, "keyword match must come first");
    assert!(positions.contains(&b.id.as_str()), "semantic-only hit appended");
}

#[test]
fn merged_results_deduplicate_by_id() {
    let s = store();
    let rec = s
        .save(NewMemory::new("weekly planning ritual", MemoryType::Schedule))
        .unwrap();
    // matches both branches
    let hits = s.search(SearchRequest::with_query("weekly planning", 10));
    assert_eq!(hits.iter().filter(|h| h.id == rec.id).count(), 1);
}

#[test]
fn malformed_query_is_served_not_raised() {
    let s = store();
    s.save(NewMemory::new("tracks rust conference talks", MemoryType::Insight))
        .unwrap();
    for q in ["\"rust", "rust AND (", "NEAR(", "(((", "AND"] {
        // must not panic and must not silently drop the whole call
        let _ = s.search(SearchRequest::with_query(q, 10));
    }
    // the literal-phrase fallback still finds real tokens
    let hits = s.search(SearchRequest::with_query("\"rust", 10));
    assert_eq!(hits.len(), 1);
}

#[test]
fn broken_semantic_branch_degrades_to_keyword() {
    let s = Store::in_memory(Some(Arc::new(BrokenEmbedder))).unwrap();
    s.save(NewMemory::new("drinks green tea daily", MemoryType::Personal))
        .unwrap();
    let hits = s.search(SearchRequest::with_query("tea", 10));
    assert_eq!(hits.len(), 1, "keyword search must survive a dead vector index");
}

#[test]
fn no_embedder_still_serves_keyword_results() {
    let s = Store::in_memory(None).unwrap();
    s.save(NewMemory::new("collects vinyl records", MemoryType::Personal))
        .unwrap();
    let hits = s.search(SearchRequest::with_query("vinyl", 10));
    assert_eq!(hits.len(), 1);
}

#[test]
fn no_confidence_floor_is_applied() {
    let s = store();
    s.save(NewMemory::new("barely remembered detail", MemoryType::Context).confidence(0.05))
        .unwrap();
    s.save(NewMemory::new("firmly remembered detail", MemoryType::Context).confidence(0.95))
        .unwrap();
    let hits = s.search(SearchRequest::with_query("remembered detail", 10));
    assert_eq!(hits.len(), 2, "confidence filtering is the caller's job");
}

#[test]
fn type_filter_applies_to_both_branches() {
    let s = store();
    s.save(NewMemory::new("standup moved to mornings", MemoryType::Schedule))
        .unwrap();
    s.save(NewMemory::new("standup notes are terse", MemoryType::Chat))
        .unwrap();
    let hits = s.search(SearchRequest {
        query: Some("standup".into()),
        kind: Some(MemoryType::Schedule),
        limit: 10,
        ..Default::default()
    });
    assert!(hits.iter().all(|h| h.kind == MemoryType::Schedule));
    assert_eq!(hits.len(), 1);
}

#[test]
fn layer_one_rows_are_compact() {
    let s = store();
    let saved = s
        .save(
            NewMemory::new("keeps a detailed journal", MemoryType::Personal)
                .narrative("Writes three pages every morning before checking any messages.")
                .project("habits"),
        )
        .unwrap();
    let hits = s.search(SearchRequest::with_query("journal", 10));
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.id, saved.id);
    assert_eq!(hit.kind, MemoryType::Personal);
    assert_eq!(hit.project.as_deref(), Some("habits"));
    // IndexEntry carries no narrative/facts fields at all; the JSON form
    // stays within the Layer 1 budget
    let json = serde_json::to_string(hit).unwrap();
    assert!(!json.contains("three pages"));
}

#[test]
fn queryless_search_lists_by_date() {
    let s = store();
    let base = 1_700_000_000_000i64;
    for (i, title) in ["first event", "second event", "third event"].iter().enumerate() {
        s.save(
            NewMemory::new(*title, MemoryType::Schedule).occurred_at(base + i as i64 * 86_400_000),
        )
        .unwrap();
    }
    let newest_first = s.search(SearchRequest {
        limit: 10,
        ..Default::default()
    });
    assert_eq!(newest_first[0].title, "third event");

    let oldest_first = s.search(SearchRequest {
        order: DateOrder::Asc,
        limit: 10,
        ..Default::default()
    });
    assert_eq!(oldest_first[0].title, "first event");
}

#[test]
fn date_range_filters_apply() {
    let s = store();
    let base = 1_700_000_000_000i64;
    for i in 0..5 {
        s.save(
            NewMemory::new(format!("milestone {i}"), MemoryType::Task)
                .occurred_at(base + i * 86_400_000),
        )
        .unwrap();
    }
    let hits = s.search(SearchRequest {
        query: Some("milestone".into()),
        date_start: Some(base + 86_400_000),
        date_end: Some(base + 3 * 86_400_000),
        limit: 10,
        ..Default::default()
    });
    assert_eq!(hits.len(), 3);
}

#[test]
fn offset_paginates_merged_results() {
    let s = store();
    for i in 0..8 {
        s.save(NewMemory::new(format!("pagination target {i}"), MemoryType::Context))
            .unwrap();
    }
    let page1 = s.search(SearchRequest {
        query: Some("pagination target".into()),
        limit: 5,
        ..Default::default()
    });
    let page2 = s.search(SearchRequest {
        query: Some("pagination target".into()),
        limit: 5,
        offset: 5,
        ..Default::default()
    });
    assert_eq!(page1.len(), 5);
    assert_eq!(page2.len(), 3);
    for h in &page2 {
        assert!(!page1.iter().any(|p| p.id == h.id), "pages must not overlap");
    }
}
