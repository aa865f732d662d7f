use std::sync::Arc;

use dossier::error::DossierError;
use dossier::tools::{
    memory_delete, memory_get, memory_save, memory_search, memory_timeline, SaveArgs, SearchArgs,
    TimelineArgs,
};
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

fn store() -> Store {
    Store::in_memory(Some(Arc::new(WordEmbedder))).unwrap()
}

/// "Saved memory mem_xxx (type): title" → "mem_xxx"
fn saved_id(msg: &str) -> String {
    assert!(msg.starts_with("Saved memory"), "unexpected save output: {msg}");
    msg.split_whitespace().nth(2).unwrap().to_string()
}

#[test]
fn progressive_disclosure_across_layers() {
    let s = store();
    let msg = memory_save(
        &s,
        SaveArgs {
            title: "Prefers async communication".into(),
            kind: "preference".into(),
            narrative: Some("Deep work blocks matter more than instant replies.".into()),
            confidence: Some(0.9),
            source: Some("explicit".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let id = saved_id(&msg);

    // Layer 1: index row only — no narrative text leaks into search output
    let out = memory_search(
        &s,
        &SearchArgs {
            query: Some("async".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(out.contains(&id));
    assert!(out.contains("preference"));
    assert!(out.contains("0.90"));
    assert!(out.contains("Prefers async communication"));
    assert!(!out.contains("Deep work blocks"));

    // Layer 3: explicit get returns the narrative
    let full = memory_get(&s, &[id.clone()]).unwrap();
    assert!(full.contains("Deep work blocks matter more than instant replies."));
    assert!(full.contains("explicit"));
}

#[test]
fn timeline_tool_renders_window() {
    let s = store();
    let first = memory_save(
        &s,
        SaveArgs {
            title: "draft launch checklist".into(),
            kind: "task".into(),
            project: Some("launch".into()),
            occurred_at: Some("2026-07-01".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let _first_id = saved_id(&first);
    let later = memory_save(
        &s,
        SaveArgs {
            title: "run launch retrospective".into(),
            kind: "task".into(),
            project: Some("launch".into()),
            occurred_at: Some("2026-07-08".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let later_id = saved_id(&later);

    let out = memory_timeline(
        &s,
        &TimelineArgs {
            anchor_id: Some(later_id),
            depth_before: Some(5),
            project: Some("launch".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let before_pos = out.find("Before:").unwrap();
    let anchor_pos = out.find("Anchor:").unwrap();
    let after_pos = out.find("After:").unwrap();
    let checklist_pos = out.find("draft launch checklist").unwrap();
    assert!(before_pos < checklist_pos && checklist_pos < anchor_pos);
    assert!(out[after_pos..].contains("(none)"), "after window should be empty");
}

#[test]
fn bad_enum_values_come_back_as_text() {
    let s = store();

    let msg = memory_save(
        &s,
        SaveArgs {
            title: "mystery record".into(),
            kind: "opinion".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(msg.contains("invalid type 'opinion'"));
    assert!(msg.contains("valid types"));

    let msg = memory_search(
        &s,
        &SearchArgs {
            kind: Some("opinion".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(msg.contains("invalid type 'opinion'"));
}

#[test]
fn out_of_range_confidence_comes_back_as_text() {
    let s = store();
    let msg = memory_save(
        &s,
        SaveArgs {
            title: "too confident".into(),
            kind: "insight".into(),
            confidence: Some(1.5),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(msg.contains("between 0.0 and 1.0"));
}

#[test]
fn get_tool_truncates_and_reports() {
    let s = store();
    let mut ids = Vec::new();
    for i in 0..25 {
        let msg = memory_save(
            &s,
            SaveArgs {
                title: format!("bulk record {i}"),
                kind: "context".into(),
                ..Default::default()
            },
        )
        .unwrap();
        ids.push(saved_id(&msg));
    }
    let out = memory_get(&s, &ids).unwrap();
    assert!(out.contains("serving the first 20"));
    assert!(out.contains("bulk record 0"));
    assert!(!out.contains("bulk record 24"));
}

#[test]
fn get_tool_reports_missing_ids() {
    let s = store();
    let msg = memory_save(
        &s,
        SaveArgs {
            title: "only real record".into(),
            kind: "context".into(),
            ..Default::default()
        },
    )
    .unwrap();
    let id = saved_id(&msg);

    let out = memory_get(&s, &[id, "mem_missing".into()]).unwrap();
    assert!(out.contains("only real record"));
    assert!(out.contains("1 of 2 ids not found"));

    let out = memory_get(&s, &[]).unwrap();
    assert!(out.contains("at least one memory id"));
}

#[test]
fn delete_tool_confirms_and_reports_missing() {
    let s = store();
    let msg = memory_save(
        &s,
        SaveArgs {
            title: "temporary note".into(),
            kind: "context".into(),
            ..Default::default()
        },
    )
    .unwrap();
    let id = saved_id(&msg);

    let out = memory_delete(&s, &id).unwrap();
    assert!(out.contains("Archived memory"));
    let out = memory_delete(&s, &id).unwrap();
    assert!(out.contains("No memory found"));

    // deleted records disappear from search output
    let out = memory_search(
        &s,
        &SearchArgs {
            query: Some("temporary".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(out.contains("No memories found"));
}

#[test]
fn search_tool_accepts_date_filters() {
    let s = store();
    memory_save(
        &s,
        SaveArgs {
            title: "old milestone".into(),
            kind: "task".into(),
            occurred_at: Some("2026-01-05".into()),
            ..Default::default()
        },
    )
    .unwrap();
    memory_save(
        &s,
        SaveArgs {
            title: "new milestone".into(),
            kind: "task".into(),
            occurred_at: Some("2026-06-05".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let out = memory_search(
        &s,
        &SearchArgs {
            query: Some("milestone".into()),
            date_start: Some("2026-03-01".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(out.contains("new milestone"));
    assert!(!out.contains("old milestone"));
}

#[test]
fn timeline_tool_reports_unresolvable_anchor() {
    let s = store();
    let out = memory_timeline(
        &s,
        &TimelineArgs {
            query: Some("nothing ever stored".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(out.contains("No anchor memory found"));
}
