use std::path::Path;

use kotoba::build::{BuildOptions, build};
use kotoba::container::{
    CONTAINER_VERSION, ColumnLayout, ColumnType, Container, Layout, Row, Table, TableData,
    TableLayout, Value, decode, encode,
};
use kotoba::merge::{FieldKey, MergeResult};
use kotoba::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn layout() -> Layout {
    Layout::new(vec![TableLayout::new(
        "text",
        vec![
            ColumnLayout::key("id", ColumnType::U32),
            ColumnLayout::plain("category", ColumnType::U16),
            ColumnLayout::text("text"),
        ],
    )])
    .unwrap()
}

fn container(rows: &[(u32, &str)]) -> Vec<u8> {
    let layout = layout();
    encode(&Container {
        version: CONTAINER_VERSION,
        tables: vec![Table {
            name: "text".into(),
            data: TableData::Rows {
                layout: layout.tables[0].clone(),
                rows: rows
                    .iter()
                    .map(|(id, text)| {
                        Row::new(vec![
                            Value::U32(*id),
                            Value::U16(*id as u16 * 10),
                            Value::Text((*text).to_string()),
                        ])
                    })
                    .collect(),
            },
        }],
    })
    .unwrap()
}

/// Write a container upstream and dump it into the workspace
fn dump_rows(workspace: &Workspace, dir: &Path, rows: &[(u32, &str)]) -> MergeResult {
    let path = dir.join("master.mdb");
    std::fs::write(&path, container(rows)).unwrap();
    let report = dump(
        workspace,
        &path,
        &layout(),
        &DumpOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(report.outcomes.is_empty());
    report.merge
}

fn text() -> AssetId {
    AssetId::table("text")
}

fn key(field: &str) -> FieldKey {
    FieldKey::new(&text(), field)
}

fn entry(workspace: &Workspace, field: &str) -> Entry {
    workspace
        .read(|state| state.entry(&text(), field).cloned())
        .unwrap()
}

#[test]
fn test_scenario_a_translate_and_build() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "World")]);
    workspace.edit(&text(), "1/text", "Bonjour").unwrap();

    let out = dir.path().join("build");
    let report = build(&workspace, &BuildOptions::new(&out), &CancelToken::new())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(report.substituted, 1);

    let source = decode(&container(&[(1, "Hello"), (2, "World")]), &layout()).unwrap();
    let rebuilt = decode(&std::fs::read(out.join("master/master.mdb")).unwrap(), &layout()).unwrap();
    let rows = rebuilt.table("text").unwrap().rows();
    assert_eq!(rows[0].get(2), Some(&Value::Text("Bonjour".into())));
    assert_eq!(rows[1], source.table("text").unwrap().rows()[1]);
}

#[test]
fn test_build_preserves_shape() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    let upstream = [(1, "Hello"), (2, "World"), (3, "Again")];
    dump_rows(&workspace, dir.path(), &upstream);
    workspace.edit(&text(), "2/text", "Monde entier").unwrap();
    workspace.edit(&text(), "3/text", "Encore").unwrap();

    let out = dir.path().join("build");
    build(&workspace, &BuildOptions::new(&out), &CancelToken::new())
        .unwrap()
        .into_result()
        .unwrap();

    let source = decode(&container(&upstream), &layout()).unwrap();
    let rebuilt = decode(&std::fs::read(out.join("master/master.mdb")).unwrap(), &layout()).unwrap();
    assert_eq!(rebuilt.tables.len(), source.tables.len());
    let (before, after) = (source.table("text").unwrap(), rebuilt.table("text").unwrap());
    assert_eq!(after.row_count(), before.row_count());
    for (old, new) in before.rows().iter().zip(after.rows()) {
        // Only the text column may differ
        assert_eq!(old.get(0), new.get(0));
        assert_eq!(old.get(1), new.get(1));
    }
}

#[test]
fn test_scenario_b_upstream_change() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "World")]);
    workspace.edit(&text(), "1/text", "Bonjour").unwrap();
    workspace.edit(&text(), "2/text", "Monde").unwrap();

    let result = dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "Earth")]);
    assert_eq!(result.changed, vec![key("2/text")]);
    assert!(result.added.is_empty());
    assert!(result.removed.is_empty());

    let changed = entry(&workspace, "2/text");
    assert_eq!(changed.source_text, "Earth");
    assert_eq!(changed.translated_text, "Monde");
    assert_eq!(changed.status, Status::Untranslated);

    let untouched = entry(&workspace, "1/text");
    assert_eq!(untouched.translated_text, "Bonjour");
    assert_eq!(untouched.status, Status::Manual);
}

#[test]
fn test_scenario_c_upstream_removal() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "World")]);
    workspace.edit(&text(), "2/text", "Monde").unwrap();

    let result = dump_rows(&workspace, dir.path(), &[(1, "Hello")]);
    assert_eq!(result.removed, vec![key("2/text")]);
    let orphan = entry(&workspace, "2/text");
    assert!(orphan.orphaned);
    assert_eq!(orphan.translated_text, "Monde");

    // Not reported again, and kept until confirmed
    let again = dump_rows(&workspace, dir.path(), &[(1, "Hello")]);
    assert!(!again.has_changes());
    assert!(workspace.read(|s| s.entry(&text(), "2/text").is_some()));

    // Orphans are not built
    let report = build(
        &workspace,
        &BuildOptions::new(dir.path().join("build")),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(report.committed);
    assert_eq!(report.substituted, 0);

    assert_eq!(workspace.confirm_orphans(Some(&text()), None).unwrap(), 1);
    assert!(workspace.read(|s| s.entry(&text(), "2/text").is_none()));
}

#[test]
fn test_scenario_d_sync_with_nothing_listening() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello")]);
    workspace.edit(&text(), "1/text", "Bonjour").unwrap();
    let report = build(
        &workspace,
        &BuildOptions::new(dir.path().join("build")),
        &CancelToken::new(),
    )
    .unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let client = SyncClient::new(kotoba::sync::SyncConfig {
        url,
        ..Default::default()
    })
    .unwrap();

    let outcome = client.notify(&report.changed_assets, report.generation);
    assert_eq!(outcome, SyncOutcome::ConnectionRefused);
    assert!(report.committed);
}

#[test]
fn test_merge_idempotence() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    let rows = [(1, "Hello"), (2, "World")];
    let first = dump_rows(&workspace, dir.path(), &rows);
    assert_eq!(first.added.len(), 2);

    let second = dump_rows(&workspace, dir.path(), &rows);
    assert!(!second.has_changes());
    assert_eq!(second.unchanged.len(), 2);
}

#[test]
fn test_autofill_idempotent_and_respects_manual() {
    let dir = tempdir().unwrap();
    let workspace = Workspace::open_or_create(dir.path().join("ws")).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "World"), (3, "Hello")]);
    workspace.edit(&text(), "1/text", "Bonjour").unwrap();
    workspace.edit(&text(), "2/text", "Monde").unwrap();

    let rules = vec![Rule::Duplicates {
        name: None,
        scope: None,
    }];
    let report = autofill(&workspace, &rules, &CancelToken::new()).unwrap();
    assert_eq!(report.filled, 1);
    let filled = entry(&workspace, "3/text");
    assert_eq!(filled.translated_text, "Bonjour");
    assert_eq!(filled.status, Status::MachineFilled);

    let again = autofill(&workspace, &rules, &CancelToken::new()).unwrap();
    assert_eq!(again.filled, 0);
    let manual = entry(&workspace, "2/text");
    assert_eq!(manual.translated_text, "Monde");
    assert_eq!(manual.status, Status::Manual);
}

#[test]
fn test_edit_keeps_unknown_fields_on_disk() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("ws");
    let workspace = Workspace::open_or_create(&root).unwrap();
    dump_rows(&workspace, dir.path(), &[(1, "Hello"), (2, "World")]);
    drop(workspace);

    // Another tool annotates the file
    let path = root.join(text().workspace_path());
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    json["reviewer_notes"] = "check tone".into();
    json["entries"][0]["comment"] = serde_json::json!({"by": "editor"});
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

    let workspace = Workspace::open(&root).unwrap();
    workspace.edit(&text(), "1/text", "Bonjour").unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["reviewer_notes"], "check tone");
    assert_eq!(json["entries"][0]["comment"]["by"], "editor");
    assert_eq!(json["entries"][0]["translated_text"], "Bonjour");
}
