//! End-to-end flows through the public API

use std::sync::Arc;

use dapp_tree::{
    diff, Alias, App, Change, ChangeReaction, Changelog, Channel, Config, ControlError, ControlPlane,
    DiffValue, Difference, FakeChannelOperator, FakeNodeOperator, JsonFilePersistence, Kind, Operation,
    OperatorCall, Persistence, Reconciler, TreeError, Type,
};
use pretty_assertions::assert_eq;

struct Harness {
    plane: ControlPlane,
    nodes: Arc<FakeNodeOperator>,
    channels: Arc<FakeChannelOperator>,
}

fn harness() -> Harness {
    let nodes = Arc::new(FakeNodeOperator::new());
    let channels = Arc::new(FakeChannelOperator::new());
    let plane = ControlPlane::new(Reconciler::new(nodes.clone(), channels.clone()));
    Harness { plane, nodes, channels }
}

fn pipeline() -> App {
    App::new("pipeline")
        .with_type(Type::new("frame", r#"{"type":"object"}"#))
        .with_channel(Channel::new("raw", "frame"))
        .with_channel(Channel::new("clean", "frame"))
        .with_app(App::new("ingest").with_node("ingest:1").with_boundary(&[], &["out"]))
        .with_app(App::new("filter").with_node("filter:1").with_boundary(&["in"], &["out"]))
        .with_alias(Alias::new("ingest.out", "raw"))
        .with_alias(Alias::new("filter.in", "raw"))
        .with_alias(Alias::new("filter.out", "clean"))
}

#[test]
fn test_image_update_scenario() {
    let origin = App::root().with_app(App::new("app1").with_node("img1"));
    let mut current = origin.clone();
    current.find_mut("app1").unwrap().spec.node.spec.image = String::from("img2");

    let log = diff(&origin, &current).unwrap();
    let expected: Changelog = vec![Change {
        context: String::from("*.app1"),
        diff: vec![Difference {
            field: String::from("Spec.Node.Spec.Image"),
            from: DiffValue::text("img1"),
            to: DiffValue::text("img2"),
            kind: Kind::NODE,
            name: String::new(),
            operation: Operation::UPDATE,
        }],
        kind: Kind::NODE,
        operation: Operation::UPDATE,
    }]
    .into();
    assert_eq!(log, expected);

    let updates = std::cell::RefCell::new(Vec::new());
    let reactions = [ChangeReaction::new(
        |c| current.find(c.scope()).is_some_and(App::is_node),
        |c| {
            let node = current.find(c.scope()).ok_or("missing node")?;
            updates.borrow_mut().push(node.spec.node.spec.image.clone());
            Ok(())
        },
    )];
    log.for_each_filtered(&reactions).unwrap();
    drop(reactions);
    assert_eq!(updates.into_inner(), vec!["img2"]);
}

#[test]
fn test_image_update_through_control_plane() {
    let h = harness();
    h.plane.create_app("", App::new("app1").with_node("img1"), false).unwrap();
    let before = h.nodes.calls().len();

    let mut app = h.plane.get_app("app1").unwrap();
    app.spec.node.spec.image = String::from("img2");
    let log = h.plane.update_app("app1", app, false).unwrap();

    assert_eq!(log.len(), 1);
    assert_eq!(log.difference_count(), 1);
    assert_eq!(
        h.nodes.calls()[before..].to_vec(),
        vec![OperatorCall::UpdateNode(String::from("app1"))]
    );
    assert_eq!(h.nodes.node("app1").unwrap().spec.node.spec.image, "img2");
}

#[test]
fn test_pipeline_deploys_and_wires() {
    let h = harness();
    let log = h.plane.create_app("", pipeline(), false).unwrap();

    // one-sided subtrees are reported as a whole
    assert_eq!(log.difference_count(), 1);
    assert_eq!(log.changes()[0].diff[0].to, DiffValue::Whole);

    assert_eq!(h.nodes.nodes(), vec!["pipeline.filter", "pipeline.ingest"]);
    assert_eq!(h.channels.channels(), vec!["pipeline.clean", "pipeline.raw"]);
    assert_eq!(
        h.plane.get_channel("pipeline", "raw").unwrap().connected_apps,
        vec!["pipeline.filter", "pipeline.ingest"]
    );
}

#[test]
fn test_retargeting_alias_updates_node() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();
    h.plane.create_channel("pipeline", Channel::new("side", "frame"), false).unwrap();
    let before = h.nodes.calls().len();

    let log = h
        .plane
        .update_alias("pipeline", Alias::new("filter.out", "side"), false)
        .unwrap();
    assert_eq!(log.changes()[0].kind, Kind::ALIAS);
    assert_eq!(
        h.nodes.calls()[before..].to_vec(),
        vec![OperatorCall::UpdateNode(String::from("pipeline.filter"))]
    );
    assert_eq!(
        h.plane.get_channel("pipeline", "side").unwrap().connected_apps,
        vec!["pipeline.filter"]
    );
}

#[test]
fn test_schema_change_updates_every_bound_node_once() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();
    let before = h.nodes.calls().len();

    h.plane
        .update_type("pipeline", Type::new("frame", r#"{"type":"array"}"#), false)
        .unwrap();
    assert_eq!(
        h.nodes.calls()[before..].to_vec(),
        vec![
            OperatorCall::UpdateNode(String::from("pipeline.filter")),
            OperatorCall::UpdateNode(String::from("pipeline.ingest")),
        ]
    );
}

#[test]
fn test_delete_pipeline_tears_down() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();
    h.plane.delete_app("pipeline", false).unwrap();

    assert!(h.nodes.nodes().is_empty());
    assert!(h.channels.channels().is_empty());
    assert!(h.plane.get_app("pipeline").is_err());
}

#[test]
fn test_dry_run_isolation() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();
    let committed = h.plane.committed();
    let revision = h.plane.revision();
    let node_calls = h.nodes.calls();
    let channel_calls = h.channels.calls();

    let log = h.plane.delete_app("pipeline", true).unwrap();
    assert_eq!(log.changes()[0].operation, Operation::DELETE);

    assert_eq!(h.plane.committed(), committed);
    assert_eq!(h.plane.revision(), revision);
    assert_eq!(h.nodes.calls(), node_calls);
    assert_eq!(h.channels.calls(), channel_calls);
}

#[test]
fn test_reconcile_failure_keeps_committed_tree() {
    let nodes = Arc::new(FakeNodeOperator::failing("registry unreachable"));
    let channels = Arc::new(FakeChannelOperator::new());
    let plane = ControlPlane::new(Reconciler::new(nodes, channels));
    let before = plane.committed();

    match plane.create_app("", pipeline(), false) {
        Err(ControlError::Reconcile(errs)) => {
            assert!(errs.to_string().contains("registry unreachable"));
        }
        other => panic!("expected reconciliation failure, got {other:?}"),
    }
    assert_eq!(plane.committed(), before);
    assert_eq!(plane.revision(), 0);
}

#[test]
fn test_invalid_mutations_are_reported() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();

    let err = h.plane.delete_channel("pipeline", "raw", false).unwrap_err();
    assert!(matches!(err, ControlError::Tree(TreeError::InUse { .. })));

    let err = h
        .plane
        .create_app("pipeline.ingest", App::new("child"), false)
        .unwrap_err();
    assert!(matches!(err, ControlError::Tree(TreeError::Multiple(_))));
    assert!(err.to_string().contains("cannot be created inside a node"));

    let err = h
        .plane
        .create_app("", App::new("bad name!"), false)
        .unwrap_err();
    assert!(matches!(err, ControlError::Tree(_)));
}

#[test]
fn test_history_and_revision_diff() {
    let h = harness();
    h.plane.create_app("", pipeline(), false).unwrap();
    let mut ingest = h.plane.get_app("pipeline.ingest").unwrap();
    ingest.spec.node.spec.replicas = 3;
    h.plane.update_app("pipeline.ingest", ingest, false).unwrap();

    let log = h.plane.diff_revisions(1, 2).unwrap();
    let change = log.get("*.pipeline.ingest").unwrap();
    assert_eq!(change.diff[0].field, "Spec.Node.Spec.Replicas");
    assert_eq!(change.diff[0].to, "3");
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.json");
    let config = Config::default().with_state_path(&path);

    let nodes = Arc::new(FakeNodeOperator::new());
    let channels = Arc::new(FakeChannelOperator::new());
    let reconciler = Reconciler::new(nodes, channels);

    let plane = ControlPlane::from_config(&config, reconciler.clone()).unwrap();
    plane.create_app("", pipeline(), false).unwrap();
    let saved = plane.committed();
    drop(plane);

    let stored = JsonFilePersistence::new(&path).load().unwrap().unwrap();
    assert_eq!(stored, saved);

    let plane = ControlPlane::from_config(&config, reconciler).unwrap();
    assert_eq!(plane.committed(), saved);
    assert!(plane.get_alias("pipeline", "filter.in").is_ok());
}

#[test]
fn test_changelog_json_wire_form() {
    let origin = App::root().with_app(App::new("a"));
    let current = origin.clone().with_app(App::new("b"));
    let log = diff(&origin, &current).unwrap();

    let json = serde_json::to_value(&log).unwrap();
    let d = &json[0]["diff"][0];
    assert_eq!(d["from"], "<nil>");
    assert_eq!(d["to"], "{...}");
    assert_eq!(d["Kind"], 1);
    assert_eq!(d["Name"], "b");
    assert_eq!(d["Operation"], 4);
    assert_eq!(json[0]["context"], "*");
    assert_eq!(json[0]["Kind"], 1);
    assert_eq!(json[0]["Operation"], 4);

    let back: Changelog = serde_json::from_value(json).unwrap();
    assert_eq!(back, log);
}
