//! Tree store and transaction manager
//!
//! Holds the committed tree and at most one staging tree. A transaction
//! clones committed into staging; entity mutations (see the `app`,
//! `channel`, `types` and `alias` modules) apply to staging only; commit
//! swaps staging in, cancel drops it.
//!
//! Each mutation runs on a copy of staging and replaces it only when the
//! whole tree still validates, so a rejected mutation leaves staging as it
//! was. After every accepted mutation the store recomputes the
//! back-references `Type::connected_channels` and `Channel::connected_apps`.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::app::{prepare_app, resolve_boundary};
use crate::diff::{diff, Changelog};
use crate::error::{EntityKind, TreeError};
use crate::history::{SnapshotHistory, DEFAULT_DEPTH};
use crate::meta::{Alias, App, Channel, Type};
use crate::scope;

/// Not-found error for an app scope
pub(crate) fn app_not_found(app_scope: &str) -> TreeError {
    let (parent, name) = app_scope.rsplit_once('.').unwrap_or(("", app_scope));
    TreeError::not_found(EntityKind::App, parent, name)
}

/// Read-only accessors over one tree snapshot
#[derive(Debug, Clone, Copy)]
pub struct TreeView<'a> {
    root: &'a App,
}

impl<'a> TreeView<'a> {
    pub fn new(root: &'a App) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &'a App {
        self.root
    }

    pub fn get_app(&self, app_scope: &str) -> Result<&'a App, TreeError> {
        self.root.find(app_scope).ok_or_else(|| app_not_found(app_scope))
    }

    pub fn get_channel(&self, app_scope: &str, name: &str) -> Result<&'a Channel, TreeError> {
        self.get_app(app_scope)?
            .spec
            .channels
            .get(name)
            .ok_or_else(|| TreeError::not_found(EntityKind::Channel, app_scope, name))
    }

    pub fn get_type(&self, app_scope: &str, name: &str) -> Result<&'a Type, TreeError> {
        self.get_app(app_scope)?
            .spec
            .types
            .get(name)
            .ok_or_else(|| TreeError::not_found(EntityKind::Type, app_scope, name))
    }

    pub fn get_alias(&self, app_scope: &str, name: &str) -> Result<&'a Alias, TreeError> {
        self.get_app(app_scope)?
            .spec
            .aliases
            .get(name)
            .ok_or_else(|| TreeError::not_found(EntityKind::Alias, app_scope, name))
    }
}

/// Committed tree, optional staging tree and revision history
#[derive(Debug, Clone)]
pub struct TreeStore {
    committed: App,
    staging: Option<App>,
    revision: u64,
    history: SnapshotHistory,
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    /// Store holding an empty root
    pub fn new() -> Self {
        let mut root = App::root();
        prepare_app(&mut root, "", None);
        Self {
            committed: root,
            staging: None,
            revision: 0,
            history: SnapshotHistory::new(DEFAULT_DEPTH),
        }
    }

    /// Store starting from an existing committed tree (e.g. loaded from disk).
    /// Names, parents, UUIDs and back-references are filled in; the tree
    /// must validate.
    pub fn with_root(mut self, mut root: App) -> Result<Self, TreeError> {
        prepare_app(&mut root, "", None);
        refresh_connections(&mut root)?;
        self.committed = root;
        self.staging = None;
        Ok(self)
    }

    /// Keep at most `depth` revisions in the history
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history = SnapshotHistory::new(depth);
        self
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn in_transaction(&self) -> bool {
        self.staging.is_some()
    }

    pub fn committed(&self) -> &App {
        &self.committed
    }

    pub fn staging(&self) -> Option<&App> {
        self.staging.as_ref()
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// View over the committed tree
    pub fn committed_view(&self) -> TreeView<'_> {
        TreeView::new(&self.committed)
    }

    /// View over the working tree: staging if a transaction is open, else committed
    pub fn view(&self) -> TreeView<'_> {
        TreeView::new(self.staging.as_ref().unwrap_or(&self.committed))
    }

    /// Open a transaction by cloning committed into staging
    pub fn init_transaction(&mut self) -> Result<(), TreeError> {
        if self.staging.is_some() {
            return Err(TreeError::TransactionInProgress);
        }
        self.staging = Some(self.committed.clone());
        debug!(revision = self.revision, "transaction started");
        Ok(())
    }

    /// Changes between committed and staging
    pub fn transaction_changes(&self) -> Result<Changelog, TreeError> {
        let staging = self.staging.as_ref().ok_or(TreeError::NoTransaction)?;
        Ok(diff(&self.committed, staging)?)
    }

    /// Make staging the committed tree and return the new revision
    pub fn commit(&mut self) -> Result<u64, TreeError> {
        let staging = self.staging.take().ok_or(TreeError::NoTransaction)?;
        let changes = match diff(&self.committed, &staging) {
            Ok(changes) => changes,
            Err(err) => {
                self.staging = Some(staging);
                return Err(err.into());
            }
        };

        if self.history.is_empty() {
            self.history.record(self.revision, &self.committed, Changelog::new())?;
        }
        let revision = self.revision + 1;
        let hash = self.history.record(revision, &staging, changes.clone())?;

        self.committed = staging;
        self.revision = revision;
        info!(revision, changes = changes.len(), hash = %hash, "transaction committed");
        Ok(revision)
    }

    /// Drop staging. No-op without a transaction.
    pub fn cancel(&mut self) {
        if self.staging.take().is_some() {
            debug!(revision = self.revision, "transaction canceled");
        }
    }

    /// Diff two retained revisions
    pub fn diff_revisions(&self, from: u64, to: u64) -> Result<Changelog, TreeError> {
        let a = self.history.get(from).ok_or(TreeError::UnknownRevision(from))?;
        let b = self.history.get(to).ok_or(TreeError::UnknownRevision(to))?;
        Ok(diff(&a.tree, &b.tree)?)
    }

    /// Apply `op` to a copy of staging and keep the copy if the resulting
    /// tree validates. `op` also receives the committed tree.
    pub(crate) fn mutate<F>(&mut self, op: F) -> Result<(), TreeError>
    where
        F: FnOnce(&App, &mut App) -> Result<(), TreeError>,
    {
        let staging = self.staging.as_ref().ok_or(TreeError::NoTransaction)?;
        let mut next = staging.clone();
        let result = op(&self.committed, &mut next).and_then(|()| refresh_connections(&mut next));
        match result {
            Ok(()) => {
                self.staging = Some(next);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "staging mutation rejected");
                Err(err)
            }
        }
    }
}

/// Recompute `connected_channels` of every type and `connected_apps` of
/// every channel. Fails if a channel names a missing type or a node
/// boundary does not resolve to a channel.
pub(crate) fn refresh_connections(root: &mut App) -> Result<(), TreeError> {
    link_types(root, "")?;

    let mut nodes = Vec::new();
    for child in root.spec.apps.values() {
        collect_nodes(child, "", &mut nodes);
    }

    let mut links: BTreeSet<(String, String, String)> = BTreeSet::new();
    for (node_scope, boundary) in &nodes {
        for name in boundary {
            let (owner, channel) = resolve_boundary(root, node_scope, name)?;
            links.insert((owner, channel, node_scope.clone()));
        }
    }

    clear_connected_apps(root);
    for (owner, channel, node_scope) in links {
        if let Some(ch) = root
            .find_mut(&owner)
            .and_then(|app| app.spec.channels.get_mut(&channel))
        {
            ch.connected_apps.push(node_scope);
        }
    }
    Ok(())
}

fn link_types(app: &mut App, app_scope: &str) -> Result<(), TreeError> {
    for ty in app.spec.types.values_mut() {
        ty.connected_channels.clear();
    }
    for (name, channel) in &app.spec.channels {
        let ty = app.spec.types.get_mut(&channel.spec.type_name).ok_or_else(|| {
            TreeError::InvalidChannel(format!(
                "channel '{name}' in '{app_scope}' references unknown type '{}'",
                channel.spec.type_name
            ))
        })?;
        ty.connected_channels.push(name.clone());
    }
    for (name, child) in app.spec.apps.iter_mut() {
        link_types(child, &scope::join(app_scope, name))?;
    }
    Ok(())
}

fn collect_nodes(app: &App, parent: &str, out: &mut Vec<(String, Vec<String>)>) {
    let app_scope = scope::join(parent, &app.meta.name);
    if app.is_node() {
        let names = app.spec.boundary.names().into_iter().map(String::from).collect();
        out.push((app_scope.clone(), names));
    }
    for child in app.spec.apps.values() {
        collect_nodes(child, &app_scope, out);
    }
}

fn clear_connected_apps(app: &mut App) {
    for channel in app.spec.channels.values_mut() {
        channel.connected_apps.clear();
    }
    for child in app.spec.apps.values_mut() {
        clear_connected_apps(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Kind, Operation};
    use crate::meta::{App, Channel, Type};
    use pretty_assertions::assert_eq;

    fn wired() -> App {
        App::root().with_app(
            App::new("a")
                .with_type(Type::new("t", "s"))
                .with_channel(Channel::new("ch", "t"))
                .with_app(App::new("n").with_node("img").with_boundary(&["ch"], &[])),
        )
    }

    #[test]
    fn test_transaction_required() {
        let mut store = TreeStore::new();
        assert!(matches!(store.transaction_changes(), Err(TreeError::NoTransaction)));
        assert!(matches!(store.commit(), Err(TreeError::NoTransaction)));
        assert!(matches!(
            store.create_app("", App::new("x")),
            Err(TreeError::NoTransaction)
        ));
    }

    #[test]
    fn test_nested_transaction_refused() {
        let mut store = TreeStore::new();
        store.init_transaction().unwrap();
        assert!(matches!(store.init_transaction(), Err(TreeError::TransactionInProgress)));
    }

    #[test]
    fn test_empty_transaction_has_no_changes() {
        let mut store = TreeStore::new().with_root(wired()).unwrap();
        store.init_transaction().unwrap();
        assert!(store.transaction_changes().unwrap().is_empty());
    }

    #[test]
    fn test_commit_replaces_committed_and_bumps_revision() {
        let mut store = TreeStore::new();
        store.init_transaction().unwrap();
        store.create_app("", App::new("x")).unwrap();
        assert!(store.committed().find("x").is_none());

        let rev = store.commit().unwrap();
        assert_eq!(rev, 1);
        assert_eq!(store.revision(), 1);
        assert!(!store.in_transaction());
        assert!(store.committed().find("x").is_some());
        assert_eq!(store.history().revisions(), vec![0, 1]);
    }

    #[test]
    fn test_cancel_restores_committed_view() {
        let mut store = TreeStore::new().with_root(wired()).unwrap();
        let before = store.committed().clone();
        store.init_transaction().unwrap();
        store.delete_app("a.n").unwrap();
        assert!(store.view().get_app("a.n").is_err());
        assert!(store.committed_view().get_app("a.n").is_ok());

        store.cancel();
        store.cancel();
        assert_eq!(store.committed(), &before);
        assert!(store.view().get_app("a.n").is_ok());
    }

    #[test]
    fn test_connections_recomputed_on_load() {
        let store = TreeStore::new().with_root(wired()).unwrap();
        let view = store.committed_view();
        assert_eq!(view.get_channel("a", "ch").unwrap().connected_apps, vec!["a.n"]);
        assert_eq!(view.get_type("a", "t").unwrap().connected_channels, vec!["ch"]);
    }

    #[test]
    fn test_unresolvable_boundary_rejected_on_load() {
        let broken = App::root().with_app(App::new("n").with_node("img").with_boundary(&["nope"], &[]));
        assert!(matches!(
            TreeStore::new().with_root(broken),
            Err(TreeError::InvalidBoundary(_))
        ));
    }

    #[test]
    fn test_rejected_mutation_leaves_staging_untouched() {
        let mut store = TreeStore::new().with_root(wired()).unwrap();
        store.init_transaction().unwrap();
        let before = store.staging().cloned();
        let err = store.create_channel("a", Channel::new("bad", "missing"));
        assert!(matches!(err, Err(TreeError::InvalidChannel(_))));
        assert_eq!(store.staging().cloned(), before);
    }

    #[test]
    fn test_view_errors_name_the_entity() {
        let store = TreeStore::new().with_root(wired()).unwrap();
        let view = store.committed_view();
        let err = view.get_app("a.zz").unwrap_err();
        assert_eq!(err.to_string(), "dApp 'zz' not found in scope 'a'");
        let err = view.get_channel("a", "zz").unwrap_err();
        assert_eq!(err.to_string(), "channel 'zz' not found in scope 'a'");
        assert!(view.get_alias("a", "n.ch").is_err());
    }

    #[test]
    fn test_diff_revisions() {
        let mut store = TreeStore::new().with_root(wired()).unwrap();
        store.init_transaction().unwrap();
        let mut updated = store.view().get_app("a.n").unwrap().clone();
        updated.spec.node.spec.image = String::from("img2");
        store.update_app("a.n", updated).unwrap();
        store.commit().unwrap();

        let log = store.diff_revisions(0, 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.changes()[0].context, "*.a.n");
        assert_eq!(log.changes()[0].kind, Kind::NODE);
        assert_eq!(log.changes()[0].operation, Operation::UPDATE);
        assert!(matches!(store.diff_revisions(0, 9), Err(TreeError::UnknownRevision(9))));
    }

    #[test]
    fn test_history_depth_bounds_revisions() {
        let mut store = TreeStore::new().with_history_depth(2);
        for name in ["a", "b", "c"] {
            store.init_transaction().unwrap();
            store.create_app("", App::new(name)).unwrap();
            store.commit().unwrap();
        }
        assert_eq!(store.history().revisions(), vec![2, 3]);
        assert_eq!(store.history().latest().unwrap().changes.len(), 1);
    }
}
