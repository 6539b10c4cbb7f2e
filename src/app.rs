//! dApp mutations on the staging tree
//!
//! Create, update and delete apps, plus the structural checks applied to
//! every app definition entering the tree and the boundary resolution used
//! to bind compute nodes to channels.

use tracing::info;
use uuid::Uuid;

use crate::alias::validate_alias;
use crate::channel::validate_channel;
use crate::error::{EntityKind, MultiError, TreeError};
use crate::meta::{App, Metadata};
use crate::scope::{self, structure_name_is_valid};
use crate::store::{app_not_found, TreeStore};
use crate::types::validate_type;

impl TreeStore {
    /// Stage `app` (with its whole subtree) as a child of the app at `scope`
    pub fn create_app(&mut self, scope: &str, app: App) -> Result<(), TreeError> {
        let name = app.meta.name.clone();
        self.mutate(|committed, root| {
            let parent = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            if parent.spec.apps.contains_key(&name) {
                return Err(TreeError::already_exists(EntityKind::App, scope, &name));
            }
            let mut app = app;
            prepare_app(&mut app, scope, committed.find(&scope::join(scope, &name)));
            validate_app(&app, parent.is_node())?;
            parent.spec.apps.insert(name.clone(), app);
            Ok(())
        })?;
        info!(scope, name = %name, "dApp created");
        Ok(())
    }

    /// Replace the app at `scope` with `app`. The name must match the scope.
    pub fn update_app(&mut self, scope: &str, app: App) -> Result<(), TreeError> {
        self.mutate(|_, root| {
            if scope.is_empty() {
                return Err(TreeError::InvalidApp(String::from("the root dApp cannot be updated")));
            }
            let (parent_scope, name) = scope::remove_last_part(scope)?;
            if app.meta.name != name {
                return Err(TreeError::InvalidApp(format!(
                    "name '{}' does not match scope '{scope}'",
                    app.meta.name
                )));
            }
            let parent = root
                .find_mut(parent_scope)
                .ok_or_else(|| app_not_found(parent_scope))?;
            let previous = parent.spec.apps.remove(name).ok_or_else(|| app_not_found(scope))?;

            let mut app = app;
            prepare_app(&mut app, parent_scope, Some(&previous));
            validate_app(&app, parent.is_node())?;
            parent.spec.apps.insert(String::from(name), app);
            Ok(())
        })?;
        info!(scope, "dApp updated");
        Ok(())
    }

    /// Remove the app at `scope` and the aliases its parent holds for it
    pub fn delete_app(&mut self, scope: &str) -> Result<(), TreeError> {
        self.mutate(|_, root| {
            if scope.is_empty() {
                return Err(TreeError::InvalidApp(String::from("the root dApp cannot be deleted")));
            }
            let (parent_scope, name) = scope::remove_last_part(scope)?;
            let parent = root
                .find_mut(parent_scope)
                .ok_or_else(|| app_not_found(parent_scope))?;
            parent.spec.apps.remove(name).ok_or_else(|| app_not_found(scope))?;

            let prefix = format!("{name}.");
            parent.spec.aliases.retain(|key, _| !key.starts_with(&prefix));
            Ok(())
        })?;
        info!(scope, "dApp deleted");
        Ok(())
    }
}

/// Keep the UUID of `previous` when it has one, otherwise make sure `meta`
/// carries one
pub(crate) fn adopt_uuid(meta: &mut Metadata, previous: Option<&Metadata>) {
    match previous.filter(|p| !p.uuid.is_empty()) {
        Some(p) => meta.uuid = p.uuid.clone(),
        None if meta.uuid.is_empty() => meta.uuid = Uuid::new_v4().to_string(),
        None => {}
    }
}

fn fill_name(meta: &mut Metadata, key: &str) {
    if meta.name.is_empty() {
        meta.name = String::from(key);
    }
}

/// Set names, parents and UUIDs over a subtree about to enter the tree
/// under `parent`. `previous` is the version of the same app already known
/// to the store, if any.
pub(crate) fn prepare_app(app: &mut App, parent: &str, previous: Option<&App>) {
    app.meta.parent = String::from(parent);
    adopt_uuid(&mut app.meta, previous.map(|p| &p.meta));
    let own_scope = app.scope();

    if app.is_node() {
        let node = &mut app.spec.node;
        node.meta.name = app.meta.name.clone();
        node.meta.parent = String::from(parent);
        adopt_uuid(&mut node.meta, previous.map(|p| &p.spec.node.meta));
    }

    for (key, channel) in app.spec.channels.iter_mut() {
        fill_name(&mut channel.meta, key);
        channel.meta.parent = own_scope.clone();
        let before = previous.and_then(|p| p.spec.channels.get(key));
        adopt_uuid(&mut channel.meta, before.map(|c| &c.meta));
    }
    for (key, ty) in app.spec.types.iter_mut() {
        fill_name(&mut ty.meta, key);
        ty.meta.parent = own_scope.clone();
        let before = previous.and_then(|p| p.spec.types.get(key));
        adopt_uuid(&mut ty.meta, before.map(|t| &t.meta));
    }
    for (key, alias) in app.spec.aliases.iter_mut() {
        fill_name(&mut alias.meta, key);
        alias.meta.parent = own_scope.clone();
        let before = previous.and_then(|p| p.spec.aliases.get(key));
        adopt_uuid(&mut alias.meta, before.map(|a| &a.meta));
    }
    for (key, child) in app.spec.apps.iter_mut() {
        fill_name(&mut child.meta, key);
        prepare_app(child, &own_scope, previous.and_then(|p| p.spec.apps.get(key)));
    }
}

/// Structural checks over a whole subtree. Every problem found is reported.
pub(crate) fn validate_app(app: &App, parent_is_node: bool) -> Result<(), TreeError> {
    let mut errs = MultiError::new();
    collect_app_errors(app, parent_is_node, &mut errs);
    errs.into_result().map_err(TreeError::from)
}

fn check_key(what: &str, key: &str, name: &str, errs: &mut MultiError) {
    if key != name {
        errs.add(TreeError::InvalidApp(format!(
            "{what} stored as '{key}' is named '{name}'"
        )));
    }
}

fn collect_app_errors(app: &App, parent_is_node: bool, errs: &mut MultiError) {
    let name = &app.meta.name;
    errs.add_result(structure_name_is_valid(name));
    if parent_is_node {
        errs.add(TreeError::InvalidApp(format!(
            "'{name}' cannot be created inside a node"
        )));
    }
    if app.is_node() && !app.spec.apps.is_empty() {
        errs.add(TreeError::InvalidApp(format!(
            "node '{name}' cannot contain child dApps"
        )));
    }
    for boundary in app.spec.boundary.names() {
        errs.add_result(structure_name_is_valid(boundary));
    }
    for (key, ty) in &app.spec.types {
        check_key("type", key, &ty.meta.name, errs);
        errs.add_result(validate_type(ty));
    }
    for (key, channel) in &app.spec.channels {
        check_key("channel", key, &channel.meta.name, errs);
        errs.add_result(validate_channel(app, channel));
    }
    for (key, alias) in &app.spec.aliases {
        check_key("alias", key, &alias.meta.name, errs);
        errs.add_result(validate_alias(app, alias));
    }
    for (key, child) in &app.spec.apps {
        check_key("dApp", key, &child.meta.name, errs);
        collect_app_errors(child, app.is_node(), errs);
    }
}

/// Resolve boundary `name` of the app at `app_scope` to the channel it binds
/// to, returned as `(owner scope, channel name)`.
///
/// Walks up the tree: at each parent an alias `<child>.<name>` redirects the
/// name; a channel of the parent ends the walk; a boundary of the parent
/// continues it one level up.
pub(crate) fn resolve_boundary(
    root: &App,
    app_scope: &str,
    name: &str,
) -> Result<(String, String), TreeError> {
    let mut current = String::from(app_scope);
    let mut wanted = String::from(name);

    loop {
        let (parent_scope, child) = scope::remove_last_part(&current)?;
        let parent = root.find(parent_scope).ok_or_else(|| app_not_found(parent_scope))?;

        let resolved = parent
            .spec
            .aliases
            .get(&format!("{child}.{wanted}"))
            .map_or(wanted.clone(), |alias| alias.target.clone());

        if parent.spec.channels.contains_key(&resolved) {
            return Ok((String::from(parent_scope), resolved));
        }
        if parent_scope.is_empty() || !parent.spec.boundary.contains(&resolved) {
            return Err(TreeError::InvalidBoundary(format!(
                "'{name}' of '{app_scope}' does not resolve to a channel"
            )));
        }
        current = String::from(parent_scope);
        wanted = resolved;
    }
}
