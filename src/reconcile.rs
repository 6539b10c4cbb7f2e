//! Reconciliation of a staged changelog against live infrastructure
//!
//! The [`Reconciler`] owns the node and channel operators and builds one
//! reaction per kind of change. Reactions read the committed tree (`origin`)
//! and the staged tree (`current`) through [`TreeView`]s; the diff does not
//! descend into created or deleted apps, so those reactions fetch the whole
//! subtree from the side where it exists.
//!
//! | Reaction | Level | Matches |
//! |----------|-------|---------|
//! | created channels | difference | `CHANNEL`, create |
//! | deleted channels | difference | `CHANNEL`, delete |
//! | updated channels | difference | channel field, update |
//! | deleted apps | difference | `APP`, delete |
//! | created apps | difference | `APP`, create |
//! | updated types | difference | type field, update |
//! | updated aliases | difference | `ALIAS`, update |
//! | updated nodes | change | scope was a node |
//! | created nodes | change | scope becomes a node |

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error};

use crate::app::resolve_boundary;
use crate::diff::{Changelog, Difference, Kind, Operation};
use crate::error::{MultiError, TreeError};
use crate::meta::App;
use crate::operator::{ChannelOperator, NodeOperator};
use crate::reaction::{ChangeReaction, DifferenceReaction, ReactionResult};
use crate::scope::{self, context_to_scope};
use crate::store::{TreeStore, TreeView};

/// Drives operators from a changelog
#[derive(Clone)]
pub struct Reconciler {
    nodes: Arc<dyn NodeOperator>,
    channels: Arc<dyn ChannelOperator>,
}

fn is_exact(d: &Difference, kind: Kind, operation: Operation) -> bool {
    d.kind == kind && d.operation.contains(operation)
}

/// Field-level update of an entity of `kind`, annotations excluded
fn is_field_update(d: &Difference, kind: Kind) -> bool {
    d.kind.contains(kind) && !d.kind.contains(Kind::ANNOTATION) && d.operation.contains(Operation::UPDATE)
}

impl Reconciler {
    pub fn new(nodes: Arc<dyn NodeOperator>, channels: Arc<dyn ChannelOperator>) -> Self {
        Self { nodes, channels }
    }

    pub fn nodes(&self) -> &Arc<dyn NodeOperator> {
        &self.nodes
    }

    pub fn channels(&self) -> &Arc<dyn ChannelOperator> {
        &self.channels
    }

    /// Apply every reaction to `changes`, staged in `store` but not committed.
    ///
    /// All reactions run even if some fail; the error holds every failure.
    pub fn reconcile(&self, store: &TreeStore, changes: &Changelog) -> Result<(), MultiError> {
        let origin = store.committed_view();
        let current = store.view();

        let diff_reactions = [
            self.created_channels(current),
            self.deleted_channels(),
            self.updated_channels(current),
            self.deleted_apps(origin),
            self.created_apps(current),
            self.updated_types(current),
            self.updated_aliases(origin, current),
        ];
        let change_reactions = [
            self.updated_nodes(origin, current),
            self.created_nodes(origin, current),
        ];

        let mut errs = MultiError::new();
        if let Err(e) = changes.for_each_diff_filtered(&diff_reactions) {
            errs.merge(e);
        }
        if let Err(e) = changes.for_each_filtered(&change_reactions) {
            errs.merge(e);
        }

        if errs.is_empty() {
            debug!(changes = changes.len(), "changelog reconciled");
        } else {
            error!(failures = errs.len(), error = %errs, "reconciliation failed");
        }
        errs.into_result()
    }

    fn created_channels<'a>(&'a self, current: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_exact(d, Kind::CHANNEL, Operation::CREATE),
            move |ctx, d| {
                let holder = context_to_scope(ctx);
                let channel = current.get_channel(holder, &d.name)?;
                debug!(scope = holder, channel = %d.name, "creating channel");
                self.channels.create(holder, channel)?;
                Ok(())
            },
        )
    }

    fn deleted_channels<'a>(&'a self) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_exact(d, Kind::CHANNEL, Operation::DELETE),
            move |ctx, d| {
                let holder = context_to_scope(ctx);
                debug!(scope = holder, channel = %d.name, "deleting channel");
                self.channels.delete(holder, &d.name)?;
                Ok(())
            },
        )
    }

    /// Updates the channel, then every node bound to it
    fn updated_channels<'a>(&'a self, current: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_field_update(d, Kind::CHANNEL),
            move |ctx, d| {
                let holder = context_to_scope(ctx);
                let channel = current.get_channel(holder, &d.name)?;
                debug!(scope = holder, channel = %d.name, "updating channel");
                self.channels.update(holder, channel)?;

                let mut errs = MultiError::new();
                for node_scope in &channel.connected_apps {
                    errs.add_result(self.update_node_at(current, node_scope));
                }
                errs.into_result().map_err(Into::into)
            },
        )
    }

    fn deleted_apps<'a>(&'a self, origin: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_exact(d, Kind::APP, Operation::DELETE),
            move |ctx, d| {
                let app_scope = scope::join(context_to_scope(ctx), &d.name);
                let app = origin.get_app(&app_scope)?;
                self.delete_subtree(&app_scope, app)
            },
        )
    }

    fn created_apps<'a>(&'a self, current: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_exact(d, Kind::APP, Operation::CREATE),
            move |ctx, d| {
                let app_scope = scope::join(context_to_scope(ctx), &d.name);
                let app = current.get_app(&app_scope)?;
                self.create_subtree(&app_scope, app)
            },
        )
    }

    /// Updates every node bound to a channel using the type
    fn updated_types<'a>(&'a self, current: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| is_field_update(d, Kind::TYPE),
            move |ctx, d| {
                let holder = context_to_scope(ctx);
                let ty = current.get_type(holder, &d.name)?;

                let mut node_scopes = BTreeSet::new();
                for name in &ty.connected_channels {
                    let channel = current.get_channel(holder, name)?;
                    node_scopes.extend(channel.connected_apps.iter().map(String::as_str));
                }

                let mut errs = MultiError::new();
                for node_scope in node_scopes {
                    errs.add_result(self.update_node_at(current, node_scope));
                }
                errs.into_result().map_err(Into::into)
            },
        )
    }

    /// Updates every node below the alias's child whose boundary now
    /// resolves to a different channel
    fn updated_aliases<'a>(&'a self, origin: TreeView<'a>, current: TreeView<'a>) -> DifferenceReaction<'a> {
        DifferenceReaction::new(
            |_, d| d.kind.contains(Kind::ALIAS) && d.operation.contains(Operation::UPDATE),
            move |ctx, d| {
                let (child, _) = d
                    .name
                    .split_once('.')
                    .ok_or_else(|| TreeError::InvalidAlias(d.name.clone()))?;
                let app_scope = scope::join(context_to_scope(ctx), child);
                let app = current.get_app(&app_scope)?;

                let mut rebound = Vec::new();
                collect_rebound(origin, current, &app_scope, app, &mut rebound);

                let mut errs = MultiError::new();
                for node_scope in &rebound {
                    errs.add_result(self.update_node_at(current, node_scope));
                }
                errs.into_result().map_err(Into::into)
            },
        )
    }

    /// Any change at a scope that was a node updates it, or deletes it when
    /// the scope is no longer a node
    fn updated_nodes<'a>(&'a self, origin: TreeView<'a>, current: TreeView<'a>) -> ChangeReaction<'a> {
        ChangeReaction::new(
            move |c| origin.get_app(c.scope()).is_ok_and(App::is_node),
            move |c| {
                let app_scope = c.scope();
                let (parent, name) = scope::remove_last_part(app_scope)?;
                match current.get_app(app_scope) {
                    Ok(app) if app.is_node() => {
                        debug!(scope = app_scope, "updating node");
                        self.nodes.update_node(parent, app)?;
                    }
                    _ => {
                        debug!(scope = app_scope, "deleting node");
                        self.nodes.delete_node(parent, name)?;
                    }
                }
                Ok(())
            },
        )
    }

    fn created_nodes<'a>(&'a self, origin: TreeView<'a>, current: TreeView<'a>) -> ChangeReaction<'a> {
        ChangeReaction::new(
            move |c| {
                origin.get_app(c.scope()).is_ok_and(|a| !a.is_node())
                    && current.get_app(c.scope()).is_ok_and(App::is_node)
            },
            move |c| {
                let app_scope = c.scope();
                let (parent, _) = scope::remove_last_part(app_scope)?;
                let app = current.get_app(app_scope)?;
                debug!(scope = app_scope, "creating node");
                self.nodes.create_node(parent, app)?;
                Ok(())
            },
        )
    }

    fn update_node_at(&self, view: TreeView<'_>, node_scope: &str) -> ReactionResult {
        let app = view.get_app(node_scope)?;
        if app.is_node() {
            let (parent, _) = scope::remove_last_part(node_scope)?;
            debug!(scope = node_scope, "updating node");
            self.nodes.update_node(parent, app)?;
        }
        Ok(())
    }

    /// Delete every node and channel of a removed subtree
    fn delete_subtree(&self, app_scope: &str, app: &App) -> ReactionResult {
        let mut errs = MultiError::new();
        if app.is_node() {
            let (parent, name) = scope::remove_last_part(app_scope)?;
            debug!(scope = app_scope, "deleting node");
            errs.add_result(self.nodes.delete_node(parent, name));
        }
        for (name, child) in &app.spec.apps {
            errs.add_result(self.delete_subtree(&scope::join(app_scope, name), child));
        }
        for name in app.spec.channels.keys() {
            debug!(scope = app_scope, channel = %name, "deleting channel");
            errs.add_result(self.channels.delete(app_scope, name));
        }
        errs.into_result().map_err(Into::into)
    }

    /// Create every channel, then every node, of a new subtree
    fn create_subtree(&self, app_scope: &str, app: &App) -> ReactionResult {
        let mut errs = MultiError::new();
        for channel in app.spec.channels.values() {
            debug!(scope = app_scope, channel = %channel.meta.name, "creating channel");
            errs.add_result(self.channels.create(app_scope, channel));
        }
        if app.is_node() {
            let (parent, _) = scope::remove_last_part(app_scope)?;
            debug!(scope = app_scope, "creating node");
            errs.add_result(self.nodes.create_node(parent, app));
        }
        for (name, child) in &app.spec.apps {
            errs.add_result(self.create_subtree(&scope::join(app_scope, name), child));
        }
        errs.into_result().map_err(Into::into)
    }
}

/// Scopes of nodes at or below `app_scope` that existed before and whose
/// boundary resolves to a different channel now
fn collect_rebound(origin: TreeView<'_>, current: TreeView<'_>, app_scope: &str, app: &App, out: &mut Vec<String>) {
    if app.is_node() {
        let existed = origin.get_app(app_scope).is_ok_and(App::is_node);
        let rebound = app.spec.boundary.names().into_iter().any(|name| {
            resolve_boundary(origin.root(), app_scope, name).ok()
                != resolve_boundary(current.root(), app_scope, name).ok()
        });
        if existed && rebound {
            out.push(String::from(app_scope));
        }
    }
    for (name, child) in &app.spec.apps {
        collect_rebound(origin, current, &scope::join(app_scope, name), child, out);
    }
}
