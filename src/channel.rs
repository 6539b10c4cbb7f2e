//! Channel mutations on the staging tree

use tracing::info;

use crate::app::adopt_uuid;
use crate::error::{EntityKind, TreeError};
use crate::meta::{App, Channel};
use crate::scope::structure_name_is_valid;
use crate::store::{app_not_found, TreeStore};

/// Check `channel` against the app that holds it
pub(crate) fn validate_channel(holder: &App, channel: &Channel) -> Result<(), TreeError> {
    let name = &channel.meta.name;
    structure_name_is_valid(name)?;
    if !holder.spec.types.contains_key(&channel.spec.type_name) {
        return Err(TreeError::InvalidChannel(format!(
            "channel '{name}' uses unknown type '{}'",
            channel.spec.type_name
        )));
    }
    if holder.spec.boundary.contains(name) {
        return Err(TreeError::InvalidChannel(format!(
            "channel '{name}' has the same name as a boundary"
        )));
    }
    Ok(())
}

impl TreeStore {
    /// Stage a new channel in the app at `scope`
    pub fn create_channel(&mut self, scope: &str, channel: Channel) -> Result<(), TreeError> {
        let name = channel.meta.name.clone();
        self.mutate(|committed, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            if app.spec.channels.contains_key(&name) {
                return Err(TreeError::already_exists(EntityKind::Channel, scope, &name));
            }
            let mut channel = channel;
            channel.meta.parent = String::from(scope);
            let before = committed.find(scope).and_then(|a| a.spec.channels.get(&name));
            adopt_uuid(&mut channel.meta, before.map(|c| &c.meta));
            validate_channel(app, &channel)?;
            app.spec.channels.insert(name.clone(), channel);
            Ok(())
        })?;
        info!(scope, name = %name, "channel created");
        Ok(())
    }

    /// Replace an existing channel of the app at `scope`
    pub fn update_channel(&mut self, scope: &str, channel: Channel) -> Result<(), TreeError> {
        let name = channel.meta.name.clone();
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            let previous = app
                .spec
                .channels
                .remove(&name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Channel, scope, &name))?;
            let mut channel = channel;
            channel.meta.parent = String::from(scope);
            adopt_uuid(&mut channel.meta, Some(&previous.meta));
            validate_channel(app, &channel)?;
            app.spec.channels.insert(name.clone(), channel);
            Ok(())
        })?;
        info!(scope, name = %name, "channel updated");
        Ok(())
    }

    /// Remove a channel no node and no alias is bound to
    pub fn delete_channel(&mut self, scope: &str, name: &str) -> Result<(), TreeError> {
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            let channel = app
                .spec
                .channels
                .get(name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Channel, scope, name))?;
            if !channel.connected_apps.is_empty() {
                return Err(TreeError::InUse {
                    kind: EntityKind::Channel,
                    name: String::from(name),
                    reason: format!("connected to {}", channel.connected_apps.join(", ")),
                });
            }
            if let Some(alias) = app.spec.aliases.values().find(|a| a.target == name) {
                return Err(TreeError::InUse {
                    kind: EntityKind::Channel,
                    name: String::from(name),
                    reason: format!("target of alias '{}'", alias.meta.name),
                });
            }
            app.spec.channels.remove(name);
            Ok(())
        })?;
        info!(scope, name, "channel deleted");
        Ok(())
    }
}
