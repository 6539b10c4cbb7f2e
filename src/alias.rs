//! Alias mutations on the staging tree
//!
//! An alias lives in the app that holds a child, under the key
//! `<child>.<boundary>`, and points that boundary of the child at a channel
//! or boundary of the holder.

use tracing::info;

use crate::app::adopt_uuid;
use crate::error::{EntityKind, TreeError};
use crate::meta::{Alias, App};
use crate::scope::alias_name_is_valid;
use crate::store::{app_not_found, TreeStore};

/// Check `alias` against the app that holds it
pub(crate) fn validate_alias(holder: &App, alias: &Alias) -> Result<(), TreeError> {
    let key = &alias.meta.name;
    alias_name_is_valid(key)?;
    let (child, boundary) = key.split_once('.').unwrap_or((key.as_str(), ""));

    match holder.spec.apps.get(child) {
        Some(app) if app.spec.boundary.contains(boundary) => {}
        Some(_) => {
            return Err(TreeError::InvalidAlias(format!(
                "dApp '{child}' has no boundary '{boundary}'"
            )))
        }
        None => {
            return Err(TreeError::InvalidAlias(format!(
                "alias '{key}' refers to unknown dApp '{child}'"
            )))
        }
    }

    let target = &alias.target;
    if !holder.spec.channels.contains_key(target) && !holder.spec.boundary.contains(target) {
        return Err(TreeError::InvalidAlias(format!(
            "alias '{key}' points to an unknown channel '{target}'"
        )));
    }
    Ok(())
}

impl TreeStore {
    /// Stage a new alias in the app at `scope`
    pub fn create_alias(&mut self, scope: &str, alias: Alias) -> Result<(), TreeError> {
        let name = alias.meta.name.clone();
        self.mutate(|committed, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            if app.spec.aliases.contains_key(&name) {
                return Err(TreeError::already_exists(EntityKind::Alias, scope, &name));
            }
            let mut alias = alias;
            alias.meta.parent = String::from(scope);
            let before = committed.find(scope).and_then(|a| a.spec.aliases.get(&name));
            adopt_uuid(&mut alias.meta, before.map(|a| &a.meta));
            validate_alias(app, &alias)?;
            app.spec.aliases.insert(name.clone(), alias);
            Ok(())
        })?;
        info!(scope, name = %name, "alias created");
        Ok(())
    }

    /// Retarget an existing alias
    pub fn update_alias(&mut self, scope: &str, alias: Alias) -> Result<(), TreeError> {
        let name = alias.meta.name.clone();
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            let previous = app
                .spec
                .aliases
                .get(&name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Alias, scope, &name))?;
            let mut alias = alias;
            alias.meta.parent = String::from(scope);
            adopt_uuid(&mut alias.meta, Some(&previous.meta));
            validate_alias(app, &alias)?;
            app.spec.aliases.insert(name.clone(), alias);
            Ok(())
        })?;
        info!(scope, name = %name, "alias updated");
        Ok(())
    }

    /// Remove an alias. Refused if a node boundary no longer resolves without it.
    pub fn delete_alias(&mut self, scope: &str, name: &str) -> Result<(), TreeError> {
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            app.spec
                .aliases
                .remove(name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Alias, scope, name))?;
            Ok(())
        })?;
        info!(scope, name, "alias deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{App, Channel, Type};
    use pretty_assertions::assert_eq;

    fn staged() -> TreeStore {
        let mut store = TreeStore::new();
        store.init_transaction().unwrap();
        store
            .create_app(
                "",
                App::new("a")
                    .with_type(Type::new("t", "s"))
                    .with_channel(Channel::new("ch1", "t"))
                    .with_channel(Channel::new("ch2", "t"))
                    .with_app(App::new("n").with_node("img").with_boundary(&["ch1"], &[])),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_alias_redirects_node_boundary() {
        let mut store = staged();
        store.create_alias("a", Alias::new("n.ch1", "ch2")).unwrap();
        let view = store.view();
        assert_eq!(view.get_alias("a", "n.ch1").unwrap().meta.parent, "a");
        assert!(view.get_channel("a", "ch1").unwrap().connected_apps.is_empty());
        assert_eq!(view.get_channel("a", "ch2").unwrap().connected_apps, vec!["a.n"]);
    }

    #[test]
    fn test_update_alias_retargets() {
        let mut store = staged();
        store.create_alias("a", Alias::new("n.ch1", "ch2")).unwrap();
        store.update_alias("a", Alias::new("n.ch1", "ch1")).unwrap();
        assert_eq!(
            store.view().get_channel("a", "ch1").unwrap().connected_apps,
            vec!["a.n"]
        );
    }

    #[test]
    fn test_alias_validation() {
        let mut store = staged();
        let err = store.create_alias("a", Alias::new("zz.ch1", "ch2")).unwrap_err();
        assert!(err.to_string().contains("unknown dApp 'zz'"));
        let err = store.create_alias("a", Alias::new("n.other", "ch2")).unwrap_err();
        assert!(err.to_string().contains("has no boundary 'other'"));
        let err = store.create_alias("a", Alias::new("n.ch1", "nope")).unwrap_err();
        assert!(err.to_string().contains("unknown channel 'nope'"));
        assert!(matches!(
            store.create_alias("a", Alias::new("noDot", "ch2")),
            Err(TreeError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_missing_alias() {
        let mut store = staged();
        store.create_alias("a", Alias::new("n.ch1", "ch2")).unwrap();
        assert!(matches!(
            store.create_alias("a", Alias::new("n.ch1", "ch1")),
            Err(TreeError::AlreadyExists { .. })
        ));
        assert!(matches!(
            store.update_alias("a", Alias::new("n.zz", "ch1")),
            Err(TreeError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_alias("a", "n.zz"),
            Err(TreeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_alias_needed_for_resolution_refused() {
        let mut store = TreeStore::new();
        store.init_transaction().unwrap();
        store
            .create_app(
                "",
                App::new("a")
                    .with_type(Type::new("t", "s"))
                    .with_channel(Channel::new("real", "t"))
                    .with_app(App::new("n").with_node("img").with_boundary(&["in"], &[]))
                    .with_alias(Alias::new("n.in", "real")),
            )
            .unwrap();
        assert_eq!(
            store.view().get_channel("a", "real").unwrap().connected_apps,
            vec!["a.n"]
        );

        let err = store.delete_alias("a", "n.in").unwrap_err();
        assert!(matches!(err, TreeError::InvalidBoundary(_)));
        assert!(store.view().get_alias("a", "n.in").is_ok());
    }
}
