//! Type mutations on the staging tree

use tracing::info;

use crate::app::adopt_uuid;
use crate::error::{EntityKind, TreeError};
use crate::meta::Type;
use crate::scope::structure_name_is_valid;
use crate::store::{app_not_found, TreeStore};

pub(crate) fn validate_type(ty: &Type) -> Result<(), TreeError> {
    structure_name_is_valid(&ty.meta.name)?;
    if ty.schema.trim().is_empty() {
        return Err(TreeError::InvalidType(format!(
            "type '{}' has an empty schema",
            ty.meta.name
        )));
    }
    Ok(())
}

impl TreeStore {
    /// Stage a new type in the app at `scope`
    pub fn create_type(&mut self, scope: &str, ty: Type) -> Result<(), TreeError> {
        let name = ty.meta.name.clone();
        self.mutate(|committed, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            if app.spec.types.contains_key(&name) {
                return Err(TreeError::already_exists(EntityKind::Type, scope, &name));
            }
            let mut ty = ty;
            ty.meta.parent = String::from(scope);
            let before = committed.find(scope).and_then(|a| a.spec.types.get(&name));
            adopt_uuid(&mut ty.meta, before.map(|t| &t.meta));
            validate_type(&ty)?;
            app.spec.types.insert(name.clone(), ty);
            Ok(())
        })?;
        info!(scope, name = %name, "type created");
        Ok(())
    }

    /// Replace the schema and metadata of an existing type
    pub fn update_type(&mut self, scope: &str, ty: Type) -> Result<(), TreeError> {
        let name = ty.meta.name.clone();
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            let previous = app
                .spec
                .types
                .get(&name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Type, scope, &name))?;
            let mut ty = ty;
            ty.meta.parent = String::from(scope);
            adopt_uuid(&mut ty.meta, Some(&previous.meta));
            validate_type(&ty)?;
            app.spec.types.insert(name.clone(), ty);
            Ok(())
        })?;
        info!(scope, name = %name, "type updated");
        Ok(())
    }

    /// Remove a type no channel uses
    pub fn delete_type(&mut self, scope: &str, name: &str) -> Result<(), TreeError> {
        self.mutate(|_, root| {
            let app = root.find_mut(scope).ok_or_else(|| app_not_found(scope))?;
            let ty = app
                .spec
                .types
                .get(name)
                .ok_or_else(|| TreeError::not_found(EntityKind::Type, scope, name))?;
            if !ty.connected_channels.is_empty() {
                return Err(TreeError::InUse {
                    kind: EntityKind::Type,
                    name: String::from(name),
                    reason: format!("used by channels {}", ty.connected_channels.join(", ")),
                });
            }
            app.spec.types.remove(name);
            Ok(())
        })?;
        info!(scope, name, "type deleted");
        Ok(())
    }
}
