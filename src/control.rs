//! Control-plane facade
//!
//! Every mutation entry point runs one whole transaction under the store
//! lock:
//!
//! 1. open a transaction and apply the mutation to staging
//! 2. compute the changelog (committed vs staging)
//! 3. dry run: cancel and return the changelog
//! 4. reconcile the changelog against the operators; any failure cancels
//! 5. commit, then save the committed tree if persistence is configured
//!
//! Callers only ever see the changelog or an error; the committed tree never
//! records a change the operators did not accept.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::diff::Changelog;
use crate::error::{MultiError, TreeError};
use crate::meta::{Alias, App, Channel, Type};
use crate::persist::{JsonFilePersistence, PersistError, Persistence};
use crate::reconcile::Reconciler;
use crate::store::TreeStore;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("reconciliation failed: {0}")]
    Reconcile(MultiError),

    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
}

/// Serialized access to the tree store, reconciled against operators
pub struct ControlPlane {
    store: Mutex<TreeStore>,
    reconciler: Reconciler,
    persistence: Option<Box<dyn Persistence>>,
}

impl ControlPlane {
    /// In-memory control plane over an empty root
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            store: Mutex::new(TreeStore::new()),
            reconciler,
            persistence: None,
        }
    }

    /// Control plane configured by `config`. With a `state_path`, the tree
    /// stored there is loaded and every commit is saved back.
    pub fn from_config(config: &Config, reconciler: Reconciler) -> Result<Self, ControlError> {
        let store = TreeStore::new().with_history_depth(config.history_depth);
        let plane = Self {
            store: Mutex::new(store),
            reconciler,
            persistence: None,
        };
        match &config.state_path {
            Some(path) => plane.with_persistence(JsonFilePersistence::new(path)),
            None => Ok(plane),
        }
    }

    /// Attach `persistence` and load the tree it holds, if any
    pub fn with_persistence<P>(mut self, persistence: P) -> Result<Self, ControlError>
    where
        P: Persistence + 'static,
    {
        if let Some(root) = persistence.load()? {
            let store = std::mem::take(self.store.get_mut());
            *self.store.get_mut() = store.with_root(root)?;
            info!(apps = self.store.get_mut().committed().app_count(), "tree loaded from persistence");
        }
        self.persistence = Some(Box::new(persistence));
        Ok(self)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn revision(&self) -> u64 {
        self.store.lock().revision()
    }

    /// Copy of the committed tree
    pub fn committed(&self) -> App {
        self.store.lock().committed().clone()
    }

    pub fn get_app(&self, scope: &str) -> Result<App, ControlError> {
        Ok(self.store.lock().committed_view().get_app(scope)?.clone())
    }

    pub fn get_channel(&self, scope: &str, name: &str) -> Result<Channel, ControlError> {
        Ok(self.store.lock().committed_view().get_channel(scope, name)?.clone())
    }

    pub fn get_type(&self, scope: &str, name: &str) -> Result<Type, ControlError> {
        Ok(self.store.lock().committed_view().get_type(scope, name)?.clone())
    }

    pub fn get_alias(&self, scope: &str, name: &str) -> Result<Alias, ControlError> {
        Ok(self.store.lock().committed_view().get_alias(scope, name)?.clone())
    }

    /// Changes between two retained revisions
    pub fn diff_revisions(&self, from: u64, to: u64) -> Result<Changelog, ControlError> {
        Ok(self.store.lock().diff_revisions(from, to)?)
    }

    // ── dApps ──

    pub fn create_app(&self, scope: &str, app: App, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.create_app(scope, app))
    }

    pub fn update_app(&self, scope: &str, app: App, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.update_app(scope, app))
    }

    pub fn delete_app(&self, scope: &str, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.delete_app(scope))
    }

    // ── Channels ──

    pub fn create_channel(&self, scope: &str, channel: Channel, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.create_channel(scope, channel))
    }

    pub fn update_channel(&self, scope: &str, channel: Channel, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.update_channel(scope, channel))
    }

    pub fn delete_channel(&self, scope: &str, name: &str, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.delete_channel(scope, name))
    }

    // ── Types ──

    pub fn create_type(&self, scope: &str, ty: Type, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.create_type(scope, ty))
    }

    pub fn update_type(&self, scope: &str, ty: Type, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.update_type(scope, ty))
    }

    pub fn delete_type(&self, scope: &str, name: &str, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.delete_type(scope, name))
    }

    // ── Aliases ──

    pub fn create_alias(&self, scope: &str, alias: Alias, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.create_alias(scope, alias))
    }

    pub fn update_alias(&self, scope: &str, alias: Alias, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.update_alias(scope, alias))
    }

    pub fn delete_alias(&self, scope: &str, name: &str, dry_run: bool) -> Result<Changelog, ControlError> {
        self.transact(dry_run, |store| store.delete_alias(scope, name))
    }

    fn transact<F>(&self, dry_run: bool, mutation: F) -> Result<Changelog, ControlError>
    where
        F: FnOnce(&mut TreeStore) -> Result<(), TreeError>,
    {
        let mut store = self.store.lock();
        store.init_transaction()?;

        let staged = mutation(&mut store).and_then(|()| store.transaction_changes());
        let changes = match staged {
            Ok(changes) => changes,
            Err(err) => {
                store.cancel();
                return Err(err.into());
            }
        };

        if dry_run {
            store.cancel();
            info!(changes = changes.len(), "dry run, transaction discarded");
            return Ok(changes);
        }

        if let Err(errs) = self.reconciler.reconcile(&store, &changes) {
            store.cancel();
            warn!(failures = errs.len(), "transaction canceled after reconciliation failure");
            return Err(ControlError::Reconcile(errs));
        }

        if let Err(err) = store.commit() {
            store.cancel();
            return Err(err.into());
        }
        if let Some(persistence) = &self.persistence {
            persistence.save(store.committed())?;
        }
        Ok(changes)
    }
}
