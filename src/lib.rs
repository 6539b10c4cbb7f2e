//! dApp tree: transactional control-plane state
//!
//! A tree of dApps, each holding child dApps or one compute node, plus
//! channels, types and aliases. Mutations are staged in a transaction;
//! the structural diff between committed and staging is a [`Changelog`]
//! that drives reconciliation against node and channel operators before
//! the transaction commits.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`meta`] | Tree data model: dApps, nodes, channels, types, aliases |
//! | [`scope`] | Dotted scope paths and name validation |
//! | [`diff`] | Structural diff engine and changelog model |
//! | [`reaction`] | Filter + operation dispatch over a changelog |
//! | [`store`] | Committed and staging trees, transactions, read views |
//! | [`app`], [`channel`], [`types`], [`alias`] | Staging mutations per entity |
//! | [`history`] | Content-hashed revision snapshots with bounded retention |
//! | [`operator`] | Node and channel operator traits, in-memory fakes |
//! | [`reconcile`] | Reactions binding changelog entries to operator calls |
//! | [`control`] | Serialized create/update/delete entry points with dry run |
//! | [`persist`] | Load-on-start, save-on-commit storage of the committed tree |
//! | [`config`] | Control-plane configuration |
//! | [`error`] | Error types and multi-error aggregation |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use dapp_tree::{App, ControlPlane, FakeChannelOperator, FakeNodeOperator, Kind, Operation, Reconciler};
//!
//! let nodes = Arc::new(FakeNodeOperator::new());
//! let channels = Arc::new(FakeChannelOperator::new());
//! let plane = ControlPlane::new(Reconciler::new(nodes.clone(), channels));
//!
//! plane.create_app("", App::new("app1").with_node("img1"), false).unwrap();
//!
//! // Change the image; the changelog holds a single node update
//! let mut app = plane.get_app("app1").unwrap();
//! app.spec.node.spec.image = String::from("img2");
//! let log = plane.update_app("app1", app, false).unwrap();
//!
//! let change = log.get("*.app1").unwrap();
//! assert_eq!(change.kind, Kind::NODE);
//! assert_eq!(change.operation, Operation::UPDATE);
//! assert_eq!(nodes.node("app1").unwrap().spec.node.spec.image, "img2");
//! ```

pub mod alias;
pub mod app;
pub mod channel;
pub mod config;
pub mod control;
pub mod diff;
pub mod error;
pub mod history;
pub mod meta;
pub mod operator;
pub mod persist;
pub mod reaction;
pub mod reconcile;
pub mod scope;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use control::{ControlError, ControlPlane};
pub use diff::{diff, Change, Changelog, DiffError, DiffValue, Difference, Kind, Operation};
pub use error::{BoxError, EntityKind, MultiError, TreeError};
pub use history::{PruneResult, Snapshot, SnapshotHistory};
pub use meta::{Alias, App, AppSpec, Boundary, Channel, ChannelSpec, Metadata, Node, NodeSpec, Type};
pub use operator::{
    ChannelOperator, FakeChannelOperator, FakeNodeOperator, NodeOperator, OperatorCall, OperatorError,
};
pub use persist::{JsonFilePersistence, PersistError, Persistence};
pub use reaction::{ChangeReaction, DifferenceReaction, ReactionResult};
pub use reconcile::Reconciler;
pub use store::{TreeStore, TreeView};
