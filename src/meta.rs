//! dApp tree data model
//!
//! Recursive tree of applications ("dApps"). Each app owns its child apps,
//! channels, types and aliases, keyed by local name. A non-empty node image
//! turns the app into a compute leaf.
//!
//! Every map is a `BTreeMap`, so traversal order (and therefore changelog
//! order) is the sorted key order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::scope;

/// Identity and bookkeeping fields shared by every tree entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Local name, equal to the key under which the parent stores it
    pub name: String,
    /// Dotted scope of the containing app (empty for the root and its children)
    pub parent: String,
    /// Fully-qualified reference
    pub reference: String,
    pub uuid: String,
    /// Content hash supplied by the client
    pub sha256: String,
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn named(name: &str) -> Self {
        Self {
            name: String::from(name),
            ..Self::default()
        }
    }
}

/// Compute node description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub meta: Metadata,
    pub spec: NodeSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    /// Container image; non-empty means the owning app is a compute node
    pub image: String,
    pub replicas: u32,
    pub environment: BTreeMap<String, String>,
}

impl Node {
    /// True if no field of the node has been set
    pub fn is_empty(&self) -> bool {
        self.meta.name.is_empty()
            && self.meta.parent.is_empty()
            && self.meta.annotations.is_empty()
            && self.spec.image.is_empty()
    }
}

/// Channel names an app declares it reads from / writes to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Boundary {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

impl Boundary {
    /// Union of input and output, deduplicated and sorted
    pub fn names(&self) -> BTreeSet<&str> {
        self.input
            .iter()
            .chain(self.output.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.input.iter().any(|n| n == name) || self.output.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSpec {
    /// Name of a [`Type`] defined in the same app
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Typed message conduit between apps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub meta: Metadata,
    pub spec: ChannelSpec,
    /// Scopes of the compute nodes bound to this channel (maintained by the store)
    pub connected_apps: Vec<String>,
}

impl Channel {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            meta: Metadata::named(name),
            spec: ChannelSpec {
                type_name: String::from(type_name),
            },
            connected_apps: Vec::new(),
        }
    }
}

/// Message schema shared by channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Type {
    pub meta: Metadata,
    /// Serialized schema (e.g. Avro JSON)
    pub schema: String,
    /// Names of the channels of the same app using this type (maintained by the store)
    pub connected_channels: Vec<String>,
}

impl Type {
    pub fn new(name: &str, schema: &str) -> Self {
        Self {
            meta: Metadata::named(name),
            schema: String::from(schema),
            connected_channels: Vec::new(),
        }
    }
}

/// Redirection of a child's boundary name to a channel or boundary of the
/// app holding the alias. Keyed `<child>.<boundary>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alias {
    pub meta: Metadata,
    pub target: String,
}

impl Alias {
    pub fn new(name: &str, target: &str) -> Self {
        Self {
            meta: Metadata::named(name),
            target: String::from(target),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSpec {
    pub node: Node,
    pub apps: BTreeMap<String, App>,
    pub channels: BTreeMap<String, Channel>,
    pub types: BTreeMap<String, Type>,
    pub boundary: Boundary,
    pub aliases: BTreeMap<String, Alias>,
}

/// A dApp: either a composite of child apps or a compute node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub meta: Metadata,
    pub spec: AppSpec,
}

impl App {
    /// Empty root app
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(name: &str) -> Self {
        Self {
            meta: Metadata::named(name),
            spec: AppSpec::default(),
        }
    }

    /// Turn this app into a compute node running `image`
    pub fn with_node(mut self, image: &str) -> Self {
        self.spec.node.meta.name = self.meta.name.clone();
        self.spec.node.spec.image = String::from(image);
        self.spec.node.spec.replicas = self.spec.node.spec.replicas.max(1);
        self
    }

    pub fn with_app(mut self, child: App) -> Self {
        self.spec.apps.insert(child.meta.name.clone(), child);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.spec.channels.insert(channel.meta.name.clone(), channel);
        self
    }

    pub fn with_type(mut self, ty: Type) -> Self {
        self.spec.types.insert(ty.meta.name.clone(), ty);
        self
    }

    pub fn with_alias(mut self, alias: Alias) -> Self {
        self.spec.aliases.insert(alias.meta.name.clone(), alias);
        self
    }

    pub fn with_boundary(mut self, input: &[&str], output: &[&str]) -> Self {
        self.spec.boundary = Boundary {
            input: input.iter().map(|s| String::from(*s)).collect(),
            output: output.iter().map(|s| String::from(*s)).collect(),
        };
        self
    }

    /// True if this app is a compute leaf
    pub fn is_node(&self) -> bool {
        !self.spec.node.spec.image.is_empty()
    }

    /// Full dotted scope of this app (`parent.name`)
    pub fn scope(&self) -> String {
        scope::join(&self.meta.parent, &self.meta.name)
    }

    /// Walk `scope` down from this app. The empty scope resolves to `self`.
    pub fn find(&self, scope: &str) -> Option<&App> {
        if scope.is_empty() {
            return Some(self);
        }
        scope
            .split('.')
            .try_fold(self, |app, name| app.spec.apps.get(name))
    }

    pub fn find_mut(&mut self, scope: &str) -> Option<&mut App> {
        if scope.is_empty() {
            return Some(self);
        }
        scope
            .split('.')
            .try_fold(self, |app, name| app.spec.apps.get_mut(name))
    }

    /// Number of apps in this subtree, including `self`
    pub fn app_count(&self) -> usize {
        1 + self.spec.apps.values().map(App::app_count).sum::<usize>()
    }
}
