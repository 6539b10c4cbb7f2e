//! External collaborators driven by reconciliation
//!
//! [`NodeOperator`] deploys compute nodes, [`ChannelOperator`] manages broker
//! channels. Both are addressed by the scope of the app that holds the
//! entity plus the entity's name.
//!
//! [`FakeNodeOperator`] and [`FakeChannelOperator`] keep deployed state in
//! memory and record every call, for tests and local runs.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::meta::{App, Channel};
use crate::scope;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("node '{0}' already exists")]
    NodeExists(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("channel '{0}' already exists")]
    ChannelExists(String),

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("operator backend error: {0}")]
    Backend(String),
}

/// Deploys compute nodes. `scope` is the scope of the app holding the node app.
pub trait NodeOperator: Send + Sync {
    fn create_node(&self, scope: &str, app: &App) -> Result<(), OperatorError>;
    fn update_node(&self, scope: &str, app: &App) -> Result<(), OperatorError>;
    fn delete_node(&self, scope: &str, name: &str) -> Result<(), OperatorError>;
}

/// Manages broker channels. `scope` is the scope of the app holding the channel.
pub trait ChannelOperator: Send + Sync {
    fn get(&self, scope: &str, name: &str) -> Result<Channel, OperatorError>;
    fn get_all(&self, scope: &str) -> Result<Vec<Channel>, OperatorError>;
    fn create(&self, scope: &str, channel: &Channel) -> Result<(), OperatorError>;
    fn update(&self, scope: &str, channel: &Channel) -> Result<(), OperatorError>;
    fn delete(&self, scope: &str, name: &str) -> Result<(), OperatorError>;
}

/// Call recorded by a fake operator, with the full scope of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCall {
    CreateNode(String),
    UpdateNode(String),
    DeleteNode(String),
    CreateChannel(String),
    UpdateChannel(String),
    DeleteChannel(String),
}

/// In-memory [`NodeOperator`]
#[derive(Debug, Default)]
pub struct FakeNodeOperator {
    nodes: Mutex<BTreeMap<String, App>>,
    calls: Mutex<Vec<OperatorCall>>,
    fail: Option<String>,
}

impl FakeNodeOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator failing every call with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(String::from(message)),
            ..Self::default()
        }
    }

    /// Mark every node of `root` as deployed, without recording calls
    pub fn deploy_tree(&self, root: &App) {
        let mut nodes = self.nodes.lock();
        walk(root, "", &mut |app_scope, app| {
            if app.is_node() {
                nodes.insert(String::from(app_scope), app.clone());
            }
        });
    }

    /// Full scopes of the deployed nodes
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    pub fn node(&self, node_scope: &str) -> Option<App> {
        self.nodes.lock().get(node_scope).cloned()
    }

    pub fn calls(&self) -> Vec<OperatorCall> {
        self.calls.lock().clone()
    }

    fn check(&self) -> Result<(), OperatorError> {
        match &self.fail {
            Some(message) => Err(OperatorError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

impl NodeOperator for FakeNodeOperator {
    fn create_node(&self, scope: &str, app: &App) -> Result<(), OperatorError> {
        let key = scope::join(scope, &app.meta.name);
        self.calls.lock().push(OperatorCall::CreateNode(key.clone()));
        self.check()?;
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&key) {
            return Err(OperatorError::NodeExists(key));
        }
        nodes.insert(key, app.clone());
        Ok(())
    }

    fn update_node(&self, scope: &str, app: &App) -> Result<(), OperatorError> {
        let key = scope::join(scope, &app.meta.name);
        self.calls.lock().push(OperatorCall::UpdateNode(key.clone()));
        self.check()?;
        match self.nodes.lock().get_mut(&key) {
            Some(node) => {
                *node = app.clone();
                Ok(())
            }
            None => Err(OperatorError::NodeNotFound(key)),
        }
    }

    fn delete_node(&self, scope: &str, name: &str) -> Result<(), OperatorError> {
        let key = scope::join(scope, name);
        self.calls.lock().push(OperatorCall::DeleteNode(key.clone()));
        self.check()?;
        match self.nodes.lock().remove(&key) {
            Some(_) => Ok(()),
            None => Err(OperatorError::NodeNotFound(key)),
        }
    }
}

/// In-memory [`ChannelOperator`]
#[derive(Debug, Default)]
pub struct FakeChannelOperator {
    channels: Mutex<BTreeMap<String, Channel>>,
    calls: Mutex<Vec<OperatorCall>>,
    fail: Option<String>,
}

impl FakeChannelOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator failing every call with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(String::from(message)),
            ..Self::default()
        }
    }

    /// Mark every channel of `root` as created, without recording calls
    pub fn deploy_tree(&self, root: &App) {
        let mut channels = self.channels.lock();
        walk(root, "", &mut |app_scope, app| {
            for (name, channel) in &app.spec.channels {
                channels.insert(scope::join(app_scope, name), channel.clone());
            }
        });
    }

    /// Full scopes (`holder.channel`) of the created channels
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<OperatorCall> {
        self.calls.lock().clone()
    }

    fn check(&self) -> Result<(), OperatorError> {
        match &self.fail {
            Some(message) => Err(OperatorError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

impl ChannelOperator for FakeChannelOperator {
    fn get(&self, scope: &str, name: &str) -> Result<Channel, OperatorError> {
        self.check()?;
        let key = scope::join(scope, name);
        self.channels
            .lock()
            .get(&key)
            .cloned()
            .ok_or(OperatorError::ChannelNotFound(key))
    }

    fn get_all(&self, scope: &str) -> Result<Vec<Channel>, OperatorError> {
        self.check()?;
        let channels = self.channels.lock();
        Ok(channels
            .iter()
            .filter(|(key, _)| {
                key.rsplit_once('.').map_or("", |(holder, _)| holder) == scope
            })
            .map(|(_, channel)| channel.clone())
            .collect())
    }

    fn create(&self, scope: &str, channel: &Channel) -> Result<(), OperatorError> {
        let key = scope::join(scope, &channel.meta.name);
        self.calls.lock().push(OperatorCall::CreateChannel(key.clone()));
        self.check()?;
        let mut channels = self.channels.lock();
        if channels.contains_key(&key) {
            return Err(OperatorError::ChannelExists(key));
        }
        channels.insert(key, channel.clone());
        Ok(())
    }

    fn update(&self, scope: &str, channel: &Channel) -> Result<(), OperatorError> {
        let key = scope::join(scope, &channel.meta.name);
        self.calls.lock().push(OperatorCall::UpdateChannel(key.clone()));
        self.check()?;
        match self.channels.lock().get_mut(&key) {
            Some(existing) => {
                *existing = channel.clone();
                Ok(())
            }
            None => Err(OperatorError::ChannelNotFound(key)),
        }
    }

    fn delete(&self, scope: &str, name: &str) -> Result<(), OperatorError> {
        let key = scope::join(scope, name);
        self.calls.lock().push(OperatorCall::DeleteChannel(key.clone()));
        self.check()?;
        match self.channels.lock().remove(&key) {
            Some(_) => Ok(()),
            None => Err(OperatorError::ChannelNotFound(key)),
        }
    }
}

fn walk<F>(app: &App, app_scope: &str, visit: &mut F)
where
    F: FnMut(&str, &App),
{
    visit(app_scope, app);
    for (name, child) in &app.spec.apps {
        walk(child, &scope::join(app_scope, name), visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{App, Channel, Type};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fake_node_lifecycle() {
        let op = FakeNodeOperator::new();
        let app = App::new("n").with_node("img");
        op.create_node("a", &app).unwrap();
        assert_eq!(op.nodes(), vec!["a.n"]);
        assert_eq!(
            op.create_node("a", &app),
            Err(OperatorError::NodeExists(String::from("a.n")))
        );

        let updated = App::new("n").with_node("img2");
        op.update_node("a", &updated).unwrap();
        assert_eq!(op.node("a.n").unwrap().spec.node.spec.image, "img2");

        op.delete_node("a", "n").unwrap();
        assert!(op.nodes().is_empty());
        assert_eq!(
            op.delete_node("a", "n"),
            Err(OperatorError::NodeNotFound(String::from("a.n")))
        );
        assert_eq!(op.calls().len(), 5);
    }

    #[test]
    fn test_failing_operator_records_attempts() {
        let op = FakeNodeOperator::failing("down");
        let err = op.create_node("", &App::new("n").with_node("img")).unwrap_err();
        assert_eq!(err.to_string(), "operator backend error: down");
        assert_eq!(op.calls(), vec![OperatorCall::CreateNode(String::from("n"))]);
        assert!(op.nodes().is_empty());
    }

    #[test]
    fn test_deploy_tree_seeds_state() {
        let root = App::root().with_app(
            App::new("a")
                .with_type(Type::new("t", "s"))
                .with_channel(Channel::new("ch", "t"))
                .with_app(App::new("n").with_node("img")),
        );
        let nodes = FakeNodeOperator::new();
        nodes.deploy_tree(&root);
        assert_eq!(nodes.nodes(), vec!["a.n"]);
        assert!(nodes.calls().is_empty());

        let channels = FakeChannelOperator::new();
        channels.deploy_tree(&root);
        assert_eq!(channels.channels(), vec!["a.ch"]);
    }

    #[test]
    fn test_fake_channel_get_and_get_all() {
        let op = FakeChannelOperator::new();
        op.create("a", &Channel::new("c1", "t")).unwrap();
        op.create("a", &Channel::new("c2", "t")).unwrap();
        op.create("a.b", &Channel::new("c3", "t")).unwrap();

        assert_eq!(op.get("a", "c1").unwrap().meta.name, "c1");
        assert!(matches!(op.get("a", "zz"), Err(OperatorError::ChannelNotFound(_))));
        let names: Vec<String> = op.get_all("a").unwrap().into_iter().map(|c| c.meta.name).collect();
        assert_eq!(names, vec!["c1", "c2"]);

        op.update("a", &Channel::new("c1", "t2")).unwrap();
        assert_eq!(op.get("a", "c1").unwrap().spec.type_name, "t2");
        op.delete("a", "c1").unwrap();
        assert_eq!(op.channels(), vec!["a.b.c3", "a.c2"]);
    }
}
