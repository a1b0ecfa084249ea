//! Node source port. Nodes are the concrete proxy outbounds known at generation time.

use serde::{Deserialize, Serialize};

/// One proxy node as supplied by the import layer.
///
/// `outbound` holds the engine-shaped proxy fields (server, port, cipher, ...); the
/// adapters copy it through and only set the name/tag key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub outbound: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

pub trait NodeSource: Send + Sync {
    fn nodes(&self) -> Vec<Node>;
}

/// Fixed in-memory node list.
#[derive(Debug, Clone, Default)]
pub struct StaticNodes(pub Vec<Node>);

impl NodeSource for StaticNodes {
    fn nodes(&self) -> Vec<Node> {
        self.0.clone()
    }
}
