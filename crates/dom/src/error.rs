use crate::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// Inserting a node under itself or one of its descendants
    #[error("Hierarchy error: {child:?} cannot be inserted under {parent:?}")]
    Hierarchy { parent: NodeId, child: NodeId },

    /// The reference node is not a child of the given parent
    #[error("Reference node {reference:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, reference: NodeId },

    /// Operation requires an element
    #[error("Node {0:?} is not an element")]
    NotAnElement(NodeId),

    /// Node kind cannot hold children
    #[error("Node {0:?} cannot have children")]
    NotAContainer(NodeId),

    /// The handle's node was garbage collected
    #[error("Node {0:?} has been released")]
    Released(NodeId),
}
