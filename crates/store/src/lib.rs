pub mod reconciler;
pub mod store;
pub mod tree;

pub use reconciler::{EchoSet, Reconciler};
pub use store::{CommentStore, StoreSnapshot, StoreStatus};
pub use tree::{CommentTree, RemoveMode};
