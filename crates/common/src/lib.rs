pub mod config;
pub mod crosstab;
pub mod error;
pub mod storage;
pub mod types;
pub mod wire;

pub use config::{ClientConfig, RealTimeMode};
pub use crosstab::{BusHub, BusMessage, CrossTabBus, VoteBroadcast};
pub use error::{Error, ErrorKind, Result};
pub use storage::{FileStorage, MemoryStorage, StorageKey, TokenStorage};
pub use types::{
    AuthMethod, AuthMethodKind, AuthUser, Comment, CommentStatus, Session, SortOrder, TypingUser,
    UserPublic, VoteDirection, DELETED_TEXT,
};
