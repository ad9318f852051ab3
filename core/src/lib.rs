pub mod config;
pub mod context;
pub mod editor;
pub mod errors;
pub mod files;
pub mod host;
pub mod ops;
pub mod sync;
pub mod timing;

pub use context::FilesContext;
pub use editor::EditorSession;
pub use errors::{CoreError, FileError, OpError, ValidationError};
pub use host::Host;
pub use ops::Coordinator;
pub use sync::{DirectoryWatchSession, SnapshotReducer};
