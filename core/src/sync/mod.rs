//! Directory state synchronisation: merge patches in, consistent snapshots out.

pub mod patch;
pub mod reducer;
pub mod session;
pub mod snapshot;

pub use patch::{merge_diff, merge_patch};
pub use reducer::{EffectHandle, SnapshotReducer};
pub use session::{fsinfo_once, DirectoryWatchSession, DIRECTORY_ATTRS};
pub use snapshot::{resolve_target, FileInfoState, FsInfoError, MAX_SYMLINK_HOPS};
