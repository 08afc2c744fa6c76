//! Line driver layer module.

pub mod mock;
pub mod peer;
pub mod sysfs;
pub mod traits;

pub use mock::MockLines;
pub use peer::{
    BlockHandler, BlockPeer, EchoPeer, FileServer, FileServerPeer, Mailbox, PeerModel,
    SilentPeer, StoredFile,
};
pub use sysfs::SysfsLines;
pub use traits::{Direction, Level, Line, LineDriver, LineError};
