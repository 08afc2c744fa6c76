//! Protocol module - Portfolio file server definitions.

pub mod block;
pub mod command;
pub mod constants;
pub mod dos;

pub use command::{
    CommandError, FileInfo, FileListing, Request, Response, RetrieveReply, SendFileRequest,
};
pub use constants::*;
