//! File transfer with the Portfolio file server.
//!
//! Each request, reply and data chunk travels as one block, and every block
//! is preceded by its own server handshake.

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::LinkError;
use crate::events::{LinkEvent, LinkObserver};
use crate::line::LineDriver;
use crate::protocol::dos;
use crate::protocol::{
    CommandError, FileListing, Request, Response, RetrieveReply, SendFileRequest,
};
use crate::session::LinkSession;
use crate::transport::LineWait;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("Block {index} failed: {source}")]
    Block {
        index: usize,
        #[source]
        source: LinkError,
    },

    #[error("{path} not found on the Portfolio")]
    NotFound { path: String },

    #[error("{path} already exists on the Portfolio")]
    AlreadyExists { path: String },

    #[error("Unexpected server response 0x{code:02X}")]
    UnexpectedResponse { code: u8 },

    #[error("Malformed block: {0}")]
    Malformed(#[from] CommandError),

    #[error("Transfer stopped after {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },

    #[error("File of {len} bytes cannot be sent")]
    TooLarge { len: usize },
}

impl FileError {
    /// The link-level cause, if a block failed.
    pub fn link_error(&self) -> Option<&LinkError> {
        match self {
            FileError::Block { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A file fetched from the Portfolio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    pub path: String,
    pub data: Vec<u8>,
    /// Server timestamp, if it decodes to a valid date.
    pub modified: Option<NaiveDateTime>,
}

/// How an upload landed on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Created,
    Overwritten,
}

/// Numbers the blocks of one file operation for error reporting.
struct Exchange<'a, D, W, O> {
    session: &'a mut LinkSession<D, W, O>,
    index: usize,
}

impl<'a, D: LineDriver, W: LineWait, O: LinkObserver> Exchange<'a, D, W, O> {
    fn new(session: &'a mut LinkSession<D, W, O>) -> Self {
        Self { session, index: 0 }
    }

    fn next_index(&mut self) -> usize {
        let index = self.index;
        self.index += 1;
        index
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), FileError> {
        let index = self.next_index();
        let result = self
            .session
            .wait_for_server()
            .and_then(|()| self.session.send_block(payload));
        self.check(index, result)
    }

    /// Number a failed block and report it to the observer.
    fn check<T>(&self, index: usize, result: Result<T, LinkError>) -> Result<T, FileError> {
        result.map_err(|source| {
            let err = FileError::Block { index, source };
            self.session.emit(LinkEvent::Error {
                message: err.to_string(),
            });
            err
        })
    }

    fn request(&mut self, request: &Request) -> Result<(), FileError> {
        debug!(command = %format!("0x{:02X}", request.command()), "Sending request");
        self.send(&request.to_bytes()?)
    }

    fn retrieve(&mut self) -> Result<Vec<u8>, FileError> {
        let index = self.next_index();
        let result = self
            .session
            .wait_for_server()
            .and_then(|()| self.session.retrieve_block());
        self.check(index, result)
    }

    fn response(&mut self) -> Result<Response, FileError> {
        let block = self.retrieve()?;
        Ok(Response::from_block(&block)?)
    }

    fn progress(&self, operation: &str, current: usize, total: usize) {
        self.session.emit(LinkEvent::Progress {
            operation: operation.to_string(),
            current: current as u64,
            total: total as u64,
        });
    }
}

impl<D: LineDriver, W: LineWait, O: LinkObserver> LinkSession<D, W, O> {
    /// Ask the server for the names matching `pattern`.
    pub fn request_file_list(&mut self, pattern: &str) -> Result<(), FileError> {
        let block_size = self.config().wire_block_size();
        Exchange::new(self).request(&Request::FileList {
            block_size,
            pattern: pattern.to_string(),
        })
    }

    /// List the names matching a DOS wildcard such as `C:\*.*`.
    #[instrument(skip(self))]
    pub fn list_files(&mut self, pattern: &str) -> Result<Vec<String>, FileError> {
        let block_size = self.config().wire_block_size();
        let mut exchange = Exchange::new(self);
        exchange.request(&Request::FileList {
            block_size,
            pattern: pattern.to_string(),
        })?;
        let listing = FileListing::from_bytes(&exchange.retrieve()?)?;
        info!(count = listing.names.len(), "Listed files");
        Ok(listing.names)
    }

    /// Upload `data` as `remote_path`.
    ///
    /// An existing file is replaced only if `overwrite` is set; otherwise the
    /// upload is aborted and `AlreadyExists` returned.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn send_file(
        &mut self,
        remote_path: &str,
        data: &[u8],
        overwrite: bool,
        modified: NaiveDateTime,
    ) -> Result<SendOutcome, FileError> {
        let length = u32::try_from(data.len()).map_err(|_| FileError::TooLarge { len: data.len() })?;
        let block_size = self.config().wire_block_size();
        let chunk_size = (block_size as usize).max(1);
        let operation = format!("send {}", remote_path);

        let mut exchange = Exchange::new(self);
        exchange.request(&Request::SendFile(SendFileRequest {
            block_size,
            time: dos::encode_time(&modified),
            date: dos::encode_date(&modified),
            length,
            path: remote_path.to_string(),
        }))?;

        let outcome = match exchange.response()? {
            Response::FileNotFound => SendOutcome::Created,
            Response::FileExists if overwrite => {
                info!(path = %remote_path, "Overwriting existing file");
                exchange.request(&Request::Overwrite { block_size })?;
                SendOutcome::Overwritten
            }
            Response::FileExists => {
                warn!(path = %remote_path, "File exists, aborting upload");
                exchange.request(&Request::Abort)?;
                return Err(FileError::AlreadyExists {
                    path: remote_path.to_string(),
                });
            }
        };

        let mut sent = 0;
        for chunk in data.chunks(chunk_size) {
            exchange.send(chunk)?;
            sent += chunk.len();
            exchange.progress(&operation, sent, data.len());
        }

        match exchange.response()? {
            Response::FileExists => {
                info!(path = %remote_path, bytes = data.len(), ?outcome, "File sent");
                Ok(outcome)
            }
            other => Err(FileError::UnexpectedResponse {
                code: other.as_byte(),
            }),
        }
    }

    /// Download `remote_path`.
    #[instrument(skip(self))]
    pub fn retrieve_file(&mut self, remote_path: &str) -> Result<RetrievedFile, FileError> {
        let block_size = self.config().wire_block_size();
        // The announced length is untrusted; grow past one block only as data arrives.
        let reserve = self.config().max_block_size;
        let operation = format!("retrieve {}", remote_path);

        let mut exchange = Exchange::new(self);
        exchange.request(&Request::RetrieveFile {
            block_size,
            path: remote_path.to_string(),
        })?;

        let info = match RetrieveReply::from_bytes(&exchange.retrieve()?)? {
            RetrieveReply::Found(info) => info,
            RetrieveReply::NotFound => {
                return Err(FileError::NotFound {
                    path: remote_path.to_string(),
                });
            }
        };

        let expected = info.length as usize;
        let mut data = Vec::with_capacity(expected.min(reserve));
        while data.len() < expected {
            let block = exchange.retrieve()?;
            if block.is_empty() {
                return Err(FileError::Truncated {
                    received: data.len(),
                    expected,
                });
            }
            data.extend_from_slice(&block);
            exchange.progress(&operation, data.len().min(expected), expected);
        }
        if data.len() > expected {
            warn!(extra = data.len() - expected, "Server sent more data than announced");
            data.truncate(expected);
        }

        exchange.request(&Request::Success)?;
        info!(path = %remote_path, bytes = data.len(), "File retrieved");

        Ok(RetrievedFile {
            path: remote_path.to_string(),
            data,
            modified: dos::decode(info.date, info.time),
        })
    }
}
