//! Request and reply blocks exchanged with the Portfolio file server.
//!
//! Multi-byte fields are little-endian; names are NUL-terminated ASCII.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{BufRead, Cursor};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Empty block")]
    Empty,
    #[error("Unknown command byte 0x{code:02X}")]
    UnknownCommand { code: u8 },
    #[error("Unknown response byte 0x{code:02X}")]
    UnknownResponse { code: u8 },
    #[error("Name {name:?} cannot be sent to the Portfolio")]
    InvalidName { name: String },
    #[error("Unterminated string in block")]
    Unterminated,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header of a file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFileRequest {
    pub block_size: u16,
    pub time: u16,
    pub date: u16,
    pub length: u32,
    pub path: String,
}

/// A request block sent from the controller to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    FileList { block_size: u16, pattern: String },
    SendFile(SendFileRequest),
    RetrieveFile { block_size: u16, path: String },
    Overwrite { block_size: u16 },
    Abort,
    Success,
}

impl Request {
    /// Command byte that opens this request.
    pub fn command(&self) -> u8 {
        match self {
            Request::FileList { .. } => CMD_FILE_LIST,
            Request::SendFile(_) => CMD_SEND_FILE,
            Request::RetrieveFile { .. } => CMD_RETRIEVE_FILE,
            Request::Overwrite { .. } => CMD_OVERWRITE,
            Request::Abort => CMD_ABORT,
            Request::Success => CMD_SUCCESS,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CommandError> {
        let mut buf = vec![self.command()];
        match self {
            Request::FileList {
                block_size,
                pattern,
            } => {
                buf.write_u16::<LittleEndian>(*block_size)?;
                write_string_z(&mut buf, pattern)?;
            }
            Request::SendFile(req) => {
                buf.write_u16::<LittleEndian>(req.block_size)?;
                buf.write_u16::<LittleEndian>(req.time)?;
                buf.write_u16::<LittleEndian>(req.date)?;
                buf.write_u32::<LittleEndian>(req.length)?;
                write_string_z(&mut buf, &req.path)?;
            }
            Request::RetrieveFile { block_size, path } => {
                buf.write_u16::<LittleEndian>(*block_size)?;
                write_string_z(&mut buf, path)?;
            }
            Request::Overwrite { block_size } => {
                buf.write_u16::<LittleEndian>(*block_size)?;
            }
            Request::Abort => buf.write_u16::<LittleEndian>(0)?,
            Request::Success => buf.write_u16::<LittleEndian>(SUCCESS_TRAILER)?,
        }
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        let (&code, _) = data.split_first().ok_or(CommandError::Empty)?;
        let mut cursor = Cursor::new(&data[1..]);
        let request = match code {
            CMD_FILE_LIST => Request::FileList {
                block_size: cursor.read_u16::<LittleEndian>()?,
                pattern: read_string_z(&mut cursor)?,
            },
            CMD_SEND_FILE => Request::SendFile(SendFileRequest {
                block_size: cursor.read_u16::<LittleEndian>()?,
                time: cursor.read_u16::<LittleEndian>()?,
                date: cursor.read_u16::<LittleEndian>()?,
                length: cursor.read_u32::<LittleEndian>()?,
                path: read_string_z(&mut cursor)?,
            }),
            CMD_RETRIEVE_FILE => Request::RetrieveFile {
                block_size: cursor.read_u16::<LittleEndian>()?,
                path: read_string_z(&mut cursor)?,
            },
            CMD_OVERWRITE => Request::Overwrite {
                block_size: cursor.read_u16::<LittleEndian>()?,
            },
            CMD_ABORT => Request::Abort,
            CMD_SUCCESS => Request::Success,
            code => return Err(CommandError::UnknownCommand { code }),
        };
        Ok(request)
    }
}

/// One-byte status at the start of a server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    FileExists,
    FileNotFound,
}

impl Response {
    pub fn from_byte(code: u8) -> Result<Self, CommandError> {
        match code {
            RESP_FILE_EXISTS => Ok(Response::FileExists),
            RESP_FILE_NOT_FOUND => Ok(Response::FileNotFound),
            code => Err(CommandError::UnknownResponse { code }),
        }
    }

    /// Parse the status byte that opens a reply block.
    pub fn from_block(block: &[u8]) -> Result<Self, CommandError> {
        let &code = block.first().ok_or(CommandError::Empty)?;
        Self::from_byte(code)
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Response::FileExists => RESP_FILE_EXISTS,
            Response::FileNotFound => RESP_FILE_NOT_FOUND,
        }
    }
}

/// Metadata the server returns before streaming a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub block_size: u16,
    pub time: u16,
    pub date: u16,
    pub length: u32,
}

/// Reply to a retrieve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveReply {
    Found(FileInfo),
    NotFound,
}

impl RetrieveReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CommandError> {
        match self {
            RetrieveReply::NotFound => Ok(vec![RESP_FILE_NOT_FOUND]),
            RetrieveReply::Found(info) => {
                let mut buf = Vec::with_capacity(11);
                buf.push(RESP_FILE_EXISTS);
                buf.write_u16::<LittleEndian>(info.block_size)?;
                buf.write_u16::<LittleEndian>(info.time)?;
                buf.write_u16::<LittleEndian>(info.date)?;
                buf.write_u32::<LittleEndian>(info.length)?;
                Ok(buf)
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        match Response::from_block(data)? {
            Response::FileNotFound => Ok(RetrieveReply::NotFound),
            Response::FileExists => {
                let mut cursor = Cursor::new(&data[1..]);
                Ok(RetrieveReply::Found(FileInfo {
                    block_size: cursor.read_u16::<LittleEndian>()?,
                    time: cursor.read_u16::<LittleEndian>()?,
                    date: cursor.read_u16::<LittleEndian>()?,
                    length: cursor.read_u32::<LittleEndian>()?,
                }))
            }
        }
    }
}

/// Directory listing returned for a file-list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListing {
    /// Count announced by the server.
    pub declared_count: u16,
    pub names: Vec<String>,
}

impl FileListing {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            declared_count: names.len() as u16,
            names,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CommandError> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(self.declared_count)?;
        for name in &self.names {
            write_string_z(&mut buf, name)?;
        }
        Ok(buf)
    }

    /// Parse a listing. A trailing name without its terminator is dropped.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        let mut cursor = Cursor::new(data);
        let declared_count = cursor.read_u16::<LittleEndian>()?;
        let mut names = Vec::with_capacity(declared_count as usize);
        loop {
            match read_string_z(&mut cursor) {
                Ok(name) => names.push(name),
                Err(CommandError::Unterminated) => break,
                Err(e) => return Err(e),
            }
        }
        if names.len() != declared_count as usize {
            tracing::warn!(
                declared = declared_count,
                parsed = names.len(),
                "File count does not match listing"
            );
        }
        Ok(Self {
            declared_count,
            names,
        })
    }
}

fn write_string_z(buf: &mut Vec<u8>, value: &str) -> Result<(), CommandError> {
    if !value.is_ascii() || value.contains('\0') {
        return Err(CommandError::InvalidName {
            name: value.to_string(),
        });
    }
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    Ok(())
}

fn read_string_z(cursor: &mut Cursor<&[u8]>) -> Result<String, CommandError> {
    let mut raw = Vec::new();
    cursor.read_until(0, &mut raw)?;
    if raw.pop() != Some(0) {
        return Err(CommandError::Unterminated);
    }
    Ok(raw.into_iter().map(char::from).collect())
}
