//! Simulated Portfolio peers for [`MockLines`](super::MockLines).
//!
//! A peer sees the controller's traffic one decoded byte at a time and
//! answers with the bytes it wants clocked back.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::protocol::block;
use crate::protocol::constants::*;
use crate::protocol::{FileInfo, FileListing, Request, Response, RetrieveReply, SendFileRequest};

/// Byte-level behaviour of the far end.
pub trait PeerModel: Send {
    /// React to one byte from the controller.
    fn on_byte(&mut self, byte: u8) -> Vec<u8>;

    /// Bytes queued before the controller sends anything.
    fn greeting(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPeer;

impl PeerModel for SilentPeer {
    fn on_byte(&mut self, _byte: u8) -> Vec<u8> {
        Vec::new()
    }
}

/// Answers every byte with itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoPeer;

impl PeerModel for EchoPeer {
    fn on_byte(&mut self, byte: u8) -> Vec<u8> {
        vec![byte]
    }
}

/// Application behind a [`BlockPeer`].
pub trait BlockHandler: Send {
    /// Handle a validated block; returned blocks are offered to the
    /// controller in order on its next block requests.
    fn on_block(&mut self, block: Vec<u8>) -> Vec<Vec<u8>>;
}

/// Records received blocks and, if `reflect` is set, offers each one back.
#[derive(Debug, Default, Clone)]
pub struct Mailbox {
    pub received: Vec<Vec<u8>>,
    pub reflect: bool,
}

impl Mailbox {
    pub fn reflecting() -> Self {
        Self {
            received: Vec::new(),
            reflect: true,
        }
    }
}

impl BlockHandler for Mailbox {
    fn on_block(&mut self, block: Vec<u8>) -> Vec<Vec<u8>> {
        self.received.push(block.clone());
        if self.reflect { vec![block] } else { Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockRx {
    Idle,
    LengthLow,
    LengthHigh { low: u8 },
    Payload { len: usize, data: Vec<u8> },
    Checksum { data: Vec<u8> },
    AwaitingEcho { expected: u8 },
}

/// Server side of the block protocol.
///
/// Greets with `SERVER_READY`, acknowledges each received block by echoing
/// its checksum followed by `SERVER_READY`, and answers a block request
/// with the oldest outgoing block. A request with nothing queued is left
/// unanswered.
pub struct BlockPeer<H: BlockHandler = Mailbox> {
    handler: H,
    rx: BlockRx,
    outbox: VecDeque<Vec<u8>>,
    bad_blocks: usize,
}

impl<H: BlockHandler> BlockPeer<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            rx: BlockRx::Idle,
            outbox: VecDeque::new(),
            bad_blocks: 0,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Queue a block for the controller to retrieve.
    pub fn offer(&mut self, block: Vec<u8>) {
        self.outbox.push_back(block);
    }

    pub fn pending_blocks(&self) -> usize {
        self.outbox.len()
    }

    /// Blocks rejected for a bad checksum.
    pub fn bad_blocks(&self) -> usize {
        self.bad_blocks
    }

    fn finish_block(&mut self, data: Vec<u8>, checksum: u8) -> Vec<u8> {
        let residue = block::residue(&data, checksum);
        if residue != 0 {
            warn!(residue, "Simulated peer rejected block");
            self.bad_blocks += 1;
            return vec![checksum.wrapping_add(residue), SERVER_READY];
        }
        let replies = self.handler.on_block(data);
        self.outbox.extend(replies);
        vec![checksum, SERVER_READY]
    }

    fn serve_request(&mut self) -> Vec<u8> {
        let Some(data) = self.outbox.pop_front() else {
            debug!("Block requested with nothing queued");
            return Vec::new();
        };
        let checksum = block::checksum(&data);
        let len = (data.len() as u16).to_le_bytes();
        let mut wire = Vec::with_capacity(data.len() + 4);
        wire.push(BLOCK_START);
        wire.extend_from_slice(&len);
        wire.extend_from_slice(&data);
        wire.push(checksum);
        self.rx = BlockRx::AwaitingEcho { expected: checksum };
        wire
    }
}

impl<H: BlockHandler + Default> Default for BlockPeer<H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

impl<H: BlockHandler> PeerModel for BlockPeer<H> {
    fn greeting(&mut self) -> Vec<u8> {
        vec![SERVER_READY]
    }

    fn on_byte(&mut self, byte: u8) -> Vec<u8> {
        match std::mem::replace(&mut self.rx, BlockRx::Idle) {
            BlockRx::Idle => match byte {
                BLOCK_START => {
                    self.rx = BlockRx::LengthLow;
                    Vec::new()
                }
                BLOCK_REQUEST => self.serve_request(),
                other => {
                    debug!(byte = other, "Simulated peer ignored byte");
                    Vec::new()
                }
            },
            BlockRx::LengthLow => {
                self.rx = BlockRx::LengthHigh { low: byte };
                Vec::new()
            }
            BlockRx::LengthHigh { low } => {
                let len = u16::from_le_bytes([low, byte]) as usize;
                self.rx = if len == 0 {
                    BlockRx::Checksum { data: Vec::new() }
                } else {
                    BlockRx::Payload {
                        len,
                        data: Vec::with_capacity(len),
                    }
                };
                Vec::new()
            }
            BlockRx::Payload { len, mut data } => {
                data.push(byte);
                self.rx = if data.len() == len {
                    BlockRx::Checksum { data }
                } else {
                    BlockRx::Payload { len, data }
                };
                Vec::new()
            }
            BlockRx::Checksum { data } => self.finish_block(data, byte),
            BlockRx::AwaitingEcho { expected } => {
                if byte != expected {
                    warn!(expected, actual = byte, "Controller echoed wrong checksum");
                }
                vec![SERVER_READY]
            }
        }
    }
}

/// A file held by the simulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub data: Vec<u8>,
    pub time: u16,
    pub date: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerState {
    Ready,
    /// Target exists; waiting for overwrite or abort.
    AwaitingDecision(SendFileRequest),
    Receiving {
        request: SendFileRequest,
        data: Vec<u8>,
    },
    /// File streamed; waiting for the success block.
    AwaitingSuccess,
}

/// In-memory Portfolio file server.
#[derive(Debug, Clone)]
pub struct FileServer {
    files: BTreeMap<String, StoredFile>,
    state: ServerState,
    requests: Vec<Request>,
}

impl Default for FileServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FileServer {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            state: ServerState::Ready,
            requests: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.insert(path, data.to_vec(), 0, 0);
        self
    }

    pub fn insert(&mut self, path: &str, data: Vec<u8>, time: u16, date: u16) {
        self.files
            .insert(path.to_ascii_uppercase(), StoredFile { data, time, date });
    }

    pub fn file(&self, path: &str) -> Option<&StoredFile> {
        self.files.get(&path.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Every request block parsed so far.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    fn response(response: Response) -> Vec<u8> {
        vec![response.as_byte()]
    }

    fn list(&self, pattern: &str) -> Vec<String> {
        let (dir, glob) = split_path(pattern);
        self.files
            .keys()
            .filter_map(|path| {
                let (file_dir, name) = split_path(path);
                (file_dir.eq_ignore_ascii_case(dir) && dos_match(glob, name))
                    .then(|| name.to_string())
            })
            .collect()
    }

    /// Store the upload if complete and return the closing response.
    fn complete_if_done(&mut self, request: SendFileRequest, data: Vec<u8>) -> Vec<Vec<u8>> {
        if data.len() < request.length as usize {
            self.state = ServerState::Receiving { request, data };
            return Vec::new();
        }
        self.insert(&request.path, data, request.time, request.date);
        self.state = ServerState::Ready;
        vec![Self::response(Response::FileExists)]
    }

    fn on_request(&mut self, request: Request) -> Vec<Vec<u8>> {
        match request {
            Request::FileList { pattern, .. } => {
                let listing = FileListing::new(self.list(&pattern));
                match listing.to_bytes() {
                    Ok(bytes) => vec![bytes],
                    Err(e) => {
                        warn!(error = %e, "Cannot encode listing");
                        Vec::new()
                    }
                }
            }
            Request::SendFile(request) => {
                if self.file(&request.path).is_some() {
                    self.state = ServerState::AwaitingDecision(request);
                    return vec![Self::response(Response::FileExists)];
                }
                let mut replies = vec![Self::response(Response::FileNotFound)];
                replies.extend(self.complete_if_done(request, Vec::new()));
                replies
            }
            Request::RetrieveFile { block_size, path } => {
                let Some(file) = self.file(&path) else {
                    return vec![Self::response(Response::FileNotFound)];
                };
                let reply = RetrieveReply::Found(FileInfo {
                    block_size,
                    time: file.time,
                    date: file.date,
                    length: file.data.len() as u32,
                });
                let chunk = (block_size as usize).clamp(1, MAX_BLOCK_SIZE);
                let mut blocks = match reply.to_bytes() {
                    Ok(bytes) => vec![bytes],
                    Err(e) => {
                        warn!(error = %e, "Cannot encode retrieve reply");
                        return Vec::new();
                    }
                };
                blocks.extend(file.data.chunks(chunk).map(<[u8]>::to_vec));
                self.state = ServerState::AwaitingSuccess;
                blocks
            }
            other => {
                debug!(request = ?other, "Request ignored outside a transfer");
                Vec::new()
            }
        }
    }
}

impl BlockHandler for FileServer {
    fn on_block(&mut self, block: Vec<u8>) -> Vec<Vec<u8>> {
        let state = std::mem::replace(&mut self.state, ServerState::Ready);
        if let ServerState::Receiving { request, mut data } = state {
            data.extend_from_slice(&block);
            return self.complete_if_done(request, data);
        }

        let request = match Request::from_bytes(&block) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Simulated server received malformed block");
                return Vec::new();
            }
        };
        self.requests.push(request.clone());

        match (state, request) {
            (ServerState::AwaitingDecision(pending), Request::Overwrite { .. }) => {
                self.complete_if_done(pending, Vec::new())
            }
            (ServerState::AwaitingDecision(_), Request::Abort) => Vec::new(),
            (ServerState::AwaitingSuccess, Request::Success) => Vec::new(),
            (_, request) => self.on_request(request),
        }
    }
}

/// A [`BlockPeer`] fronting an in-memory file server.
pub type FileServerPeer = BlockPeer<FileServer>;

/// Split `C:\DIR\NAME.EXT` into `C:\DIR` and `NAME.EXT`.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('\\') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Case-insensitive DOS wildcard match. `*.*` matches every name.
fn dos_match(pattern: &str, name: &str) -> bool {
    if pattern == "*.*" {
        return true;
    }
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.split_first(), n.split_first()) {
            (None, None) => true,
            (Some((b'*', rest)), _) => {
                matches(rest, n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some((b'?', rest)), Some((_, n_rest))) => matches(rest, n_rest),
            (Some((pc, rest)), Some((nc, n_rest))) => {
                pc.eq_ignore_ascii_case(nc) && matches(rest, n_rest)
            }
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_block(data: &[u8]) -> Vec<u8> {
        let mut wire = vec![BLOCK_START];
        wire.extend_from_slice(&(data.len() as u16).to_le_bytes());
        wire.extend_from_slice(data);
        wire.push(block::checksum(data));
        wire
    }

    fn feed<P: PeerModel>(peer: &mut P, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().flat_map(|&b| peer.on_byte(b)).collect()
    }

    #[test]
    fn test_block_peer_acknowledges_block() {
        let mut peer = BlockPeer::new(Mailbox::default());
        assert_eq!(peer.greeting(), vec![SERVER_READY]);

        let data = b"hello";
        let reply = feed(&mut peer, &wire_block(data));
        assert_eq!(reply, vec![block::checksum(data), SERVER_READY]);
        assert_eq!(peer.handler().received, vec![data.to_vec()]);
    }

    #[test]
    fn test_block_peer_rejects_bad_checksum() {
        let mut peer = BlockPeer::new(Mailbox::reflecting());
        let mut wire = wire_block(b"abc");
        let last = wire.len() - 1;
        wire[last] ^= 0x40;

        let reply = feed(&mut peer, &wire);
        assert_ne!(reply[0], wire[last]);
        assert_eq!(peer.bad_blocks(), 1);
        assert_eq!(peer.pending_blocks(), 0);
    }

    #[test]
    fn test_block_peer_serves_request() {
        let mut peer = BlockPeer::new(Mailbox::default());
        peer.offer(vec![1, 2, 3]);

        let reply = feed(&mut peer, &[BLOCK_REQUEST]);
        assert_eq!(reply, wire_block(&[1, 2, 3]));
        assert_eq!(feed(&mut peer, &[block::checksum(&[1, 2, 3])]), vec![SERVER_READY]);

        // Nothing queued: the request goes unanswered.
        assert!(feed(&mut peer, &[BLOCK_REQUEST]).is_empty());
    }

    #[test]
    fn test_empty_block() {
        let mut peer = BlockPeer::new(Mailbox::reflecting());
        let reply = feed(&mut peer, &wire_block(&[]));
        assert_eq!(reply, vec![0, SERVER_READY]);
        assert_eq!(feed(&mut peer, &[BLOCK_REQUEST]), wire_block(&[]));
    }

    #[test]
    fn test_dos_match() {
        assert!(dos_match("*.*", "README"));
        assert!(dos_match("*.TXT", "notes.txt"));
        assert!(dos_match("NOTE?.TXT", "NOTES.TXT"));
        assert!(!dos_match("*.TXT", "NOTES.BAS"));
        assert!(!dos_match("A?", "A"));
    }

    #[test]
    fn test_file_server_listing() {
        let mut server = FileServer::new()
            .with_file("C:\\A.TXT", b"a")
            .with_file("C:\\B.BAS", b"b")
            .with_file("D:\\C.TXT", b"c");
        let request = Request::FileList {
            block_size: 0x7000,
            pattern: "C:\\*.TXT".to_string(),
        };
        let replies = server.on_block(request.to_bytes().unwrap());
        let listing = FileListing::from_bytes(&replies[0]).unwrap();
        assert_eq!(listing.names, vec!["A.TXT"]);
    }

    #[test]
    fn test_file_server_zero_length_upload() {
        let mut server = FileServer::new();
        let request = Request::SendFile(SendFileRequest {
            block_size: 0x7000,
            time: 0,
            date: 0,
            length: 0,
            path: "C:\\EMPTY".to_string(),
        });
        let replies = server.on_block(request.to_bytes().unwrap());
        assert_eq!(
            replies,
            vec![vec![RESP_FILE_NOT_FOUND], vec![RESP_FILE_EXISTS]]
        );
        assert_eq!(server.file("c:\\empty").unwrap().data, Vec::<u8>::new());
    }

    #[test]
    fn test_file_server_abort_keeps_file() {
        let mut server = FileServer::new().with_file("C:\\KEEP.TXT", b"old");
        let request = Request::SendFile(SendFileRequest {
            block_size: 0x7000,
            time: 0,
            date: 0,
            length: 3,
            path: "C:\\KEEP.TXT".to_string(),
        });
        assert_eq!(
            server.on_block(request.to_bytes().unwrap()),
            vec![vec![RESP_FILE_EXISTS]]
        );
        assert!(server.on_block(Request::Abort.to_bytes().unwrap()).is_empty());
        assert_eq!(server.file("C:\\KEEP.TXT").unwrap().data, b"old");
    }
}
