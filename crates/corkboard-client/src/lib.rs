//! # corkboard-client: One-shot TCP transport for `Corkboard`
//!
//! Every frame exchange in the protocol is one-shot: open a connection,
//! send one frame (or one blank-line-terminated batch), read one reply,
//! close. [`Transport`] implements that contract for every caller — the
//! user-facing [`BoardClient`], the replica's policy layer, and the
//! coordinator's fan-out legs all go through it, which is also where the
//! optional WAN delay emulation hooks in.

mod transport;

use std::net::SocketAddr;

use thiserror::Error;

use corkboard_types::{Message, MessageId};
use corkboard_wire::{DOES_NOT_EXIST, Frame, WireError, parse_code};

pub use transport::{DelayEmulation, Transport};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors produced by outbound exchanges.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The peer closed the connection before replying.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    /// The reply did not match the request's contract.
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

/// A typed client for the four board operations of a single replica.
#[derive(Debug, Clone)]
pub struct BoardClient {
    addr: SocketAddr,
    transport: Transport,
}

impl BoardClient {
    /// Creates a client for the replica listening at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            transport: Transport::new(),
        }
    }

    /// Creates a client using a caller-supplied transport (custom timeout
    /// or WAN delay).
    pub fn with_transport(addr: SocketAddr, transport: Transport) -> Self {
        Self { addr, transport }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Posts a new top-level message. Returns the replica's success code
    /// (0 ok, nonzero fail).
    pub fn post(&self, title: &str, author: &str, body: &str) -> ClientResult<u32> {
        let line = Frame::Post {
            title: title.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            id: None,
        }
        .encode()?;
        let reply = self.transport.exchange(self.addr, &line)?;
        Ok(parse_code(&reply)?)
    }

    /// Replies to an existing message. Returns the success code; `1` when
    /// the parent does not exist.
    pub fn reply(
        &self,
        parent: MessageId,
        title: &str,
        author: &str,
        body: &str,
    ) -> ClientResult<u32> {
        let line = Frame::Reply {
            parent,
            title: title.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            id: None,
        }
        .encode()?;
        let reply = self.transport.exchange(self.addr, &line)?;
        Ok(parse_code(&reply)?)
    }

    /// Reads page `n` of the threaded view.
    pub fn read_page(&self, page: u64) -> ClientResult<Vec<Message>> {
        let line = Frame::Read { page }.encode()?;
        let lines = self.transport.exchange_batch(self.addr, &line)?;
        let mut messages = Vec::with_capacity(lines.len());
        for line in lines {
            let frame = Frame::parse(&line)?;
            let msg = frame
                .into_message()
                .ok_or_else(|| ClientError::UnexpectedReply(line.clone()))?;
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Fetches one message by ID. `Ok(None)` when the replica answers with
    /// the `Does not exist` error text.
    pub fn choose(&self, id: MessageId) -> ClientResult<Option<Message>> {
        let line = Frame::Choose { id }.encode()?;
        let reply = self.transport.exchange(self.addr, &line)?;
        if reply.starts_with(DOES_NOT_EXIST) {
            return Ok(None);
        }
        let msg = Frame::parse(&reply)?
            .into_message()
            .ok_or(ClientError::UnexpectedReply(reply))?;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves one connection with a canned multi-line response, returning
    /// the request lines it saw.
    fn one_shot_server(response: &'static str) -> (SocketAddr, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut first = String::new();
            reader.read_line(&mut first).unwrap();
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
            vec![first.trim_end().to_string()]
        });
        (addr, handle)
    }

    #[test]
    fn post_returns_success_code() {
        let (addr, server) = one_shot_server("0\n");
        let client = BoardClient::new(addr);
        let code = client.post("Weather", "Alice", "Sunny").unwrap();
        assert_eq!(code, 0);
        assert_eq!(server.join().unwrap(), vec!["POST::Weather::Alice::Sunny"]);
    }

    #[test]
    fn read_page_parses_batch() {
        let (addr, _server) = one_shot_server("POST::Weather::Alice::Sunny::1\n\n");
        let client = BoardClient::new(addr);
        let page = client.read_page(0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, MessageId::new(1));
        assert_eq!(page[0].title, "Weather");
    }

    #[test]
    fn read_page_empty() {
        let (addr, _server) = one_shot_server("\n");
        let client = BoardClient::new(addr);
        assert!(client.read_page(3).unwrap().is_empty());
    }

    #[test]
    fn choose_maps_missing_to_none() {
        let (addr, _server) = one_shot_server("Does not exist: 42\n");
        let client = BoardClient::new(addr);
        assert_eq!(client.choose(MessageId::new(42)).unwrap(), None);
    }

    #[test]
    fn choose_parses_message_line() {
        let (addr, _server) = one_shot_server("REPLY::1::Re::Bob::Yes::2\n");
        let client = BoardClient::new(addr);
        let msg = client.choose(MessageId::new(2)).unwrap().unwrap();
        assert_eq!(msg.parent, Some(MessageId::new(1)));
        assert_eq!(msg.author, "Bob");
    }
}
