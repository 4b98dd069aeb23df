//! Request/response correlation over a netlink route socket (C2 Transport).
//!
//! Implements the `talk`/`dump` contract from SPEC_FULL.md §4.2: write a
//! request, then read until a terminal ACK or error matching the request's
//! sequence number arrives, dispatching any other sequence's messages to the
//! caller in arrival order before returning.

use std::time::Duration;

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST,
    NlMsgError, NlMsgHdr,
};
use super::socket::NetlinkSocket;

/// Default deadline for a `talk`/`dump` round trip (base spec §5: "Timeouts
/// on `talk`: default 5s; a timeout returns `Timeout` and leaves the target
/// route in an indeterminate state").
pub const TALK_TIMEOUT: Duration = Duration::from_secs(5);

/// A single request/response netlink connection.
///
/// Each [`crate::vrf::Vrf`] owns two of these: a "command" connection for
/// synchronous `talk`/`dump`, and a "notify" connection subscribed to
/// asynchronous route/neighbor multicast groups (see SPEC_FULL.md §4.2).
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Open a new connection against the route-protocol netlink socket.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    /// Subscribe to a multicast group. Used on the notify connection only.
    pub fn subscribe(&mut self, group: u32) -> Result<()> {
        self.socket.add_membership(group)
    }

    /// Receive the next unsolicited event message (for C7/C8 ingest).
    pub async fn recv_event(&self) -> Result<Vec<u8>> {
        self.socket.recv_msg().await
    }

    /// Send a request and wait for either an ACK or the matching response
    /// message (C2 `talk`).
    ///
    /// Returns the full response buffer (possibly containing more than one
    /// netlink message); the caller parses it with [`MessageIter`].
    pub async fn talk(&self, mut builder: MessageBuilder) -> Result<Vec<u8>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let response = tokio::time::timeout(TALK_TIMEOUT, self.socket.recv_msg())
            .await
            .map_err(|_| Error::Timeout)??;
        self.check_for_error(&response, seq)?;
        Ok(response)
    }

    /// Send a request that only expects an ACK (no data payload).
    pub async fn talk_ack(&self, builder: MessageBuilder) -> Result<()> {
        let response = self.talk(builder).await?;
        for result in MessageIter::new(&response) {
            let (header, payload) = result?;
            if header.is_error() {
                let err = NlMsgError::from_bytes(payload)?;
                if err.is_ack() {
                    return Ok(());
                }
                return Err(Error::from_errno(err.error));
            }
        }
        Err(Error::Malformed(
            "expected ACK, got no error message".into(),
        ))
    }

    /// Send a dump request and collect every response message until `DONE`
    /// (C2 `dump`). Messages for other sequence numbers are skipped, not
    /// buffered for later dispatch, since only one dump is ever outstanding
    /// at a time in this daemon's single-threaded loop.
    pub async fn dump(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let mut responses = Vec::new();
        loop {
            let data = tokio::time::timeout(TALK_TIMEOUT, self.socket.recv_msg())
                .await
                .map_err(|_| Error::Timeout)??;
            let mut done = false;

            for result in MessageIter::new(&data) {
                let (header, payload) = result?;
                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    if !err.is_ack() {
                        return Err(Error::from_errno(err.error));
                    }
                    continue;
                }
                if header.is_done() {
                    done = true;
                    break;
                }

                let msg_len = header.nlmsg_len as usize;
                let msg_start = payload.as_ptr() as usize
                    - data.as_ptr() as usize
                    - std::mem::size_of::<NlMsgHdr>();
                if msg_start + msg_len <= data.len() {
                    responses.push(data[msg_start..msg_start + msg_len].to_vec());
                }
            }

            if done {
                break;
            }
        }

        Ok(responses)
    }

    fn check_for_error(&self, data: &[u8], expected_seq: u32) -> Result<()> {
        for result in MessageIter::new(data) {
            let (header, payload) = result?;
            if header.nlmsg_seq != expected_seq {
                continue;
            }
            if header.is_error() {
                let err = NlMsgError::from_bytes(payload)?;
                if !err.is_ack() {
                    return Err(Error::from_errno(err.error));
                }
            }
        }
        Ok(())
    }
}

/// Build a dump request (`NLM_F_REQUEST | NLM_F_DUMP`).
pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

/// Build an ACK-only request (`NLM_F_REQUEST | NLM_F_ACK`), used for DEL.
pub fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}

/// Build a non-replacing create request (C6 action 2: ADD only).
pub fn create_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(
        msg_type,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
    )
}

/// Build a create-or-replace request (C6 action 4: ADD with REPLACE).
pub fn replace_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(
        msg_type,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    )
}
