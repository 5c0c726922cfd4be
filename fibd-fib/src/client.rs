//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fibd_utils::mpls::Label;
use fibd_utils::southbound::{MplsRoute, UnicastRoute};
use ipnetwork::IpNetwork;
use num_derive::FromPrimitive;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::error::{Error, IoError};
use crate::packet::route::RouteMessage;

// Upper bound on the reply payload size.
const MAX_REPLY_SIZE: u32 = 1 << 20;

// Platform agent operations.
//
// Requests are framed as a 4-byte big-endian payload length followed by the
// payload: one op byte, the 32-bit client ID, a 32-bit route count, and
// `count` netlink route messages (each self-delimited by its own header).
// Replies carry a status byte, plus a 64-bit timestamp for `AliveSince`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive)]
pub enum FibOp {
    AddUnicastRoutes = 1,
    DeleteUnicastRoutes = 2,
    AddMplsRoutes = 3,
    DeleteMplsRoutes = 4,
    SyncFib = 5,
    SyncMplsFib = 6,
    AliveSince = 7,
}

// RPC client for the platform FIB agent.
//
// The connection is created lazily on first use and torn down on any error;
// retrying is the route programmer's job, not the client's.
#[derive(Debug)]
pub struct FibAgentClient {
    agent_addr: SocketAddr,
    client_id: i32,
    connect_timeout: Duration,
    proc_timeout: Duration,
    stream: Option<TcpStream>,
}

// ===== impl FibAgentClient =====

impl FibAgentClient {
    pub fn new(
        agent_addr: SocketAddr,
        client_id: i32,
        connect_timeout: Duration,
        proc_timeout: Duration,
    ) -> FibAgentClient {
        FibAgentClient {
            agent_addr,
            client_id,
            connect_timeout,
            proc_timeout,
            stream: None,
        }
    }

    // Idempotent add-or-replace of unicast routes.
    pub async fn add_unicast_routes(
        &mut self,
        routes: &[UnicastRoute],
    ) -> Result<(), Error> {
        let (count, body) = encode_unicast_routes(routes);
        self.call(FibOp::AddUnicastRoutes, count, body).await?;
        Ok(())
    }

    // Idempotent delete of unicast routes by prefix.
    pub async fn delete_unicast_routes(
        &mut self,
        prefixes: &[IpNetwork],
    ) -> Result<(), Error> {
        let mut body = BytesMut::new();
        let mut count = 0;
        for prefix in prefixes {
            let route = UnicastRoute::new(*prefix, Default::default());
            match RouteMessage::encode_unicast_del(&route) {
                Ok(msg) => {
                    body.extend_from_slice(&msg);
                    count += 1;
                }
                Err(error) => {
                    error!(dest = %prefix, %error, "failed to encode route");
                }
            }
        }
        self.call(FibOp::DeleteUnicastRoutes, count, body.freeze())
            .await?;
        Ok(())
    }

    // Idempotent add-or-replace of MPLS routes.
    pub async fn add_mpls_routes(
        &mut self,
        routes: &[MplsRoute],
    ) -> Result<(), Error> {
        let (count, body) = encode_mpls_routes(routes);
        self.call(FibOp::AddMplsRoutes, count, body).await?;
        Ok(())
    }

    // Idempotent delete of MPLS routes by top label.
    pub async fn delete_mpls_routes(
        &mut self,
        labels: &[Label],
    ) -> Result<(), Error> {
        let mut body = BytesMut::new();
        let mut count = 0;
        for label in labels {
            let route = MplsRoute::new(*label, Default::default());
            match RouteMessage::encode_mpls_del(&route) {
                Ok(msg) => {
                    body.extend_from_slice(&msg);
                    count += 1;
                }
                Err(error) => {
                    error!(%label, %error, "failed to encode route");
                }
            }
        }
        self.call(FibOp::DeleteMplsRoutes, count, body.freeze())
            .await?;
        Ok(())
    }

    // Replaces the agent's entire unicast table for this client.
    pub async fn sync_fib(
        &mut self,
        routes: &[UnicastRoute],
    ) -> Result<(), Error> {
        let (count, body) = encode_unicast_routes(routes);
        self.call(FibOp::SyncFib, count, body).await?;
        Ok(())
    }

    // Replaces the agent's entire MPLS table for this client.
    pub async fn sync_mpls_fib(
        &mut self,
        routes: &[MplsRoute],
    ) -> Result<(), Error> {
        let (count, body) = encode_mpls_routes(routes);
        self.call(FibOp::SyncMplsFib, count, body).await?;
        Ok(())
    }

    // Returns the monotone restart timestamp of the agent.
    pub async fn alive_since(&mut self) -> Result<i64, Error> {
        let mut reply =
            self.call(FibOp::AliveSince, 0, Bytes::new()).await?;
        if reply.remaining() < 8 {
            return Err(IoError::TcpRecvError(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            ))
            .into());
        }
        Ok(reply.get_i64())
    }

    async fn call(
        &mut self,
        op: FibOp,
        count: u32,
        body: Bytes,
    ) -> Result<Bytes, Error> {
        let result = self.request(op, count, body).await;
        if result.is_err() {
            // Tear down the connection; the next call reconnects lazily.
            self.stream = None;
        }
        result
    }

    async fn request(
        &mut self,
        op: FibOp,
        count: u32,
        body: Bytes,
    ) -> Result<Bytes, Error> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                debug!(agent = %self.agent_addr, "connecting to platform agent");
                let stream = timeout(
                    self.connect_timeout,
                    TcpStream::connect(self.agent_addr),
                )
                .await
                .map_err(|_| IoError::AgentTimeout)?
                .map_err(IoError::TcpConnectError)?;
                self.stream.insert(stream)
            }
        };

        // Request frame.
        let payload_len = 1 + 4 + 4 + body.len();
        let mut frame = BytesMut::with_capacity(4 + payload_len);
        frame.put_u32(payload_len as u32);
        frame.put_u8(op as u8);
        frame.put_i32(self.client_id);
        frame.put_u32(count);
        frame.extend_from_slice(&body);

        timeout(self.proc_timeout, stream.write_all(&frame))
            .await
            .map_err(|_| IoError::AgentTimeout)?
            .map_err(IoError::TcpSendError)?;

        // Reply frame.
        let mut reply_len = [0u8; 4];
        timeout(self.proc_timeout, stream.read_exact(&mut reply_len))
            .await
            .map_err(|_| IoError::AgentTimeout)?
            .map_err(IoError::TcpRecvError)?;
        let reply_len = u32::from_be_bytes(reply_len);
        if reply_len == 0 || reply_len > MAX_REPLY_SIZE {
            return Err(IoError::TcpRecvError(std::io::Error::from(
                std::io::ErrorKind::InvalidData,
            ))
            .into());
        }
        let mut reply = vec![0u8; reply_len as usize];
        timeout(self.proc_timeout, stream.read_exact(&mut reply))
            .await
            .map_err(|_| IoError::AgentTimeout)?
            .map_err(IoError::TcpRecvError)?;

        let mut reply = Bytes::from(reply);
        let status = reply.get_u8();
        if status != 0 {
            return Err(Error::AgentRejected(status));
        }
        Ok(reply)
    }
}

// ===== helper functions =====

// Encodes a batch of unicast routes. Routes that fail to encode are logged
// and skipped; the batch proceeds without them.
fn encode_unicast_routes(routes: &[UnicastRoute]) -> (u32, Bytes) {
    let mut body = BytesMut::new();
    let mut count = 0;
    for route in routes {
        match RouteMessage::encode_unicast_add(route) {
            Ok(msg) => {
                body.extend_from_slice(&msg);
                count += 1;
            }
            Err(error) => {
                error!(dest = %route.dest, %error, "failed to encode route");
            }
        }
    }
    (count, body.freeze())
}

fn encode_mpls_routes(routes: &[MplsRoute]) -> (u32, Bytes) {
    let mut body = BytesMut::new();
    let mut count = 0;
    for route in routes {
        match RouteMessage::encode_mpls_add(route) {
            Ok(msg) => {
                body.extend_from_slice(&msg);
                count += 1;
            }
            Err(error) => {
                error!(label = %route.top_label, %error, "failed to encode route");
            }
        }
    }
    (count, body.freeze())
}
