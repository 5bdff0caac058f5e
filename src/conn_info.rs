//! Custom connection info for the Admin API's boundary filter.
//!
//! Axum's built-in `ConnectInfo<SocketAddr>` captures the *remote* peer
//! address. The spec's boundary filter needs the *local* address the
//! connection was accepted on (the admin listener binds `0.0.0.0`, so
//! that local address varies per network interface even though the
//! socket itself accepts on all of them). We implement `Connected`
//! ourselves to capture both.
use axum::extract::connect_info::{Connected, IncomingStream};
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Clone, Copy, Debug)]
pub struct ClientConnInfo {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

impl Connected<IncomingStream<'_, TcpListener>> for ClientConnInfo {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        let io = stream.io();
        Self {
            local_addr: io.local_addr().expect("accepted stream has a local addr"),
            remote_addr: io.peer_addr().expect("accepted stream has a peer addr"),
        }
    }
}
