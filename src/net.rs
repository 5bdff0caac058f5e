use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;

/// Binds `0.0.0.0:port` only long enough to prove it's free, then drops
/// the listener. A reservation test, not a real bind: the supervisor
/// rebinds the same port for real a few steps later.
pub async fn probe_bindable(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("port {port} is not bindable"))?;
    Ok(())
}

/// Binds the loopback Ingress listener to an OS-chosen ephemeral port and
/// returns the bound listener together with the port the reconciler
/// should register with the gateway.
pub async fn bind_ephemeral_loopback() -> anyhow::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .context("binding ephemeral loopback listener")?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Finds a local, non-loopback, private IPv4 address, used to reach the
/// gateway. Fatal (per the supervisor's startup contract) if none exists.
pub fn discover_private_ipv4() -> anyhow::Result<IpAddr> {
    let addr = local_ip_address::local_ip().context("discovering a local IPv4 address")?;
    match addr {
        IpAddr::V4(v4) => {
            if v4.is_loopback() || !v4.is_private() {
                anyhow::bail!("discovered address {v4} is not a private, non-loopback IPv4 address");
            }
            Ok(addr)
        }
        IpAddr::V6(_) => anyhow::bail!("expected an IPv4 address, got {addr}"),
    }
}
