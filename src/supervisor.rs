use crate::allowlist::AllowlistStore;
use crate::conn_info::ClientConnInfo;
use crate::config::Config;
use crate::dedup::{DedupCache, DEDUP_TTL};
use crate::fanout::FanoutEngine;
use crate::gateway::GatewayClient;
use crate::http_admin::{self, AdminState};
use crate::http_ingress;
use crate::lifecycle::ShutdownSignal;
use crate::net;
use crate::reconciler::Reconciler;
use crate::registry::SubscriberRegistry;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_POLL_BUDGET: Duration = Duration::from_secs(10);
const LISTENER_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Runs the full startup choreography, blocks until a termination signal,
/// and then runs the ordered shutdown sequence. Returns only once
/// shutdown has completed.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // 2. Probe that 0.0.0.0:port is bindable (reservation test only).
    net::probe_bindable(config.admin_port)
        .await
        .context("startup: admin port reservation check failed")?;

    // 3. Acquire an ephemeral loopback port for the Ingress listener.
    let (ingress_listener, ingress_port) = net::bind_ephemeral_loopback()
        .await
        .context("startup: failed to bind ingress listener")?;
    tracing::info!("ingress listener bound to 127.0.0.1:{ingress_port}");

    // 4. Discover a local non-loopback, private IPv4 address; this is how
    // the proxy reaches the gateway, and failure here is fatal like every
    // other startup step.
    let private_addr = net::discover_private_ipv4()
        .context("startup: failed to discover a local private IPv4 address")?;
    tracing::info!("discovered local private address {private_addr}");

    let gateway = GatewayClient::new(
        config.gateway_url.clone(),
        config.gateway_auth_user(),
        config.gateway_password.clone(),
        Some(private_addr),
    )
    .context("constructing gateway client")?;

    // 5. Poll the gateway's health every 1s for up to 10s. Fatal if it
    // never comes up.
    wait_for_gateway_health(&gateway).await?;

    let reconciler = Reconciler::new(gateway.clone(), ingress_port);

    // 6. Install webhooks. Fatal on failure.
    reconciler
        .install()
        .await
        .context("startup: failed to install webhook registrations")?;

    // 7. Construct the registry (pruner), dedup cache (sweeper), and
    // reconciler ticker.
    let allowlist = AllowlistStore::open(&config.allowlist_db)
        .context("startup: failed to open allowlist store")?;
    let registry = SubscriberRegistry::new();
    let dedup = DedupCache::new();

    let (shutdown, _root_subscription) = ShutdownSignal::new();

    let pruner_handle = registry.spawn_pruner(shutdown.subscribe());
    let sweeper_handle = dedup.spawn_sweeper(DEDUP_TTL, shutdown.subscribe());
    let reconciler_handle = reconciler.clone().spawn_ticker(shutdown.subscribe());

    // 8. Start both HTTP listeners concurrently.
    let ingress_app = http_ingress::router(FanoutEngine::new(
        allowlist.clone(),
        registry.clone(),
        dedup.clone(),
    ));
    let admin_app = http_admin::router(AdminState {
        allowlist,
        registry,
        gateway,
        trusted_ip: Arc::new(config.private_ip),
    });

    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("startup: failed to bind admin listener on {admin_addr}"))?;

    let ingress_shutdown = shutdown.subscribe();
    let ingress_handle: JoinHandle<()> = tokio::spawn(async move {
        let mut s = ingress_shutdown;
        if let Err(err) = axum::serve(ingress_listener, ingress_app)
            .with_graceful_shutdown(async move { s.shutting_down().await })
            .await
        {
            tracing::error!("ingress listener exited with error: {err:#}");
        }
    });

    let admin_shutdown = shutdown.subscribe();
    let admin_handle: JoinHandle<()> = tokio::spawn(async move {
        let mut s = admin_shutdown;
        if let Err(err) = axum::serve(
            admin_listener,
            admin_app.into_make_service_with_connect_info::<ClientConnInfo>(),
        )
        .with_graceful_shutdown(async move { s.shutting_down().await })
        .await
        {
            tracing::error!("admin listener exited with error: {err:#}");
        }
    });

    tracing::info!("sms-gateway-proxy running, admin api on 0.0.0.0:{}", config.admin_port);

    // 9. Block until a termination signal.
    ShutdownSignal::wait_for_termination().await;
    tracing::info!("shutdown requested");

    shutdown_sequence(
        shutdown,
        reconciler_handle,
        pruner_handle,
        sweeper_handle,
        ingress_handle,
        admin_handle,
        reconciler,
    )
    .await;

    Ok(())
}

async fn wait_for_gateway_health(gateway: &GatewayClient) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + HEALTH_POLL_BUDGET;
    loop {
        match gateway.health().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if tokio::time::Instant::now() >= deadline {
                    anyhow::bail!("gateway did not become healthy within {HEALTH_POLL_BUDGET:?}: {err:#}");
                }
                tracing::info!("waiting for gateway to become healthy: {err:#}");
                tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn shutdown_sequence(
    shutdown: ShutdownSignal,
    reconciler_handle: JoinHandle<()>,
    pruner_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
    ingress_handle: JoinHandle<()>,
    admin_handle: JoinHandle<()>,
    reconciler: Reconciler,
) {
    // Fires the shared shutdown signal every background loop and both
    // listeners are watching; each reacts to its own step below.
    shutdown.fire();

    // 1. Stop the reconciler ticker.
    if reconciler_handle.await.is_err() {
        tracing::warn!("reconciler ticker task panicked during shutdown");
    }

    // 2. Stop the subscriber pruner (and the dedup sweeper alongside it;
    // the spec only names the pruner explicitly but the sweeper follows
    // the identical cooperative-cancellation contract).
    if pruner_handle.await.is_err() {
        tracing::warn!("subscriber pruner task panicked during shutdown");
    }
    if sweeper_handle.await.is_err() {
        tracing::warn!("dedup sweeper task panicked during shutdown");
    }

    // 3. Shut down both HTTP listeners with a 5s deadline for in-flight
    // requests.
    let listeners = futures_join(ingress_handle, admin_handle);
    if tokio::time::timeout(LISTENER_SHUTDOWN_DEADLINE, listeners)
        .await
        .is_err()
    {
        tracing::warn!(
            "listeners did not finish draining within {LISTENER_SHUTDOWN_DEADLINE:?}; \
             proceeding with shutdown anyway"
        );
    }

    // 4. Run the reconciler's cleanup variant, best-effort.
    reconciler.cleanup().await;

    tracing::info!("shutdown complete");
}

async fn futures_join(a: JoinHandle<()>, b: JoinHandle<()>) {
    let _ = tokio::join!(a, b);
}
