use crate::gateway::GatewayClient;
use crate::lifecycle::ShutdownSubscription;
use crate::model::EventKind;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Keeps the gateway's webhook registrations equal to the four expected
/// entries pointing at the loopback ingress listener.
#[derive(Clone)]
pub struct Reconciler {
    gateway: GatewayClient,
    ingress_port: u16,
}

impl Reconciler {
    pub fn new(gateway: GatewayClient, ingress_port: u16) -> Self {
        Self {
            gateway,
            ingress_port,
        }
    }

    fn expected_url(&self, kind: EventKind) -> String {
        format!(
            "http://127.0.0.1:{}/webhook/{}",
            self.ingress_port,
            kind.short()
        )
    }

    fn expected_targets(&self) -> HashMap<String, String> {
        EventKind::ALL
            .iter()
            .map(|k| (k.wire(), self.expected_url(*k)))
            .collect()
    }

    /// Steady-state reconciliation: delete any registration whose URL does
    /// not match what we expect for its event, then re-create any expected
    /// registration still missing. Never crashes on a failed `list_hooks`;
    /// it just skips the tick.
    pub async fn tick(&self) {
        let hooks = match self.gateway.list_hooks().await {
            Ok(hooks) => hooks,
            Err(err) => {
                tracing::warn!("reconciler: list_hooks failed, skipping tick: {err:#}");
                return;
            }
        };

        let expected = self.expected_targets();
        let mut present: HashMap<String, bool> = HashMap::new();

        for hook in &hooks {
            match expected.get(&hook.event) {
                Some(expected_url) if expected_url == &hook.url => {
                    present.insert(hook.event.clone(), true);
                }
                _ => {
                    if let Err(err) = self.gateway.delete_hook(&hook.id).await {
                        tracing::warn!(
                            "reconciler: failed to delete stray hook {} ({}): {err:#}",
                            hook.id,
                            hook.event
                        );
                    }
                }
            }
        }

        for (event, url) in &expected {
            if !present.get(event).copied().unwrap_or(false) {
                if let Err(err) = self.gateway.register_hook(event, url).await {
                    tracing::warn!("reconciler: failed to register {event} -> {url}: {err:#}");
                }
            }
        }
    }

    /// Startup variant: unconditionally deletes every pre-existing
    /// registration (port assignment may have changed across restarts)
    /// before registering the expected set. Fatal on failure, per the
    /// supervisor's startup contract.
    pub async fn install(&self) -> anyhow::Result<()> {
        let hooks = self.gateway.list_hooks().await?;
        for hook in &hooks {
            self.gateway.delete_hook(&hook.id).await?;
        }
        for (event, url) in self.expected_targets() {
            self.gateway.register_hook(&event, &url).await?;
        }
        Ok(())
    }

    /// Shutdown variant: best-effort delete of every registration.
    pub async fn cleanup(&self) {
        match self.gateway.list_hooks().await {
            Ok(hooks) => {
                for hook in hooks {
                    if let Err(err) = self.gateway.delete_hook(&hook.id).await {
                        tracing::warn!("reconciler cleanup: failed to delete {}: {err:#}", hook.id);
                    }
                }
            }
            Err(err) => {
                tracing::warn!("reconciler cleanup: list_hooks failed: {err:#}");
            }
        }
    }

    pub fn spawn_ticker(self, mut shutdown: ShutdownSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown.shutting_down() => {
                        tracing::debug!("reconciler ticker stopping");
                        return;
                    }
                }
            }
        })
    }
}
