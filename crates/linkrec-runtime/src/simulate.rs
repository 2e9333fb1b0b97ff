//! `linkrec simulate`: replay a lifecycle scenario against a live registry.
//!
//! A scenario is a registry configuration plus an ordered list of steps:
//!
//! ```toml
//! [registry]
//! expiration_policy = "link-detach"
//! expiry_timeout_ms = 500
//!
//! [[step]]
//! action = "attach"
//! link = "orders"
//!
//! [[step]]
//! action = "detach"
//! link = "orders"
//! ```
//!
//! Lifecycle events are logged as they happen; the final registry snapshot
//! is printed as JSON.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use linkrec_core::{
    ConnectionId, DeliveryTag, ExpirationPolicy, LifecycleEvent, LinkIdentifier, LinkScope,
    LinkSettings, ResendFlags, Role, SessionId, SettleMode, TerminusAddress, TransferDirective,
    UnsettledMap,
};
use linkrec_registry::{
    LinkTerminus, LocalLink, RecoverableLink, RegistryConfig, TerminusEvent, TerminusRegistry,
    plan_recovery, wait_for_reattach,
};
use linkrec_store::{DeliveryStore, InMemoryDeliveryStore, SqliteDeliveryStore};

use crate::cli::SimulateOpts;
use crate::table::{label, parse_record, summarize};

// ─── Scenario ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

fn default_connection() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Attach (or reattach) a link; an existing live link under the same
    /// identifier is stolen.
    Attach {
        link: String,
        #[serde(default)]
        role: Role,
        container: Option<String>,
        #[serde(default = "default_connection")]
        connection: u64,
        #[serde(default)]
        channel: u16,
        /// Attach `expiry-policy` symbol carried on the terminus address.
        expiry_policy: Option<String>,
        #[serde(default)]
        timeout_secs: u32,
        #[serde(default)]
        settle_mode: SettleMode,
        /// Fail with `DuplicateTerminus` instead of stealing.
        #[serde(default)]
        exclusive: bool,
    },
    Deliver {
        link: String,
        tag: String,
        state: String,
    },
    Settle {
        link: String,
        tag: String,
    },
    Detach {
        link: String,
        #[serde(default = "default_event")]
        event: LifecycleEvent,
    },
    EndSession {
        #[serde(default = "default_connection")]
        connection: u64,
        #[serde(default)]
        channel: u16,
    },
    CloseConnection {
        #[serde(default = "default_connection")]
        connection: u64,
    },
    Wait {
        ms: u64,
    },
    /// Expire a suspended terminus now.
    Expire {
        link: String,
    },
    /// Reconcile against the peer's unsettled map (`tag -> state`, `"absent"`
    /// for null) and apply the plan.
    Recover {
        link: String,
        #[serde(default)]
        remote: BTreeMap<String, String>,
    },
    /// Wait in the background for the link to reattach.
    AwaitReattach {
        link: String,
        timeout_ms: u64,
    },
    Snapshot,
}

fn default_event() -> LifecycleEvent {
    LifecycleEvent::LinkDetach
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&content, path.extension().and_then(|e| e.to_str()))
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    fn parse(content: &str, extension: Option<&str>) -> anyhow::Result<Self> {
        match extension {
            Some("json") => Ok(serde_json::from_str(content)?),
            Some("toml") | None => Ok(toml::from_str(content)?),
            Some(other) => bail!("unsupported scenario format: .{other}"),
        }
    }
}

// ─── Runner ──────────────────────────────────────────────────────────

struct Simulation {
    registry: Arc<TerminusRegistry>,
    links: HashMap<String, Arc<LocalLink>>,
    waits: Vec<(String, JoinHandle<String>)>,
    cancel: CancellationToken,
}

impl Simulation {
    fn link(&self, alias: &str) -> anyhow::Result<&Arc<LocalLink>> {
        self.links
            .get(alias)
            .with_context(|| format!("unknown link {alias:?}; attach it first"))
    }

    fn identifier(&self, alias: &str) -> anyhow::Result<LinkIdentifier> {
        Ok(self.link(alias)?.identifier().clone())
    }

    async fn run_step(&mut self, index: usize, step: Step) -> anyhow::Result<()> {
        match step {
            Step::Attach {
                link,
                role,
                container,
                connection,
                channel,
                expiry_policy,
                timeout_secs,
                settle_mode,
                exclusive,
            } => {
                let mut settings = LinkSettings::new(link.clone(), role);
                settings.settle_mode = settle_mode;
                if let Some(symbol) = expiry_policy {
                    let address = TerminusAddress {
                        address: Some(link.clone()),
                        expiry_policy: Some(symbol),
                        timeout_secs,
                    };
                    if role.is_receiver() {
                        settings.target = address;
                    } else {
                        settings.source = address;
                    }
                }
                let identifier = settings.identifier(container)?;
                let local = Arc::new(LocalLink::new(
                    identifier,
                    settings,
                    LinkScope::new(connection, channel),
                ));
                let handle: Arc<dyn RecoverableLink> = local.clone();
                let terminus = if exclusive {
                    self.registry.register_exclusive(handle)?
                } else {
                    self.registry.register(handle)?
                };
                println!(
                    "[{index}] attach {} on conn-{connection}/ch-{channel}: {} unsettled",
                    terminus.identifier(),
                    terminus.deliveries()?.len()
                );
                self.links.insert(link, local);
            }
            Step::Deliver { link, tag, state } => {
                let Some(state) = parse_record(&state)? else {
                    bail!("deliver needs a state, not absent");
                };
                let terminus = self.terminus(&link)?;
                terminus.record_delivery(DeliveryTag::from(tag.as_str()), state)?;
                println!("[{index}] deliver {link} {tag} -> {state}");
            }
            Step::Settle { link, tag } => {
                let removed = self.terminus(&link)?.settle(&DeliveryTag::from(tag.as_str()))?;
                let outcome = if removed { "removed" } else { "no record" };
                println!("[{index}] settle {link} {tag}: {outcome}");
            }
            Step::Detach { link, event } => {
                let local = Arc::clone(self.link(&link)?);
                local.close();
                let handle: Arc<dyn RecoverableLink> = local;
                let outcome = self.registry.suspend(&handle, event);
                println!("[{index}] {event} {link}: {outcome:?}");
            }
            Step::EndSession {
                connection,
                channel,
            } => {
                let session = SessionId {
                    connection: ConnectionId(connection),
                    channel,
                };
                self.close_links(|scope| scope.session == session);
                let count = self.registry.expire_for_session(session);
                println!("[{index}] end {session}: {count} suspended");
            }
            Step::CloseConnection { connection } => {
                let connection = ConnectionId(connection);
                self.close_links(|scope| scope.connection() == connection);
                let count = self.registry.expire_for_connection(connection);
                println!("[{index}] close {connection}: {count} suspended");
            }
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                println!("[{index}] waited {ms}ms");
            }
            Step::Expire { link } => {
                let expired = self.registry.expire(&self.identifier(&link)?);
                println!("[{index}] expire {link}: {expired}");
            }
            Step::Recover { link, remote } => {
                let terminus = self.terminus(&link)?;
                let mut peer = Vec::new();
                for (tag, state) in &remote {
                    peer.push((DeliveryTag::from(tag.as_str()), parse_record(state)?));
                }
                let plan = plan_recovery(&terminus, &UnsettledMap::from_wire(peer))?;
                for step in &plan.steps {
                    println!(
                        "[{index}] recover {link} {}: local={} remote={} -> {:?}",
                        step.tag,
                        label(step.local),
                        label(step.remote),
                        step.decision
                    );
                }
                for frame in plan.apply(&terminus)? {
                    let directive = TransferDirective::Resend(ResendFlags {
                        resume: frame.resume,
                        aborted: frame.aborted,
                        settled: frame.settled,
                        state: frame.state,
                    });
                    println!("[{index}] transfer {}: {}", frame.tag, summarize(&directive));
                }
            }
            Step::AwaitReattach { link, timeout_ms } => {
                let identifier = self.identifier(&link)?;
                let registry = Arc::clone(&self.registry);
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    let timeout = Duration::from_millis(timeout_ms);
                    match wait_for_reattach(&registry, &identifier, timeout, cancel).await {
                        Ok(terminus) => format!("reattached ({:?})", terminus.phase()),
                        Err(e) => e.to_string(),
                    }
                });
                println!("[{index}] awaiting reattach of {link} for {timeout_ms}ms");
                self.waits.push((link, handle));
            }
            Step::Snapshot => {
                println!("{}", serde_json::to_string_pretty(&self.registry.snapshot())?);
            }
        }
        Ok(())
    }

    fn terminus(&self, alias: &str) -> anyhow::Result<Arc<LinkTerminus>> {
        let identifier = self.identifier(alias)?;
        self.registry
            .try_get(&identifier)
            .with_context(|| format!("no terminus registered for {identifier}"))
    }

    fn close_links(&self, in_scope: impl Fn(&LinkScope) -> bool) {
        for link in self.links.values() {
            if in_scope(&link.scope()) {
                link.close();
            }
        }
    }
}

fn open_store(opts: &SimulateOpts) -> anyhow::Result<Arc<dyn DeliveryStore>> {
    Ok(match &opts.store {
        Some(path) => Arc::new(
            SqliteDeliveryStore::open(path)
                .with_context(|| format!("failed to open store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryDeliveryStore::new()),
    })
}

/// Apply CLI overrides on top of the scenario's registry table.
pub(crate) fn effective_config(
    mut config: RegistryConfig,
    policy: Option<ExpirationPolicy>,
    timeout_ms: Option<u64>,
) -> RegistryConfig {
    if let Some(policy) = policy {
        config.expiration_policy = policy;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.expiry_timeout_ms = timeout_ms;
    }
    config
}

pub async fn cmd_simulate(opts: &SimulateOpts) -> anyhow::Result<()> {
    let scenario = Scenario::load(&opts.scenario)?;
    let config = effective_config(scenario.registry, opts.policy, opts.timeout_ms);
    tracing::info!(
        "simulating {} steps (policy {}, timeout {}ms)",
        scenario.steps.len(),
        config.expiration_policy,
        config.expiry_timeout_ms
    );

    let registry = TerminusRegistry::new(config, open_store(opts)?);
    let mut events = registry.subscribe();
    let logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                TerminusEvent::Stolen { identifier } => tracing::warn!("stolen: {identifier}"),
                other => tracing::info!("{other:?}"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut sim = Simulation {
        registry: Arc::clone(&registry),
        links: HashMap::new(),
        waits: Vec::new(),
        cancel,
    };
    for (index, step) in scenario.steps.into_iter().enumerate() {
        if sim.cancel.is_cancelled() {
            tracing::warn!("interrupted before step {index}");
            break;
        }
        sim.run_step(index, step).await?;
    }

    for (link, handle) in std::mem::take(&mut sim.waits) {
        let outcome = handle.await.context("reattach wait panicked")?;
        println!("await {link}: {outcome}");
    }

    println!("{}", serde_json::to_string_pretty(&registry.snapshot())?);
    drop(sim);
    drop(registry);
    logger.abort();
    Ok(())
}
