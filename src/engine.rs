//! Wires the store, config, scheduler and both transports together and runs
//! the periodic tasks: gossip tick, reconciliation sweep, log scan, config
//! poll and progress line.
//!
//! Tasks hold only a weak reference to the engine and stop once it is gone
//! or [`Engine::shutdown`] is called.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::config::{ConfigStore, ConfigWatcher, PeerConfig};
use crate::follows::FollowSet;
use crate::gossip::{GossipScheduler, TickOutcome, MAX_DRAWS, PUB_POLL_WEIGHT};
use crate::ingest::Ingestor;
use crate::monitor::{ProgressReporter, ProgressSnapshot};
use crate::pubs::PubManager;
use crate::server::InboundServer;
use crate::store::RecordStore;
use crate::sweep::{self, ScanReport};

pub const DEFAULT_PORT: u16 = 48080;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub port: u16,
    pub gossip_interval: Duration,
    pub sweep_interval: Duration,
    pub scan_interval: Duration,
    pub config_interval: Duration,
    /// `None` disables the progress line.
    pub progress_interval: Option<Duration>,
    pub backoff: Backoff,
    pub max_draws: usize,
    pub pub_weight: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            // far tighter than any backoff: most ticks find nothing eligible
            gossip_interval: Duration::from_millis(1),
            sweep_interval: Duration::from_secs(10),
            scan_interval: Duration::from_secs(15),
            config_interval: Duration::from_secs(10),
            progress_interval: Some(Duration::from_secs(5)),
            backoff: Backoff::default(),
            max_draws: MAX_DRAWS,
            pub_weight: PUB_POLL_WEIGHT,
        }
    }
}

pub struct Engine {
    settings: EngineSettings,
    store: Arc<dyn RecordStore>,
    config: Arc<dyn ConfigStore>,
    initial: PeerConfig,
    gossip: Arc<GossipScheduler>,
    pubs: Arc<PubManager>,
    server: Arc<InboundServer>,
    watcher: Mutex<ConfigWatcher>,
    have: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Loads the configuration and builds every component. Nothing runs
    /// until [`Engine::start`].
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: Arc<dyn ConfigStore>,
        settings: EngineSettings,
    ) -> Result<Arc<Self>> {
        let initial = config.load()?;
        info!(
            "Loaded {} pub(s), {} follow(s)",
            initial.pubs.len(),
            initial.follows.len()
        );

        let follows = Arc::new(FollowSet::new(initial.follows.iter().cloned(), Arc::clone(&config)));
        let gossip = Arc::new(
            GossipScheduler::new(follows)
                .with_schedule(settings.backoff)
                .with_max_draws(settings.max_draws)
                .with_pub_weight(settings.pub_weight),
        );
        let ingest = Arc::new(Ingestor::new(Arc::clone(&store), Arc::clone(&gossip)));
        let pubs = PubManager::new(Arc::clone(&ingest), settings.backoff);
        let server = InboundServer::new(ingest);

        Ok(Arc::new(Self {
            watcher: Mutex::new(ConfigWatcher::new(&initial)),
            settings,
            store,
            config,
            initial,
            gossip,
            pubs,
            server,
            have: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Binds the inbound listener, dials the configured pubs and starts the
    /// periodic tasks. Returns the listener address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let addr = self.server.listen(self.settings.port).await?;
        self.pubs.reconcile(&self.initial.pubs);

        let s = &self.settings;
        let mut tasks = vec![
            self.every(s.gossip_interval, |e| {
                e.tick();
            }),
            self.every(s.sweep_interval, |e| {
                e.sweep();
            }),
            self.every(s.scan_interval, |e| {
                e.scan();
            }),
            self.every(s.config_interval, Engine::poll_config),
        ];
        if let Some(period) = s.progress_interval {
            let reporter = Mutex::new(ProgressReporter::new());
            tasks.push(self.every(period, move |e| reporter.lock().render(&e.snapshot())));
        }
        self.tasks.lock().extend(tasks);
        Ok(addr)
    }

    fn every<F>(self: &Arc<Self>, period: Duration, f: F) -> JoinHandle<()>
    where
        F: Fn(&Engine) + Send + Sync + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                f(&*engine);
            }
        })
    }

    /// Stops the periodic tasks and closes every pub. Inbound sessions end
    /// with the process.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pubs.shutdown();
    }

    pub fn tick(&self) -> TickOutcome {
        self.gossip.tick(&*self.pubs, &*self.server)
    }

    pub fn sweep(&self) -> Vec<String> {
        sweep::retire_fulfilled(&self.gossip, &*self.store)
    }

    pub fn scan(&self) -> ScanReport {
        let report = sweep::scan_log(&self.gossip, &*self.store);
        self.have.store(report.entries as u64, Ordering::Relaxed);
        report
    }

    /// Re-reads the config document and applies list changes.
    pub fn poll_config(&self) {
        let text = match self.config.read_raw() {
            Ok(text) => text,
            Err(e) => {
                debug!("[config] read failed: {}", e);
                return;
            }
        };
        let delta = self.watcher.lock().observe(&text);

        if let Some(pubs) = delta.pubs {
            info!("[config] pubs updated ({})", pubs.len());
            self.pubs.reconcile(&pubs);
        }
        if let Some(follows) = delta.follows {
            let added = self.gossip.follows().merge_from_config(&follows);
            if added > 0 {
                info!("[config] follows added ({})", added);
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            have: self.have.load(Ordering::Relaxed),
            missing: self.gossip.missing_len() as u64,
            pub_blobs: self.pubs.blobs_stored_count() as u64,
            session_blobs: self.server.blobs_stored_count() as u64,
            connected: (self.pubs.connected_peers().len() + self.server.connected_sessions().len()) as u64,
        }
    }

    pub fn gossip(&self) -> &Arc<GossipScheduler> {
        &self.gossip
    }

    pub fn pubs(&self) -> &Arc<PubManager> {
        &self.pubs
    }

    pub fn server(&self) -> &Arc<InboundServer> {
        &self.server
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}
