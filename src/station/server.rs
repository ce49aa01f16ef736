//! Station server: startup, per-port task orchestration, graceful shutdown.
//!
//! One blocking reader per usable port feeds one async dispatch task over an
//! unbounded channel. A process-wide watch signal stops every loop at its next
//! poll boundary. Startup is strict about the two process-fatal conditions:
//! an unreachable record store (`E01`) and zero usable ports (`E02` for
//! configuration, `E07` when no scanner could be opened). Everything else is
//! port-scoped and non-fatal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, PortConfig};
use crate::display::{show_fatal_error, ConsoleDisplay, ErrorCode, StationDisplay};
use crate::fallback::FallbackAudit;
use crate::station::dispatch::Dispatcher;
use crate::station::records::{acquire_with_retry, RecordLifecycle};
use crate::station::registry::StationRegistry;
use crate::station::session::Session;
use crate::station::timer::TimerSupervisor;
use crate::storage::{RecordStore, SledRecordStore};

/// Grace period for dispatch tasks to drain after shutdown is signalled.
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct StationServer {
    config: Config,
    registry: Arc<StationRegistry>,
    store: Arc<dyn RecordStore>,
    display: Arc<dyn StationDisplay>,
    timers: Arc<TimerSupervisor>,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
}

impl StationServer {
    /// Build a server with the default collaborators: a sled record store
    /// under the configured data directory and a console display.
    pub async fn new(config: Config) -> Result<Self> {
        let display: Arc<dyn StationDisplay> = Arc::new(ConsoleDisplay);
        let data_dir = format!("{}/records", config.storage.data_dir);

        let store = match acquire_with_retry(|| SledRecordStore::open(&data_dir)).await {
            Ok(store) => Arc::new(store) as Arc<dyn RecordStore>,
            Err(e) => {
                error!("record store unavailable at {}: {}", data_dir, e);
                show_fatal_error(display.as_ref(), "startup", ErrorCode::E01);
                tokio::time::sleep(Duration::from_secs(config.station.hold_fatal_secs)).await;
                bail!("record store unavailable: {}", e);
            }
        };

        Self::with_collaborators(config, store, display)
    }

    /// Build a server around injected collaborators (tests, alternative
    /// stores or panels).
    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn RecordStore>,
        display: Arc<dyn StationDisplay>,
    ) -> Result<Self> {
        let audit = Arc::new(FallbackAudit::new(&config.fallback)?);
        let registry = Arc::new(StationRegistry::new());
        let timers = Arc::new(TimerSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&display),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            RecordLifecycle::new(Arc::clone(&store), Arc::clone(&audit)),
            Arc::clone(&timers),
            Arc::clone(&display),
            audit,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            store,
            display,
            timers,
            dispatcher,
            shutdown_tx,
        })
    }

    pub fn registry(&self) -> &Arc<StationRegistry> {
        &self.registry
    }

    /// Resolve a default label at registration time; stations come up showing
    /// who the config says is working there.
    async fn startup_label(
        &self,
        lookup: impl Fn() -> std::result::Result<Option<String>, crate::storage::StoreError>,
    ) -> String {
        match acquire_with_retry(lookup).await {
            Ok(Some(label)) => label,
            Ok(None) => "unregistered".to_string(),
            Err(e) => {
                warn!("startup label lookup failed: {}", e);
                String::new()
            }
        }
    }

    /// Register one port's session seeded from its config defaults.
    async fn register_port(&self, cfg: &PortConfig) {
        let mut session = Session::new();
        session.worker_id = cfg.default_worker.clone();
        session.process_id = cfg.default_process.clone();

        if let Some(worker) = cfg.default_worker.clone() {
            let store = Arc::clone(&self.store);
            session.worker_label = self
                .startup_label(move || store.resolve_worker_label(&worker))
                .await;
        }
        if let Some(process) = cfg.default_process.clone() {
            let store = Arc::clone(&self.store);
            session.process_label = self
                .startup_label(move || store.resolve_process_label(&process))
                .await;
        }

        self.registry.register(&cfg.device, session);
    }

    /// Run until a shutdown signal arrives.
    ///
    /// Fatal startup conditions:
    /// - zero usable port sections (`E02`)
    /// - zero scanners opened (`E07`)
    ///
    /// Both hold their overlay for the configured minimum before bailing so
    /// the message is visible on the panel.
    pub async fn run(&mut self) -> Result<()> {
        let (ports, excluded) = self.config.usable_ports();
        for (device, reason) in &excluded {
            error!("invalid port section excluded: {} -> {}", device, reason);
        }
        if ports.is_empty() {
            error!("no usable serial port configuration; refusing to start");
            show_fatal_error(self.display.as_ref(), "startup", ErrorCode::E02);
            self.hold_fatal().await;
            bail!("no usable serial port configuration");
        }
        info!(
            "starting {} with {} port(s)",
            self.config.station.name,
            ports.len()
        );

        for cfg in &ports {
            self.register_port(cfg).await;
        }

        let mut dispatch_handles: Vec<JoinHandle<()>> = Vec::new();
        let mut readers_started = 0usize;

        for cfg in ports {
            match self.spawn_port_pipeline(cfg, &mut dispatch_handles) {
                Ok(()) => readers_started += 1,
                Err(e) => {
                    error!("port pipeline not started: {}", e);
                }
            }
        }

        if readers_started == 0 {
            error!("no scanner could be opened on any port");
            show_fatal_error(self.display.as_ref(), "startup", ErrorCode::E07);
            self.hold_fatal().await;
            bail!("no scanner available");
        }

        info!("{} port reader(s) running", readers_started);
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");

        self.shutdown(dispatch_handles).await
    }

    #[cfg(feature = "serial")]
    fn spawn_port_pipeline(
        &self,
        cfg: PortConfig,
        dispatch_handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        let link = crate::serial::open_link(&cfg)?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let reader_cfg = cfg.clone();
        let registry = Arc::clone(&self.registry);
        let display = Arc::clone(&self.display);
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::task::spawn_blocking(move || {
            crate::serial::reader_loop(reader_cfg, link, frames_tx, registry, display, shutdown_rx);
        });

        dispatch_handles.push(self.spawn_dispatch_task(cfg, frames_rx));
        Ok(())
    }

    #[cfg(not(feature = "serial"))]
    fn spawn_port_pipeline(
        &self,
        cfg: PortConfig,
        _dispatch_handles: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        bail!(
            "serial support not compiled in; cannot open {}",
            cfg.device
        )
    }

    /// One async consumer per port: every frame runs the full
    /// classify→handle path. Handler failures are logged and never stop the
    /// loop — one poisoned scan must not take the station down.
    fn spawn_dispatch_task(
        &self,
        cfg: PortConfig,
        mut frames_rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_line = frames_rx.recv() => {
                        let Some(line) = maybe_line else { break };
                        if let Err(e) = dispatcher.handle_line(&cfg, &line).await {
                            error!("[{}] scan handling failed: {}", cfg.device, e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("[{}] dispatch task stopped", cfg.device);
        })
    }

    async fn shutdown(&mut self, dispatch_handles: Vec<JoinHandle<()>>) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.timers.stop_all().await;

        for handle in dispatch_handles {
            if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("dispatch task did not stop in time");
            }
        }
        info!("station server stopped cleanly");
        Ok(())
    }

    async fn hold_fatal(&self) {
        let hold = self.config.station.hold_fatal_secs;
        if hold > 0 {
            tokio::time::sleep(Duration::from_secs(hold)).await;
        }
    }

    /// Print a configuration and store summary for the `status` subcommand.
    pub async fn show_status(&self) -> Result<()> {
        println!("Station: {}", self.config.station.name);
        let (ports, excluded) = self.config.usable_ports();
        println!("Usable ports: {}", ports.len());
        for cfg in &ports {
            println!(
                "  {} @ {} baud ({}{}{})",
                cfg.device, cfg.baud_rate, cfg.data_bits, cfg.parity, cfg.stop_bits
            );
        }
        for (device, reason) in &excluded {
            println!("  excluded: {} ({})", device, reason);
        }
        println!("Fallback log: {}", self.config.fallback.dir);
        Ok(())
    }
}
