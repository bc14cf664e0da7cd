use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::cursor::CursorStore;
use crate::adapter::engine::ChainAdapter;
use crate::adapter::source::ChainSource;
use crate::aggregate::Aggregator;
use crate::aggregate::snapshot::WindowSnapshot;
use crate::aggregate::window::WindowPhase;
use crate::config::MonitorConfig;
use crate::domain::registry::TokenRegistry;
use crate::domain::types::{ChainId, PricedTransfer, unix_millis};
use crate::error::{Error, Result};
use crate::filter::{AdmissionFilter, RejectReason, Verdict};
use crate::metrics::counters::Counters;
use crate::pipeline::StageMessage;
use crate::pipeline::worker::ChainWorker;
use crate::price::resolver::PriceResolver;
use crate::price::source::PriceSource;
use crate::runtime::bounded_queue::bounded;

/// Owns the admission stage and drives one window at a time: chain workers
/// feed a bounded queue, the monitor filters and aggregates, and a close
/// signal turns the window into a snapshot.
///
/// Dedup state outlives windows; counters and aggregates do not.
pub struct Monitor {
    config: MonitorConfig,
    config_hash: String,
    registry: Arc<TokenRegistry>,
    resolver: Arc<PriceResolver>,
    cursors: Arc<dyn CursorStore>,
    sources: HashMap<ChainId, Arc<dyn ChainSource>>,
    counters: Arc<Counters>,
    filter: AdmissionFilter,
    aggregator: Aggregator,
    outliers: Vec<PricedTransfer>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        prices: Arc<dyn PriceSource>,
        cursors: Arc<dyn CursorStore>,
    ) -> Result<Self> {
        config.validate()?;
        let config_hash = config.config_hash()?;
        let registry = Arc::new(TokenRegistry::from_config(&config)?);
        let resolver = Arc::new(PriceResolver::new(prices, Arc::clone(&registry), &config));
        let counters = Arc::new(Counters::default());
        let filter = AdmissionFilter::new(
            config.threshold(),
            config.max_plausible(),
            config.dedup_window_blocks,
            Arc::clone(&counters),
        );
        let aggregator = Aggregator::new(config.top_n, unix_millis());
        info!(
            chains = config.chains.len(),
            tokens = registry.len(),
            threshold = %config.threshold(),
            config_hash = %config_hash,
            "monitor configured"
        );
        Ok(Self {
            config,
            config_hash,
            registry,
            resolver,
            cursors,
            sources: HashMap::new(),
            counters,
            filter,
            aggregator,
            outliers: Vec::new(),
        })
    }

    pub fn with_chain_source(mut self, chain_id: ChainId, source: Arc<dyn ChainSource>) -> Self {
        self.sources.insert(chain_id, source);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn filter(&self) -> &AdmissionFilter {
        &self.filter
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn resolver(&self) -> &PriceResolver {
        &self.resolver
    }

    /// Runs one window until `close` resolves or every chain has delivered
    /// its bounded range, then drains in-flight transfers and freezes the
    /// result. A window that fails verification comes back as
    /// `AggregateCorruption` and stays halted until acknowledged.
    pub async fn run_window<F>(&mut self, close: F) -> Result<WindowSnapshot>
    where
        F: Future<Output = ()>,
    {
        self.open_window()?;
        let window_id = self.aggregator.window_id();

        let (tx, mut rx, gauge) = bounded::<StageMessage>(self.config.event_queue_capacity)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers: Vec<(ChainId, JoinHandle<Result<()>>)> = Vec::new();
        for chain in &self.config.chains {
            let Some(source) = self.sources.get(&chain.chain_id) else {
                warn!(chain = %chain.chain_id, "no chain source configured");
                self.aggregator
                    .mark_incomplete(chain.chain_id, "no chain source configured");
                continue;
            };
            let adapter = ChainAdapter::new(
                chain.clone(),
                Arc::clone(source),
                Arc::clone(&self.cursors),
                Arc::clone(&self.registry),
                self.config.retry_policy.clone(),
                Arc::clone(&self.counters),
            );
            let worker = ChainWorker::new(
                adapter,
                Arc::clone(&self.resolver),
                self.config.retry_policy.clone(),
                tx.clone(),
                shutdown_rx.clone(),
                Arc::clone(&self.counters),
            );
            workers.push((chain.chain_id, tokio::spawn(worker.run())));
        }
        drop(tx);
        info!(window = window_id, workers = workers.len(), "window running");

        let mut close = std::pin::pin!(close);
        let mut closing = false;
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = &mut close, if !closing => {
                    closing = true;
                    self.aggregator.begin_closing(unix_millis())?;
                    let _ = shutdown_tx.send(true);
                }
            }
        }
        if !closing {
            self.aggregator.begin_closing(unix_millis())?;
        }

        for (chain_id, handle) in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(chain = %chain_id, error = %e, "chain worker failed");
                    self.aggregator
                        .mark_incomplete(chain_id, format!("worker failed: {e}"));
                }
                Err(e) if e.is_panic() => {
                    error!(chain = %chain_id, "chain worker panicked");
                    self.aggregator.mark_incomplete(chain_id, "worker panicked");
                }
                Err(e) => {
                    error!(chain = %chain_id, error = %e, "chain worker cancelled");
                    self.aggregator.mark_incomplete(chain_id, "worker cancelled");
                }
            }
        }
        debug!(window = window_id, queue_high_water = gauge.high_water(), "admission drained");

        let totals = self.aggregator.close()?;
        Ok(WindowSnapshot::assemble(
            totals,
            self.filter.threshold(),
            self.config_hash.clone(),
            self.outliers.clone(),
            self.counters.snapshot(),
            unix_millis(),
        ))
    }

    /// Admits one priced transfer through the filter into the aggregates.
    pub fn admit(&mut self, transfer: PricedTransfer) -> Verdict {
        let verdict = self.filter.evaluate(&transfer);
        match verdict {
            Verdict::Admit => {
                let key = transfer.key();
                let block = transfer.event.block_number;
                match self.aggregator.apply(transfer) {
                    Ok(_) => self.counters.inc_admitted(),
                    Err(e) => {
                        self.filter.revoke(&key, block);
                        warn!(%key, error = %e, "aggregator refused admitted transfer");
                    }
                }
            }
            Verdict::Reject(RejectReason::Outlier) => {
                if self.outliers.len() < self.config.outlier_sample_limit {
                    self.outliers.push(transfer);
                }
            }
            Verdict::Reject(_) => {}
        }
        verdict
    }

    fn handle(&mut self, message: StageMessage) {
        match message {
            StageMessage::Transfers { chain_id, transfers } => {
                debug!(chain = %chain_id, transfers = transfers.len(), "admitting batch");
                for transfer in transfers {
                    self.admit(transfer);
                }
            }
            StageMessage::Degraded { chain_id, reason } => {
                warn!(chain = %chain_id, %reason, "chain degraded");
                self.aggregator.mark_incomplete(chain_id, reason);
            }
            StageMessage::Stopped { chain_id, cursor } => {
                debug!(chain = %chain_id, ?cursor, "chain worker reported stop");
            }
        }
    }

    fn open_window(&mut self) -> Result<()> {
        match self.aggregator.phase() {
            WindowPhase::Open => Ok(()),
            WindowPhase::Closed => {
                self.aggregator.reopen(unix_millis())?;
                self.counters.reset();
                self.outliers.clear();
                Ok(())
            }
            phase => Err(Error::InvalidTransition {
                from: phase.as_str(),
                to: WindowPhase::Open.as_str(),
            }),
        }
    }
}
