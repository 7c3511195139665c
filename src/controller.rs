#![forbid(unsafe_code)]

// Population controller - fills, drives, and tears down the simulated clients

use crate::client::locale::random_timezone;
use crate::client::SimulatedClient;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::metrics::{LatencyStats, RunSummary};
use crate::signaling::Transport;
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Controller lifecycle. No path leads back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Filling,
    Driving,
    Stopping,
    Stopped,
}

/// Requests that the driving loop end at the top of its next round
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Result of a single round of the driving loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    pub eligible: usize,
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub delay: Duration,
}

/// Owns the client population and drives it through the load test
pub struct PopulationController<T: Transport, R = StdRng> {
    config: HarnessConfig,
    message_types: Arc<[String]>,
    transport: T,
    rng: R,
    population: HashMap<Uuid, SimulatedClient<T::Connection>>,
    phase: Phase,
    stop: StopHandle,
    total_messages_sent: u64,
    failed_sends: u64,
    failed_connections: usize,
    clients_connected: usize,
    rounds: u64,
    /// Stats folded in from clients as they are removed
    acknowledged: u64,
    abandoned_requests: u64,
    ack_latencies_ms: Vec<u64>,
}

impl<T: Transport, R: Rng> PopulationController<T, R> {
    /// Validates `config` and builds an idle controller.
    ///
    /// # Errors
    /// Returns `HarnessError::Config` if the configuration is invalid.
    pub fn new(config: HarnessConfig, transport: T, rng: R) -> HarnessResult<Self> {
        config.validate()?;
        let message_types: Arc<[String]> = config.message_types.iter().cloned().collect();

        Ok(Self {
            config,
            message_types,
            transport,
            rng,
            population: HashMap::new(),
            phase: Phase::Idle,
            stop: StopHandle::default(),
            total_messages_sent: 0,
            failed_sends: 0,
            failed_connections: 0,
            clients_connected: 0,
            rounds: 0,
            acknowledged: 0,
            abandoned_requests: 0,
            ack_latencies_ms: Vec::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True from the start of the driving loop until teardown begins
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Driving && !self.stop.is_requested()
    }

    fn is_stopped(&self) -> bool {
        matches!(self.phase, Phase::Stopping | Phase::Stopped)
    }

    pub fn population_size(&self) -> usize {
        self.population.len()
    }

    pub fn client(&self, id: &Uuid) -> Option<&SimulatedClient<T::Connection>> {
        self.population.get(id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &SimulatedClient<T::Connection>> {
        self.population.values()
    }

    pub fn total_messages_sent(&self) -> u64 {
        self.total_messages_sent
    }

    /// Creates and connects one client, then adds it to the population.
    ///
    /// # Errors
    /// `Stopped` once teardown has begun; `PopulationFull` at `max_clients`;
    /// `ConnectionFailure` if the client cannot connect, in which case it is
    /// not added.
    pub async fn create_client(&mut self) -> HarnessResult<Uuid> {
        if self.is_stopped() {
            return Err(HarnessError::Stopped);
        }
        if self.population.len() >= self.config.max_clients {
            return Err(HarnessError::PopulationFull {
                max: self.config.max_clients,
            });
        }

        let id = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
        let timezone = random_timezone(&mut self.rng);
        let client_rng = StdRng::seed_from_u64(self.rng.gen());
        let mut client = SimulatedClient::new(id, timezone, self.message_types.clone(), client_rng);

        client
            .connect(&self.transport, self.config.connect_timeout())
            .await?;

        self.population.insert(id, client);
        self.clients_connected += 1;
        Ok(id)
    }

    /// Disconnects and removes a client. No-op for unknown ids.
    pub async fn remove_client(&mut self, id: &Uuid) {
        let Some(client) = self.population.get_mut(id) else {
            return;
        };
        client.disconnect().await;
        if let Some(client) = self.population.remove(id) {
            self.retire(&client);
        }
    }

    /// Runs the whole load test: fill, drive, stop.
    ///
    /// # Errors
    /// Returns `AlreadyStarted` if this controller has run before. Per-client
    /// failures are logged and never surface here.
    pub async fn start(&mut self) -> HarnessResult<RunSummary> {
        if self.phase != Phase::Idle {
            return Err(HarnessError::AlreadyStarted);
        }

        self.fill_population().await;

        self.phase = Phase::Driving;
        info!(
            "Driving {} clients (max {} messages each, {} per round)",
            self.population.len(),
            self.config.max_messages_per_client,
            self.config.max_concurrent_messages
        );
        while self.is_running() {
            if self.run_round().await.is_none() {
                info!("No eligible clients left after {} rounds", self.rounds);
                break;
            }
        }
        if self.stop.is_requested() {
            warn!("Stop requested, ending load test after {} rounds", self.rounds);
        }

        Ok(self.stop().await)
    }

    /// Attempts `max_clients` sequential creations; failures are logged and counted.
    /// A stop request ends the fill early.
    async fn fill_population(&mut self) {
        if self.is_stopped() {
            return;
        }
        self.phase = Phase::Filling;
        info!(
            "Creating {} clients against {}{}",
            self.config.max_clients, self.config.server_url, self.config.server_path
        );

        for attempt in 1..=self.config.max_clients {
            if self.stop.is_requested() {
                warn!("Stop requested, abandoning fill after {} attempts", attempt - 1);
                break;
            }
            match self.create_client().await {
                Ok(id) => info!("Client {}/{} ready: {}", attempt, self.config.max_clients, id),
                Err(e) => {
                    self.failed_connections += 1;
                    error!("Client {}/{} failed: {}", attempt, self.config.max_clients, e);
                }
            }
        }

        info!(
            "Population ready: {}/{} clients connected",
            self.population.len(),
            self.config.max_clients
        );
    }

    /// Runs one round: pick eligible clients at random, send concurrently, sleep.
    /// Returns `None` when no client is eligible or the controller is stopped.
    pub async fn run_round(&mut self) -> Option<RoundOutcome> {
        if self.is_stopped() {
            return None;
        }
        let max_messages = self.config.max_messages_per_client;
        let mut selected: Vec<&mut SimulatedClient<T::Connection>> = self
            .population
            .values_mut()
            .filter(|c| c.is_eligible(max_messages))
            .collect();
        if selected.is_empty() {
            return None;
        }

        // HashMap order is not seeded; sort first so a fixed seed gives a fixed pick
        selected.sort_by_key(|c| c.id());
        let eligible = selected.len();
        selected.shuffle(&mut self.rng);
        selected.truncate(self.config.max_concurrent_messages);
        let batch = selected.len();

        let results = join_all(selected.into_iter().map(|client| async move {
            let id = client.id();
            (id, client.send_message().await)
        }))
        .await;

        let mut sent = 0;
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(Some(_)) => sent += 1,
                Ok(None) => {}
                Err(e) => {
                    failed += 1;
                    error!("{}: {}", id, e);
                }
            }
        }
        self.total_messages_sent += sent as u64;
        self.failed_sends += failed as u64;
        self.rounds += 1;

        let delay = Duration::from_millis(
            self.rng
                .gen_range(self.config.min_delay_ms..=self.config.max_delay_ms),
        );
        info!(
            "Round {}: {}/{} eligible clients sent ({} failed), total {}; sleeping {}ms",
            self.rounds,
            sent,
            eligible,
            failed,
            self.total_messages_sent,
            delay.as_millis()
        );
        sleep(delay).await;

        Some(RoundOutcome {
            eligible,
            selected: batch,
            sent,
            failed,
            delay,
        })
    }

    /// Disconnects and removes every client concurrently, then reports totals.
    /// Safe to call more than once.
    pub async fn stop(&mut self) -> RunSummary {
        if self.is_stopped() {
            return self.summary();
        }
        self.phase = Phase::Stopping;
        info!("Stopping: disconnecting {} clients", self.population.len());

        let mut clients: Vec<SimulatedClient<T::Connection>> =
            self.population.drain().map(|(_, client)| client).collect();
        join_all(clients.iter_mut().map(|client| client.disconnect())).await;
        for client in &clients {
            self.retire(client);
        }

        self.phase = Phase::Stopped;
        let summary = self.summary();
        summary.log();
        summary
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            clients_requested: self.config.max_clients,
            clients_connected: self.clients_connected,
            failed_connections: self.failed_connections,
            rounds: self.rounds,
            total_messages_sent: self.total_messages_sent,
            failed_sends: self.failed_sends,
            acknowledged: self.acknowledged,
            abandoned_requests: self.abandoned_requests,
            ack_latency: LatencyStats::from_samples(self.ack_latencies_ms.clone()),
        }
    }

    fn retire(&mut self, client: &SimulatedClient<T::Connection>) {
        let tracker = client.tracker();
        self.acknowledged += tracker.acknowledged_count();
        self.abandoned_requests += tracker.outstanding_count() as u64;
        self.ack_latencies_ms.extend(tracker.latency_samples());
    }
}
