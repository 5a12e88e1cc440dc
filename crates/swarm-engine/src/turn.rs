use std::time::Duration;

use tracing::{debug, trace};

use swarm_core::error::{Result, SwarmError};
use swarm_core::graph::Triple;
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

/// Shared turn counter gating sequential (council) steps.
///
/// The counter is a set of append-only `currentTurn` facts in the run
/// namespace; its value is the maximum. A step for seat `s` holds the turn
/// when `counter % seats == s`. Reads and writes are not atomic: two
/// processes racing on the same namespace can both observe the same value.
#[derive(Clone)]
pub struct TurnCoordinator {
    graph: GraphClient,
    seats: u64,
    poll_interval: Duration,
    jitter: Duration,
}

impl TurnCoordinator {
    pub fn new(graph: GraphClient, seats: usize, poll_interval: Duration, jitter: Duration) -> Self {
        Self {
            graph,
            seats: seats.max(1) as u64,
            poll_interval,
            jitter,
        }
    }

    pub fn holds(&self, turn: u64, seat: usize) -> bool {
        turn % self.seats == seat as u64
    }

    /// Current counter value, `None` before initialization.
    pub async fn current(&self) -> Result<Option<u64>> {
        let values = self
            .graph
            .literals(Scope::Run, vocab::SWARM_SYSTEM, vocab::CURRENT_TURN)
            .await?;
        let mut max = None;
        for v in values {
            let n: u64 = v
                .parse()
                .map_err(|_| SwarmError::Store(format!("malformed turn value: {}", v)))?;
            max = Some(max.map_or(n, |m: u64| m.max(n)));
        }
        Ok(max)
    }

    async fn write(&self, value: u64) -> Result<()> {
        self.graph
            .ingest(
                Scope::Run,
                vec![Triple::literal(
                    vocab::SWARM_SYSTEM,
                    vocab::CURRENT_TURN,
                    value.to_string(),
                )],
            )
            .await
    }

    /// Initialize the counter to the entry seat, or hand it to that seat if
    /// the namespace already has one.
    pub async fn start(&self, entry_seat: usize) -> Result<u64> {
        match self.current().await? {
            None => {
                let value = entry_seat as u64;
                self.write(value).await?;
                debug!(turn = value, "Turn counter initialized");
                Ok(value)
            }
            Some(_) => self.hand_off(entry_seat).await,
        }
    }

    /// Wait until `seat` holds the turn. Polls without a deadline.
    pub async fn acquire(&self, seat: usize) -> Result<u64> {
        loop {
            let turn = self.current().await?.unwrap_or(0);
            if self.holds(turn, seat) {
                trace!(turn, seat, "Turn acquired");
                return Ok(turn);
            }
            let delay = self.poll_delay();
            debug!(
                turn,
                seat,
                delay_ms = delay.as_millis() as u64,
                "Waiting for turn"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a completed step: the counter moves to `consumed + 1`.
    pub async fn advance(&self, consumed: u64) -> Result<u64> {
        let next = consumed + 1;
        self.write(next).await?;
        debug!(turn = next, "Turn advanced");
        Ok(next)
    }

    /// Move the turn forward to the next value belonging to `seat`.
    /// No write when the seat already holds it.
    pub async fn hand_off(&self, seat: usize) -> Result<u64> {
        let turn = self.current().await?.unwrap_or(0);
        if self.holds(turn, seat) {
            return Ok(turn);
        }
        let next = next_for_seat(turn, seat as u64, self.seats);
        self.write(next).await?;
        debug!(from = turn, to = next, seat, "Turn handed off");
        Ok(next)
    }

    fn poll_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as f64 * rand::random::<f64>();
        self.poll_interval + Duration::from_millis(jitter_ms as u64)
    }
}

/// Smallest value greater than `turn` congruent to `seat` modulo `seats`.
fn next_for_seat(turn: u64, seat: u64, seats: u64) -> u64 {
    let base = turn - turn % seats;
    let candidate = base + seat % seats;
    if candidate > turn {
        candidate
    } else {
        candidate + seats
    }
}
