use crate::config::RoundTiming;
use crate::models::ActiveMode;
use crate::voting::{AccessGate, VoteEngine};
use log::info;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

/// Runs rounds back to back for the lifetime of the process.
pub async fn run_rounds_task(engine: Arc<VoteEngine>, gate: Arc<AccessGate>, timing: RoundTiming) {
    info!(
        "Starting round scheduler: {}s rounds, voting closes {}s before rotation",
        timing.round.as_secs(),
        timing.close_lead().as_secs()
    );

    loop {
        // Each pass is one full round, ending in a rotation
        let next = run_round(&engine, &gate, timing).await;
        info!("Next round: {} ({})", next.map_name, next.team_mode);
    }
}

/// One round: voting stays open, closes near the end, then the winners are rotated in.
pub async fn run_round(engine: &VoteEngine, gate: &AccessGate, timing: RoundTiming) -> ActiveMode {
    // Voting stays open for most of the round
    sleep(timing.open_for()).await;
    engine.close_voting().await;
    info!("Voting closed for this round");

    // Results stay visible until the round ends
    sleep(timing.close_lead()).await;
    if !engine.has_votes().await {
        info!("No votes cast this round, keeping current assignments");
    }
    let next = engine.rotate().await;

    // Forget voters that have gone quiet
    let pruned = gate.prune_idle(Instant::now()).await;
    if pruned > 0 {
        info!(
            "Pruned {} idle voter(s) from the rate limiter, {} still tracked",
            pruned,
            gate.tracked_voters().await
        );
    }
    next
}
