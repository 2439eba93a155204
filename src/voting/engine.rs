use chrono::Utc;
use log::{debug, info};
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::catalog::MapCatalog;
use crate::config::ModeRegistry;
use crate::models::{
    ActiveMode, SubmitVoteBody, TeamMode, VoteError, VoteOption, VoteStateView, VoteStats,
    VotedFor, VoterRecord,
};
use crate::voting::plurality;

/// Everything that changes over a round. Guarded by a single lock.
struct RoundState {
    vote_counts: HashMap<(String, TeamMode), u32>,
    voters: HashMap<String, VoterRecord>,
    active_maps: BTreeMap<TeamMode, String>,
    current_map_name: String,
    current_team_mode: TeamMode,
    voting_open: bool,
}

/// Vote tallies and round lifecycle for every enabled team-mode track.
pub struct VoteEngine {
    registry: ModeRegistry,
    catalog: Arc<dyn MapCatalog>,
    state: RwLock<RoundState>,
    // only ever locked while `state` is held, never across an await
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl VoteEngine {
    pub fn new(registry: ModeRegistry, catalog: Arc<dyn MapCatalog>) -> Self {
        Self::with_rng(registry, catalog, Box::new(StdRng::from_entropy()))
    }

    pub fn with_rng(
        registry: ModeRegistry,
        catalog: Arc<dyn MapCatalog>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        let active_maps: BTreeMap<TeamMode, String> = registry
            .enabled_team_modes()
            .into_iter()
            .map(|team_mode| (team_mode, registry.default_map(team_mode)))
            .collect();
        let current = registry.fallback_mode();

        Self {
            registry,
            catalog,
            state: RwLock::new(RoundState {
                vote_counts: HashMap::new(),
                voters: HashMap::new(),
                active_maps,
                current_map_name: current.map_name,
                current_team_mode: current.team_mode,
                voting_open: true,
            }),
            rng: Mutex::new(rng),
        }
    }

    pub fn enabled_team_modes(&self) -> Vec<TeamMode> {
        self.registry.enabled_team_modes()
    }

    fn primary_team_mode(&self) -> TeamMode {
        self.enabled_team_modes()
            .first()
            .copied()
            .unwrap_or(TeamMode(1))
    }

    fn options_for(&self, state: &RoundState, team_modes: &[TeamMode]) -> Vec<VoteOption> {
        let maps = self.registry.vote_maps();
        let mut options = Vec::with_capacity(team_modes.len() * maps.len());
        for &team_mode in team_modes {
            for map_name in &maps {
                let Some(desc) = self.catalog.describe(map_name) else {
                    continue;
                };
                let vote_count = state
                    .vote_counts
                    .get(&(map_name.clone(), team_mode))
                    .copied()
                    .unwrap_or(0);
                options.push(VoteOption {
                    map_name: map_name.clone(),
                    team_mode,
                    display_name: desc.name,
                    icon: desc.icon,
                    background_img: desc.background_img,
                    vote_count,
                });
            }
        }
        options
    }

    fn active_mode_in(&self, state: &RoundState, team_mode: Option<TeamMode>) -> ActiveMode {
        if let Some(team_mode) = team_mode {
            if let Some(map_name) = state.active_maps.get(&team_mode) {
                return ActiveMode {
                    map_name: map_name.clone(),
                    team_mode,
                };
            }
        }
        let primary = self.primary_team_mode();
        ActiveMode {
            map_name: state
                .active_maps
                .get(&primary)
                .cloned()
                .unwrap_or_else(|| self.registry.fallback_mode().map_name),
            team_mode: primary,
        }
    }

    pub async fn get_state(&self, voter: &str) -> VoteStateView {
        if voter.is_empty() {
            return VoteStateView::unresolved();
        }

        let state = self.state.read().await;
        let team_modes = self.enabled_team_modes();
        let record = state.voters.get(voter);

        VoteStateView {
            voting_open: state.voting_open,
            current_game_map_name: state.current_map_name.clone(),
            current_game_team_mode: state.current_team_mode,
            options: self.options_for(&state, &team_modes),
            available_team_modes: team_modes,
            has_voted: record.is_some(),
            voted_for: record.map(|r| VotedFor {
                map_name: r.map_name.clone(),
                team_mode: r.team_mode,
            }),
        }
    }

    pub async fn submit_vote(
        &self,
        voter: &str,
        map_name: &str,
        team_mode: TeamMode,
    ) -> Result<u32, VoteError> {
        self.record_vote(voter, map_name, Some(team_mode)).await
    }

    /// Submission straight from a request body, whose team mode may not name any track.
    pub async fn submit_body(&self, voter: &str, body: &SubmitVoteBody) -> Result<u32, VoteError> {
        self.record_vote(voter, &body.map_name, TeamMode::from_number(&body.team_mode))
            .await
    }

    /// Records one vote. Every check runs before anything is written.
    async fn record_vote(
        &self,
        voter: &str,
        map_name: &str,
        team_mode: Option<TeamMode>,
    ) -> Result<u32, VoteError> {
        if voter.is_empty() {
            return Err(VoteError::InvalidIp);
        }

        // Hold the write lock from the first check to the last write
        let mut state = self.state.write().await;
        if !state.voting_open {
            return Err(VoteError::VotingClosed);
        }
        // One vote per voter per round
        if state.voters.contains_key(voter) {
            return Err(VoteError::AlreadyVoted);
        }
        // The map must be open for voting and the team mode an enabled track
        let team_mode = match team_mode {
            Some(t) if self.registry.is_vote_map(map_name) && self.registry.is_enabled(t) => t,
            _ => return Err(VoteError::InvalidOption),
        };

        // Bump the tally and remember the voter
        let count = state
            .vote_counts
            .entry((map_name.to_string(), team_mode))
            .or_insert(0);
        *count += 1;
        let new_count = *count;

        state.voters.insert(
            voter.to_string(),
            VoterRecord {
                voter: voter.to_string(),
                map_name: map_name.to_string(),
                team_mode,
                timestamp: Utc::now(),
            },
        );
        debug!("Vote recorded: {} -> {} ({}), now {}", voter, map_name, team_mode, new_count);

        Ok(new_count)
    }

    pub async fn compute_winner(&self, team_mode: TeamMode) -> Option<String> {
        let state = self.state.read().await;
        self.winner_in(&state, team_mode)
    }

    fn winner_in(&self, state: &RoundState, team_mode: TeamMode) -> Option<String> {
        let options = self.options_for(state, &[team_mode]);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        plurality::pick_winner(&options, &mut **rng).map(|o| o.map_name.clone())
    }

    /// Applies each track's winner, clears the round, and reopens voting.
    /// Returns the primary track's assignment.
    pub async fn rotate(&self) -> ActiveMode {
        let mut state = self.state.write().await;
        let team_modes = self.enabled_team_modes();

        // Tracks nobody voted on keep their previous assignment
        for &team_mode in &team_modes {
            if let Some(winner) = self.winner_in(&state, team_mode) {
                info!("Team mode {} winner: {}", team_mode, winner);
                state.active_maps.insert(team_mode, winner);
            }
        }

        // Start the new round with no votes and no voters
        state.vote_counts.clear();
        state.voters.clear();

        // The primary track's assignment is what gets played next
        let next = self.active_mode_in(&state, None);
        state.current_map_name = next.map_name.clone();
        state.current_team_mode = next.team_mode;
        state.voting_open = true;

        next
    }

    /// Round started outside of a rotation; tallies are left alone.
    pub async fn on_new_round(&self, map_name: &str, team_mode: TeamMode) {
        let mut state = self.state.write().await;
        state.current_map_name = map_name.to_string();
        state.current_team_mode = team_mode;
        state.voting_open = true;
    }

    pub async fn close_voting(&self) {
        self.state.write().await.voting_open = false;
    }

    pub async fn open_voting(&self) {
        self.state.write().await.voting_open = true;
    }

    pub async fn has_votes(&self) -> bool {
        self.state.read().await.vote_counts.values().any(|&c| c > 0)
    }

    pub async fn stats(&self) -> VoteStats {
        let state = self.state.read().await;
        VoteStats {
            total_votes: state.vote_counts.values().sum(),
            unique_voters: state.voters.len(),
            voting_open: state.voting_open,
        }
    }

    pub async fn active_mode(&self, team_mode: Option<TeamMode>) -> ActiveMode {
        let state = self.state.read().await;
        self.active_mode_in(&state, team_mode)
    }

    /// Active assignment for every enabled track.
    pub async fn active_modes(&self) -> BTreeMap<TeamMode, ActiveMode> {
        let state = self.state.read().await;
        self.enabled_team_modes()
            .into_iter()
            .map(|team_mode| (team_mode, self.active_mode_in(&state, Some(team_mode))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::models::ModeConfig;
    use std::collections::HashSet;

    fn mode(map: &str, team: u8) -> ModeConfig {
        ModeConfig {
            map_name: map.to_string(),
            team_mode: TeamMode(team),
            enabled: true,
        }
    }

    fn engine_with_seed(seed: u64) -> VoteEngine {
        let registry = ModeRegistry::new(
            vec![mode("main", 1), mode("main", 2), mode("desert", 4)],
            vec!["main".into(), "desert".into(), "woods".into(), "moon".into()],
        );
        VoteEngine::with_rng(
            registry,
            Arc::new(StaticCatalog::builtin()),
            Box::new(StdRng::seed_from_u64(seed)),
        )
    }

    fn engine() -> VoteEngine {
        engine_with_seed(7)
    }

    fn count_for(view: &VoteStateView, map: &str, team: u8) -> u32 {
        view.options
            .iter()
            .find(|o| o.map_name == map && o.team_mode == TeamMode(team))
            .map(|o| o.vote_count)
            .unwrap()
    }

    #[tokio::test]
    async fn initial_state_is_open_and_seeded_from_config() {
        let engine = engine();
        let view = engine.get_state("v1").await;

        assert!(view.voting_open);
        assert_eq!(view.current_game_map_name, "main");
        assert_eq!(view.current_game_team_mode, TeamMode(1));
        assert_eq!(
            view.available_team_modes,
            vec![TeamMode(1), TeamMode(2), TeamMode(4)]
        );
        // "moon" is allowed but unknown to the catalog
        assert_eq!(view.options.len(), 9);
        assert!(view.options.iter().all(|o| o.map_name != "moon"));
        assert_eq!(view.options[0].map_name, "main");
        assert_eq!(view.options[1].map_name, "desert");
        assert!(!view.has_voted);
        assert_eq!(engine.active_mode(Some(TeamMode(4))).await.map_name, "desert");
    }

    #[tokio::test]
    async fn successful_vote_increments_tally() {
        let engine = engine();
        assert_eq!(engine.submit_vote("v1", "desert", TeamMode(2)).await, Ok(1));
        assert_eq!(engine.submit_vote("v2", "desert", TeamMode(2)).await, Ok(2));

        let view = engine.get_state("v1").await;
        assert_eq!(count_for(&view, "desert", 2), 2);
        assert!(view.has_voted);
        assert_eq!(
            view.voted_for,
            Some(VotedFor {
                map_name: "desert".into(),
                team_mode: TeamMode(2)
            })
        );
        assert!(!engine.get_state("v3").await.has_voted);
    }

    #[tokio::test]
    async fn second_vote_from_same_voter_is_rejected() {
        let engine = engine();
        assert_eq!(engine.submit_vote("v1", "main", TeamMode(1)).await, Ok(1));
        assert_eq!(
            engine.submit_vote("v1", "woods", TeamMode(1)).await,
            Err(VoteError::AlreadyVoted)
        );
        assert_eq!(
            engine.submit_vote("v1", "main", TeamMode(1)).await,
            Err(VoteError::AlreadyVoted)
        );

        let view = engine.get_state("v1").await;
        assert_eq!(count_for(&view, "woods", 1), 0);
        assert_eq!(count_for(&view, "main", 1), 1);
    }

    #[tokio::test]
    async fn rejections_leave_state_untouched() {
        let engine = engine();
        assert_eq!(
            engine.submit_vote("", "main", TeamMode(1)).await,
            Err(VoteError::InvalidIp)
        );
        assert_eq!(
            engine.submit_vote("v1", "atlantis", TeamMode(1)).await,
            Err(VoteError::InvalidOption)
        );
        assert_eq!(
            engine.submit_vote("v1", "main", TeamMode(3)).await,
            Err(VoteError::InvalidOption)
        );

        engine.close_voting().await;
        assert_eq!(
            engine.submit_vote("v1", "main", TeamMode(1)).await,
            Err(VoteError::VotingClosed)
        );

        let stats = engine.stats().await;
        assert_eq!(stats.total_votes, 0);
        assert_eq!(stats.unique_voters, 0);
        assert!(!stats.voting_open);
        assert!(!engine.has_votes().await);
        // a failed attempt does not count as having voted
        engine.open_voting().await;
        assert_eq!(engine.submit_vote("v1", "main", TeamMode(1)).await, Ok(1));
    }

    #[tokio::test]
    async fn allowed_map_missing_from_catalog_still_accepts_votes() {
        let engine = engine();
        assert_eq!(engine.submit_vote("v1", "moon", TeamMode(1)).await, Ok(1));
        assert!(engine.has_votes().await);
        assert_eq!(engine.compute_winner(TeamMode(1)).await, None);
    }

    #[tokio::test]
    async fn winner_is_none_without_votes() {
        let engine = engine();
        for team in [1, 2, 4] {
            assert_eq!(engine.compute_winner(TeamMode(team)).await, None);
        }
    }

    #[tokio::test]
    async fn tied_winner_is_one_of_the_leaders() {
        let mut winners = HashSet::new();
        for seed in 0..64 {
            let engine = engine_with_seed(seed);
            for voter in ["a1", "a2", "a3"] {
                engine.submit_vote(voter, "main", TeamMode(1)).await.unwrap();
            }
            for voter in ["b1", "b2", "b3"] {
                engine.submit_vote(voter, "desert", TeamMode(1)).await.unwrap();
            }
            engine.submit_vote("c1", "woods", TeamMode(1)).await.unwrap();

            winners.insert(engine.compute_winner(TeamMode(1)).await.unwrap());
        }
        let expected: HashSet<String> = ["main", "desert"].iter().map(|s| s.to_string()).collect();
        assert_eq!(winners, expected);
    }

    #[tokio::test]
    async fn rotate_applies_winners_per_track_and_resets_round() {
        let engine = engine();
        engine.submit_vote("v1", "woods", TeamMode(1)).await.unwrap();
        engine.submit_vote("v2", "woods", TeamMode(1)).await.unwrap();
        engine.submit_vote("v3", "main", TeamMode(1)).await.unwrap();
        engine.submit_vote("v4", "desert", TeamMode(2)).await.unwrap();
        engine.close_voting().await;

        let next = engine.rotate().await;
        assert_eq!(
            next,
            ActiveMode {
                map_name: "woods".into(),
                team_mode: TeamMode(1)
            }
        );

        let active = engine.active_modes().await;
        assert_eq!(active[&TeamMode(1)].map_name, "woods");
        assert_eq!(active[&TeamMode(2)].map_name, "desert");
        // no votes for squads: keeps its configured default
        assert_eq!(active[&TeamMode(4)].map_name, "desert");

        let view = engine.get_state("v1").await;
        assert!(view.voting_open);
        assert!(!view.has_voted);
        assert_eq!(view.current_game_map_name, "woods");
        assert_eq!(view.current_game_team_mode, TeamMode(1));
        assert!(view.options.iter().all(|o| o.vote_count == 0));

        let stats = engine.stats().await;
        assert_eq!((stats.total_votes, stats.unique_voters), (0, 0));
        // new round: the same voter may vote again
        assert_eq!(engine.submit_vote("v1", "main", TeamMode(1)).await, Ok(1));
    }

    #[tokio::test]
    async fn rotate_without_votes_keeps_assignments() {
        let engine = engine();
        let before = engine.active_modes().await;
        engine.on_new_round("snow", TeamMode(2)).await;

        let next = engine.rotate().await;
        assert_eq!(engine.active_modes().await, before);
        assert_eq!(next, before[&TeamMode(1)]);
        let view = engine.get_state("v1").await;
        assert_eq!(view.current_game_map_name, "main");
        assert_eq!(view.current_game_team_mode, TeamMode(1));

        // rotating twice in a row just re-confirms
        assert_eq!(engine.rotate().await, next);
    }

    #[tokio::test]
    async fn on_new_round_updates_display_without_clearing_votes() {
        let engine = engine();
        engine.submit_vote("v1", "desert", TeamMode(4)).await.unwrap();
        engine.close_voting().await;

        engine.on_new_round("faction", TeamMode(4)).await;
        let view = engine.get_state("v1").await;
        assert!(view.voting_open);
        assert_eq!(view.current_game_map_name, "faction");
        assert_eq!(view.current_game_team_mode, TeamMode(4));
        assert!(view.has_voted);
        assert_eq!(count_for(&view, "desert", 4), 1);
    }

    #[tokio::test]
    async fn active_mode_falls_back_to_primary_track() {
        let engine = engine();
        assert_eq!(
            engine.active_mode(Some(TeamMode(8))).await,
            ActiveMode {
                map_name: "main".into(),
                team_mode: TeamMode(1)
            }
        );
        assert_eq!(engine.active_mode(None).await.team_mode, TeamMode(1));
    }

    #[tokio::test]
    async fn concurrent_submissions_from_one_voter_count_once() {
        let engine = Arc::new(engine());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.submit_vote("v1", "main", TeamMode(2)).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(e, VoteError::AlreadyVoted),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(engine.stats().await.total_votes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn votes_racing_a_rotation_are_never_lost_or_doubled() {
        let engine = Arc::new(engine());
        let voters: Vec<_> = (0..50)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let voter = format!("v{i}");
                    let result = engine.submit_vote(&voter, "main", TeamMode(1)).await;
                    (voter, result)
                })
            })
            .collect();
        let rotation = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.rotate().await })
        };

        let mut results = Vec::new();
        for handle in voters {
            results.push(handle.await.unwrap());
        }
        rotation.await.unwrap();

        // Voting never closes here and every voter is distinct, so all are accepted
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        // A vote still on record landed after the rotation; the rest were cleared by it
        let mut kept = Vec::new();
        let mut cleared = Vec::new();
        for (voter, result) in &results {
            let count = result.unwrap();
            if engine.get_state(voter).await.has_voted {
                kept.push(count);
            } else {
                cleared.push(count);
            }
        }

        // Each side of the rotation counted 1, 2, .. n with no gaps or repeats
        kept.sort_unstable();
        cleared.sort_unstable();
        assert_eq!(kept, (1..=kept.len() as u32).collect::<Vec<_>>());
        assert_eq!(cleared, (1..=cleared.len() as u32).collect::<Vec<_>>());

        let stats = engine.stats().await;
        assert_eq!(stats.total_votes as usize, kept.len());
        assert_eq!(stats.unique_voters, kept.len());
        assert_eq!(kept.len() + cleared.len(), 50);
    }

    #[tokio::test]
    async fn unresolved_voter_sees_safe_default() {
        let engine = engine();
        engine.submit_vote("v1", "main", TeamMode(1)).await.unwrap();

        let view = engine.get_state("").await;
        assert_eq!(view, VoteStateView::unresolved());
        assert!(!view.has_voted);
    }

    #[tokio::test]
    async fn body_with_unknown_team_mode_is_invalid_option() {
        let engine = engine();
        let body = SubmitVoteBody {
            map_name: "main".into(),
            team_mode: serde_json::Number::from(300),
        };
        assert_eq!(engine.submit_body("v1", &body).await, Err(VoteError::InvalidOption));

        let body = SubmitVoteBody {
            map_name: "main".into(),
            team_mode: serde_json::Number::from(2),
        };
        assert_eq!(engine.submit_body("v1", &body).await, Ok(1));
    }
}
