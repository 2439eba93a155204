use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Team size of a voting track (1 = solo, 2 = duo, 4 = squad).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamMode(pub u8);

impl TeamMode {
    /// Any JSON number is accepted on the wire; only whole values in range name a track.
    pub fn from_number(n: &serde_json::Number) -> Option<Self> {
        if let Some(v) = n.as_u64() {
            return u8::try_from(v).ok().map(TeamMode);
        }
        let v = n.as_f64()?;
        if v.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&v) {
            Some(TeamMode(v as u8))
        } else {
            None
        }
    }
}

impl fmt::Display for TeamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the mode registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeConfig {
    pub map_name: String,
    pub team_mode: TeamMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMode {
    pub map_name: String,
    pub team_mode: TeamMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOption {
    pub map_name: String,
    pub team_mode: TeamMode,
    pub display_name: String,
    pub icon: String,
    pub background_img: String,
    pub vote_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotedFor {
    pub map_name: String,
    pub team_mode: TeamMode,
}

/// What a single voter sees when polling the vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStateView {
    pub voting_open: bool,
    pub current_game_map_name: String,
    pub current_game_team_mode: TeamMode,
    pub available_team_modes: Vec<TeamMode>,
    pub options: Vec<VoteOption>,
    pub has_voted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voted_for: Option<VotedFor>,
}

impl VoteStateView {
    /// Returned to clients whose identity could not be resolved.
    pub fn unresolved() -> Self {
        Self {
            voting_open: false,
            current_game_map_name: String::new(),
            current_game_team_mode: TeamMode(1),
            available_team_modes: Vec::new(),
            options: Vec::new(),
            has_voted: false,
            voted_for: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    pub voter: String,
    pub map_name: String,
    pub team_mode: TeamMode,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVoteBody {
    pub map_name: String,
    pub team_mode: serde_json::Number,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVoteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<VoteError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_vote_count: Option<u32>,
}

impl SubmitVoteResponse {
    pub fn accepted(new_vote_count: u32) -> Self {
        Self {
            success: true,
            error: None,
            new_vote_count: Some(new_vote_count),
        }
    }

    pub fn rejected(error: VoteError) -> Self {
        Self {
            success: false,
            error: Some(error),
            new_vote_count: None,
        }
    }
}

impl From<Result<u32, VoteError>> for SubmitVoteResponse {
    fn from(result: Result<u32, VoteError>) -> Self {
        match result {
            Ok(count) => Self::accepted(count),
            Err(e) => Self::rejected(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStats {
    pub total_votes: u32,
    pub unique_voters: usize,
    pub voting_open: bool,
}

/// Reasons a vote submission is turned down. None of them leave a trace in the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteError {
    #[error("voter identity could not be resolved")]
    InvalidIp,
    #[error("voting is closed for this round")]
    VotingClosed,
    #[error("voter has already voted")]
    AlreadyVoted,
    #[error("unknown map or disabled team mode")]
    InvalidOption,
}
