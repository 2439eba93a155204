use crate::models::VoteOption;
use rand::RngCore;
use rand::seq::SliceRandom;

/// Picks the most-voted option, breaking ties uniformly at random.
///
/// Returns `None` when there are no options or nobody voted: an empty round
/// never forces a map change.
pub fn pick_winner<'a>(options: &'a [VoteOption], rng: &mut dyn RngCore) -> Option<&'a VoteOption> {
    let max_votes = options.iter().map(|o| o.vote_count).max()?;
    if max_votes == 0 {
        return None;
    }

    let leaders: Vec<&VoteOption> = options
        .iter()
        .filter(|o| o.vote_count == max_votes)
        .collect();
    leaders.choose(rng).copied()
}
