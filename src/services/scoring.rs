//! Scoring engine — tallies and winner selection for a closed session.
//!
//! DESIGN
//! ======
//! Pure functions over the candidate list and the vote ledger, so results
//! are reproducible from persisted votes alone. Winner selection scans
//! candidates in list order with a strictly-greater comparison; the first
//! candidate reaching the maximum score keeps it, which makes tie-breaks
//! stable and independent of vote insertion order.

use std::collections::HashMap;

use serde::Serialize;

use crate::services::ledger::{Choice, VoteRow};
use crate::services::recommend::Movie;

// =============================================================================
// TYPES
// =============================================================================

/// Per-movie tally. Abstentions are not counted: total = yes + no.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub yes: u32,
    pub no: u32,
    pub total: u32,
}

// =============================================================================
// TALLYING
// =============================================================================

/// Tally votes per candidate. Every candidate gets an entry, zeroed when
/// nobody voted for it; votes referencing movies outside the candidate
/// list are ignored (they cannot be recorded in the first place).
#[must_use]
pub fn vote_results(candidates: &[Movie], votes: &[VoteRow]) -> HashMap<String, Tally> {
    let mut results: HashMap<String, Tally> = candidates
        .iter()
        .map(|movie| (movie.id.clone(), Tally::default()))
        .collect();

    for vote in votes {
        let Some(tally) = results.get_mut(&vote.movie_id) else {
            continue;
        };
        match vote.choice {
            Choice::Yes => tally.yes += 1,
            Choice::No => tally.no += 1,
        }
        tally.total += 1;
    }

    results
}

// =============================================================================
// WINNER SELECTION
// =============================================================================

/// Pick the winning candidate: score = (yes − no) × catalog rating, first
/// candidate with the strictly highest score wins. Returns `None` when no
/// candidate has any recorded vote — an ended session without votes
/// completes with no consensus rather than failing.
#[must_use]
pub fn select_winner<'a>(candidates: &'a [Movie], results: &HashMap<String, Tally>) -> Option<&'a Movie> {
    if results.values().all(|tally| tally.total == 0) {
        return None;
    }

    let mut best: Option<(&Movie, f64)> = None;
    for movie in candidates {
        let Some(tally) = results.get(&movie.id) else {
            continue;
        };
        let score = (f64::from(tally.yes) - f64::from(tally.no)) * movie.vote_average;
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((movie, score));
        }
    }

    best.map(|(movie, _)| movie)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn movie(id: &str, rating: f64) -> Movie {
        Movie {
            id: id.to_string(),
            title: format!("Movie {id}"),
            overview: String::new(),
            poster_path: String::new(),
            release_date: "2024-01-01".to_string(),
            vote_average: rating,
            genres: vec![],
        }
    }

    fn vote(user: Uuid, movie_id: &str, choice: Choice) -> VoteRow {
        VoteRow { user_id: user, movie_id: movie_id.to_string(), choice, voted_at: 0 }
    }

    #[test]
    fn results_cover_all_candidates_with_zeros() {
        let candidates = vec![movie("a", 7.0), movie("b", 8.0)];
        let results = vote_results(&candidates, &[]);
        assert_eq!(results.len(), 2);
        assert_eq!(results["a"], Tally::default());
        assert_eq!(results["b"], Tally::default());
    }

    #[test]
    fn tally_total_is_yes_plus_no() {
        let candidates = vec![movie("a", 7.0)];
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let u3 = Uuid::new_v4();
        let votes = vec![
            vote(u1, "a", Choice::Yes),
            vote(u2, "a", Choice::Yes),
            vote(u3, "a", Choice::No),
        ];
        let results = vote_results(&candidates, &votes);
        let tally = results["a"];
        assert_eq!(tally.yes, 2);
        assert_eq!(tally.no, 1);
        assert_eq!(tally.total, tally.yes + tally.no);
    }

    #[test]
    fn votes_outside_candidate_list_are_ignored() {
        let candidates = vec![movie("a", 7.0)];
        let votes = vec![vote(Uuid::new_v4(), "ghost", Choice::Yes)];
        let results = vote_results(&candidates, &votes);
        assert_eq!(results["a"], Tally::default());
        assert!(!results.contains_key("ghost"));
    }

    #[test]
    fn no_votes_selects_no_winner() {
        let candidates = vec![movie("a", 9.5), movie("b", 8.0)];
        let results = vote_results(&candidates, &[]);
        assert!(select_winner(&candidates, &results).is_none());
    }

    // One member swipes yes on X (rating 8.0) and no on Y (rating 9.0):
    // X scores 8.0, Y scores -9.0, X wins despite the lower rating.
    #[test]
    fn single_yes_beats_higher_rated_no() {
        let candidates = vec![movie("y", 9.0), movie("x", 8.0)];
        let user = Uuid::new_v4();
        let votes = vec![vote(user, "x", Choice::Yes), vote(user, "y", Choice::No)];
        let results = vote_results(&candidates, &votes);
        let winner = select_winner(&candidates, &results).unwrap();
        assert_eq!(winner.id, "x");
    }

    // Two candidates tied at score 5.0: the one earlier in the candidate
    // list wins.
    #[test]
    fn tie_breaks_by_candidate_order() {
        let candidates = vec![movie("first", 5.0), movie("second", 5.0)];
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let votes = vec![
            vote(u1, "first", Choice::Yes),
            vote(u2, "second", Choice::Yes),
        ];
        let results = vote_results(&candidates, &votes);
        assert_eq!(results["first"].yes, 1);
        assert_eq!(results["second"].yes, 1);
        let winner = select_winner(&candidates, &results).unwrap();
        assert_eq!(winner.id, "first");
    }

    #[test]
    fn tie_break_holds_when_later_votes_arrive_first() {
        let candidates = vec![movie("first", 5.0), movie("second", 5.0)];
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        // Same votes, reversed arrival order: outcome must not change.
        let votes = vec![
            vote(u2, "second", Choice::Yes),
            vote(u1, "first", Choice::Yes),
        ];
        let results = vote_results(&candidates, &votes);
        let winner = select_winner(&candidates, &results).unwrap();
        assert_eq!(winner.id, "first");
    }

    #[test]
    fn unvoted_candidate_outscores_rejected_one() {
        // "b" has no votes (score 0), "a" is net-negative: 0 beats -6.
        let candidates = vec![movie("a", 6.0), movie("b", 7.0)];
        let votes = vec![vote(Uuid::new_v4(), "a", Choice::No)];
        let results = vote_results(&candidates, &votes);
        let winner = select_winner(&candidates, &results).unwrap();
        assert_eq!(winner.id, "b");
    }

    #[test]
    fn scoring_is_deterministic() {
        let candidates = vec![movie("a", 7.5), movie("b", 6.0), movie("c", 8.5)];
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let votes = vec![
            vote(users[0], "a", Choice::Yes),
            vote(users[1], "a", Choice::Yes),
            vote(users[2], "b", Choice::Yes),
            vote(users[3], "c", Choice::No),
        ];
        let first = select_winner(&candidates, &vote_results(&candidates, &votes))
            .unwrap()
            .id
            .clone();
        for _ in 0..10 {
            let again = select_winner(&candidates, &vote_results(&candidates, &votes)).unwrap();
            assert_eq!(again.id, first);
        }
    }

    #[test]
    fn overwritten_vote_counts_once() {
        let candidates = vec![movie("a", 7.0)];
        let user = Uuid::new_v4();
        // The ledger stores one row per (user, movie); this mirrors the
        // post-overwrite state where only the latest choice remains.
        let votes = vec![vote(user, "a", Choice::No)];
        let results = vote_results(&candidates, &votes);
        assert_eq!(results["a"], Tally { yes: 0, no: 1, total: 1 });
    }
}
