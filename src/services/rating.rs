//! Elo rating arithmetic.

/// Outcome of a debate from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Higher weighted total.
    Win,
    /// Equal weighted totals.
    Draw,
    /// Lower weighted total.
    Loss,
}

impl MatchResult {
    /// Compare two weighted totals.
    pub fn from_totals(own: u32, other: u32) -> Self {
        match own.cmp(&other) {
            std::cmp::Ordering::Greater => MatchResult::Win,
            std::cmp::Ordering::Equal => MatchResult::Draw,
            std::cmp::Ordering::Less => MatchResult::Loss,
        }
    }

    /// Actual score fed into the Elo update.
    pub fn score(self) -> f64 {
        match self {
            MatchResult::Win => 1.0,
            MatchResult::Draw => 0.5,
            MatchResult::Loss => 0.0,
        }
    }

    /// The same outcome seen from the other side.
    pub fn inverse(self) -> Self {
        match self {
            MatchResult::Win => MatchResult::Loss,
            MatchResult::Draw => MatchResult::Draw,
            MatchResult::Loss => MatchResult::Win,
        }
    }

    /// Lower-case label used in announcements.
    pub fn label(self) -> &'static str {
        match self {
            MatchResult::Win => "win",
            MatchResult::Draw => "draw",
            MatchResult::Loss => "loss",
        }
    }
}

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Rating after one game, rounded to the nearest integer.
pub fn new_rating(rating: i32, opponent: i32, result: MatchResult, k_factor: f64) -> i32 {
    let expected = expected_score(rating, opponent);
    let updated = f64::from(rating) + k_factor * (result.score() - expected);
    updated.round() as i32
}

/// Update both ratings of a pair, always from the pre-update values.
///
/// `result` is the outcome for the participant at index 0.
pub fn update_pair(ratings: [i32; 2], result: MatchResult, k_factor: f64) -> [i32; 2] {
    let [first, second] = ratings;
    [
        new_rating(first, second, result, k_factor),
        new_rating(second, first, result.inverse(), k_factor),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: f64 = 32.0;

    #[test]
    fn equal_ratings_expect_half() {
        for rating in [0, 1200, 1500, 2400] {
            assert!((expected_score(rating, rating) - 0.5).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn even_match_moves_sixteen_points() {
        assert_eq!(new_rating(1500, 1500, MatchResult::Win, K), 1516);
        assert_eq!(new_rating(1500, 1500, MatchResult::Loss, K), 1484);
        assert_eq!(new_rating(1500, 1500, MatchResult::Draw, K), 1500);
    }

    #[test]
    fn expectations_sum_to_one() {
        let (a, b) = (1720, 1480);
        let sum = expected_score(a, b) + expected_score(b, a);
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(expected_score(a, b) > 0.5);
    }

    #[test]
    fn pair_update_uses_pre_update_ratings() {
        let [winner, loser] = update_pair([1600, 1400], MatchResult::Win, K);
        // Favourite gains little, underdog loses little: 32 * (1 - 0.7597) = 7.69.
        assert_eq!(winner, 1608);
        assert_eq!(loser, 1392);

        let [upset_winner, upset_loser] = update_pair([1400, 1600], MatchResult::Win, K);
        assert_eq!(upset_winner, 1424);
        assert_eq!(upset_loser, 1576);
    }

    #[test]
    fn draw_between_unequal_players_pulls_together() {
        let [low, high] = update_pair([1400, 1600], MatchResult::Draw, K);
        assert!(low > 1400);
        assert!(high < 1600);
    }

    #[test]
    fn results_from_totals() {
        assert_eq!(MatchResult::from_totals(42, 40), MatchResult::Win);
        assert_eq!(MatchResult::from_totals(40, 40), MatchResult::Draw);
        assert_eq!(MatchResult::from_totals(3, 40), MatchResult::Loss);
        assert_eq!(MatchResult::Win.inverse(), MatchResult::Loss);
    }
}
