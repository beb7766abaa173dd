//! Energy goal tiers and progress normalization.
//!
//! Events define a ladder of point thresholds. A user's progress toward
//! a tier is their score normalized to a 0-100 integer percentage,
//! which is what gauge widgets and progress rings render directly.

/// One rung of an event's goal ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyGoalTier {
    pub id: String,
    pub name: String,
    /// Score required to achieve this tier
    pub points_threshold: f64,
}

impl EnergyGoalTier {
    pub fn new(id: &str, name: &str, points_threshold: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            points_threshold,
        }
    }

    /// Progress toward this tier as an integer percentage, clamped to 100.
    ///
    /// A non-positive threshold counts as already achieved rather than a
    /// division by zero.
    pub fn progress_percent(&self, score: f64) -> u8 {
        if self.points_threshold <= 0.0 {
            return 100;
        }
        let pct = (score / self.points_threshold * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }

    /// Whether the score has reached this tier's threshold.
    pub fn is_achieved(&self, score: f64) -> bool {
        score >= self.points_threshold
    }
}

/// The default goal ladder used when an event defines none of its own.
pub fn default_tiers() -> Vec<EnergyGoalTier> {
    vec![
        EnergyGoalTier::new("warmup", "Warm-Up", 1_000.0),
        EnergyGoalTier::new("groove", "Groove", 5_000.0),
        EnergyGoalTier::new("fever", "Fever", 15_000.0),
        EnergyGoalTier::new("encore", "Encore", 50_000.0),
    ]
}

/// The next unachieved tier for a score, if any remain.
pub fn next_tier(tiers: &[EnergyGoalTier], score: f64) -> Option<&EnergyGoalTier> {
    tiers
        .iter()
        .filter(|t| !t.is_achieved(score))
        .min_by(|a, b| {
            a.points_threshold
                .partial_cmp(&b.points_threshold)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
