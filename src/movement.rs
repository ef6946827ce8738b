use serde::{Deserialize, Serialize};
use std::fmt;

/// Daily movement bucket. Up buckets include their lower bound, down buckets
/// include their upper bound, so exactly +3.0 is `Up3To5` and exactly -3.0 is
/// `Down3To5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    #[serde(rename = "up_15_plus")]
    Up15Plus,
    #[serde(rename = "up_10_15")]
    Up10To15,
    #[serde(rename = "up_5_10")]
    Up5To10,
    #[serde(rename = "up_3_5")]
    Up3To5,
    Neutral,
    #[serde(rename = "down_3_5")]
    Down3To5,
    #[serde(rename = "down_5_10")]
    Down5To10,
    #[serde(rename = "down_10_15")]
    Down10To15,
    #[serde(rename = "down_15_plus")]
    Down15Plus,
}

impl Bucket {
    /// Strongest gain first, strongest loss last.
    pub const ALL: [Bucket; 9] = [
        Bucket::Up15Plus,
        Bucket::Up10To15,
        Bucket::Up5To10,
        Bucket::Up3To5,
        Bucket::Neutral,
        Bucket::Down3To5,
        Bucket::Down5To10,
        Bucket::Down10To15,
        Bucket::Down15Plus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Up15Plus => "up_15_plus",
            Bucket::Up10To15 => "up_10_15",
            Bucket::Up5To10 => "up_5_10",
            Bucket::Up3To5 => "up_3_5",
            Bucket::Neutral => "neutral",
            Bucket::Down3To5 => "down_3_5",
            Bucket::Down5To10 => "down_5_10",
            Bucket::Down10To15 => "down_10_15",
            Bucket::Down15Plus => "down_15_plus",
        }
    }

    /// Short label used in tables and charts.
    pub fn label(self) -> &'static str {
        match self {
            Bucket::Up15Plus => "15%+",
            Bucket::Up10To15 => "10-15%",
            Bucket::Up5To10 => "5-10%",
            Bucket::Up3To5 => "3-5%",
            Bucket::Neutral => "Neutral",
            Bucket::Down3To5 => "-3 to -5%",
            Bucket::Down5To10 => "-5 to -10%",
            Bucket::Down10To15 => "-10 to -15%",
            Bucket::Down15Plus => "-15%+",
        }
    }

    pub fn is_gainer(self) -> bool {
        matches!(
            self,
            Bucket::Up15Plus | Bucket::Up10To15 | Bucket::Up5To10 | Bucket::Up3To5
        )
    }

    pub fn is_loser(self) -> bool {
        matches!(
            self,
            Bucket::Down3To5 | Bucket::Down5To10 | Bucket::Down10To15 | Bucket::Down15Plus
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a percentage change to its bucket.
///
/// Total over `f64`: `+inf` lands in `Up15Plus`, `-inf` in `Down15Plus` and
/// NaN falls through every comparison into `Neutral`.
pub fn classify(pct_change: f64) -> Bucket {
    if pct_change >= 15.0 {
        Bucket::Up15Plus
    } else if pct_change >= 10.0 {
        Bucket::Up10To15
    } else if pct_change >= 5.0 {
        Bucket::Up5To10
    } else if pct_change >= 3.0 {
        Bucket::Up3To5
    } else if pct_change <= -15.0 {
        Bucket::Down15Plus
    } else if pct_change <= -10.0 {
        Bucket::Down10To15
    } else if pct_change <= -5.0 {
        Bucket::Down5To10
    } else if pct_change <= -3.0 {
        Bucket::Down3To5
    } else {
        Bucket::Neutral
    }
}
