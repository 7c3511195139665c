#![forbid(unsafe_code)]

use rand::seq::SliceRandom;
use rand::Rng;

/// Timezone labels assigned to simulated clients
pub const TIMEZONES: &[&str] = &[
    "UTC",
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "America/Sao_Paulo",
    "Europe/London",
    "Europe/Berlin",
    "Africa/Lagos",
    "Asia/Kolkata",
    "Asia/Tokyo",
    "Australia/Sydney",
];

pub fn random_timezone<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    TIMEZONES.choose(rng).copied().unwrap_or("UTC")
}
