//! NATS subject hierarchy.
//!
//! Every subject lives under a configurable prefix so that several
//! simulations can share one NATS cluster.

/// Default subject prefix.
pub const DEFAULT_PREFIX: &str = "doom";

/// Input events, viewers to simulation.
///
/// `<prefix>.input`
#[must_use]
pub fn input(prefix: &str) -> String {
    format!("{prefix}.input")
}

/// PNG frames, simulation to viewers.
///
/// `<prefix>.frame`
#[must_use]
pub fn frame(prefix: &str) -> String {
    format!("{prefix}.frame")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(input(DEFAULT_PREFIX), "doom.input");
        assert_eq!(frame("arena.7"), "arena.7.frame");
    }
}
