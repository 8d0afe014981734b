//! Prometheus gauges mirroring the ranked-signer state.

use prometheus::{IntGauge, Registry};

/// Handles to the two gauges the signer keeps up to date: its rank and the
/// number of blocks missed in a row.
#[derive(Clone, Debug)]
pub struct Gauges {
    pub rank: IntGauge,
    pub missed_blocks_in_a_row: IntGauge,
}

impl Gauges {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            rank: IntGauge::new("signctrl_rank", "Current rank of the SignCTRL validator")?,
            missed_blocks_in_a_row: IntGauge::new(
                "signctrl_missed_blocks_in_a_row",
                "Number of blocks missed in a row",
            )?,
        })
    }

    /// Registers both gauges on the given registry.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.rank.clone()))?;
        registry.register(Box::new(self.missed_blocks_in_a_row.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_exposes_both_gauges() {
        let registry = Registry::new();
        let gauges = Gauges::new().unwrap();
        gauges.register(&registry).unwrap();

        gauges.rank.set(2);
        gauges.missed_blocks_in_a_row.set(5);

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_owned()).collect();
        assert!(names.contains(&"signctrl_rank".to_owned()));
        assert!(names.contains(&"signctrl_missed_blocks_in_a_row".to_owned()));
    }
}
