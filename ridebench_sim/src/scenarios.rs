//! Benchmark scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Honest service, idle chairs stay put
    Standard,

    /// Service charges more than the fare; must surface as a payment discrepancy
    Overcharge,

    /// Idle chairs wander inside their region
    Roaming,

    /// Tiny payment queue that answers 5xx when saturated
    FlakyGateway,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Standard,
            ScenarioId::Overcharge,
            ScenarioId::Roaming,
            ScenarioId::FlakyGateway,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Standard => "standard",
            ScenarioId::Overcharge => "overcharge",
            ScenarioId::Roaming => "roaming",
            ScenarioId::FlakyGateway => "flaky_gateway",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Standard => "Riders, chairs and owners against a correct service",
            ScenarioId::Overcharge => "Every fare is overcharged at the payment gateway",
            ScenarioId::Roaming => "Idle chairs roam, exercising distance reconciliation",
            ScenarioId::FlakyGateway => "Saturated gateway answers 500/502/504, retries must not double charge",
        }
    }

    /// True when a passing run is one that detects a fault.
    pub fn expects_discrepancy(&self) -> bool {
        matches!(self, ScenarioId::Overcharge)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ScenarioId::Standard),
            "overcharge" => Ok(ScenarioId::Overcharge),
            "roaming" | "roam" => Ok(ScenarioId::Roaming),
            "flaky_gateway" | "flaky-gateway" | "flaky" => Ok(ScenarioId::FlakyGateway),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("nope".parse::<ScenarioId>().is_err());
    }
}
