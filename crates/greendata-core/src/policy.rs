//! Derived public values: carbon tax and impact estimates

use serde::Serialize;

use crate::config::DEFAULT_TAX_RATE;
use crate::Error;

/// kg of CO2 per kWh used for the impact estimate
const CO2_KG_PER_KWH: f64 = 0.5;

/// kWh offset by one tree in the impact estimate
const KWH_PER_TREE: f64 = 100.0;

/// Fixed linear carbon tax policy: `tax = round(consumption * rate)`.
///
/// The result is informational. It is not evidence that any on-chain
/// homomorphic computation used the same rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxPolicy {
    rate: f64,
}

impl TaxPolicy {
    pub fn new(rate: f64) -> crate::Result<Self> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "tax rate must be finite and non-negative, got {}",
                rate
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Tax for an exact integer consumption, rounded half away from zero
    pub fn tax_for(&self, consumption: u64) -> u64 {
        (consumption as f64 * self.rate).round() as u64
    }
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            rate: DEFAULT_TAX_RATE,
        }
    }
}

/// Environmental impact derived from a disclosed consumption value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpactEstimate {
    pub co2_kg: u64,
    pub trees_equivalent: u64,
    /// Disclosed value as a percentage of the declared estimate
    pub efficiency_pct: f64,
}

impl ImpactEstimate {
    pub fn from_disclosed(disclosed: u64, declared: u64) -> Self {
        let efficiency_pct = if declared > 0 {
            disclosed as f64 / declared as f64 * 100.0
        } else {
            0.0
        };

        Self {
            co2_kg: (disclosed as f64 * CO2_KG_PER_KWH).round() as u64,
            trees_equivalent: (disclosed as f64 / KWH_PER_TREE).round() as u64,
            efficiency_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_tax() {
        let policy = TaxPolicy::default();
        assert_eq!(policy.tax_for(100), 15);
        assert_eq!(policy.tax_for(0), 0);
        assert_eq!(policy.tax_for(10), 2); // 1.5 rounds up
        assert_eq!(policy.tax_for(3), 0); // 0.45 rounds down
    }

    #[test]
    fn test_tax_large_consumption() {
        let policy = TaxPolicy::default();
        let max = u32::MAX as u64;
        assert_eq!(policy.tax_for(max), (max as f64 * 0.15).round() as u64);
    }

    #[test]
    fn test_rejects_bad_rates() {
        assert!(TaxPolicy::new(-0.1).is_err());
        assert!(TaxPolicy::new(f64::NAN).is_err());
        assert!(TaxPolicy::new(f64::INFINITY).is_err());
        assert!(TaxPolicy::new(0.0).is_ok());
    }

    #[test]
    fn test_impact_estimate() {
        let impact = ImpactEstimate::from_disclosed(250, 200);
        assert_eq!(impact.co2_kg, 125);
        assert_eq!(impact.trees_equivalent, 3);
        assert!((impact.efficiency_pct - 125.0).abs() < f64::EPSILON);

        let no_estimate = ImpactEstimate::from_disclosed(250, 0);
        assert_eq!(no_estimate.efficiency_pct, 0.0);
    }
}
