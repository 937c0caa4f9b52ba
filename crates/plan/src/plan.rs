use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::unit::{ShutdownMode, UnitSpec};

/// A validated, ordered list of tiers.
///
/// Tier indices are assigned from position: lower tiers start first and
/// stop last. Construction rejects configurations where the declared
/// dependencies contradict the tier ordering, so a valid `Plan` can be
/// walked in either direction without re-checking.
#[derive(Clone, Debug)]
pub struct Plan {
    tiers: Vec<Vec<UnitSpec>>,
}

impl Plan {
    /// Builds a plan from an ordered tier list, assigning each unit its
    /// tier index.
    ///
    /// # Errors
    ///
    /// Returns an error if a unit name is empty or duplicated, if a
    /// dependency references an unknown unit, or if a dependency lives in
    /// an equal-or-later tier.
    pub fn new(mut tiers: Vec<Vec<UnitSpec>>) -> Result<Self> {
        let mut tier_of: HashMap<String, usize> = HashMap::new();

        for (index, tier) in tiers.iter_mut().enumerate() {
            for unit in tier.iter_mut() {
                if unit.name().is_empty() {
                    return Err(Error::EmptyUnitName);
                }

                unit.set_tier(index);

                if tier_of.insert(unit.name().to_string(), index).is_some() {
                    return Err(Error::DuplicateUnit(unit.name().to_string()));
                }
            }
        }

        for tier in &tiers {
            for unit in tier {
                for dependency in unit.depends_on() {
                    let Some(&dependency_tier) = tier_of.get(dependency) else {
                        return Err(Error::UnknownDependency {
                            unit: unit.name().to_string(),
                            dependency: dependency.clone(),
                        });
                    };

                    if dependency_tier >= unit.tier() {
                        return Err(Error::DependencyOrder {
                            unit: unit.name().to_string(),
                            unit_tier: unit.tier(),
                            dependency: dependency.clone(),
                            dependency_tier,
                        });
                    }
                }
            }
        }

        Ok(Self { tiers })
    }

    /// The ordered tiers of the plan.
    #[must_use]
    pub fn tiers(&self) -> &[Vec<UnitSpec>] {
        &self.tiers
    }

    /// Number of tiers, including empty ones.
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Iterates over every unit in tier order.
    pub fn units(&self) -> impl Iterator<Item = &UnitSpec> {
        self.tiers.iter().flatten()
    }

    /// Looks up a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitSpec> {
        self.units().find(|unit| unit.name() == name)
    }

    /// Whether the plan contains no units at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(Vec::is_empty)
    }

    /// Returns a copy of the plan with every unit's shutdown mode forced
    /// to [`ShutdownMode::Immediate`]. Used for emergency stops.
    #[must_use]
    pub fn with_immediate_shutdown(&self) -> Self {
        let mut plan = self.clone();
        for tier in &mut plan.tiers {
            for unit in tier.iter_mut() {
                unit.set_shutdown_mode(ShutdownMode::Immediate);
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::HealthCheck;

    fn tcp_unit(name: &str) -> UnitSpec {
        UnitSpec::new(
            name,
            HealthCheck::Tcp {
                addr: "127.0.0.1:4222".parse().unwrap(),
                interval: None,
                timeout: None,
            },
        )
    }

    #[test]
    fn assigns_tier_indices_by_position() {
        let plan = Plan::new(vec![
            vec![tcp_unit("a"), tcp_unit("b")],
            vec![],
            vec![tcp_unit("c")],
        ])
        .unwrap();

        assert_eq!(plan.unit("a").unwrap().tier(), 0);
        assert_eq!(plan.unit("b").unwrap().tier(), 0);
        assert_eq!(plan.unit("c").unwrap().tier(), 2);
        assert_eq!(plan.tier_count(), 3);
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = Plan::new(vec![vec![tcp_unit("a")], vec![tcp_unit("a")]]);
        assert!(matches!(result, Err(Error::DuplicateUnit(name)) if name == "a"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let result = Plan::new(vec![vec![tcp_unit("a").with_dependencies(["ghost"])]]);
        assert!(matches!(result, Err(Error::UnknownDependency { .. })));
    }

    #[test]
    fn rejects_dependency_in_same_tier() {
        let result = Plan::new(vec![vec![
            tcp_unit("a"),
            tcp_unit("b").with_dependencies(["a"]),
        ]]);
        assert!(matches!(result, Err(Error::DependencyOrder { .. })));
    }

    #[test]
    fn rejects_dependency_in_later_tier() {
        let result = Plan::new(vec![
            vec![tcp_unit("a").with_dependencies(["b"])],
            vec![tcp_unit("b")],
        ]);
        assert!(matches!(result, Err(Error::DependencyOrder { .. })));
    }

    #[test]
    fn accepts_dependency_in_lower_tier() {
        let plan = Plan::new(vec![
            vec![tcp_unit("a")],
            vec![tcp_unit("b").with_dependencies(["a"])],
        ]);
        assert!(plan.is_ok());
    }

    #[test]
    fn emergency_copy_forces_immediate_mode() {
        let plan = Plan::new(vec![vec![tcp_unit("a")]]).unwrap();
        let emergency = plan.with_immediate_shutdown();

        assert_eq!(
            plan.unit("a").unwrap().shutdown_mode(),
            ShutdownMode::Graceful
        );
        assert_eq!(
            emergency.unit("a").unwrap().shutdown_mode(),
            ShutdownMode::Immediate
        );
    }
}
