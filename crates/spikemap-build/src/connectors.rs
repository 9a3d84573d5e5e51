//! Connectors expanding a projection into a synaptic list

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spikemap_image::{SynapseType, SynapticList};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Source of weight or delay values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    /// Same value for every synapse
    Constant(f64),
    /// Uniformly drawn from `[low, high)`
    Uniform {
        /// Inclusive lower bound
        low: f64,
        /// Exclusive upper bound
        high: f64,
    },
}

impl ValueSpec {
    fn validate(&self, field: &str) -> Result<()> {
        match *self {
            ValueSpec::Constant(v) if !v.is_finite() => {
                Err(BuildError::configuration(field, "must be finite"))
            }
            ValueSpec::Uniform { low, high } if !(low.is_finite() && high.is_finite() && low < high) => {
                Err(BuildError::configuration(field, format!("empty range [{}, {})", low, high)))
            }
            _ => Ok(()),
        }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        match *self {
            ValueSpec::Constant(v) => v,
            ValueSpec::Uniform { low, high } => rng.gen_range(low..high),
        }
    }
}

/// Connectivity pattern between two populations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connector {
    /// Every source connects to every target
    AllToAll {
        /// Keep `i -> i` connections when source and target are the same population
        #[serde(default = "default_true")]
        allow_self_connections: bool,
    },
    /// Source `i` connects to target `i`
    OneToOne,
    /// Each pair connects independently with probability `p_connect`
    FixedProbability {
        /// Connection probability
        p_connect: f64,
        /// Keep `i -> i` connections when source and target are the same population
        #[serde(default = "default_true")]
        allow_self_connections: bool,
    },
    /// Explicit `(source, target, weight, delay_ms)` tuples
    FromList {
        /// Connections
        connections: Vec<(u32, u32, f64, f64)>,
    },
}

fn default_true() -> bool {
    true
}

/// A connector with its value distributions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Pattern
    pub connector: Connector,
    /// Weights, ignored by from-list
    #[serde(default = "default_weight")]
    pub weight: ValueSpec,
    /// Delays in milliseconds, ignored by from-list
    #[serde(default = "default_delay")]
    pub delay: ValueSpec,
    /// Seed for random draws
    #[serde(default)]
    pub seed: u64,
}

fn default_weight() -> ValueSpec {
    ValueSpec::Constant(0.0)
}

fn default_delay() -> ValueSpec {
    ValueSpec::Constant(1.0)
}

impl ConnectorSpec {
    /// Build a spec with a seed of zero
    pub fn new(connector: Connector, weight: ValueSpec, delay: ValueSpec) -> Self {
        Self {
            connector,
            weight,
            delay,
            seed: 0,
        }
    }

    /// Expand into one row per source atom.
    ///
    /// `same_population` controls self-connection filtering.
    pub fn expand(
        &self,
        n_pre: u32,
        n_post: u32,
        synapse_type: SynapseType,
        same_population: bool,
        config: &BuildConfig,
    ) -> Result<SynapticList> {
        self.weight.validate("weight")?;
        self.delay.validate("delay")?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut list = SynapticList::with_empty_rows(n_pre as usize);

        let connect = |rng: &mut StdRng, list: &mut SynapticList, pre: u32, post: u32| {
            let weight = self.weight.sample(rng);
            let delay = config.delay_ticks(self.delay.sample(rng));
            list.rows_mut()[pre as usize].push(post, weight, delay, synapse_type);
        };

        match &self.connector {
            Connector::AllToAll { allow_self_connections } => {
                for pre in 0..n_pre {
                    for post in 0..n_post {
                        if same_population && !allow_self_connections && pre == post {
                            continue;
                        }
                        connect(&mut rng, &mut list, pre, post);
                    }
                }
            }
            Connector::OneToOne => {
                if n_pre != n_post {
                    return Err(BuildError::configuration(
                        "one_to_one",
                        format!("{} sources but {} targets", n_pre, n_post),
                    ));
                }
                for i in 0..n_pre {
                    connect(&mut rng, &mut list, i, i);
                }
            }
            Connector::FixedProbability {
                p_connect,
                allow_self_connections,
            } => {
                if !(0.0..=1.0).contains(p_connect) {
                    return Err(BuildError::configuration(
                        "p_connect",
                        format!("{} outside [0, 1]", p_connect),
                    ));
                }
                for pre in 0..n_pre {
                    for post in 0..n_post {
                        if same_population && !allow_self_connections && pre == post {
                            continue;
                        }
                        if rng.gen::<f64>() < *p_connect {
                            connect(&mut rng, &mut list, pre, post);
                        }
                    }
                }
            }
            Connector::FromList { connections } => {
                for &(pre, post, weight, delay_ms) in connections {
                    if pre >= n_pre || post >= n_post {
                        return Err(BuildError::configuration(
                            "from_list",
                            format!(
                                "connection {} -> {} outside {} x {}",
                                pre, post, n_pre, n_post
                            ),
                        ));
                    }
                    let delay = config.delay_ticks(delay_ms);
                    list.rows_mut()[pre as usize].push(post, weight, delay, synapse_type);
                }
            }
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BuildConfig {
        BuildConfig::default()
    }

    #[test]
    fn test_all_to_all() {
        let spec = ConnectorSpec::new(
            Connector::AllToAll {
                allow_self_connections: false,
            },
            ValueSpec::Constant(0.5),
            ValueSpec::Constant(2.0),
        );
        let list = spec.expand(4, 4, SynapseType::Excitatory, true, &config()).unwrap();
        assert_eq!(list.n_synapses(), 12);
        assert_eq!(list.min_max_delay(), Some((2, 2)));
    }

    #[test]
    fn test_one_to_one_size_mismatch() {
        let spec = ConnectorSpec::new(
            Connector::OneToOne,
            ValueSpec::Constant(0.5),
            ValueSpec::Constant(1.0),
        );
        assert!(spec.expand(3, 4, SynapseType::Excitatory, false, &config()).is_err());
    }

    #[test]
    fn test_seeded_draws_repeat() {
        let spec = ConnectorSpec {
            connector: Connector::FixedProbability {
                p_connect: 0.3,
                allow_self_connections: true,
            },
            weight: ValueSpec::Uniform { low: 0.0, high: 0.1 },
            delay: ValueSpec::Uniform { low: 1.0, high: 10.0 },
            seed: 42,
        };
        let a = spec.expand(50, 50, SynapseType::Inhibitory, false, &config()).unwrap();
        let b = spec.expand(50, 50, SynapseType::Inhibitory, false, &config()).unwrap();
        assert_eq!(a, b);
        assert!(a.n_synapses() > 0 && a.n_synapses() < 2500);
        assert!(a.max_abs_weight() < 0.1);
    }

    #[test]
    fn test_from_list_bounds() {
        let spec = ConnectorSpec::new(
            Connector::FromList {
                connections: vec![(0, 1, 0.2, 3.0), (5, 0, 0.1, 1.0)],
            },
            ValueSpec::Constant(0.0),
            ValueSpec::Constant(1.0),
        );
        assert!(spec.expand(2, 2, SynapseType::Excitatory, false, &config()).is_err());
    }
}
