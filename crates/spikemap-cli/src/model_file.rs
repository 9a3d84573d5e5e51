//! TOML description of a placed network
//!
//! ```toml
//! [[population]]
//! label = "input"
//! n_neurons = 100
//! record = ["spikes"]
//!
//! [[projection]]
//! pre = "input"
//! post = "input"
//! connector = { kind = "fixed_probability", p_connect = 0.1 }
//! weight = 0.5
//! delay = { low = 1.0, high = 4.0 }
//!
//! [[placement]]
//! population = "input"
//! core = [0, 0, 1]
//! ```
//!
//! Labels are resolved to indices when the file is turned into a
//! [`BuildRequest`]. A `[config]` table replaces the configured machine
//! settings for this model.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use spikemap_build::model::{ExponentialShape, IntegrateAndFire};
use spikemap_build::{
    BuildConfig, BuildRequest, Connector, ConnectorSpec, InputKind, NeuronModel, Placement,
    Population, Projection, RecordingFlags, StdpMechanism, ValueSpec,
};
use spikemap_image::{CoreLocation, KeyAndMask, PlacedSlice, SynapseType};

use crate::error::{CliError, CliResult};

/// A network model file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFile {
    /// Machine settings overriding the CLI configuration
    #[serde(default)]
    pub config: Option<BuildConfig>,

    /// Populations
    #[serde(default, rename = "population")]
    pub populations: Vec<PopulationEntry>,

    /// Projections
    #[serde(default, rename = "projection")]
    pub projections: Vec<ProjectionEntry>,

    /// Neuron core placements
    #[serde(default, rename = "placement")]
    pub placements: Vec<PlacementEntry>,

    /// Delay-extension core placements
    #[serde(default, rename = "delay_placement")]
    pub delay_placements: Vec<PlacementEntry>,
}

/// Built-in neuron models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Current-based exponential integrate-and-fire
    #[default]
    IfCurrExp,
    /// Conductance-based exponential integrate-and-fire
    IfCondExp,
}

/// Recordable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Spike times
    Spikes,
    /// Membrane potential
    V,
    /// Synaptic input
    Gsyn,
}

/// One `[[population]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationEntry {
    /// Unique label
    pub label: String,
    /// Number of neurons
    pub n_neurons: u32,
    /// Neuron model
    #[serde(default)]
    pub model: ModelKind,
    /// Membrane parameters replacing the model defaults
    #[serde(default)]
    pub dynamics: Option<IntegrateAndFire>,
    /// Input stage replacing the model default
    #[serde(default)]
    pub input: Option<InputKind>,
    /// Synapse time constants replacing the model defaults
    #[serde(default)]
    pub synapse_shape: Option<ExponentialShape>,
    /// What to record
    #[serde(default)]
    pub record: Vec<RecordKind>,
}

impl PopulationEntry {
    fn neuron_model(&self) -> NeuronModel {
        let mut model = match self.model {
            ModelKind::IfCurrExp => NeuronModel::if_curr_exp(),
            ModelKind::IfCondExp => NeuronModel::if_cond_exp(),
        };
        if let Some(dynamics) = &self.dynamics {
            model.dynamics = dynamics.clone();
        }
        if let Some(input) = &self.input {
            model.input = input.clone();
        }
        if let Some(shape) = &self.synapse_shape {
            model.synapse_shape = shape.clone();
        }
        model
    }

    fn recording(&self) -> RecordingFlags {
        self.record
            .iter()
            .fold(RecordingFlags::empty(), |flags, kind| {
                flags
                    | match kind {
                        RecordKind::Spikes => RecordingFlags::SPIKES,
                        RecordKind::V => RecordingFlags::POTENTIAL,
                        RecordKind::Gsyn => RecordingFlags::GSYN,
                    }
            })
    }
}

fn default_synapse_type() -> SynapseType {
    SynapseType::Excitatory
}

fn default_weight() -> ValueSpec {
    ValueSpec::Constant(0.0)
}

fn default_delay() -> ValueSpec {
    ValueSpec::Constant(1.0)
}

/// One `[[projection]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectionEntry {
    /// Label, `<pre>-><post>` when omitted
    #[serde(default)]
    pub label: Option<String>,
    /// Source population label
    pub pre: String,
    /// Target population label
    pub post: String,
    /// Receptor the synapses drive
    #[serde(default = "default_synapse_type")]
    pub synapse_type: SynapseType,
    /// Connectivity pattern
    pub connector: Connector,
    /// Weights
    #[serde(default = "default_weight")]
    pub weight: ValueSpec,
    /// Delays in milliseconds
    #[serde(default = "default_delay")]
    pub delay: ValueSpec,
    /// Seed for random draws
    #[serde(default)]
    pub seed: u64,
    /// Plasticity; static synapses when omitted
    #[serde(default)]
    pub stdp: Option<StdpMechanism>,
}

/// One `[[placement]]` or `[[delay_placement]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementEntry {
    /// Population label
    pub population: String,
    /// Core as `[x, y, p]`
    pub core: [u8; 3],
    /// First atom, 0 when omitted
    #[serde(default)]
    pub lo_atom: Option<u32>,
    /// Last atom, the population's last neuron when omitted
    #[serde(default)]
    pub hi_atom: Option<u32>,
    /// Routing key, derived from the core when omitted
    #[serde(default)]
    pub key: Option<u32>,
    /// Routing mask, the default mask when omitted
    #[serde(default)]
    pub mask: Option<u32>,
}

impl ModelFile {
    /// Parse a model file
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.exists() {
            return Err(CliError::missing_resource(format!("model file {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse model text
    pub fn parse(content: &str) -> CliResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve labels, expand connectors and produce a build request
    pub fn into_request(self, config: BuildConfig) -> CliResult<BuildRequest> {
        let config = self.config.unwrap_or(config);
        config.validate()?;

        let mut index = HashMap::new();
        for (i, entry) in self.populations.iter().enumerate() {
            if index.insert(entry.label.as_str(), i).is_some() {
                return Err(CliError::model(format!("population {} defined twice", entry.label)));
            }
        }
        let lookup = |label: &str| {
            index
                .get(label)
                .copied()
                .ok_or_else(|| CliError::model(format!("unknown population {}", label)))
        };

        let populations: Vec<Population> = self
            .populations
            .iter()
            .map(|entry| Population {
                label: entry.label.clone(),
                n_neurons: entry.n_neurons,
                model: entry.neuron_model(),
                recording: entry.recording(),
            })
            .collect();

        let mut projections = Vec::with_capacity(self.projections.len());
        for entry in &self.projections {
            let pre = lookup(&entry.pre)?;
            let post = lookup(&entry.post)?;
            let label = entry
                .label
                .clone()
                .unwrap_or_else(|| format!("{}->{}", entry.pre, entry.post));
            let spec = ConnectorSpec {
                connector: entry.connector.clone(),
                weight: entry.weight.clone(),
                delay: entry.delay.clone(),
                seed: entry.seed,
            };
            let list = spec.expand(
                populations[pre].n_neurons,
                populations[post].n_neurons,
                entry.synapse_type,
                pre == post,
                &config,
            )?;
            tracing::debug!("Projection {}: {} synapses", label, list.n_synapses());
            projections.push(Projection {
                label,
                pre,
                post,
                list,
                stdp: entry.stdp.clone(),
            });
        }

        let placement = |entry: &PlacementEntry| -> CliResult<Placement> {
            let population = lookup(&entry.population)?;
            let n_neurons = populations[population].n_neurons;
            if n_neurons == 0 {
                return Err(CliError::model(format!(
                    "population {} has no neurons to place",
                    entry.population
                )));
            }
            let [x, y, p] = entry.core;
            let slice = PlacedSlice::new(
                CoreLocation::new(x, y, p),
                entry.lo_atom.unwrap_or(0),
                entry.hi_atom.unwrap_or(n_neurons - 1),
            )?;
            let key = match (entry.key, entry.mask) {
                (Some(key), mask) => Some(KeyAndMask::new(
                    key,
                    mask.unwrap_or(KeyAndMask::DEFAULT_MASK),
                )),
                (None, Some(_)) => {
                    return Err(CliError::model(format!(
                        "placement of {} on {:?} gives a mask without a key",
                        entry.population, entry.core
                    )))
                }
                (None, None) => None,
            };
            Ok(Placement {
                population,
                slice,
                key,
            })
        };

        let placements = self
            .placements
            .iter()
            .map(&placement)
            .collect::<CliResult<Vec<_>>>()?;
        let delay_placements = self
            .delay_placements
            .iter()
            .map(&placement)
            .collect::<CliResult<Vec<_>>>()?;

        Ok(BuildRequest {
            config,
            populations,
            projections,
            placements,
            delay_placements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemap_build::ParamValue;

    const MODEL: &str = r#"
[[population]]
label = "input"
n_neurons = 20
record = ["spikes", "v"]

[[population]]
label = "output"
n_neurons = 10
model = "if_cond_exp"
synapse_shape = { tau_syn_e = 2.0 }

[[projection]]
pre = "input"
post = "output"
synapse_type = "inhibitory"
connector = { kind = "all_to_all" }
weight = 0.25
delay = 2

[[placement]]
population = "input"
core = [0, 0, 1]
hi_atom = 9

[[placement]]
population = "input"
core = [0, 0, 2]
lo_atom = 10

[[placement]]
population = "output"
core = [1, 0, 1]
key = 0x10000
"#;

    #[test]
    fn test_model_resolves_labels() {
        let request = ModelFile::parse(MODEL)
            .unwrap()
            .into_request(BuildConfig::default())
            .unwrap();

        assert_eq!(request.populations.len(), 2);
        assert_eq!(
            request.populations[0].recording,
            RecordingFlags::SPIKES | RecordingFlags::POTENTIAL
        );
        assert_eq!(request.populations[1].model.name(), "IF_cond_exp");
        assert_eq!(
            request.populations[1].model.synapse_shape.tau_syn_e,
            ParamValue::Scalar(2.0)
        );

        let projection = &request.projections[0];
        assert_eq!(projection.label, "input->output");
        assert_eq!((projection.pre, projection.post), (0, 1));
        assert_eq!(projection.list.n_rows(), 20);
        assert_eq!(projection.list.n_synapses(), 200);

        assert_eq!(request.placements[0].slice.hi_atom, 9);
        assert_eq!(request.placements[1].slice.lo_atom, 10);
        assert_eq!(request.placements[1].slice.hi_atom, 19);
        assert_eq!(
            request.placements[2].key,
            Some(KeyAndMask::new(0x10000, KeyAndMask::DEFAULT_MASK))
        );
    }

    #[test]
    fn test_unknown_population_is_rejected() {
        let model = r#"
[[population]]
label = "a"
n_neurons = 4

[[placement]]
population = "b"
core = [0, 0, 1]
"#;
        let err = ModelFile::parse(model)
            .unwrap()
            .into_request(BuildConfig::default())
            .unwrap_err();
        assert!(matches!(err, CliError::Model(_)));
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let model = r#"
[[population]]
label = "a"
n_neurons = 4

[[population]]
label = "a"
n_neurons = 8
"#;
        let err = ModelFile::parse(model)
            .unwrap()
            .into_request(BuildConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(ModelFile::parse("[[population]]\nlabel = \"a\"\nn_neurons = 1\ncolour = 3\n").is_err());
    }

    #[test]
    fn test_model_config_replaces_cli_config() {
        let model = "[config]\nmachine_time_step_us = 100\n";
        let mut base = BuildConfig::default();
        base.max_delay_stages = 4;
        let request = ModelFile::parse(model).unwrap().into_request(base).unwrap();
        assert_eq!(request.config.machine_time_step_us, 100);
        assert_eq!(request.config.max_delay_stages, 8);
    }
}
