//! Neuron models and their firmware parameter lists
//!
//! A model is a composition of independent components: integrate-and-fire
//! membrane dynamics, a current or conductance input stage, and an
//! exponential synapse shape. [`neuron_parameters`] concatenates the
//! component lists in the order the firmware struct declares them.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use spikemap_image::{FixedPointFormat, SynapseType};

use crate::error::{BuildError, Result};

/// A parameter given once for the population or once per neuron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Broadcast to every neuron
    Scalar(f64),
    /// One value per neuron, a single element broadcasts
    PerNeuron(Vec<f64>),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        ParamValue::PerNeuron(values)
    }
}

impl ParamValue {
    /// Value for a global atom index, `None` if a sequence is too short
    pub fn at(&self, atom: u32) -> Option<f64> {
        match self {
            ParamValue::Scalar(v) => Some(*v),
            ParamValue::PerNeuron(values) if values.len() == 1 => Some(values[0]),
            ParamValue::PerNeuron(values) => values.get(atom as usize).copied(),
        }
    }

    /// Check that every atom up to `hi_atom` has a value
    pub fn check_covers(&self, hi_atom: u32, population: &str, field: &str) -> Result<()> {
        match self.at(hi_atom) {
            Some(_) => Ok(()),
            None => Err(BuildError::configuration(
                format!("{}.{}", population, field),
                format!(
                    "{} values given, atom {} requested",
                    self.len().unwrap_or(1),
                    hi_atom
                ),
            )),
        }
    }

    /// Length of a per-neuron sequence
    pub fn len(&self) -> Option<usize> {
        match self {
            ParamValue::Scalar(_) => None,
            ParamValue::PerNeuron(values) => Some(values.len()),
        }
    }

    /// Apply `f` to every value
    pub fn map(&self, f: impl Fn(f64) -> f64) -> ParamValue {
        match self {
            ParamValue::Scalar(v) => ParamValue::Scalar(f(*v)),
            ParamValue::PerNeuron(values) => {
                ParamValue::PerNeuron(values.iter().map(|&v| f(v)).collect())
            }
        }
    }

    /// Combine two values elementwise, broadcasting scalars and single elements.
    ///
    /// Two sequences of different lengths combine to the shorter one, so a
    /// later coverage check still reports the missing atoms.
    pub fn zip_with(&self, other: &ParamValue, f: impl Fn(f64, f64) -> f64) -> ParamValue {
        match (self.broadcast_len(), other.broadcast_len()) {
            (None, None) => {
                let a = self.at(0).unwrap_or(0.0);
                let b = other.at(0).unwrap_or(0.0);
                ParamValue::Scalar(f(a, b))
            }
            (a, b) => {
                let n = match (a, b) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(n), None) | (None, Some(n)) => n,
                    (None, None) => 0,
                };
                ParamValue::PerNeuron(
                    (0..n as u32)
                        .map(|i| f(self.at(i).unwrap_or(0.0), other.at(i).unwrap_or(0.0)))
                        .collect(),
                )
            }
        }
    }

    fn broadcast_len(&self) -> Option<usize> {
        match self {
            ParamValue::PerNeuron(values) if values.len() != 1 => Some(values.len()),
            _ => None,
        }
    }
}

/// One firmware parameter: a value per neuron and its encoding
#[derive(Debug, Clone, PartialEq)]
pub struct NeuronParameter {
    /// Field name used in error messages
    pub name: &'static str,
    /// Value or values
    pub value: ParamValue,
    /// Encoding written to the image
    pub format: FixedPointFormat,
}

impl NeuronParameter {
    fn new(name: &'static str, value: ParamValue, format: FixedPointFormat) -> Self {
        Self { name, value, format }
    }

    fn s1615(name: &'static str, value: ParamValue) -> Self {
        Self::new(name, value, FixedPointFormat::S1615)
    }
}

bitflags! {
    /// What a population can do, queried instead of probing model types
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Inputs are injected as currents
        const CURRENT_INPUT = 1 << 0;
        /// Inputs change conductances
        const CONDUCTANCE_INPUT = 1 << 1;
        /// Synaptic input decays exponentially
        const EXPONENTIAL_SYNAPSES = 1 << 2;
        /// Integrate-and-fire membrane
        const INTEGRATE_AND_FIRE = 1 << 3;
        /// Spikes, potentials and synaptic input can be recorded
        const RECORDABLE = 1 << 4;
        /// Accepts plastic projections
        const PLASTIC_INPUT = 1 << 5;
    }
}

bitflags! {
    /// Recorded state of a population, written into the setup region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordingFlags: u32 {
        /// Spike times
        const SPIKES = 1 << 0;
        /// Membrane potential
        const POTENTIAL = 1 << 1;
        /// Synaptic input
        const GSYN = 1 << 2;
    }
}

/// Leaky integrate-and-fire membrane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrateAndFire {
    /// Membrane time constant (ms)
    pub tau_m: ParamValue,
    /// Membrane capacitance (nF)
    pub cm: ParamValue,
    /// Resting potential (mV)
    pub v_rest: ParamValue,
    /// Reset potential (mV)
    pub v_reset: ParamValue,
    /// Threshold potential (mV)
    pub v_thresh: ParamValue,
    /// Refractory period (ms)
    pub tau_refrac: ParamValue,
    /// Initial potential (mV), defaults to `v_rest`
    pub v_init: Option<ParamValue>,
    /// Offset current (nA)
    pub i_offset: ParamValue,
}

impl Default for IntegrateAndFire {
    fn default() -> Self {
        Self {
            tau_m: 20.0.into(),
            cm: 1.0.into(),
            v_rest: (-65.0).into(),
            v_reset: (-65.0).into(),
            v_thresh: (-50.0).into(),
            tau_refrac: 0.1.into(),
            v_init: None,
            i_offset: 0.0.into(),
        }
    }
}

impl IntegrateAndFire {
    fn fields(&self) -> Vec<(&'static str, &ParamValue)> {
        let mut fields = vec![
            ("tau_m", &self.tau_m),
            ("cm", &self.cm),
            ("v_rest", &self.v_rest),
            ("v_reset", &self.v_reset),
            ("v_thresh", &self.v_thresh),
            ("tau_refrac", &self.tau_refrac),
            ("i_offset", &self.i_offset),
        ];
        if let Some(v_init) = &self.v_init {
            fields.push(("v_init", v_init));
        }
        fields
    }

    /// Threshold, reset, rest and membrane resistance
    pub fn threshold_parameters(&self) -> Vec<NeuronParameter> {
        vec![
            NeuronParameter::s1615("v_thresh", self.v_thresh.clone()),
            NeuronParameter::s1615("v_reset", self.v_reset.clone()),
            NeuronParameter::s1615("v_rest", self.v_rest.clone()),
            NeuronParameter::s1615("r_membrane", self.tau_m.zip_with(&self.cm, |tau, cm| tau / cm)),
        ]
    }

    /// Initial state and per-timestep integration constants
    pub fn integration_parameters(&self, timestep_ms: f64) -> Vec<NeuronParameter> {
        let v_init = self.v_init.clone().unwrap_or_else(|| self.v_rest.clone());
        vec![
            NeuronParameter::s1615("v_init", v_init),
            NeuronParameter::s1615("i_offset", self.i_offset.map(|i| i * timestep_ms)),
            NeuronParameter::s1615("exp_tc", self.tau_m.map(|tau| (-timestep_ms / tau).exp())),
            NeuronParameter::s1615("one_over_tau_rc", self.tau_m.map(|tau| 1.0 / tau)),
            NeuronParameter::new("refract_timer", ParamValue::Scalar(0.0), FixedPointFormat::INT32),
            NeuronParameter::new(
                "t_refract",
                self.tau_refrac.map(|t| (t / timestep_ms).round()),
                FixedPointFormat::INT32,
            ),
        ]
    }
}

/// Input stage of the neuron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputKind {
    /// Synaptic input is a current
    Current,
    /// Synaptic input scales a conductance towards a reversal potential
    Conductance {
        /// Excitatory reversal potential (mV)
        e_rev_e: ParamValue,
        /// Inhibitory reversal potential (mV)
        e_rev_i: ParamValue,
    },
}

impl Default for InputKind {
    fn default() -> Self {
        InputKind::Current
    }
}

impl InputKind {
    /// Reversal potentials, empty for current input
    pub fn parameters(&self) -> Vec<NeuronParameter> {
        match self {
            InputKind::Current => Vec::new(),
            InputKind::Conductance { e_rev_e, e_rev_i } => vec![
                NeuronParameter::s1615("e_rev_e", e_rev_e.clone()),
                NeuronParameter::s1615("e_rev_i", e_rev_i.clone()),
            ],
        }
    }

    fn fields(&self) -> Vec<(&'static str, &ParamValue)> {
        match self {
            InputKind::Current => Vec::new(),
            InputKind::Conductance { e_rev_e, e_rev_i } => {
                vec![("e_rev_e", e_rev_e), ("e_rev_i", e_rev_i)]
            }
        }
    }
}

/// Exponentially decaying synaptic input per synapse type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialShape {
    /// Excitatory time constant (ms)
    pub tau_syn_e: ParamValue,
    /// Inhibitory time constant (ms)
    pub tau_syn_i: ParamValue,
}

impl Default for ExponentialShape {
    fn default() -> Self {
        Self {
            tau_syn_e: 5.0.into(),
            tau_syn_i: 5.0.into(),
        }
    }
}

impl ExponentialShape {
    /// Time constant of one synapse type
    pub fn tau(&self, synapse_type: SynapseType) -> &ParamValue {
        match synapse_type {
            SynapseType::Excitatory => &self.tau_syn_e,
            SynapseType::Inhibitory => &self.tau_syn_i,
        }
    }

    /// Decay and initial-input multipliers of one synapse type, both `U032`
    pub fn decay_parameters(
        &self,
        synapse_type: SynapseType,
        timestep_ms: f64,
    ) -> (NeuronParameter, NeuronParameter) {
        let tau = self.tau(synapse_type);
        let decay = tau.map(|tau| (-timestep_ms / tau).exp());
        let init = tau.map(|tau| {
            let decay = (-timestep_ms / tau).exp();
            tau / timestep_ms * (1.0 - decay)
        });
        (
            NeuronParameter::new("decay", decay, FixedPointFormat::U032),
            NeuronParameter::new("init", init, FixedPointFormat::U032),
        )
    }

    fn fields(&self) -> Vec<(&'static str, &ParamValue)> {
        vec![("tau_syn_e", &self.tau_syn_e), ("tau_syn_i", &self.tau_syn_i)]
    }
}

/// A neuron model assembled from its components
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuronModel {
    /// Membrane dynamics
    pub dynamics: IntegrateAndFire,
    /// Input stage
    pub input: InputKind,
    /// Synapse shape
    pub synapse_shape: ExponentialShape,
}

impl NeuronModel {
    /// Current-based exponential integrate-and-fire
    pub fn if_curr_exp() -> Self {
        Self::default()
    }

    /// Conductance-based exponential integrate-and-fire
    pub fn if_cond_exp() -> Self {
        Self {
            input: InputKind::Conductance {
                e_rev_e: 0.0.into(),
                e_rev_i: (-70.0).into(),
            },
            ..Self::default()
        }
    }

    /// Short model name
    pub fn name(&self) -> &'static str {
        match self.input {
            InputKind::Current => "IF_curr_exp",
            InputKind::Conductance { .. } => "IF_cond_exp",
        }
    }

    /// Capability set of the model
    pub fn capabilities(&self) -> Capabilities {
        let input = match self.input {
            InputKind::Current => Capabilities::CURRENT_INPUT,
            InputKind::Conductance { .. } => Capabilities::CONDUCTANCE_INPUT,
        };
        input
            | Capabilities::EXPONENTIAL_SYNAPSES
            | Capabilities::INTEGRATE_AND_FIRE
            | Capabilities::RECORDABLE
            | Capabilities::PLASTIC_INPUT
    }

    /// Check every user-supplied parameter covers atoms up to `hi_atom`
    pub fn check_covers(&self, hi_atom: u32, population: &str) -> Result<()> {
        for (field, value) in self
            .dynamics
            .fields()
            .into_iter()
            .chain(self.input.fields())
            .chain(self.synapse_shape.fields())
        {
            value.check_covers(hi_atom, population, field)?;
        }
        Ok(())
    }
}

/// Firmware parameter list of a model, in declared struct order
pub fn neuron_parameters(model: &NeuronModel, timestep_ms: f64) -> Vec<NeuronParameter> {
    let mut params = model.dynamics.threshold_parameters();
    params.extend(model.input.parameters());
    params.extend(model.dynamics.integration_parameters(timestep_ms));
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_broadcast() {
        let scalar = ParamValue::Scalar(-65.0);
        assert_eq!(scalar.at(1000), Some(-65.0));
        let single = ParamValue::PerNeuron(vec![2.0]);
        assert_eq!(single.at(7), Some(2.0));
        let seq = ParamValue::PerNeuron(vec![1.0, 2.0, 3.0]);
        assert_eq!(seq.at(2), Some(3.0));
        assert_eq!(seq.at(3), None);
    }

    #[test]
    fn test_short_sequence_is_configuration_error() {
        let seq = ParamValue::PerNeuron(vec![1.0, 2.0]);
        let err = seq.check_covers(5, "exc", "v_thresh").unwrap_err();
        match err {
            BuildError::Configuration { field, .. } => assert_eq!(field, "exc.v_thresh"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_zip_with() {
        let tau = ParamValue::PerNeuron(vec![10.0, 20.0]);
        let cm = ParamValue::Scalar(2.0);
        assert_eq!(tau.zip_with(&cm, |t, c| t / c), ParamValue::PerNeuron(vec![5.0, 10.0]));
        assert_eq!(
            ParamValue::Scalar(4.0).zip_with(&ParamValue::PerNeuron(vec![2.0]), |a, b| a * b),
            ParamValue::Scalar(8.0)
        );
    }

    #[test]
    fn test_parameter_order() {
        let names: Vec<_> = neuron_parameters(&NeuronModel::if_curr_exp(), 1.0)
            .iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "v_thresh", "v_reset", "v_rest", "r_membrane", "v_init", "i_offset", "exp_tc",
                "one_over_tau_rc", "refract_timer", "t_refract"
            ]
        );

        let cond = neuron_parameters(&NeuronModel::if_cond_exp(), 1.0);
        assert_eq!(cond.len(), 12);
        assert_eq!(cond[4].name, "e_rev_e");
        assert_eq!(cond[5].name, "e_rev_i");
    }

    #[test]
    fn test_capabilities() {
        let caps = NeuronModel::if_cond_exp().capabilities();
        assert!(caps.contains(Capabilities::CONDUCTANCE_INPUT | Capabilities::RECORDABLE));
        assert!(!caps.contains(Capabilities::CURRENT_INPUT));
    }

    #[test]
    fn test_decay_parameters() {
        let shape = ExponentialShape::default();
        let (decay, init) = shape.decay_parameters(SynapseType::Excitatory, 1.0);
        let d = decay.value.at(0).unwrap();
        assert!((d - (-0.2f64).exp()).abs() < 1e-12);
        let i = init.value.at(0).unwrap();
        assert!((i - 5.0 * (1.0 - d)).abs() < 1e-12);
        assert_eq!(decay.format, FixedPointFormat::U032);
    }
}
