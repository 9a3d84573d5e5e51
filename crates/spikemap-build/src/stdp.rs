//! Spike-timing dependent plasticity parameters
//!
//! A mechanism pairs a timing dependence, which shapes how traces decay,
//! with a weight dependence, which turns trace updates into weight changes.
//! The region starts with one identifier word for each, then the timing
//! lookup tables, then per synapse type the weight parameters pre-scaled
//! into ring-buffer units. The scale must be the one used when the plastic
//! rows were packed.

use serde::{Deserialize, Serialize};
use spikemap_image::{round_up_to_word, FixedPointFormat, RegionCursor, SynapseType};

use crate::error::{BuildError, Result};
use crate::ring_buffer::RingBufferShifts;

/// Entries in each exponential decay lookup table
pub const DECAY_LUT_ENTRIES: usize = 256;

/// Fractional bits of the decay lookup tables
pub const STDP_FIXED_POINT: u32 = 11;

/// Identifier words written at the start of the region
pub mod ids {
    /// Pair-based timing rule
    pub const SPIKE_PAIR: u32 = 0x7A1D_0001;
    /// Pfister triplet timing rule
    pub const PFISTER_TRIPLET: u32 = 0x7A1D_0002;
    /// Additive weight update with hard bounds
    pub const ADDITIVE: u32 = 0x3E16_0001;
    /// Multiplicative weight update, soft bounded
    pub const MULTIPLICATIVE: u32 = 0x3E16_0002;
}

/// How pre/post spike traces evolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingDependence {
    /// Nearest-pair rule with one trace on each side
    SpikePair {
        /// Potentiation window time constant (ms)
        tau_plus: f64,
        /// Depression window time constant (ms)
        tau_minus: f64,
    },
    /// Triplet rule with a slow second trace on each side
    PfisterTriplet {
        /// Fast presynaptic trace time constant (ms)
        tau_plus: f64,
        /// Fast postsynaptic trace time constant (ms)
        tau_minus: f64,
        /// Slow presynaptic trace time constant (ms)
        tau_x: f64,
        /// Slow postsynaptic trace time constant (ms)
        tau_y: f64,
    },
}

impl Default for TimingDependence {
    fn default() -> Self {
        TimingDependence::SpikePair {
            tau_plus: 20.0,
            tau_minus: 20.0,
        }
    }
}

impl TimingDependence {
    /// Identifier word
    pub fn id(&self) -> u32 {
        match self {
            TimingDependence::SpikePair { .. } => ids::SPIKE_PAIR,
            TimingDependence::PfisterTriplet { .. } => ids::PFISTER_TRIPLET,
        }
    }

    fn time_constants(&self) -> Vec<(&'static str, f64)> {
        match *self {
            TimingDependence::SpikePair { tau_plus, tau_minus } => {
                vec![("tau_plus", tau_plus), ("tau_minus", tau_minus)]
            }
            TimingDependence::PfisterTriplet {
                tau_plus,
                tau_minus,
                tau_x,
                tau_y,
            } => vec![
                ("tau_plus", tau_plus),
                ("tau_minus", tau_minus),
                ("tau_x", tau_x),
                ("tau_y", tau_y),
            ],
        }
    }

    /// Bytes of the lookup tables
    pub fn region_bytes(&self) -> usize {
        round_up_to_word(self.time_constants().len() * DECAY_LUT_ENTRIES * 2)
    }

    fn validate(&self) -> Result<()> {
        for (name, tau) in self.time_constants() {
            if !(tau > 0.0) {
                return Err(invalid("timing", name, tau, "> 0.0"));
            }
        }
        Ok(())
    }

    /// Write one int16 decay table per time constant, one entry per timestep
    fn write(&self, cursor: &mut RegionCursor<'_>, timestep_ms: f64) -> Result<()> {
        let one = f64::from(1u32 << STDP_FIXED_POINT);
        for (_, tau) in self.time_constants() {
            let table: Vec<u8> = (0..DECAY_LUT_ENTRIES)
                .flat_map(|i| {
                    let value = (one * (-(i as f64) * timestep_ms / tau).exp()).round() as i16;
                    value.to_le_bytes()
                })
                .collect();
            cursor.write_bytes(&table)?;
        }
        Ok(())
    }
}

/// How trace updates change a weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightDependence {
    /// Fixed-size steps clamped to `[w_min, w_max]`
    Additive {
        /// Minimum weight
        w_min: f64,
        /// Maximum weight
        w_max: f64,
        /// Potentiation amplitude
        a_plus: f64,
        /// Depression amplitude
        a_minus: f64,
    },
    /// Steps proportional to the distance from the bound being approached
    Multiplicative {
        /// Minimum weight
        w_min: f64,
        /// Maximum weight
        w_max: f64,
        /// Potentiation amplitude
        a_plus: f64,
        /// Depression amplitude
        a_minus: f64,
    },
}

impl Default for WeightDependence {
    fn default() -> Self {
        WeightDependence::Additive {
            w_min: 0.0,
            w_max: 1.0,
            a_plus: 0.01,
            a_minus: 0.012,
        }
    }
}

impl WeightDependence {
    /// Identifier word
    pub fn id(&self) -> u32 {
        match self {
            WeightDependence::Additive { .. } => ids::ADDITIVE,
            WeightDependence::Multiplicative { .. } => ids::MULTIPLICATIVE,
        }
    }

    /// Bytes of the per-type parameters
    pub fn region_bytes(&self) -> usize {
        SynapseType::COUNT * 4 * 4
    }

    fn bounds(&self) -> (f64, f64, f64, f64) {
        match *self {
            WeightDependence::Additive {
                w_min,
                w_max,
                a_plus,
                a_minus,
            }
            | WeightDependence::Multiplicative {
                w_min,
                w_max,
                a_plus,
                a_minus,
            } => (w_min, w_max, a_plus, a_minus),
        }
    }

    fn validate(&self) -> Result<()> {
        let (w_min, w_max, a_plus, a_minus) = self.bounds();
        if a_plus < 0.0 {
            return Err(invalid("weight", "a_plus", a_plus, ">= 0.0"));
        }
        if a_minus < 0.0 {
            return Err(invalid("weight", "a_minus", a_minus, ">= 0.0"));
        }
        if w_max <= w_min {
            return Err(BuildError::configuration(
                "stdp.weight.w_max",
                format!("{} (with w_min={}) must be > w_min", w_max, w_min),
            ));
        }
        if matches!(self, WeightDependence::Multiplicative { .. }) && w_min < 0.0 {
            return Err(invalid("weight", "w_min", w_min, ">= 0.0"));
        }
        Ok(())
    }

    /// Per type: `min_w, max_w` in weight units, then the amplitudes.
    ///
    /// Additive amplitudes are weight steps, stored scaled with depression
    /// negated. Multiplicative amplitudes multiply the distance to a bound
    /// and are stored as S1615 fractions.
    fn write(&self, cursor: &mut RegionCursor<'_>, shifts: &RingBufferShifts) -> Result<()> {
        let (w_min, w_max, a_plus, a_minus) = self.bounds();
        for ty in SynapseType::ALL {
            let scale = shifts.weight_scale(ty);
            cursor.write_value(w_min * scale, FixedPointFormat::INT32)?;
            cursor.write_value(w_max * scale, FixedPointFormat::INT32)?;
            match self {
                WeightDependence::Additive { .. } => {
                    cursor.write_value(a_plus * scale, FixedPointFormat::INT32)?;
                    cursor.write_value(-a_minus * scale, FixedPointFormat::INT32)?;
                }
                WeightDependence::Multiplicative { .. } => {
                    cursor.write_value(a_plus, FixedPointFormat::S1615)?;
                    cursor.write_value(a_minus, FixedPointFormat::S1615)?;
                }
            }
        }
        Ok(())
    }
}

/// A timing rule combined with a weight rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdpMechanism {
    /// Trace dynamics
    pub timing: TimingDependence,
    /// Weight update
    pub weight: WeightDependence,
}

impl StdpMechanism {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        self.weight.validate()
    }

    /// Size of the region this mechanism writes
    pub fn region_bytes(&self) -> usize {
        8 + self.timing.region_bytes() + self.weight.region_bytes()
    }

    /// Write the region
    pub fn write(
        &self,
        cursor: &mut RegionCursor<'_>,
        shifts: &RingBufferShifts,
        timestep_ms: f64,
    ) -> Result<()> {
        cursor.write_words(&[self.timing.id(), self.weight.id()])?;
        self.timing.write(cursor, timestep_ms)?;
        self.weight.write(cursor, shifts)
    }
}

fn invalid(part: &str, field: &str, value: f64, constraint: &str) -> BuildError {
    BuildError::configuration(
        format!("stdp.{}.{}", part, field),
        format!("{} (expected {})", value, constraint),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemap_image::{CoreImage, CoreLocation, DelayRegion, ImageBuffer, RegionPlanner};

    fn written(stdp: &StdpMechanism, shifts: &RingBufferShifts) -> CoreImage {
        let mut planner = RegionPlanner::new(8192, 4);
        planner.reserve(DelayRegion::Timings, stdp.region_bytes()).unwrap();
        let mut buffer = ImageBuffer::new(planner.finish());
        {
            let mut cursor = buffer.region(DelayRegion::Timings).unwrap();
            stdp.write(&mut cursor, shifts, 1.0).unwrap();
            cursor.finish().unwrap();
        }
        buffer.into_image(CoreLocation::new(0, 0, 1))
    }

    fn triplet() -> TimingDependence {
        TimingDependence::PfisterTriplet {
            tau_plus: 16.8,
            tau_minus: 33.7,
            tau_x: 101.0,
            tau_y: 125.0,
        }
    }

    #[test]
    fn test_validation() {
        StdpMechanism::default().validate().unwrap();
        let bad = StdpMechanism {
            weight: WeightDependence::Additive {
                w_min: 0.0,
                w_max: 0.0,
                a_plus: 0.01,
                a_minus: 0.01,
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = StdpMechanism {
            timing: TimingDependence::PfisterTriplet {
                tau_plus: 16.8,
                tau_minus: 33.7,
                tau_x: 0.0,
                tau_y: 125.0,
            },
            ..Default::default()
        };
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("stdp.timing.tau_x"), "{}", err);
        let bad = StdpMechanism {
            weight: WeightDependence::Multiplicative {
                w_min: -0.1,
                w_max: 1.0,
                a_plus: 0.01,
                a_minus: 0.01,
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_layout_size_follows_rules() {
        let pair = StdpMechanism::default();
        let with_triplet = StdpMechanism {
            timing: triplet(),
            ..Default::default()
        };
        assert_eq!(pair.region_bytes(), 8 + 2 * 512 + SynapseType::COUNT * 16);
        assert_eq!(with_triplet.region_bytes(), 8 + 4 * 512 + SynapseType::COUNT * 16);
        assert_ne!(pair, with_triplet);
    }

    #[test]
    fn test_additive_region_uses_weight_scale() {
        let shifts = RingBufferShifts::new([-3, 0]).unwrap();
        let stdp = StdpMechanism {
            weight: WeightDependence::Additive {
                w_min: 0.0,
                w_max: 0.5,
                a_plus: 0.01,
                a_minus: 0.012,
            },
            ..Default::default()
        };
        let words = written(&stdp, &shifts)
            .region_words(DelayRegion::Timings)
            .unwrap();
        assert_eq!(&words[..2], &[ids::SPIKE_PAIR, ids::ADDITIVE]);
        // first table entry is exp(0) in 5.11 fixed point
        assert_eq!(words[2] & 0xFFFF, 1 << STDP_FIXED_POINT);

        let weights = &words[2 + 2 * DECAY_LUT_ENTRIES / 2..];
        // excitatory scale 2^18, inhibitory 2^15
        assert_eq!(weights[1], (0.5 * 262144.0) as u32);
        assert_eq!(weights[2], (0.01f64 * 262144.0).round() as u32);
        assert_eq!(weights[3] as i32, -((0.012f64 * 262144.0).round() as i32));
        assert_eq!(weights[5], (0.5 * 32768.0) as u32);
    }

    #[test]
    fn test_multiplicative_triplet_layout() {
        let shifts = RingBufferShifts::new([0, 0]).unwrap();
        let stdp = StdpMechanism {
            timing: triplet(),
            weight: WeightDependence::Multiplicative {
                w_min: 0.0,
                w_max: 1.0,
                a_plus: 0.5,
                a_minus: 0.25,
            },
        };
        let words = written(&stdp, &shifts)
            .region_words(DelayRegion::Timings)
            .unwrap();
        assert_eq!(&words[..2], &[ids::PFISTER_TRIPLET, ids::MULTIPLICATIVE]);
        let weights = &words[2 + 4 * DECAY_LUT_ENTRIES / 2..];
        assert_eq!(weights.len(), SynapseType::COUNT * 4);
        assert_eq!(weights[1], 1 << 15);
        // amplitudes are fractions, not scaled weights
        assert_eq!(weights[2], 1 << 14);
        assert_eq!(weights[3], 1 << 13);
    }

    #[test]
    fn test_deserializes_tagged_rules() {
        let stdp: StdpMechanism = toml::from_str(
            r#"
            [timing]
            kind = "pfister_triplet"
            tau_plus = 16.8
            tau_minus = 33.7
            tau_x = 101.0
            tau_y = 125.0

            [weight]
            kind = "multiplicative"
            w_min = 0.0
            w_max = 1.0
            a_plus = 0.5
            a_minus = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(stdp.timing, triplet());
        assert_eq!(stdp.weight.id(), ids::MULTIPLICATIVE);
        let defaulted: StdpMechanism = toml::from_str("").unwrap();
        assert_eq!(defaulted, StdpMechanism::default());
    }
}
