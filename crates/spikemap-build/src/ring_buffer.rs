//! Ring-buffer weight scaling
//!
//! The firmware accumulates incoming weights into 16-bit unsigned ring
//! buffer entries. Entry `r` with shift `s` contributes `r << s` to an S1615
//! input (a right shift when `s` is negative), so the largest accumulated
//! value is just under `2^(s + 1)`. The shift is chosen from a statistical
//! estimate of the largest input one neuron sees in one timestep.

use spikemap_image::{SynapseType, SynapticList};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Smallest shift the firmware supports
pub const MIN_RING_BUFFER_SHIFT: i32 = -16;
/// Largest shift the firmware supports
pub const MAX_RING_BUFFER_SHIFT: i32 = 15;

/// Fractional bits of the S1615 input the ring buffer feeds
const INPUT_FRAC_BITS: i32 = 15;

/// Weight statistics of one synapse type over the synapses entering a slice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightStatistics {
    /// Number of synapses
    pub n_synapses: usize,
    /// Largest number of synapses into any one neuron
    pub max_fan_in: usize,
    /// Mean weight magnitude
    pub mean_weight: f64,
    /// Mean squared weight
    pub mean_squared_weight: f64,
    /// Largest weight magnitude
    pub max_weight: f64,
}

impl WeightStatistics {
    /// Gather statistics of `synapse_type` over `lists`, counting fan-in
    /// per postsynaptic atom in `post_lo..post_lo + n_post`
    pub fn collect<'a>(
        lists: impl IntoIterator<Item = &'a SynapticList>,
        synapse_type: SynapseType,
        post_lo: u32,
        n_post: u32,
    ) -> Self {
        let mut fan_in = vec![0usize; n_post as usize];
        let mut n = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut max_weight: f64 = 0.0;

        for list in lists {
            for row in list.rows() {
                for (target, weight, _, ty) in row.iter() {
                    if ty != synapse_type {
                        continue;
                    }
                    if let Some(count) = target
                        .checked_sub(post_lo)
                        .and_then(|i| fan_in.get_mut(i as usize))
                    {
                        *count += 1;
                    }
                    let w = weight.abs();
                    n += 1;
                    sum += w;
                    sum_sq += w * w;
                    max_weight = max_weight.max(w);
                }
            }
        }

        if n == 0 {
            return Self::default();
        }
        Self {
            n_synapses: n,
            max_fan_in: fan_in.into_iter().max().unwrap_or(0),
            mean_weight: sum / n as f64,
            mean_squared_weight: sum_sq / n as f64,
            max_weight,
        }
    }

    /// Estimated largest input to one neuron in one timestep
    pub fn max_input_estimate(&self, spikes_per_timestep: f64, sigma: f64) -> f64 {
        let expected = spikes_per_timestep * self.max_fan_in as f64;
        let mean = expected * self.mean_weight;
        let spread = sigma * (expected * self.mean_squared_weight).sqrt();
        (mean + spread).max(self.max_weight)
    }
}

/// Shift that keeps `estimate` representable
pub fn shift_for_estimate(estimate: f64) -> i32 {
    if estimate.is_nan() || estimate <= 0.0 {
        return 0;
    }
    let log = estimate.log2();
    let mut shift = log.ceil() as i32 - 1;
    if log.fract() == 0.0 {
        shift += 1;
    }
    shift
}

/// Raise `shift` until `max_weight` packs into a 16-bit ring-buffer entry
/// after rounding
pub fn fit_max_weight(mut shift: i32, max_weight: f64) -> i32 {
    while shift < MAX_RING_BUFFER_SHIFT
        && (max_weight * weight_scale(shift)).round() > f64::from(u16::MAX)
    {
        shift += 1;
    }
    shift
}

/// Multiplier from model weight to ring-buffer integer for a shift
pub fn weight_scale(shift: i32) -> f64 {
    2f64.powi(INPUT_FRAC_BITS - shift)
}

/// Per synapse type shifts and the weight scales derived from them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingBufferShifts {
    shifts: [i32; SynapseType::COUNT],
}

impl Default for RingBufferShifts {
    fn default() -> Self {
        Self {
            shifts: [0; SynapseType::COUNT],
        }
    }
}

impl RingBufferShifts {
    /// Use explicit shifts, checking the supported range
    pub fn new(shifts: [i32; SynapseType::COUNT]) -> Result<Self> {
        for (ty, &shift) in SynapseType::ALL.iter().zip(&shifts) {
            if !(MIN_RING_BUFFER_SHIFT..=MAX_RING_BUFFER_SHIFT).contains(&shift) {
                return Err(BuildError::configuration(
                    format!("ring_buffer_shift.{}", ty),
                    format!(
                        "shift {} outside {}..={}",
                        shift, MIN_RING_BUFFER_SHIFT, MAX_RING_BUFFER_SHIFT
                    ),
                ));
            }
        }
        Ok(Self { shifts })
    }

    /// Compute shifts for the synapses entering a slice
    pub fn compute<'a>(
        lists: impl IntoIterator<Item = &'a SynapticList> + Clone,
        post_lo: u32,
        n_post: u32,
        config: &BuildConfig,
    ) -> Result<Self> {
        let spikes_per_timestep =
            config.spikes_per_second * config.machine_time_step_us as f64 / 1e6;
        let mut shifts = [0; SynapseType::COUNT];
        for ty in SynapseType::ALL {
            let stats = WeightStatistics::collect(lists.clone(), ty, post_lo, n_post);
            if stats.n_synapses == 0 {
                continue;
            }
            let estimate = stats.max_input_estimate(spikes_per_timestep, config.ring_buffer_sigma);
            shifts[ty.index()] = fit_max_weight(shift_for_estimate(estimate), stats.max_weight);
            log::debug!(
                "{} ring buffer: fan-in {}, estimate {:.6}, shift {}",
                ty,
                stats.max_fan_in,
                estimate,
                shifts[ty.index()]
            );
        }
        Self::new(shifts)
    }

    /// Shift of one synapse type
    pub fn shift(&self, synapse_type: SynapseType) -> i32 {
        self.shifts[synapse_type.index()]
    }

    /// All shifts in type order
    pub fn shifts(&self) -> [i32; SynapseType::COUNT] {
        self.shifts
    }

    /// Weight scale of one synapse type
    pub fn weight_scale(&self, synapse_type: SynapseType) -> f64 {
        weight_scale(self.shift(synapse_type))
    }

    /// Weight scales in type order, as used by the row packers
    pub fn weight_scales(&self) -> [f64; SynapseType::COUNT] {
        let mut scales = [0.0; SynapseType::COUNT];
        for ty in SynapseType::ALL {
            scales[ty.index()] = self.weight_scale(ty);
        }
        scales
    }

    /// Direction and magnitude words per type: 0 for a left shift, 1 otherwise
    pub fn header_words(&self) -> ([u32; SynapseType::COUNT], [u32; SynapseType::COUNT]) {
        let mut directions = [0; SynapseType::COUNT];
        let mut magnitudes = [0; SynapseType::COUNT];
        for (i, &s) in self.shifts.iter().enumerate() {
            directions[i] = if s > 0 { 0 } else { 1 };
            magnitudes[i] = s.unsigned_abs();
        }
        (directions, magnitudes)
    }

    /// Inverse of [`RingBufferShifts::header_words`]
    pub fn from_header_words(directions: &[u32], magnitudes: &[u32]) -> Result<Self> {
        let mut shifts = [0; SynapseType::COUNT];
        for i in 0..SynapseType::COUNT {
            let (dir, mag) = match (directions.get(i), magnitudes.get(i)) {
                (Some(&d), Some(&m)) => (d, m as i32),
                _ => {
                    return Err(BuildError::configuration(
                        "ring_buffer_shift",
                        "header truncated",
                    ))
                }
            };
            shifts[i] = if dir == 0 { mag } else { -mag };
        }
        Self::new(shifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemap_image::SynapticRow;

    #[test]
    fn test_shift_for_estimate() {
        assert_eq!(shift_for_estimate(0.0), 0);
        assert_eq!(shift_for_estimate(0.185), -3);
        assert_eq!(shift_for_estimate(3.0), 1);
        // exact power of two gets one bit of margin
        assert_eq!(shift_for_estimate(4.0), 2);
        assert_eq!(shift_for_estimate(1.0), 0);
    }

    #[test]
    fn test_representable_after_shift() {
        for estimate in [0.001, 0.3, 1.7, 16.0, 1000.0] {
            let s = shift_for_estimate(estimate);
            assert!(estimate < 2f64.powi(s + 1), "estimate {} shift {}", estimate, s);
        }
    }

    #[test]
    fn test_no_synapses_gives_zero_shift() {
        let lists = vec![SynapticList::with_empty_rows(4)];
        let shifts =
            RingBufferShifts::compute(lists.iter(), 0, 4, &BuildConfig::default()).unwrap();
        assert_eq!(shifts.shifts(), [0, 0]);
        assert_eq!(shifts.weight_scale(SynapseType::Excitatory), 32768.0);
    }

    #[test]
    fn test_out_of_range_is_configuration_error() {
        let mut row = SynapticRow::new();
        row.push(0, 1e6, 1, SynapseType::Inhibitory);
        let lists = vec![SynapticList::new(vec![row])];
        let err =
            RingBufferShifts::compute(lists.iter(), 0, 1, &BuildConfig::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_weight_just_below_power_of_two_still_packs() {
        // 1.99999 alone gives shift 0, where it rounds to 65536
        assert_eq!(shift_for_estimate(1.99999), 0);
        let mut row = SynapticRow::new();
        row.push(0, 1.99999, 1, SynapseType::Excitatory);
        let lists = vec![SynapticList::new(vec![row])];
        let config = BuildConfig {
            spikes_per_second: 0.0,
            ..BuildConfig::default()
        };
        let shifts = RingBufferShifts::compute(lists.iter(), 0, 1, &config).unwrap();
        let s = shifts.shift(SynapseType::Excitatory);
        assert_eq!(s, 1);
        let packed = (1.99999 * shifts.weight_scale(SynapseType::Excitatory)).round();
        assert!(packed <= f64::from(u16::MAX));
    }

    #[test]
    fn test_fit_max_weight_keeps_fitting_shift() {
        assert_eq!(fit_max_weight(-3, 0.1), -3);
        assert_eq!(fit_max_weight(0, 1.99999), 1);
        assert_eq!(fit_max_weight(MAX_RING_BUFFER_SHIFT, 1e9), MAX_RING_BUFFER_SHIFT);
    }

    #[test]
    fn test_header_words() {
        let shifts = RingBufferShifts::new([-3, 2]).unwrap();
        let (dirs, mags) = shifts.header_words();
        assert_eq!(dirs, [1, 0]);
        assert_eq!(mags, [3, 2]);
        assert_eq!(RingBufferShifts::from_header_words(&dirs, &mags).unwrap(), shifts);
    }
}
