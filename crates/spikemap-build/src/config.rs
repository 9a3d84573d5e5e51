//! Build configuration

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Machine-wide settings shared by every core image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Simulation time step in microseconds
    pub machine_time_step_us: u32,
    /// Slow-down factor applied to real time
    pub timescale_factor: u32,
    /// Simulated run length in milliseconds
    pub run_time_ms: f64,
    /// Expected presynaptic firing rate used by the ring-buffer scaler
    pub spikes_per_second: f64,
    /// Standard deviations of headroom in the ring-buffer estimate
    pub ring_buffer_sigma: f64,
    /// Local memory of one core in bytes
    pub core_memory_bytes: usize,
    /// Pointer-table slots per image
    pub max_regions: usize,
    /// Longest delay (timesteps) a neuron core handles natively
    pub max_delay_per_neuron: u32,
    /// Stages a delay-extension core can relay
    pub max_delay_stages: u32,
    /// Size of the protocol sequence-number space
    pub n_sequences: u32,
    /// Largest payload of one sequenced-data message
    pub max_packet_bytes: usize,
    /// Profiler samples to reserve per core
    pub profiler_samples: u32,
    /// Cap on each recording region, `None` to size for the whole run
    pub recording_buffer_bytes: Option<usize>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            machine_time_step_us: 1000,
            timescale_factor: 1,
            run_time_ms: 1000.0,
            spikes_per_second: 30.0,
            ring_buffer_sigma: 5.0,
            core_memory_bytes: 8 * 1024 * 1024,
            max_regions: spikemap_image::regions::DEFAULT_MAX_REGIONS,
            max_delay_per_neuron: 16,
            max_delay_stages: 8,
            n_sequences: 256,
            max_packet_bytes: 256,
            profiler_samples: 0,
            recording_buffer_bytes: None,
        }
    }
}

impl BuildConfig {
    /// Time step in milliseconds
    pub fn timestep_ms(&self) -> f64 {
        self.machine_time_step_us as f64 / 1000.0
    }

    /// Number of timesteps in the run, rounded up
    pub fn run_ticks(&self) -> u32 {
        (self.run_time_ms * 1000.0 / self.machine_time_step_us as f64).ceil() as u32
    }

    /// Convert a delay in milliseconds to whole timesteps, at least one
    pub fn delay_ticks(&self, delay_ms: f64) -> u32 {
        ((delay_ms / self.timestep_ms()).round() as u32).max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.machine_time_step_us == 0 {
            return Err(BuildError::configuration("machine_time_step_us", "must be > 0"));
        }
        if self.timescale_factor == 0 {
            return Err(BuildError::configuration("timescale_factor", "must be > 0"));
        }
        if !(self.run_time_ms.is_finite() && self.run_time_ms > 0.0) {
            return Err(BuildError::configuration("run_time_ms", "must be a positive number"));
        }
        if !(self.spikes_per_second.is_finite() && self.spikes_per_second >= 0.0) {
            return Err(BuildError::configuration("spikes_per_second", "must be >= 0"));
        }
        if !(self.ring_buffer_sigma.is_finite() && self.ring_buffer_sigma >= 0.0) {
            return Err(BuildError::configuration("ring_buffer_sigma", "must be >= 0"));
        }
        if self.max_regions < spikemap_image::PopulationRegion::ALL.len() {
            return Err(BuildError::configuration(
                "max_regions",
                format!("must be at least {}", spikemap_image::PopulationRegion::ALL.len()),
            ));
        }
        if self.max_delay_per_neuron == 0
            || self.max_delay_per_neuron > spikemap_image::row_io::MAX_NATIVE_DELAY
        {
            return Err(BuildError::configuration(
                "max_delay_per_neuron",
                format!("must be in 1..={}", spikemap_image::row_io::MAX_NATIVE_DELAY),
            ));
        }
        if self.n_sequences == 0 || self.n_sequences > 256 {
            return Err(BuildError::configuration("n_sequences", "must be in 1..=256"));
        }
        if self.max_packet_bytes < 16 {
            return Err(BuildError::configuration("max_packet_bytes", "must be >= 16"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = BuildConfig::default();
        config.validate().unwrap();
        assert_eq!(config.run_ticks(), 1000);
        assert_eq!(config.timestep_ms(), 1.0);
    }

    #[test]
    fn test_delay_ticks() {
        let config = BuildConfig {
            machine_time_step_us: 100,
            ..Default::default()
        };
        assert_eq!(config.delay_ticks(1.0), 10);
        assert_eq!(config.delay_ticks(0.0), 1);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = BuildConfig::default();
        config.machine_time_step_us = 0;
        assert!(config.validate().is_err());

        let mut config = BuildConfig::default();
        config.max_delay_per_neuron = 17;
        assert!(config.validate().is_err());

        let mut config = BuildConfig::default();
        config.max_regions = 4;
        assert!(config.validate().is_err());
    }
}
