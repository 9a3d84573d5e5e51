//! Recording region sizing

use crate::model::RecordingFlags;

/// Bytes of the counter word at the start of each recording region
const RECORDING_COUNTER_BYTES: usize = 4;

/// Sizes of the three recording regions of one slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingSizes {
    /// Spike history bytes
    pub spikes: usize,
    /// Membrane potential history bytes
    pub potential: usize,
    /// Synaptic input history bytes
    pub gsyn: usize,
}

impl RecordingSizes {
    /// Size the regions for `n_atoms` over `run_ticks`, capped at `cap` bytes each
    pub fn compute(
        n_atoms: u32,
        run_ticks: u32,
        flags: RecordingFlags,
        cap: Option<usize>,
    ) -> Self {
        let n = n_atoms as usize;
        let ticks = run_ticks as usize;
        let size = |enabled: bool, words_per_tick: usize| {
            if !enabled {
                return 0;
            }
            let full = RECORDING_COUNTER_BYTES + words_per_tick * 4 * ticks;
            match cap {
                Some(cap) => full.min(cap.max(RECORDING_COUNTER_BYTES)),
                None => full,
            }
        };
        Self {
            spikes: size(flags.contains(RecordingFlags::SPIKES), (n + 31) / 32),
            potential: size(flags.contains(RecordingFlags::POTENTIAL), n),
            gsyn: size(flags.contains(RecordingFlags::GSYN), 2 * n),
        }
    }
}
