use proptest::prelude::*;
use spikemap_build::delay::{delay_stage, residual_delay, split_projection, DelayBlocks};
use spikemap_image::{SynapseType, SynapticList};

proptest! {
    #[test]
    fn delay_blocks_ignore_insertion_order(
        marks in prop::collection::vec((0u32..8, 0u32..70), 0..120)
    ) {
        let mut forward = DelayBlocks::new(70);
        for &(stage, source) in &marks {
            forward.set(stage, source);
        }
        let mut backward = DelayBlocks::new(70);
        for &(stage, source) in marks.iter().rev() {
            backward.set(stage, source);
        }
        prop_assert_eq!(&forward, &backward);

        let (left, right) = marks.split_at(marks.len() / 2);
        let mut halves = DelayBlocks::new(70);
        let mut other = DelayBlocks::new(70);
        left.iter().for_each(|&(s, i)| halves.set(s, i));
        right.iter().for_each(|&(s, i)| other.set(s, i));
        halves.merge(&other);
        prop_assert_eq!(&forward, &halves);
    }

    #[test]
    fn relayed_delay_reassembles(delay in 1u32..=144, m in 1u32..=16) {
        match delay_stage(delay, m) {
            None => prop_assert!(delay <= m),
            Some(stage) => {
                let residual = residual_delay(delay, stage, m);
                prop_assert!(residual >= 1 && residual <= m);
                prop_assert_eq!((stage + 1) * m + residual, delay);
            }
        }
    }

    #[test]
    fn split_keeps_every_synapse(
        synapses in prop::collection::vec((0u32..12, 0u32..12, 1u32..=120), 0..60)
    ) {
        let mut list = SynapticList::with_empty_rows(12);
        for &(pre, post, delay) in &synapses {
            list.rows_mut()[pre as usize].push(post, 0.1, delay, SynapseType::Excitatory);
        }
        let split = split_projection(&list, 16, 8, "prop").unwrap();
        prop_assert_eq!(
            split.native.n_synapses() + split.delayed.n_synapses(),
            synapses.len()
        );
        for (index, row) in split.delayed.rows().iter().enumerate() {
            if !row.is_empty() {
                let stage = index as u32 / 12;
                let source = index as u32 % 12;
                prop_assert!(split.blocks.is_set(stage, source));
            }
        }
    }
}
