//! Property checks for fixed-point encoding and row packing

use proptest::prelude::*;
use spikemap_image::regions::header_size;
use spikemap_image::row_io::MAX_NATIVE_DELAY;
use spikemap_image::{
    row_length_class, FixedPointFormat, PopulationRegion, Region, RegionPlanner, RowFormat,
    SynapseType, SynapticRow, ROW_LENGTHS,
};

proptest! {
    #[test]
    fn s1615_error_within_half_step(value in -65535.0f64..65535.0) {
        let f = FixedPointFormat::S1615;
        let decoded = f.decode(f.encode(value).unwrap());
        prop_assert!((decoded - value).abs() <= f.resolution() / 2.0 + 1e-12);
    }

    #[test]
    fn u032_accepts_unit_interval(value in 0.0f64..0.999_999) {
        let f = FixedPointFormat::U032;
        let decoded = f.decode(f.encode(value).unwrap());
        prop_assert!((decoded - value).abs() <= f.resolution());
    }

    #[test]
    fn values_beyond_range_are_rejected(excess in 1.0f64..1e9) {
        let f = FixedPointFormat::S1615;
        prop_assert!(f.encode(f.max_value() + excess).is_err());
        prop_assert!(f.encode(f.min_value() - excess).is_err());
    }

    #[test]
    fn row_class_is_smallest_fit(n in 0usize..=256) {
        let class = row_length_class(n).unwrap() as usize;
        prop_assert!(ROW_LENGTHS[class] as usize >= n);
        if class > 0 {
            prop_assert!((ROW_LENGTHS[class - 1] as usize) < n);
        }
    }

    #[test]
    fn packed_rows_keep_targets_and_delays(
        synapses in prop::collection::vec((0u32..256, 1u32..=MAX_NATIVE_DELAY, any::<bool>(), 1u32..1000), 0..64),
        plastic in any::<bool>(),
    ) {
        let mut row = SynapticRow::new();
        for &(index, delay, inhibitory, w) in &synapses {
            let ty = if inhibitory { SynapseType::Inhibitory } else { SynapseType::Excitatory };
            row.push(512 + index, w as f64 / 64.0, delay, ty);
        }
        let scales = [64.0, 64.0];
        let padded = ROW_LENGTHS[row_length_class(row.len()).unwrap() as usize] as usize;
        let io = if plastic { RowFormat::Plastic.io() } else { RowFormat::Static.io() };

        let words = io.encode_row(&row, 512, &scales, padded).unwrap();
        prop_assert_eq!(words.len(), io.row_words(padded));
        let decoded = io.decode_row(&words, 512, &scales).unwrap();
        prop_assert_eq!(decoded, row);
    }

    #[test]
    fn planned_regions_are_aligned_and_disjoint(
        sizes in prop::collection::vec(prop_oneof![Just(0usize), 1usize..5000], PopulationRegion::ALL.len()),
    ) {
        let max_regions = PopulationRegion::ALL.len();
        let capacity = 1 << 20;
        let mut planner = RegionPlanner::new(capacity, max_regions);
        for (&region, &size) in PopulationRegion::ALL.iter().zip(&sizes) {
            planner.reserve(region, size).unwrap();
        }
        let layout = planner.finish();

        let kept: Vec<(PopulationRegion, usize)> = PopulationRegion::ALL
            .iter()
            .copied()
            .zip(sizes.iter().copied())
            .filter(|&(_, size)| size > 0)
            .collect();
        prop_assert_eq!(layout.spans().len(), kept.len());

        let mut end = header_size(max_regions);
        for (span, &(region, size)) in layout.spans().iter().zip(&kept) {
            prop_assert_eq!(span.index, region.index());
            prop_assert_eq!(span.offset as usize, end);
            prop_assert_eq!(span.offset % 4, 0);
            prop_assert_eq!(span.size % 4, 0);
            prop_assert!(span.size as usize >= size && (span.size as usize) < size + 4);
            end = span.range().end;
        }
        prop_assert_eq!(layout.total_size(), end);
        prop_assert!(layout.total_size() <= capacity);
    }
}
