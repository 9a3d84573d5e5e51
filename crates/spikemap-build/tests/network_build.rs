//! Whole-network builds through the public API

use spikemap_build::model::RecordingFlags;
use spikemap_build::stdp::{ids, StdpMechanism, TimingDependence, WeightDependence};
use spikemap_build::{
    build_images, read_back_projection, read_shifts, BuildConfig, BuildError, BuildRequest,
    Connector, ConnectorSpec, NeuronModel, Placement, Population, Projection, ValueSpec,
};
use spikemap_image::{
    CoreLocation, DelayRegion, KeyAndMask, MasterPopulationTable, PlacedSlice, PopulationRegion,
    RowFormat, SynapseType,
};

fn population(label: &str, n_neurons: u32) -> Population {
    Population {
        label: label.into(),
        n_neurons,
        model: NeuronModel::if_curr_exp(),
        recording: RecordingFlags::empty(),
    }
}

fn placement(population: usize, p: u8, lo: u32, hi: u32) -> Placement {
    Placement {
        population,
        slice: PlacedSlice::new(CoreLocation::new(0, 0, p), lo, hi).unwrap(),
        key: None,
    }
}

/// 1000 sources in four slices, all-to-all into 256 targets on one core
fn dense_request() -> BuildRequest {
    let config = BuildConfig::default();
    let spec = ConnectorSpec {
        seed: 17,
        ..ConnectorSpec::new(
            Connector::AllToAll {
                allow_self_connections: true,
            },
            ValueSpec::Uniform {
                low: 0.0,
                high: 0.006,
            },
            ValueSpec::Constant(1.0),
        )
    };
    let list = spec
        .expand(1000, 256, SynapseType::Excitatory, false, &config)
        .unwrap();
    BuildRequest {
        config,
        populations: vec![population("input", 1000), population("output", 256)],
        projections: vec![Projection {
            label: "input->output".into(),
            pre: 0,
            post: 1,
            list,
            stdp: None,
        }],
        placements: vec![
            placement(0, 1, 0, 249),
            placement(0, 2, 250, 499),
            placement(0, 3, 500, 749),
            placement(0, 4, 750, 999),
            placement(1, 5, 0, 255),
        ],
        delay_placements: Vec::new(),
    }
}

#[test]
fn dense_projection_packs_one_aligned_block_per_source_slice() {
    let request = dense_request();
    let output = build_images(&request).unwrap();
    assert_eq!(output.images.len(), 5);

    let image = output.image_for(CoreLocation::new(0, 0, 5)).unwrap();
    let table_words = image.region_words(PopulationRegion::MasterPopTable).unwrap();
    let table = MasterPopulationTable::from_words(&table_words).unwrap();
    assert_eq!(table.len(), 4);

    // 250 rows of class 256 with three header words each, then 8 bytes
    // of padding to the next 16-byte boundary
    let rows = 250 * (3 + 256) * 4;
    let block = rows + 8;
    assert_eq!(block % 16, 0);
    for entry in table.entries() {
        assert_eq!(entry.block_offset % 16, 0);
        assert_eq!(entry.row_class, 7);
    }
    let matrix = image.span(PopulationRegion::SynapticMatrix).unwrap();
    assert_eq!(matrix.size as usize, 4 * block);

    // source cores receive nothing, so their table is empty and there is no matrix
    let source = output.image_for(CoreLocation::new(0, 0, 1)).unwrap();
    assert_eq!(source.region_words(PopulationRegion::MasterPopTable).unwrap(), vec![0]);
    assert!(source.span(PopulationRegion::SynapticMatrix).is_none());
}

#[test]
fn dense_weights_read_back_within_one_quantum() {
    let request = dense_request();
    let output = build_images(&request).unwrap();
    let image = output.image_for(CoreLocation::new(0, 0, 5)).unwrap();
    let quantum = 1.0 / read_shifts(image).unwrap().weight_scale(SynapseType::Excitatory);

    let key = KeyAndMask::from_core(CoreLocation::new(0, 0, 3));
    let list = read_back_projection(image, key, 250, 0, RowFormat::Static)
        .unwrap()
        .unwrap();
    assert_eq!(list.n_rows(), 250);
    assert_eq!(list.n_synapses(), 250 * 256);

    // local row 17 of the slice starting at atom 500
    let mut expected = vec![f64::NAN; 256];
    for (target, weight, _, _) in request.projections[0].list.rows()[517].iter() {
        expected[target as usize] = weight;
    }
    for (target, weight, delay, ty) in list.rows()[17].iter() {
        let want = expected[target as usize];
        assert!((0.0..0.006).contains(&want));
        assert!((weight - want).abs() <= quantum, "{} vs {}", weight, want);
        assert_eq!(delay, 1);
        assert_eq!(ty, SynapseType::Excitatory);
    }
}

#[test]
fn builds_are_deterministic() {
    let request = dense_request();
    let a = build_images(&request).unwrap();
    let b = build_images(&request).unwrap();
    assert_eq!(a.reports(&request), b.reports(&request));
}

fn delayed_request(delay_ms: f64, with_relay: bool) -> BuildRequest {
    let config = BuildConfig::default();
    let spec = ConnectorSpec::new(
        Connector::FromList {
            connections: vec![(4, 7, 0.5, delay_ms), (1, 2, 0.25, 3.0)],
        },
        ValueSpec::Constant(0.0),
        ValueSpec::Constant(1.0),
    );
    let list = spec
        .expand(10, 10, SynapseType::Inhibitory, false, &config)
        .unwrap();
    BuildRequest {
        config,
        populations: vec![population("pre", 10), population("post", 10)],
        projections: vec![Projection {
            label: "pre->post".into(),
            pre: 0,
            post: 1,
            list,
            stdp: None,
        }],
        placements: vec![placement(0, 1, 0, 9), placement(1, 2, 0, 9)],
        delay_placements: if with_relay {
            vec![placement(0, 3, 0, 9)]
        } else {
            Vec::new()
        },
    }
}

#[test]
fn long_delay_is_relayed_in_its_stage() {
    // 3 * 16 + 2 timesteps lands in stage 2 with a residual of 2
    let request = delayed_request(50.0, true);
    let output = build_images(&request).unwrap();
    assert_eq!(output.delay_images.len(), 1);

    let relay = output.image_for(CoreLocation::new(0, 0, 3)).unwrap();
    let params = relay.region_words(DelayRegion::DelayParams).unwrap();
    let relay_key = KeyAndMask::from_core(CoreLocation::new(0, 0, 3));
    assert_eq!(params, vec![relay_key.key, 10, 3, 0, 0, 1 << 4]);

    let post = output.image_for(CoreLocation::new(0, 0, 2)).unwrap();
    let delayed = read_back_projection(post, relay_key, 30, 0, RowFormat::Static)
        .unwrap()
        .unwrap();
    let row: Vec<_> = delayed.rows()[2 * 10 + 4].iter().collect();
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].0, 7);
    assert_eq!(row[0].2, 2);
    assert_eq!(delayed.n_synapses(), 1);

    let native = read_back_projection(
        post,
        KeyAndMask::from_core(CoreLocation::new(0, 0, 1)),
        10,
        0,
        RowFormat::Static,
    )
    .unwrap()
    .unwrap();
    assert_eq!(native.n_synapses(), 1);
    assert_eq!(native.rows()[1].delays, vec![3]);
}

#[test]
fn missing_relay_names_the_failing_core() {
    let err = build_images(&delayed_request(50.0, false)).unwrap_err();
    assert_eq!(err.core(), Some(CoreLocation::new(0, 0, 2)));
    assert!(err.is_configuration());
}

#[test]
fn delay_beyond_last_stage_is_rejected() {
    // stage 8 needs a ninth relay stage
    let err = build_images(&delayed_request(16.0 * 9.0 + 1.0, true)).unwrap_err();
    assert!(matches!(
        err.root(),
        BuildError::DelayExtension {
            stages: 9,
            max_stages: 8,
            ..
        }
    ));
}

#[test]
fn slice_beyond_population_is_rejected_before_building() {
    let mut request = dense_request();
    request.placements[4] = placement(1, 5, 0, 300);
    let err = build_images(&request).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.core(), None);
}

#[test]
fn weight_just_below_a_power_of_two_packs_without_overflow() {
    let config = BuildConfig::default();
    let list = ConnectorSpec::new(
        Connector::FromList {
            connections: vec![(0, 0, 1.99999, 1.0)],
        },
        ValueSpec::Constant(0.0),
        ValueSpec::Constant(1.0),
    )
    .expand(2, 2, SynapseType::Excitatory, false, &config)
    .unwrap();
    let request = BuildRequest {
        config,
        populations: vec![population("pre", 2), population("post", 2)],
        projections: vec![Projection {
            label: "pre->post".into(),
            pre: 0,
            post: 1,
            list,
            stdp: None,
        }],
        placements: vec![placement(0, 1, 0, 1), placement(1, 2, 0, 1)],
        delay_placements: Vec::new(),
    };
    let output = build_images(&request).unwrap();
    let post = output.image_for(CoreLocation::new(0, 0, 2)).unwrap();
    let shifts = read_shifts(post).unwrap();
    assert_eq!(shifts.shift(SynapseType::Excitatory), 1);

    let quantum = 1.0 / shifts.weight_scale(SynapseType::Excitatory);
    let key = KeyAndMask::from_core(CoreLocation::new(0, 0, 1));
    let list = read_back_projection(post, key, 2, 0, RowFormat::Static)
        .unwrap()
        .unwrap();
    let (_, weight, _, _) = list.rows()[0].iter().next().unwrap();
    assert!((weight - 1.99999).abs() <= quantum);
}

fn plastic_request(first: StdpMechanism, second: StdpMechanism) -> BuildRequest {
    let config = BuildConfig::default();
    let expand = |weight| {
        ConnectorSpec::new(
            Connector::OneToOne,
            ValueSpec::Constant(weight),
            ValueSpec::Constant(1.0),
        )
        .expand(4, 4, SynapseType::Excitatory, false, &config)
        .unwrap()
    };
    let projections = vec![
        Projection {
            label: "a->post".into(),
            pre: 0,
            post: 2,
            list: expand(0.5),
            stdp: Some(first),
        },
        Projection {
            label: "b->post".into(),
            pre: 1,
            post: 2,
            list: expand(0.25),
            stdp: Some(second),
        },
    ];
    BuildRequest {
        config,
        populations: vec![population("a", 4), population("b", 4), population("post", 4)],
        projections,
        placements: vec![
            placement(0, 1, 0, 3),
            placement(1, 2, 0, 3),
            placement(2, 3, 0, 3),
        ],
        delay_placements: Vec::new(),
    }
}

fn triplet_multiplicative() -> StdpMechanism {
    StdpMechanism {
        timing: TimingDependence::PfisterTriplet {
            tau_plus: 16.8,
            tau_minus: 33.7,
            tau_x: 101.0,
            tau_y: 125.0,
        },
        weight: WeightDependence::Multiplicative {
            w_min: 0.0,
            w_max: 1.0,
            a_plus: 0.005,
            a_minus: 0.006,
        },
    }
}

#[test]
fn shared_plasticity_rule_sizes_the_stdp_region() {
    let request = plastic_request(triplet_multiplicative(), triplet_multiplicative());
    let output = build_images(&request).unwrap();
    let post = output.image_for(CoreLocation::new(0, 0, 3)).unwrap();
    let region = post.region_words(PopulationRegion::StdpParams).unwrap();
    assert_eq!(region.len() * 4, triplet_multiplicative().region_bytes());
    assert_eq!(&region[..2], &[ids::PFISTER_TRIPLET, ids::MULTIPLICATIVE]);
}

#[test]
fn differing_plasticity_rules_on_one_slice_are_rejected() {
    let err = build_images(&plastic_request(StdpMechanism::default(), triplet_multiplicative()))
        .unwrap_err();
    assert!(err.to_string().contains("b->post.stdp"), "{}", err);
    assert_eq!(err.core(), Some(CoreLocation::new(0, 0, 3)));
}
