use proptest::prelude::*;
use spikemap_buffers::region::SendRegion;
use spikemap_buffers::{EventPacket, LoopbackMachine, Message, SendBuffer};
use spikemap_image::regions::DEFAULT_MAX_REGIONS;
use spikemap_image::{CoreLocation, ImageBuffer, PopulationRegion, RegionPlanner};

fn primed_region(packets: &[EventPacket], size: usize) -> Option<(LoopbackMachine, SendRegion)> {
    let core = CoreLocation::new(0, 0, 1);
    let mut planner = RegionPlanner::new(1 << 16, DEFAULT_MAX_REGIONS);
    planner.reserve(PopulationRegion::SpikeHistory, size).ok()?;
    let image = ImageBuffer::new(planner.finish()).into_image(core);
    let machine = LoopbackMachine::new();
    machine.load_image(&image);
    let mut region = SendRegion::new(
        core,
        PopulationRegion::SpikeHistory as u8,
        size,
        SendBuffer::new(packets.to_vec()),
        256,
    );
    region.prime(&machine).ok()?;
    Some((machine, region))
}

fn packets() -> impl Strategy<Value = Vec<EventPacket>> {
    prop::collection::vec(
        (0u32..1000, prop::collection::vec(any::<u32>(), 1..40)),
        1..60,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .map(|(timestamp, keys)| EventPacket { timestamp, keys })
            .collect()
    })
}

proptest! {
    #[test]
    fn streamed_packets_arrive_complete_and_in_order(
        packets in packets(),
        spaces in prop::collection::vec(0u32..600, 1..200),
    ) {
        let Some((_machine, mut region)) = primed_region(&packets, 512) else {
            return Ok(());
        };
        let primed = packets.len() - region.pending();
        let mut delivered: Vec<EventPacket> = packets[..primed].to_vec();

        for space in spaces.iter().copied().chain(std::iter::repeat(600).take(packets.len() + 2)) {
            let replies = region.fill(space as usize, 256).unwrap();
            let used: usize = replies.iter().map(Message::encoded_len).sum();
            prop_assert!(used <= space as usize);
            for reply in replies {
                if let Message::HostSendSequencedData { payload, .. } = reply {
                    prop_assert!(payload.len() <= 256);
                    if payload != Message::EventStop.encode() {
                        delivered.extend(EventPacket::decode_all(&payload).unwrap());
                    }
                }
            }
        }
        prop_assert_eq!(delivered, packets);
    }
}
