use mesh_particles::algs::communicator::CommTag;
use mesh_particles::algs::wire::{
    ParticleWireRecord, WireSendPlan, cast_slice, decode_records, expect_exact_len,
};
use mesh_particles::topology::block::BlockId;

#[test]
fn commtag_offset_wrap() {
    let t = CommTag::new(u16::MAX).offset(1);
    assert_eq!(t.as_u16(), 0);
}

#[test]
fn payload_is_count_times_record_size() {
    let records = vec![ParticleWireRecord::new(BlockId::new(3), [0.0; 3], [0.0; 3]); 5];
    assert_eq!(cast_slice(&records).len(), 5 * ParticleWireRecord::SIZE);
}

#[test]
fn decode_ignores_alignment() {
    let plans = [
        WireSendPlan::new(0, 2, 17).unwrap(),
        WireSendPlan::new(0, 5, 1).unwrap(),
    ];
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(cast_slice(&plans));
    let decoded: Vec<WireSendPlan> = decode_records(1, &bytes[1..]).unwrap();
    let tuples: Vec<_> = decoded.iter().map(WireSendPlan::decode).collect();
    assert_eq!(tuples, vec![(0, 2, 17), (0, 5, 1)]);
}

#[test]
fn expect_exact_len_err() {
    assert!(expect_exact_len(0, 3, 4).is_err());
    assert!(expect_exact_len(0, 4, 4).is_ok());
}
