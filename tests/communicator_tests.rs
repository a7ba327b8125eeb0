use mesh_particles::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
use mesh_particles::migrate_error::MigrateError;

mod util;
use util::run_ranks;

#[test]
fn rayon_round_trip() {
    let tag = CommTag(0x1000);
    let world = RayonComm::world(2);
    let (c0, c1) = (&world[0], &world[1]);

    let msg = b"hello";
    let _s = c0.isend(1, tag.base(), msg);

    let mut buf = [0u8; 5];
    let h = c1.irecv(0, tag.base(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn rayon_fifo_order() {
    let tag = CommTag(0x1001);
    let world = RayonComm::world(2);
    let (c0, c1) = (&world[0], &world[1]);

    for i in 0..10u8 {
        let _ = c0.isend(1, tag.base(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = c1.irecv(0, tag.base(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn truncation_is_ok() {
    let tag = CommTag(0x1002);
    let world = RayonComm::world(2);
    let (c0, c1) = (&world[0], &world[1]);

    let _ = c0.isend(1, tag.base(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let h = c1.irecv(0, tag.base(), &mut b);
    let got = h.wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
fn tags_do_not_cross() {
    let world = RayonComm::world(2);
    let _ = world[0].isend(1, 1, &[1]);
    let _ = world[0].isend(1, 2, &[2]);
    let mut b = [0u8; 1];
    assert_eq!(world[1].irecv(0, 2, &mut b).wait().unwrap(), vec![2]);
    assert_eq!(world[1].irecv(0, 1, &mut b).wait().unwrap(), vec![1]);
    assert_eq!(world[0].in_flight(), 0);
}

#[test]
fn all_gather_four_ranks() {
    let results = run_ranks(4, |c| c.all_gather(0x2000, &[c.rank() as u8; 2]).unwrap());
    for r in results {
        assert_eq!(r, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }
}

#[test]
fn all_gather_no_comm_is_identity() {
    assert_eq!(NoComm.all_gather(0, &[7, 8, 9]).unwrap(), vec![7, 8, 9]);
    assert_eq!(NoComm.rank(), 0);
    assert_eq!(NoComm.size(), 1);
    assert!(NoComm.is_no_comm());
}

#[test]
fn short_contribution_drains_and_fails() {
    let tag = CommTag::new(0x12);
    let world = RayonComm::world(2);
    let (c0, c1) = (&world[0], &world[1]);

    // Rank 1 contributes 3 bytes where 4 were announced.
    let _ = c1.isend(0, tag.as_u16(), &[1, 2, 3]);
    let err = c0
        .all_gather_varcount(tag.as_u16(), &[9, 9, 9, 9], &[4, 4])
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::WireLengthMismatch { peer: 1, expected: 4, got: 3 }
    ));

    // Rank 0's own contribution still went out.
    let mut r = [0u8; 4];
    assert_eq!(c1.irecv(0, tag.as_u16(), &mut r).wait().unwrap(), vec![9; 4]);
}
