use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use mesh_particles::algs::communicator::{CommTag, Communicator, RayonComm, Wait};
use mesh_particles::algs::migration::gid_update::SendListEntry;
use mesh_particles::algs::migration::plan_exchange::GlobalSendTable;
use mesh_particles::algs::migration::send_list::{SendPlan, SendPlanTuple};
use mesh_particles::algs::migration::transport::TransportEngine;
use mesh_particles::algs::wire::{ParticleWireRecord, cast_slice};
use mesh_particles::config::SortPolicy;
use mesh_particles::data::particles::Particle;
use mesh_particles::migrate_error::MigrateError;

mod util;
use util::{gid, store_of, unit_grid};

#[derive(Clone)]
struct DummySendHandle {
    waited: Arc<AtomicBool>,
}

impl Wait for DummySendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        self.waited.store(true, Ordering::SeqCst);
        None
    }
}

#[derive(Clone)]
struct DummyRecvHandle {
    waited: Arc<AtomicBool>,
    resp: Option<Vec<u8>>,
}

impl Wait for DummyRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        self.waited.store(true, Ordering::SeqCst);
        self.resp
    }
}

/// Rank 0 of a 3-rank world whose peers answer from a fixed table.
struct DummyComm {
    responses: HashMap<usize, Option<Vec<u8>>>,
    sent: Mutex<Vec<(usize, Vec<u8>)>>,
    send_flags: Mutex<Vec<Arc<AtomicBool>>>,
    recv_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl DummyComm {
    fn new(responses: HashMap<usize, Option<Vec<u8>>>) -> Self {
        Self {
            responses,
            sent: Mutex::new(Vec::new()),
            send_flags: Mutex::new(Vec::new()),
            recv_flags: Mutex::new(Vec::new()),
        }
    }

    fn all_waited(flags: &Mutex<Vec<Arc<AtomicBool>>>) -> bool {
        flags
            .lock()
            .unwrap()
            .iter()
            .all(|f| f.load(Ordering::SeqCst))
    }
}

impl Communicator for DummyComm {
    type SendHandle = DummySendHandle;
    type RecvHandle = DummyRecvHandle;

    fn isend(&self, peer: usize, _tag: u16, buf: &[u8]) -> Self::SendHandle {
        let flag = Arc::new(AtomicBool::new(false));
        self.send_flags.lock().unwrap().push(flag.clone());
        self.sent.lock().unwrap().push((peer, buf.to_vec()));
        DummySendHandle { waited: flag }
    }

    fn irecv(&self, peer: usize, _tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        let flag = Arc::new(AtomicBool::new(false));
        self.recv_flags.lock().unwrap().push(flag.clone());
        let resp = self.responses.get(&peer).cloned().unwrap_or(None);
        DummyRecvHandle { waited: flag, resp }
    }

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        3
    }
}

fn records(n: usize, dest: u32) -> Vec<u8> {
    let r: Vec<_> = (0..n)
        .map(|i| ParticleWireRecord::new(gid(dest), [i as f64; 3], [1.0; 3]))
        .collect();
    cast_slice(&r).to_vec()
}

fn inbound_table() -> GlobalSendTable {
    GlobalSendTable::from_rank_runs(&[
        vec![],
        vec![SendPlanTuple {
            src_rank: 1,
            dest_rank: 0,
            count: 2,
        }],
        vec![SendPlanTuple {
            src_rank: 2,
            dest_rank: 0,
            count: 1,
        }],
    ])
}

#[test]
fn drop_drains_outstanding_requests() {
    let comm = DummyComm::new(HashMap::new());
    let store = store_of(&[
        Particle::new([0.1; 3], [0.0; 3], gid(0)),
        Particle::new([0.2; 3], [0.0; 3], gid(0)),
    ]);
    let plan = SendPlan::build(
        0,
        vec![
            SendListEntry {
                particle: 1,
                dest_gid: gid(7),
                dest_rank: 2,
            },
            SendListEntry {
                particle: 0,
                dest_gid: gid(4),
                dest_rank: 1,
            },
        ],
        SortPolicy::Stable,
    );
    {
        let mut engine = TransportEngine::new(&comm, CommTag::new(5));
        assert_eq!(engine.post_receives(&inbound_table()).unwrap(), 3);
        assert_eq!(engine.pack_and_send(&plan, &store).unwrap(), 2);
        assert_eq!(engine.pending(), 4);
    }
    assert!(DummyComm::all_waited(&comm.send_flags));
    assert!(DummyComm::all_waited(&comm.recv_flags));

    // one send per run, in run order, each carrying its own slice
    let sent = comm.sent.lock().unwrap();
    let peers: Vec<usize> = sent.iter().map(|(p, _)| *p).collect();
    assert_eq!(peers, vec![1, 2]);
    assert!(sent.iter().all(|(_, b)| b.len() == ParticleWireRecord::SIZE));
}

#[test]
fn wait_sends_completes_every_run() {
    let comm = DummyComm::new(HashMap::new());
    let store = store_of(&[
        Particle::new([0.1; 3], [0.0; 3], gid(0)),
        Particle::new([0.2; 3], [0.0; 3], gid(0)),
    ]);
    let plan = SendPlan::build(
        0,
        vec![
            SendListEntry {
                particle: 0,
                dest_gid: gid(4),
                dest_rank: 1,
            },
            SendListEntry {
                particle: 1,
                dest_gid: gid(7),
                dest_rank: 2,
            },
        ],
        SortPolicy::Stable,
    );
    let mut engine = TransportEngine::new(&comm, CommTag::new(5));
    engine.pack_and_send(&plan, &store).unwrap();
    assert_eq!(engine.wait_sends(), 2);
    assert_eq!(engine.pending(), 0);
    assert!(DummyComm::all_waited(&comm.send_flags));
    assert_eq!(engine.wait_sends(), 0);
}

#[test]
fn short_payload_drains_every_receive() {
    let mut responses = HashMap::new();
    responses.insert(1, Some(records(1, 0))); // two were planned
    responses.insert(2, Some(records(1, 0)));
    let comm = DummyComm::new(responses);

    let mut engine = TransportEngine::new(&comm, CommTag::new(5));
    engine.post_receives(&inbound_table()).unwrap();
    let err = engine.wait_receives().unwrap_err();
    assert!(matches!(
        err,
        MigrateError::WireLengthMismatch { peer: 1, .. }
    ));
    assert!(DummyComm::all_waited(&comm.recv_flags));
    assert_eq!(engine.pending(), 0);
}

#[test]
fn unpack_appends_in_slice_order() {
    let mut responses = HashMap::new();
    responses.insert(1, Some(records(2, 0)));
    responses.insert(2, Some(records(1, 1)));
    let comm = DummyComm::new(responses);
    let blocks = unit_grid([2, 1, 1], [true; 3], 1).local_blocks(0).unwrap();
    let mut store = store_of(&[]);

    let mut engine = TransportEngine::new(&comm, CommTag::new(5));
    engine.post_receives(&inbound_table()).unwrap();
    assert_eq!(engine.wait_receives().unwrap(), 3);
    assert_eq!(engine.unpack(&mut store, &blocks).unwrap(), 3);
    let gids: Vec<u32> = store.gids().iter().map(|g| g.get()).collect();
    assert_eq!(gids, vec![0, 0, 1]);
    assert_eq!(store.positions()[1], [1.0; 3]);
    assert_eq!(store.block_count(gid(0)), 2);
}

#[test]
fn foreign_destination_leaves_store_untouched() {
    let mut responses = HashMap::new();
    responses.insert(1, Some(records(2, 0)));
    responses.insert(2, Some(records(1, 9)));
    let comm = DummyComm::new(responses);
    let blocks = unit_grid([2, 1, 1], [true; 3], 1).local_blocks(0).unwrap();
    let mut store = store_of(&[]);

    let mut engine = TransportEngine::new(&comm, CommTag::new(5));
    engine.post_receives(&inbound_table()).unwrap();
    engine.wait_receives().unwrap();
    let err = engine.unpack(&mut store, &blocks).unwrap_err();
    assert!(matches!(err, MigrateError::ForeignDestination { block } if block == gid(9)));
    assert!(store.is_empty());
}

#[test]
fn oversized_payload_is_rejected_not_truncated() {
    let world = RayonComm::world(2);
    let table = GlobalSendTable::from_rank_runs(&[
        vec![],
        vec![SendPlanTuple {
            src_rank: 1,
            dest_rank: 0,
            count: 1,
        }],
    ]);
    // rank 1 sends two records where the table announced one
    world[1].isend(0, 5, &records(2, 0));

    let mut engine = TransportEngine::new(&world[0], CommTag::new(5));
    assert_eq!(engine.post_receives(&table).unwrap(), 1);
    let err = engine.wait_receives().unwrap_err();
    assert!(matches!(
        err,
        MigrateError::WireLengthMismatch { peer: 1, expected, got }
            if expected == ParticleWireRecord::SIZE && got == 2 * ParticleWireRecord::SIZE
    ));
    assert_eq!(engine.pending(), 0);
    assert_eq!(world[0].in_flight(), 0);
}
