#![allow(dead_code)]
use mesh_particles::{
    algs::communicator::RayonComm,
    data::particles::{Particle, ParticleStore},
    topology::block::{BlockBounds, BlockId},
    topology::grid::BlockGrid,
};

pub fn gid(g: u32) -> BlockId {
    BlockId::new(g)
}

/// Unit-sized blocks: the mesh spans `[0, n1] × [0, n2] × [0, n3]`.
pub fn unit_grid(nblocks: [usize; 3], periodic: [bool; 3], nranks: usize) -> BlockGrid {
    let max = nblocks.map(|n| n as f64);
    BlockGrid::new(BlockBounds::new([0.0; 3], max), nblocks, periodic, nranks).unwrap()
}

/// Run `f` once per rank of a fresh `size`-rank world, each on its own
/// thread, and collect the results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&RayonComm) -> T + Sync,
{
    let world = RayonComm::world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Store holding `particles`, in order.
pub fn store_of(particles: &[Particle]) -> ParticleStore {
    let mut s = ParticleStore::with_capacity(particles.len());
    for &p in particles {
        s.push(p);
    }
    s
}

/// Bit-exact, orderable image of a particle's position and velocity.
pub fn particle_key(p: &Particle) -> ([u64; 3], [u64; 3]) {
    (p.pos.map(f64::to_bits), p.vel.map(f64::to_bits))
}

/// Assert two particle collections hold the same multiset of states.
pub fn assert_same_particles(got: &[Particle], want: &[Particle]) {
    let mut a: Vec<_> = got.iter().map(particle_key).collect();
    a.sort_unstable();
    let mut b: Vec<_> = want.iter().map(particle_key).collect();
    b.sort_unstable();
    assert_eq!(a.len(), b.len(), "particle counts differ");
    assert_eq!(a, b, "particle multisets differ");
}
