// cargo run --example two_rank_migration
//
// Two ranks on threads, one block each along x1. Rank 0 pushes one particle
// across the shared face; after one cycle it lives on rank 1.
use mesh_particles::prelude::*;

fn rank_main(comm: &RayonComm, grid: &BlockGrid) -> Result<(), MigrateError> {
    let blocks = grid.local_blocks(comm.rank())?;
    let mut store = ParticleStore::new();
    match comm.rank() {
        0 => {
            store.push(Particle::new([0.99, 0.5, 0.5], [0.5, 0.0, 0.0], BlockId::new(0)));
            store.push(Particle::new([0.25, 0.5, 0.5], [0.0, 0.1, 0.0], BlockId::new(0)));
        }
        _ => {
            store.push(Particle::new([1.5, 0.5, 0.5], [0.0, 0.0, 0.2], BlockId::new(1)));
        }
    }

    // advance one step
    let dt = 0.04;
    let vel = store.velocities().to_vec();
    let (pos, _) = store.positions_and_gids_mut();
    for (x, v) in pos.iter_mut().zip(&vel) {
        for a in 0..3 {
            x[a] += v[a] * dt;
        }
    }

    let mut cycle = MigrationCycle::new(comm, MigrationConfig::default())?;
    let summary = cycle.run(&mut store, &blocks)?;
    println!(
        "rank {}: sent {}, received {}, now holding {} particles",
        comm.rank(),
        summary.sent,
        summary.received,
        store.len()
    );
    for p in store.iter() {
        println!("  rank {}: {:?} in block {}", comm.rank(), p.pos, p.gid);
    }
    Ok(())
}

fn main() {
    let grid = match BlockGrid::new(
        BlockBounds::new([0.0; 3], [2.0, 1.0, 1.0]),
        [2, 1, 1],
        [true; 3],
        2,
    ) {
        Ok(g) => g,
        Err(e) => mesh_particles::migrate_error::fatal(&e),
    };
    let world = RayonComm::world(2);
    std::thread::scope(|s| {
        for comm in &world {
            let grid = &grid;
            s.spawn(move || {
                if let Err(e) = rank_main(comm, grid) {
                    mesh_particles::migrate_error::fatal(&e);
                }
            });
        }
    });
}
