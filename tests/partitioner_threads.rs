//! Multi-writer behavior of the streaming partitioner: concurrent consumes
//! must converge to the same component structure as any serial order.

use std::sync::Arc;
use unitig_forge::{CountingOracle, PartitionerConfig, StreamingPartitioner};

fn partitioner(tag_density: u32) -> Arc<StreamingPartitioner<CountingOracle>> {
    let oracle = Arc::new(CountingOracle::new(5, 4, 1_000_003).unwrap());
    let config = PartitionerConfig {
        tag_density,
        ..PartitionerConfig::default()
    };
    Arc::new(StreamingPartitioner::new(oracle, config).unwrap())
}

// a chain of reads where consecutive reads overlap by several k-mers
const CHAIN: [&str; 5] = [
    "GATTACAGATC",
    "ACAGATCTTGG",
    "GATCTTGGCAT",
    "TTGGCATCCAA",
    "GCATCCAACTG",
];

// reads sharing no k-mers (and no de Bruijn adjacency) with the chain
const APART: [&str; 2] = ["CGCCGCCGCG", "CCGCCGCGTT"];

#[test]
fn test_serial_chain_collapses_to_one_component() {
    let part = partitioner(2);
    for read in CHAIN {
        part.consume(read).unwrap();
    }
    assert_eq!(part.n_components(), 1);
    assert_eq!(part.n_consumed(), CHAIN.len() as u64);
}

#[test]
fn test_concurrent_writers_converge() {
    let part = partitioner(2);
    std::thread::scope(|scope| {
        for chunk in CHAIN.chunks(2) {
            let part = Arc::clone(&part);
            scope.spawn(move || {
                for read in chunk {
                    part.consume(read).unwrap();
                }
            });
        }
        for read in APART {
            let part = Arc::clone(&part);
            scope.spawn(move || {
                part.consume(read).unwrap();
            });
        }
    });

    // two simultaneous consumes of overlapping reads can each miss the
    // other's not-yet-planted tags; components only ever merge, so
    // re-consuming a spanning read settles the final structure
    part.consume(CHAIN[1]).unwrap();
    part.consume(CHAIN[3]).unwrap();
    part.consume(APART[0]).unwrap();

    // the chain forms one component, the separate family another
    assert_eq!(part.n_components(), 2);
    assert_eq!(part.n_consumed(), (CHAIN.len() + APART.len() + 3) as u64);

    // every mapped tag points at a live component
    for id in part.component_ids() {
        let comp = part.get_component(id).unwrap();
        for &tag in &comp.tags {
            assert_eq!(part.get_tag_component(tag), Some(id));
        }
    }
}

#[test]
fn test_rayon_batch_matches_serial_result() {
    let serial = partitioner(2);
    for read in CHAIN.iter().chain(APART.iter()) {
        serial.consume(read).unwrap();
    }

    let batched = partitioner(2);
    let all: Vec<&str> = CHAIN.iter().chain(APART.iter()).copied().collect();
    batched.consume_batch(&all).unwrap();
    // settle any splits from racing overlapping consumes
    for read in [CHAIN[1], CHAIN[3], APART[0]] {
        batched.consume(read).unwrap();
    }

    assert_eq!(batched.n_components(), serial.n_components());
    assert_eq!(batched.n_tags(), serial.n_tags());
}

#[test]
fn test_merge_statistics_are_tracked() {
    let part = partitioner(2);
    let a = part.consume(CHAIN[0]).unwrap();
    let b = part.consume(CHAIN[2]).unwrap();
    assert_ne!(a, b);
    assert_eq!(part.n_components_created(), 2);

    // the middle read overlaps both and forces a merge
    let survivor = part.consume(CHAIN[1]).unwrap();
    assert_eq!(survivor, a.min(b));
    assert_eq!(part.n_components(), 1);
    assert_eq!(part.n_components_destroyed(), 1);
}
