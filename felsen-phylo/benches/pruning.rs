use criterion::{black_box, criterion_group, criterion_main, Criterion};
use felsen_phylo::batch::evaluate_shared_model;
use felsen_phylo::{
    BinaryRates, EngineConfig, EqualRates, PruningEngine, PruningTree, RateMatrix, RateModel,
    TipEvidence,
};

fn random_f64(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 11) as f64 / (1u64 << 53) as f64
        })
        .collect()
}

/// Random rooted binary tree: internal node `n_tips + k` joins two
/// still-unattached nodes drawn from a shrinking pool.
fn random_tree(n_tips: usize, seed: u64) -> PruningTree {
    let n_nodes = 2 * n_tips - 1;
    let draws = random_f64(2 * n_tips, seed);
    let lengths: Vec<f64> = random_f64(n_nodes, seed + 1)
        .into_iter()
        .map(|u| 0.01 + 0.5 * u)
        .collect();

    let mut pool: Vec<usize> = (0..n_tips).collect();
    let mut parents = vec![None; n_nodes];
    for k in 0..n_tips - 1 {
        let node = n_tips + k;
        for j in 0..2 {
            let pick = (draws[2 * k + j] * pool.len() as f64) as usize;
            let child = pool.swap_remove(pick.min(pool.len() - 1));
            parents[child] = Some(node);
        }
        pool.push(node);
    }
    PruningTree::from_parents(&parents, &lengths, n_tips).unwrap()
}

fn random_states(n_tips: usize, n_states: usize, seed: u64) -> TipEvidence {
    let states: Vec<Option<usize>> = random_f64(n_tips, seed)
        .into_iter()
        .map(|u| {
            if u < 0.05 {
                None
            } else {
                Some(((u * n_states as f64) as usize).min(n_states - 1))
            }
        })
        .collect();
    TipEvidence::from_states(&states, n_states).unwrap()
}

fn bench_binary(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary");

    for &n_tips in &[100usize, 10_000] {
        let tree = random_tree(n_tips, 42);
        let engine = PruningEngine::new(&tree, random_states(n_tips, 2, 7)).unwrap();
        group.bench_function(format!("{}_tips", n_tips), |b| {
            b.iter(|| engine.log_likelihood_binary(black_box(0.8), black_box(1.3)))
        });
    }

    group.finish();
}

fn bench_general(c: &mut Criterion) {
    let mut group = c.benchmark_group("general");

    let tree = random_tree(1_000, 42);
    let evidence = random_states(1_000, 4, 9);
    let engine = PruningEngine::new(&tree, evidence.clone()).unwrap();
    let uncached = PruningEngine::with_config(
        &tree,
        evidence,
        EngineConfig {
            cache_transitions: false,
            ..EngineConfig::default()
        },
    )
    .unwrap();

    let rows = {
        let r = random_f64(16, 3);
        let mut q = vec![vec![0.0; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                if i != j {
                    q[i][j] = 0.1 + r[4 * i + j];
                }
            }
            q[i][i] = -q[i].iter().sum::<f64>();
        }
        q
    };
    let irreversible = RateMatrix::new(rows).unwrap();
    let mk = EqualRates::new(4, 0.5).unwrap();

    group.bench_function("1k_tips_mk4", |b| {
        b.iter(|| engine.log_likelihood(black_box(&mk)))
    });
    group.bench_function("1k_tips_pade4", |b| {
        b.iter(|| engine.log_likelihood(black_box(&irreversible)))
    });
    group.bench_function("1k_tips_pade4_uncached", |b| {
        b.iter(|| uncached.log_likelihood(black_box(&irreversible)))
    });

    group.finish();
}

fn bench_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition");

    let rows: Vec<Vec<f64>> = (0..20)
        .map(|i| {
            (0..20)
                .map(|j| if i == j { -19.0 } else { 1.0 })
                .collect()
        })
        .collect();
    let q20 = RateMatrix::new(rows).unwrap();
    let binary = BinaryRates::new(0.4, 0.9).unwrap();

    group.bench_function("20_states_eigen", |b| {
        b.iter(|| q20.transition_probs(black_box(0.3)))
    });
    group.bench_function("20_states_pade", |b| {
        b.iter(|| q20.transition_probs_pade(black_box(0.3)))
    });
    group.bench_function("binary", |b| {
        b.iter(|| binary.transition_probs(black_box(0.3)))
    });

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");

    let tree = random_tree(500, 42);
    let characters: Vec<TipEvidence> = (0..200).map(|i| random_states(500, 2, 100 + i)).collect();
    let model = BinaryRates::new(0.6, 0.6).unwrap();
    let config = EngineConfig::default();

    group.bench_function("200_chars_500_tips", |b| {
        b.iter(|| evaluate_shared_model(&tree, black_box(&characters), &model, &config))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_binary,
    bench_general,
    bench_transition,
    bench_batch
);
criterion_main!(benches);
