use embedbag::Lookup;
use rayon::prelude::*;

#[test]
fn concurrent_calls_on_disjoint_outputs_match_serial() {
    let dim = 32;
    let rows = 200;
    let table: Vec<f32> = (0..rows * dim).map(|i| ((i * 7919) % 1000) as f32 / 250.0 - 2.0).collect();
    // 64 independent requests, each with its own stream and output
    let requests: Vec<(Vec<i32>, Vec<i32>)> = (0..64)
        .map(|r| {
            let indices: Vec<i32> = (0..(r % 7 + 1) * 5).map(|k| ((r * 31 + k * 17) % rows) as i32).collect();
            let lengths = vec![5; indices.len() / 5];
            (indices, lengths)
        })
        .collect();

    let serial: Vec<Vec<f32>> = requests
        .iter()
        .map(|(idx, len)| {
            let args = Lookup::new(dim, &table, idx, len).normalized(true);
            let mut out = vec![0f32; args.output_len()];
            args.run(&mut out).unwrap();
            out
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    let parallel: Vec<Vec<f32>> = pool.install(|| {
        requests
            .par_iter()
            .map(|(idx, len)| {
                let args = Lookup::new(dim, &table, idx, len).normalized(true);
                let mut out = vec![0f32; args.output_len()];
                args.run(&mut out).unwrap();
                out
            })
            .collect()
    });
    assert_eq!(serial, parallel);
}
