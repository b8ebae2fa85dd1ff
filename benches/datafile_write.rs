use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use markerstore::Datafile;
use tempfile::tempdir;

fn bench_reserve_and_write(c: &mut Criterion) {
    let body = vec![0x42u8; 256];

    c.bench_function("datafile_reserve_and_write_256b", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().expect("tempdir");
                let path = dir.path().join("bench.db");
                let datafile =
                    Datafile::create(Some(&path), 64 * 1024 * 1024, 1, 1).expect("create datafile");
                (dir, datafile)
            },
            |(dir, mut datafile)| {
                for _ in 0..1000 {
                    let reservation = datafile.reserve(body.len()).expect("reserve");
                    datafile.write(reservation, &body, false).expect("write");
                }
                drop(dir);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_iterate(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("bench.db");
    let mut datafile = Datafile::create(Some(&path), 64 * 1024 * 1024, 1, 1).expect("create datafile");
    let body = vec![0x42u8; 256];
    for _ in 0..5000 {
        let reservation = datafile.reserve(body.len()).expect("reserve");
        datafile.write(reservation, &body, false).expect("write");
    }

    c.bench_function("datafile_iterate_5000_markers", |b| {
        b.iter(|| {
            let mut count = 0usize;
            datafile
                .iterate(|_header, _body| {
                    count += 1;
                    Ok(())
                })
                .expect("iterate");
            criterion::black_box(count);
        });
    });
}

criterion_group!(benches, bench_reserve_and_write, bench_iterate);
criterion_main!(benches);
