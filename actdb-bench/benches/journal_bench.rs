//! Journal benchmarks.

use actdb_journal::{Journal, JournalConfig, JournalEntry, SyncPolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

fn create_test_journal(policy: SyncPolicy) -> (TempDir, Journal) {
    let dir = TempDir::new().unwrap();
    let config = JournalConfig::new(dir.path())
        .with_segment_size(64 * 1024 * 1024)
        .with_sync_policy(policy);
    let journal = Journal::open(config).unwrap();
    (dir, journal)
}

fn append_entry(action_id: u64) -> JournalEntry {
    JournalEntry::AppendAction {
        action_id,
        predecessor_id: action_id.saturating_sub(1),
        event_id: 1,
        context_id: 1,
        timestamp: 1_700_000_000_000,
    }
}

fn bench_journal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append");

    for (name, policy) in [
        ("no_sync", SyncPolicy::Manual),
        ("sync_every_100", SyncPolicy::EveryN(100)),
    ] {
        let (_dir, journal) = create_test_journal(policy);
        let entry = append_entry(1);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("action", name), &entry, |b, entry| {
            b.iter(|| black_box(journal.append(entry).unwrap()));
        });
    }

    group.finish();
}

fn bench_journal_append_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append_batch");

    let (_dir, journal) = create_test_journal(SyncPolicy::Manual);
    let entry = append_entry(1);

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                b.iter(|| {
                    for _ in 0..size {
                        black_box(journal.append(&entry).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_journal_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_read");

    let (_dir, journal) = create_test_journal(SyncPolicy::Manual);
    for i in 0..1000 {
        journal.append(&append_entry(i + 1)).unwrap();
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("read_all", |b| {
        b.iter(|| black_box(journal.read_all().unwrap()));
    });

    group.finish();
}

fn bench_journal_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_recovery");

    for entry_count in [100, 1000, 10000] {
        let dir = TempDir::new().unwrap();
        {
            let config = JournalConfig::new(dir.path())
                .with_segment_size(64 * 1024 * 1024)
                .with_sync_policy(SyncPolicy::Manual);
            let journal = Journal::open(config).unwrap();
            for i in 0..entry_count {
                journal.append(&append_entry(i + 1)).unwrap();
            }
            journal.sync().unwrap();
        }

        group.throughput(Throughput::Elements(entry_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(entry_count),
            &entry_count,
            |b, _| {
                b.iter(|| {
                    let config = JournalConfig::new(dir.path())
                        .with_segment_size(64 * 1024 * 1024)
                        .with_sync_policy(SyncPolicy::Manual);
                    black_box(Journal::open(config).unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_journal_append,
    bench_journal_append_batch,
    bench_journal_read,
    bench_journal_recovery,
);

criterion_main!(benches);
