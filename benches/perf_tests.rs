use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deferred_logger::log_capture::capture_args;
use deferred_logger::{
    format_immediate, log_info, reconstruct, CapturedBuffer, LogArg, LogError, LogRecord, Logger,
    LoggerConfig, ReclaimPolicy, SinkHandle,
};
use log::{info, LevelFilter};
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use std::sync::Once;
use tempfile::TempDir;

const FMT: &str = "Test perf: iteration=%d, id=%u, active=%d, load=%.2f, desc=%s";

static LOGGER_INIT: Once = Once::new();

fn args(i: i64) -> [LogArg; 5] {
    [
        LogArg::Int(i),
        LogArg::Uint(42),
        LogArg::Bool(true),
        LogArg::Float(95.5),
        LogArg::Str("CPU: 95%, Memory: 2.5GB, Network: 1.2Gbps"),
    ]
}

fn setup_log4rs(dir: &TempDir) {
    LOGGER_INIT.call_once(|| {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} - {m}{n}")))
            .build(dir.path().join("traditional.log"))
            .unwrap();

        let config = Config::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .build(Root::builder().appender("logfile").build(LevelFilter::Info))
            .unwrap();

        log4rs::init_config(config).unwrap();
    });
}

fn bench_capture_and_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("Capture and Replay");
    let values = args(7);

    group.bench_function("capture", |b| {
        let mut dst = [0u8; 128];
        b.iter(|| capture_args(black_box(FMT), black_box(&values), &mut dst).unwrap())
    });

    let captured = CapturedBuffer::capture(FMT, &values).unwrap();
    group.bench_function("reconstruct", |b| {
        let mut out = [0u8; 256];
        b.iter(|| reconstruct(black_box(FMT), captured.args(), &mut out))
    });

    group.bench_function("format_immediate", |b| {
        b.iter(|| format_immediate(black_box(FMT), black_box(&values)))
    });

    group.finish();
}

fn bench_logging_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Logging Comparison");
    group.sample_size(20);

    let logger = Logger::initialize(
        LoggerConfig::default()
            .with_arena_capacity(64 * 1024)
            .with_queue_capacity(1024)
            .with_max_in_flight(1024)
            .with_reclaim_policy(ReclaimPolicy::Slab { slot_size: 64 }),
    )
    .unwrap();
    logger.register_sink(SinkHandle::new("null", |record: &LogRecord<'_>| {
        black_box(record.text.len());
    }));
    logger.start_consumer().unwrap();

    group.bench_function("deferred_emit", |b| {
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            let values = args(i);
            // Back off while the consumer catches up; drops would flatter the numbers.
            while let Err(LogError::ResourceExhausted(_)) = logger.emit(
                "bench",
                "deferred_emit",
                deferred_logger::Level::Info,
                FMT,
                &values,
            ) {
                std::hint::spin_loop();
            }
        })
    });

    group.bench_function("deferred_macro", |b| {
        b.iter(|| {
            while log_info!(logger, "macro %d %s", 1, "x").is_err() {
                std::hint::spin_loop();
            }
        })
    });

    let dir = tempfile::tempdir().unwrap();
    setup_log4rs(&dir);
    group.bench_function("log4rs_file", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            info!(
                "Test perf: iteration={}, id={}, active={}, load={:.2}, desc={}",
                i, 42, true, 95.5, "CPU: 95%, Memory: 2.5GB, Network: 1.2Gbps"
            );
        })
    });

    group.finish();
    let stats = logger.shutdown();
    println!(
        "deferred pipeline: emitted={} dispatched={} dropped={}",
        stats.emitted,
        stats.dispatched,
        stats.dropped()
    );
}

criterion_group!(benches, bench_capture_and_replay, bench_logging_comparison);
criterion_main!(benches);
