use std::env;
use std::error::Error;
use std::thread;

use deferred_logger::{
    deferred_log_isr, log_debug, log_error, log_info, log_warn, Level, LogFacadeSink, Logger,
    LoggerConfig, ReclaimPolicy, SinkHandle, TracingSink, WriterSink,
};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Diagnostics of the engine itself go to stderr through a non-blocking writer.
fn init_tracing() -> Result<WorkerGuard, Box<dyn Error>> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_thread_names(true),
        );
    // set_global_default leaves the `log` facade free for log4rs.
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}

/// Backend for the `log` facade sink.
fn init_log4rs() -> Result<(), Box<dyn Error>> {
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("log4rs {h({l})} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(Root::builder().appender("console").build(LevelFilter::Debug))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let _guard = init_tracing()?;
    init_log4rs()?;

    let producers = env::args()
        .nth(1)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(4);

    let config = LoggerConfig::default()
        .with_arena_capacity(8 * 1024)
        .with_queue_capacity(64)
        .with_max_in_flight(64)
        .with_reclaim_policy(ReclaimPolicy::Slab { slot_size: 128 });
    let logger = Logger::initialize(config)?;

    logger.add_sink("console", WriterSink::stdout().colored(true));
    logger.add_sink("log4rs", LogFacadeSink);
    logger.add_sink("tracing", TracingSink);
    logger.register_sink(SinkHandle::detached("uart"));
    logger.start_consumer()?;

    log_info!(logger, "starting %zu producers", producers)?;

    let workers: Vec<_> = (0..producers)
        .map(|id| {
            let logger = logger.clone();
            thread::spawn(move || {
                for step in 0..8u32 {
                    // Drops are counted; a busy demo may lose a few.
                    let _ = match step % 4 {
                        0 => log_debug!(logger, "worker %d step %u", id as i32, step),
                        1 => log_info!(logger, "worker %d load %.2f", id as i32, step as f64 / 8.0),
                        2 => log_warn!(logger, "worker %d at %p", id as i32, &step as *const u32),
                        _ => deferred_log_isr!(logger, Level::Error, "irq %#x on %s", step, "gpio"),
                    };
                }
            })
        })
        .collect();

    for worker in workers {
        let _ = worker.join();
    }
    log_error!(logger, "demo finished: %s", "ok")?;

    let stats = logger.shutdown();
    info!(
        emitted = stats.emitted,
        dispatched = stats.dispatched,
        dropped = stats.dropped(),
        sink_panics = stats.sink_panics,
        "pipeline stats"
    );
    Ok(())
}
