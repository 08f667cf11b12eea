use resilience_kit::{CircuitBreaker, Context, ShutdownPolicy, TaskError, WorkerPool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let storage = CircuitBreaker::builder("object-storage")
        .max_requests(3)
        .interval(Duration::from_secs(60))
        .timeout(Duration::from_secs(5))
        .failure_threshold(4)
        .success_threshold(2)
        .build()?;

    let pool = WorkerPool::builder(4, 32)
        .shutdown_policy(ShutdownPolicy::Drain)
        .shutdown_timeout(Duration::from_secs(10))
        .build();

    let uploads = Arc::new(AtomicU32::new(0));
    for i in 0..40u32 {
        let uploads = Arc::clone(&uploads);
        let upload = move |ctx: &Context| -> Result<(), TaskError> {
            ctx.sleep(Duration::from_millis(25))?;
            // Every third upload hits a flaky bucket.
            if i % 3 == 0 {
                return Err(format!("upload {} rejected by bucket", i).into());
            }
            uploads.fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        if let Err(err) = pool.submit_guarded(&storage, upload) {
            println!("submission {} refused: {}", i, err);
        }
    }

    pool.shutdown();

    println!("uploads stored: {}", uploads.load(Ordering::Relaxed));
    println!("pool metrics: {:?}", pool.metrics());
    println!("breaker: {} {:?}", storage.state(), storage.counts());
    Ok(())
}
