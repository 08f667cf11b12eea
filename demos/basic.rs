use resilience_kit::{BreakerError, CircuitBreaker, Context, HookRegistry};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct SmsError(String);

impl fmt::Display for SmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SMS gateway error: {}", self.0)
    }
}

impl Error for SmsError {}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let hooks = HookRegistry::new();
    hooks.set_on_state_change(|name, from, to| {
        println!("[hook] {} moved {} -> {}", name, from, to);
    });

    let breaker = CircuitBreaker::builder("sms-gateway")
        .max_requests(2)
        .interval(Duration::from_secs(60))
        .timeout(Duration::from_secs(2))
        .failure_threshold(3)
        .success_threshold(2)
        .hooks(hooks)
        .build()?;

    let ctx = Context::background();
    let mut attempt = 0u32;

    // The gateway fails for the first five attempts, then recovers.
    let mut send_otp = |_: &Context| -> Result<String, SmsError> {
        attempt += 1;
        if attempt <= 5 {
            Err(SmsError("upstream timeout".to_string()))
        } else {
            Ok(format!("message-{}", attempt))
        }
    };

    for i in 1..=12 {
        match breaker.execute(&ctx, &mut send_otp) {
            Ok(id) => println!("Attempt {}: delivered {}", i, id),
            Err(BreakerError::Open) => println!("Attempt {}: circuit open, skipped", i),
            Err(BreakerError::TooManyRequests) => println!("Attempt {}: trial cap reached", i),
            Err(BreakerError::Operation(err)) => println!("Attempt {}: {}", i, err),
        }

        println!("  state: {}, counts: {:?}", breaker.state(), breaker.counts());
        thread::sleep(Duration::from_millis(400));
    }

    Ok(())
}
