use dispatchq::logging;
use dispatchq::materialize::fill_struct;
use dispatchq::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const GREET: TaskId = TaskId::new(100);

#[derive(Debug, Default)]
struct Greeting {
    name: String,
    delay_ms: u64,
}

dispatchq::materialize!(Greeting {
    "Name" => name,
    "DelayMs" => delay_ms,
});

struct GreetExecutor;

#[async_trait]
impl TaskExecutor for GreetExecutor {
    async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
        let greeting: Greeting = fill_struct(&envelope.payload)?;
        tokio::time::sleep(Duration::from_millis(greeting.delay_ms)).await;
        tracing::info!(name = %greeting.name, "👋 Hello");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "greet"
    }
}

#[tokio::main]
async fn main() {
    let config = match DispatchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&config.logging);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Subscriber stopped");
        std::process::exit(1);
    }
}

async fn run(config: DispatchConfig) -> DispatchResult<()> {
    let dispatcher = Dispatcher::connect(config).await?;

    let mut executors = ExecutorMap::new();
    executors.insert(GREET, Arc::new(GreetExecutor) as SharedExecutor);

    let subscriber = dispatcher.subscriber(executors)?;
    tracing::info!("🚀 Subscriber starting, press Ctrl+C to stop");

    tokio::select! {
        result = subscriber.run() => result,
        _ = signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
