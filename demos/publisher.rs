use dispatchq::executors::SendEmailParams;
use dispatchq::logging;
use dispatchq::prelude::*;
use serde_json::json;

const GREET: TaskId = TaskId::new(100);

#[tokio::main]
async fn main() -> DispatchResult<()> {
    let config = DispatchConfig::from_env()?;
    logging::init(&config.logging);

    let dispatcher = Dispatcher::connect(config).await?;
    dispatcher.health_check().await?;

    let names = std::env::args().skip(1).collect::<Vec<_>>();
    let names = if names.is_empty() {
        vec!["world".to_string()]
    } else {
        names
    };

    for name in &names {
        dispatcher
            .enqueue(GREET, &json!({"Name": name, "DelayMs": 250}))
            .await?;
    }

    dispatcher
        .enqueue(
            TaskId::SEND_EMAIL,
            &SendEmailParams {
                from: "noreply@example.com".to_string(),
                to: "ops@example.com".to_string(),
                subject: "Greetings queued".to_string(),
                body: format!("<p>Queued <b>{}</b> greetings.</p>", names.len()),
            },
        )
        .await?;

    tracing::info!(count = names.len() + 1, "📨 Tasks enqueued");
    Ok(())
}
