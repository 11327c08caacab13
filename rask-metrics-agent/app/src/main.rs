use rask_metrics_agent::app;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    app::main().await
}
