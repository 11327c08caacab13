use rask_metrics_server::app;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    app::main().await
}
