#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pproftoggle::toggle::main().await
}
