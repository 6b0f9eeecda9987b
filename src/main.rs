#[tokio::main]
async fn main() -> anyhow::Result<()> {
    camera_registry::run().await
}
