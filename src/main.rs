#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spadesk_lib::run().await
}
