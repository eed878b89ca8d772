#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ryuu_proxy_lib::run().await
}
