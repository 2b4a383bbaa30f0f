#[tokio::main]
async fn main() {
    if let Err(e) = splatbox_lib::run().await {
        log::error!("splatbox exited with error: {}", e);
        eprintln!("splatbox: {}", e);
        std::process::exit(1);
    }
}
