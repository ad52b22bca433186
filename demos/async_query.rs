//! Example of using the tokio facade to run a single query

use coqtop_codes::{AsyncEngine, Response};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Check nat.".to_string());

    let engine = AsyncEngine::new();
    engine.restart(Vec::new()).await?;

    println!("Query: {}", query);
    match engine.query(query).await? {
        Response::Ok { message, .. } => {
            println!("{}", message.unwrap_or_else(|| engine.engine().get_messages()));
        }
        Response::Err(failure) => eprintln!("Error: {}", failure.message),
    }

    engine.kill().await?;
    Ok(())
}
