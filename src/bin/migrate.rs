use anyhow::Result;
use transfer_sync::repository::Database;

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    dotenv::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./transfers.db".to_string());

    println!("Running migrations on database: {database_url}");

    let db = Database::connect(&database_url)?;
    db.ensure_schema()?;

    println!("Migrations completed successfully!");

    Ok(())
}
