use chrono::{Duration, Utc};
use envconfig::Envconfig;
use firstaid_inventory::{
    config::Config,
    db::{init_db, models::NewDrug, repository::DrugRepository, DatabaseError},
};
use sqlx::PgPool;

const DRUG_FORMS: &[&str] = &["TABLET", "CAPSULE", "SYRUP", "OINTMENT", "DROPS", "SPRAY"];

/// (owner, name, form, days until expiry)
fn get_seed_data() -> Vec<(i32, &'static str, &'static str, i64)> {
    vec![
        (1, "Paracetamol", "TABLET", -10),
        (1, "Ibuprofen", "TABLET", 12),
        (1, "Cough Syrup", "SYRUP", 45),
        (1, "Antiseptic Cream", "OINTMENT", 400),
        (2, "Loratadine", "TABLET", 5),
        (2, "Eye Drops", "DROPS", 20),
        (2, "Amoxicillin", "CAPSULE", 200),
        (3, "Nasal Spray", "SPRAY", 90),
        (3, "Hydrocortisone", "OINTMENT", 28),
    ]
}

async fn seed_database(pool: &PgPool) -> Result<(), DatabaseError> {
    for name in DRUG_FORMS {
        sqlx::query("INSERT INTO drug_form (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(*name)
            .execute(pool)
            .await?;
    }

    let repo = DrugRepository::new(pool.clone());
    let now = Utc::now();

    for (owner, name, form, days) in get_seed_data() {
        let drug_form_id: i32 =
            sqlx::query_scalar("SELECT drug_form_id FROM drug_form WHERE name = $1")
                .bind(form)
                .fetch_one(pool)
                .await?;

        repo.save(&NewDrug {
            owner_user_id: owner,
            drug_name: name.to_string(),
            drug_description: None,
            expiration_date: now + Duration::days(days),
            drug_form_id,
        })
        .await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    dotenvy::dotenv().ok();

    let config = Config::init_from_env()?;
    let pool = init_db(&config.database_url, config.pool_settings()).await?;

    seed_database(&pool).await?;
    log::info!("Seeded {} drugs", get_seed_data().len());
    Ok(())
}
