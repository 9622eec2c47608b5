use organic_biscuits_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    services::auth_service::hash_password,
    slug::slugify,
};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let email = std::env::var("SEED_ADMIN_EMAIL").unwrap_or_else(|_| "admin@organicbiscuits.com".into());
    let password = std::env::var("SEED_ADMIN_PASSWORD").unwrap_or_else(|_| "admin12345".into());
    let admin_id = ensure_admin(&pool, &email, &password).await?;
    seed_categories(&pool).await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}");
    Ok(())
}

async fn ensure_admin(pool: &sqlx::PgPool, email: &str, password: &str) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, is_admin)
        VALUES ($1, 'Store Admin', $2, $3, TRUE)
        ON CONFLICT (email) DO UPDATE SET is_admin = TRUE
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email.to_lowercase())
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

async fn seed_categories(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let categories = [
        ("Cookies", "Classic baked cookies"),
        ("Crackers", "Savoury crackers for snacking"),
        ("Gluten Free", "Made without wheat, barley or rye"),
        ("Vegan", "No dairy, no eggs"),
    ];

    for (name, description) in categories {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, slug, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slugify(name))
        .bind(description)
        .execute(pool)
        .await?;
    }

    println!("Seeded categories");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products: [(&str, &str, Decimal, i32, &[&str], bool); 5] = [
        ("Oat & Honey Biscuits", "Rolled oats and wildflower honey", Decimal::new(499, 2), 120, &["cookies"], true),
        ("Dark Chocolate Digestives", "Wholemeal digestives dipped in 70% chocolate", Decimal::new(599, 2), 80, &["cookies"], true),
        ("Rosemary Sea Salt Crackers", "Thin crackers with fresh rosemary", Decimal::new(399, 2), 60, &["crackers", "vegan"], false),
        ("Almond Butter Cookies", "Almond flour and almond butter, nothing else", Decimal::new(649, 2), 40, &["cookies", "gluten-free"], false),
        ("Coconut Ginger Snaps", "Crisp ginger snaps with toasted coconut", Decimal::new(449, 2), 8, &["cookies", "vegan"], false),
    ];

    for (name, description, price, stock, categories, featured) in products {
        let categories: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, slug, description, price, stock, categories, is_featured)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slugify(name))
        .bind(description)
        .bind(price)
        .bind(stock)
        .bind(categories)
        .bind(featured)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
