use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use storefront_api::{config::AppConfig, db::create_pool};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user_with_role(&pool, "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user_with_role(&pool, "user@example.com", "user123", "user").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, password_hash, role) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products: &[(&str, &str, i64, i32, &str, &[&str], &[&str])] = &[
        (
            "Classic Tee",
            "Plain cotton t-shirt",
            499,
            50,
            "apparel",
            &["black", "white", "navy"],
            &["S", "M", "L", "XL"],
        ),
        (
            "Canvas Sneakers",
            "Low-top canvas sneakers",
            1299,
            25,
            "footwear",
            &["white", "red"],
            &["7", "8", "9", "10"],
        ),
        (
            "Steel Water Bottle",
            "Insulated 750ml bottle",
            799,
            100,
            "accessories",
            &[],
            &[],
        ),
        ("Gift Card", "Store credit voucher", 1000, 0, "gifts", &[], &[]),
    ];

    for (name, description, price, stock, category, colors, sizes) in products {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if exists.is_some() {
            continue;
        }

        let status = if *stock == 0 { "out_of_stock" } else { "active" };
        let colors: Vec<String> = colors.iter().map(|c| c.to_string()).collect();
        let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock, status, category, colors, sizes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(stock)
        .bind(status)
        .bind(category)
        .bind(&colors)
        .bind(&sizes)
        .execute(pool)
        .await?;
    }

    Ok(())
}
