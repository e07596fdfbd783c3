pub mod common;
pub mod currency;
pub mod enterprise;
pub mod exchange_rate;
pub mod indicator;
pub mod indicator_value;
pub mod user;

#[cfg(feature = "integration-test")]
#[cfg(test)]
pub mod test_db {
    use sqlx::PgPool;

    /**
     * Initialize the database connection pool.
     */
    pub async fn init_db() -> PgPool {
        dotenv::from_filename("./sqlx-postgresql-migration/.env-test").ok();
        let pool = PgPool::connect(dotenv::var("DATABASE_URL").unwrap().as_str()).await.unwrap();
        sqlx::migrate!("./sqlx-postgresql-migration/migrations").run(&pool).await.unwrap();
        pool
    }
}
