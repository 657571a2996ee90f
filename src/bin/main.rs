#[cfg(not(target_arch = "wasm32"))]
mod native {
    use yatube::{seed, server, AppContext, Settings};
    use yatube::core::db::Db;

    pub async fn run() -> anyhow::Result<()> {
        let settings = Settings::from_env()?;
        server::init_tracing(settings.log_json);

        let app = AppContext::new(Db::in_memory(), settings);
        if app.settings.seed_demo_data {
            seed::seed_demo_data(&app)?;
        }

        server::run(app).await?;
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
