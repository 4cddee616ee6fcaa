/*!
Here we go!
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use rollcall::config;
use rollcall::inter;

#[tokio::main]
async fn main() -> Result<(), String> {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("rollcall")
        .build();
    TermLogger::init(
        rollcall::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto,
    ).map_err(|e| format!("Error initializing logging: {}", &e))?;
    log::info!("Logging started.");

    let config_path = std::env::var("ROLLCALL_CONFIG")
        .unwrap_or_else(|_| "config.toml".to_owned());
    let glob = config::load_configuration(&config_path).await?;
    let addr = glob.addr;
    let glob = Arc::new(glob);

    let app = Router::new()
        .route(
            "/auth/me",
            get(inter::me)
                .route_layer(middleware::from_fn(inter::bearer_authenticate)),
        )
        .route("/auth/login", post(inter::login))
        .nest("/admin", inter::admin::routes())
        .nest("/teacher", inter::teacher::routes())
        .nest("/student", inter::student::routes())
        .layer(Extension(glob));

    log::info!("Listening on {}", &addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| format!("Server error: {}", &e))
}
