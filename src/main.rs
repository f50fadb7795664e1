use anyhow::Context;
use langassist_rag::{api, app_state::AppState, config::AppConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    let server_addr = cfg.server_addr.clone();

    // 3. Cargar índices e inicializar el proveedor de LLM
    let app_state = AppState::bootstrap(cfg).context("Error inicializando el estado de la aplicación")?;
    info!(
        "{} colecciones disponibles, fusión '{}'",
        app_state.collections.len(),
        app_state.strategy
    );

    // 4. Router con CORS y trazas
    let app = api::create_app(app_state);

    // 5. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("No se pudo escuchar Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Señal de apagado recibida, iniciando cierre del servidor.");
}
