pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use archevault_api::balance::{BalanceProvider, FixedBalance, SolanaRpcBalance};
use archevault_api::verifier::WalletVerifier;
use archevault_api::{AppState, AppStateInner};
use archevault_db::Database;
use archevault_gateway::connection::{self, GatewayContext};
use archevault_gateway::dispatcher::Dispatcher;

use crate::config::Config;

/// Opens the database and wires the verifier to the configured balance source.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let db = Database::open(&config.db_path)?;

    let balance: Arc<dyn BalanceProvider> = match &config.token_mint {
        Some(mint) => {
            info!("Token gating on mint {} (minimum {})", mint, config.min_balance);
            Arc::new(SolanaRpcBalance::new(config.rpc_url.clone(), mint.clone()))
        }
        None => {
            info!("No token mint configured, balances read as 0");
            Arc::new(FixedBalance(0.0))
        }
    };

    Ok(Arc::new(AppStateInner {
        db: Arc::new(db),
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        verifier: WalletVerifier::new(balance, config.min_balance),
    }))
}

/// REST API plus the `/gateway` WebSocket, with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let gateway = GatewayContext {
        dispatcher: state.dispatcher.clone(),
        db: state.db.clone(),
        jwt_secret: state.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    archevault_api::router(state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(ctx): State<GatewayContext>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx))
}
