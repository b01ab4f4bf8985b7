//! # REST + WebSocket API
//!
//! Builds the axum router exposing the vault over HTTP. Every handler shares
//! the [`AppState`] through axum's `State` extractor. Mutating calls name
//! their actor in the request body and carry that actor's signature (see
//! [`crate::auth`]); the vault itself decides whether the actor may do what
//! it asks. Vault calls that can reach an adapter run on the blocking pool.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                     |
//! |--------|-----------------------------------|---------------------------------|
//! | GET    | `/health`                         | Liveness check                  |
//! | GET    | `/status`                         | Vault statistics                |
//! | GET    | `/adapters`                       | Registry listing                |
//! | GET    | `/adapters/:id`                   | One registry record             |
//! | GET    | `/depositors/:address`            | Depositor position              |
//! | GET    | `/faults`                         | Recorded backend faults         |
//! | GET    | `/legacy/reconcile`               | Ledger vs legacy balances       |
//! | POST   | `/deposit`                        | Deposit                         |
//! | POST   | `/withdraw`                       | Withdraw by shares or by amount |
//! | POST   | `/claim`                          | Settle a pending claim          |
//! | POST   | `/admin/active-adapter`           | Set or clear the active adapter |
//! | POST   | `/admin/adapters/:id/deactivate`  | Deactivate an adapter           |
//! | POST   | `/admin/rebalance`                | Move capital between adapters   |
//! | POST   | `/admin/breaker/trip`             | Trip the circuit breaker        |
//! | POST   | `/admin/breaker/reset`            | Reset the circuit breaker       |
//! | POST   | `/admin/pause`                    | Pause depositor operations      |
//! | POST   | `/admin/unpause`                  | Resume depositor operations     |
//! | POST   | `/admin/health-check`             | Run a health check now          |
//! | GET    | `/ws`                             | Live vault event stream         |

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, Path, Request, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use aion_vault::{Address, Vault, VaultError, VaultStats};

use crate::auth::{self, AuthError};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Reported node version.
    pub version: String,
    pub vault: Arc<Vault>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/adapters", get(adapters_handler))
        .route("/adapters/:id", get(adapter_handler))
        .route("/depositors/:address", get(depositor_handler))
        .route("/faults", get(faults_handler))
        .route("/legacy/reconcile", get(reconcile_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/claim", post(claim_handler))
        .route("/admin/active-adapter", post(active_adapter_handler))
        .route("/admin/adapters/:id/deactivate", post(deactivate_handler))
        .route("/admin/rebalance", post(rebalance_handler))
        .route("/admin/breaker/trip", post(trip_breaker_handler))
        .route("/admin/breaker/reset", post(reset_breaker_handler))
        .route("/admin/pause", post(pause_handler))
        .route("/admin/unpause", post(unpause_handler))
        .route("/admin/health-check", post(health_check_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Generic error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failure, rendered as a status code plus [`ErrorResponse`].
#[derive(Debug)]
pub enum ApiError {
    Vault(VaultError),
    Auth(AuthError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        ApiError::Vault(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

/// HTTP status for a vault error.
pub fn status_for(err: &VaultError) -> StatusCode {
    use VaultError::*;
    match err {
        ZeroAmount
        | BelowMinimum { .. }
        | InsufficientShares { .. }
        | InsufficientBalance { .. }
        | NoAssetsToWithdraw
        | InvalidAdapterId
        | InvalidRiskLevel(_)
        | SameAdapter(_)
        | InvalidConfig(_)
        | Overflow => StatusCode::BAD_REQUEST,
        Unauthorized(_) => StatusCode::FORBIDDEN,
        AdapterNotRegistered(_) => StatusCode::NOT_FOUND,
        AdapterUnhealthy(_)
        | AdapterInactive(_)
        | AdapterAlreadyRegistered(_)
        | AdapterInUse(_)
        | SlippageExceeded { .. }
        | NoPendingClaim(_)
        | ClaimsUnfunded { .. }
        | Reentrancy => StatusCode::CONFLICT,
        OperationsPaused { .. } => StatusCode::LOCKED,
        Adapter { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Vault(err) => (status_for(&err), err.to_string()),
            ApiError::Auth(err @ AuthError::ActorMismatch { .. }) => {
                (StatusCode::FORBIDDEN, err.to_string())
            }
            ApiError::Auth(err) => (StatusCode::UNAUTHORIZED, err.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse::<Address>()
        .map_err(|e| ApiError::BadRequest(format!("invalid address {raw}: {e}")))
}

/// Runs a vault call on the blocking pool.
async fn on_vault<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Vault) -> Result<T, VaultError> + Send + 'static,
{
    let vault = Arc::clone(&state.vault);
    tokio::task::spawn_blocking(move || op(&vault))
        .await
        .map_err(|e| ApiError::Internal(format!("vault task failed: {e}")))?
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Signed Bodies
// ---------------------------------------------------------------------------

/// Request bodies that name the address acting on the vault.
pub trait Acting {
    fn actor(&self) -> Address;
}

/// A JSON body whose signature verified and whose actor is the signer.
pub struct Signed<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for Signed<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Acting,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().as_str().to_owned();
        let path = req.uri().path().to_owned();
        let headers = req.headers().clone();
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let signer = auth::verify_request(&headers, &method, &path, &body, now)?;
        let payload: T = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
        let actor = payload.actor();
        if actor != signer {
            return Err(AuthError::ActorMismatch { signer, actor }.into());
        }
        Ok(Signed(payload))
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub vault: VaultStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepositRequest {
    pub depositor: Address,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepositResponse {
    pub depositor: Address,
    pub amount: u64,
    pub shares: u64,
}

/// Exactly one of `shares` and `amount` must be set.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub depositor: Address,
    #[serde(default)]
    pub shares: Option<u64>,
    #[serde(default)]
    pub amount: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub depositor: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub depositor: Address,
    pub paid: u64,
    pub remaining: u64,
}

/// Body of operator calls that carry nothing but the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallerRequest {
    pub caller: Address,
}

/// `adapter: null` clears the active adapter.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveAdapterRequest {
    pub caller: Address,
    pub adapter: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RebalanceRequest {
    pub caller: Address,
    pub from: Address,
    pub to: Address,
    pub amount: u64,
}

macro_rules! acting {
    ($($request:ty => $field:ident),* $(,)?) => {
        $(impl Acting for $request {
            fn actor(&self) -> Address {
                self.$field
            }
        })*
    };
}

acting! {
    DepositRequest => depositor,
    WithdrawRequest => depositor,
    ClaimRequest => depositor,
    CallerRequest => caller,
    ActiveAdapterRequest => caller,
    RebalanceRequest => caller,
}

/// Outcome of a breaker or pause toggle.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    /// `false` when the vault was already in the requested position.
    pub changed: bool,
    pub breaker_tripped: bool,
    pub paused: bool,
}

// ---------------------------------------------------------------------------
// Query Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness only. Vault health lives in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        vault: state.vault.stats(),
    })
}

async fn adapters_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.vault.adapters())
}

async fn adapter_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_address(&id)?;
    state
        .vault
        .adapter(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("adapter {id} not found")))
}

/// `GET /depositors/:address` — an unknown address reads as an empty position.
async fn depositor_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let address = parse_address(&address)?;
    Ok(Json(state.vault.depositor(&address)))
}

async fn faults_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.vault.faults())
}

async fn reconcile_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.vault.reconcile_legacy()?))
}

// ---------------------------------------------------------------------------
// Depositor Handlers
// ---------------------------------------------------------------------------

async fn deposit_handler(
    State(state): State<AppState>,
    Signed(req): Signed<DepositRequest>,
) -> ApiResult<DepositResponse> {
    let (depositor, amount) = (req.depositor, req.amount);
    let shares = on_vault(&state, move |vault| vault.deposit(&depositor, amount)).await?;
    Ok(Json(DepositResponse {
        depositor,
        amount,
        shares,
    }))
}

async fn withdraw_handler(
    State(state): State<AppState>,
    Signed(req): Signed<WithdrawRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let depositor = req.depositor;
    let withdrawal = match (req.shares, req.amount) {
        (Some(shares), None) => on_vault(&state, move |vault| vault.withdraw(&depositor, shares)).await?,
        (None, Some(amount)) => {
            on_vault(&state, move |vault| vault.withdraw_amount(&depositor, amount)).await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of `shares` and `amount` is required".into(),
            ))
        }
    };
    Ok(Json(withdrawal))
}

async fn claim_handler(
    State(state): State<AppState>,
    Signed(req): Signed<ClaimRequest>,
) -> ApiResult<ClaimResponse> {
    let depositor = req.depositor;
    let paid = on_vault(&state, move |vault| vault.claim(&depositor)).await?;
    Ok(Json(ClaimResponse {
        depositor,
        paid,
        remaining: state.vault.pending_claim_of(&depositor),
    }))
}

// ---------------------------------------------------------------------------
// Operator Handlers
// ---------------------------------------------------------------------------

async fn active_adapter_handler(
    State(state): State<AppState>,
    Signed(req): Signed<ActiveAdapterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = req.caller;
    on_vault(&state, move |vault| match req.adapter {
        Some(id) => vault.set_active_adapter(&caller, &id),
        None => vault.clear_active_adapter(&caller),
    })
    .await?;
    Ok(Json(serde_json::json!({ "active_adapter": state.vault.active_adapter() })))
}

async fn deactivate_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Signed(req): Signed<CallerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_address(&id)?;
    let caller = req.caller;
    on_vault(&state, move |vault| vault.deactivate_adapter(&caller, &id)).await?;
    state
        .vault
        .adapter(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("adapter {id} not found")))
}

async fn rebalance_handler(
    State(state): State<AppState>,
    Signed(req): Signed<RebalanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = on_vault(&state, move |vault| {
        vault.rebalance(&req.caller, &req.from, &req.to, req.amount)
    })
    .await?;
    Ok(Json(outcome))
}

fn toggle(state: &AppState, changed: bool) -> Json<ToggleResponse> {
    Json(ToggleResponse {
        changed,
        breaker_tripped: state.vault.breaker_state().is_tripped(),
        paused: state.vault.is_paused(),
    })
}

async fn trip_breaker_handler(
    State(state): State<AppState>,
    Signed(req): Signed<CallerRequest>,
) -> ApiResult<ToggleResponse> {
    let changed = on_vault(&state, move |vault| vault.trip_breaker(&req.caller)).await?;
    Ok(toggle(&state, changed))
}

async fn reset_breaker_handler(
    State(state): State<AppState>,
    Signed(req): Signed<CallerRequest>,
) -> ApiResult<ToggleResponse> {
    let changed = on_vault(&state, move |vault| vault.reset_breaker(&req.caller)).await?;
    Ok(toggle(&state, changed))
}

async fn pause_handler(
    State(state): State<AppState>,
    Signed(req): Signed<CallerRequest>,
) -> ApiResult<ToggleResponse> {
    let changed = on_vault(&state, move |vault| vault.pause(&req.caller)).await?;
    Ok(toggle(&state, changed))
}

async fn unpause_handler(
    State(state): State<AppState>,
    Signed(req): Signed<CallerRequest>,
) -> ApiResult<ToggleResponse> {
    let changed = on_vault(&state, move |vault| vault.unpause(&req.caller)).await?;
    Ok(toggle(&state, changed))
}

/// `POST /admin/health-check` — runs the same check as the background loop.
/// Unsigned: anyone may ask for a check.
async fn health_check_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = on_vault(&state, |vault| vault.check_health()).await?;
    state.metrics.refresh(&state.vault.stats());
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws` — pushes every vault [`aion_vault::EventRecord`] as JSON.
/// Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.vault.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(record) => {
                        let payload = match serde_json::to_string(&record) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ws event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use aion_vault::health::BreakerState;
    use aion_vault::{Adapter, AssetId, InMemoryAdapter};
    use axum::body::Body;
    use axum::http::Request;
    use ed25519_dalek::SigningKey;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Helper: a deterministic signing key per test actor.
    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn owner_key() -> SigningKey {
        key(1)
    }

    fn alice_key() -> SigningKey {
        key(2)
    }

    fn mallory_key() -> SigningKey {
        key(9)
    }

    fn addr(key: &SigningKey) -> Address {
        auth::address_of(&key.verifying_key())
    }

    fn owner() -> Address {
        addr(&owner_key())
    }

    /// App state over a native vault with one active in-memory adapter.
    fn test_app_state() -> (AppState, Arc<InMemoryAdapter>) {
        let vault = Vault::with_defaults(owner());
        let adapter = Arc::new(InMemoryAdapter::new("mem", AssetId::Native, 2).with_apy_bps(400));
        let record = vault.register_adapter(&owner(), adapter.clone(), "Memory").unwrap();
        vault.set_active_adapter(&owner(), &record.id).unwrap();
        let state = AppState {
            version: "0.1.0-test".into(),
            vault: Arc::new(vault),
            metrics: Arc::new(crate::metrics::VaultMetrics::new().unwrap()),
        };
        (state, adapter)
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    /// Sends a GET request and returns (status, body).
    async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    /// Sends an unsigned POST request with a JSON body.
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    /// Sends a POST request signed by `signer`.
    async fn post_signed(
        router: &Router,
        path: &str,
        signer: &SigningKey,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let bytes = serde_json::to_vec(&body).unwrap();
        let now = chrono::Utc::now().timestamp();
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        for (name, value) in auth::sign_request(signer, "POST", path, now, &bytes) {
            builder = builder.header(name, value);
        }
        send(router, builder.body(Body::from(bytes)).unwrap()).await
    }

    // -- Queries --------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_vault_stats() {
        let (state, _) = test_app_state();
        state.vault.deposit(&addr(&alice_key()), 2_500).unwrap();
        let router = create_router(state);

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "0.1.0-test");
        assert_eq!(body["vault"]["total_assets"], 2_500);
        assert_eq!(body["vault"]["estimated_apy_bps"], 400);
        assert_eq!(body["vault"]["breaker"], serde_json::json!(BreakerState::Normal));
    }

    #[tokio::test]
    async fn adapters_are_listed_and_looked_up() {
        let (state, adapter) = test_app_state();
        let router = create_router(state);

        let (status, body) = get(&router, "/adapters").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["display_name"], "Memory");

        let (status, body) = get(&router, &format!("/adapters/{}", adapter.id())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["risk_level"], 2);

        let (status, _) = get(&router, &format!("/adapters/{}", Address::derive("nope"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(&router, "/adapters/not-hex").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid address"));
    }

    #[tokio::test]
    async fn unknown_depositor_has_an_empty_position() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, &format!("/depositors/{}", Address::derive("ghost"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shares"], 0);
        assert_eq!(body["value"], 0);
    }

    // -- Depositor flow ---------------------------------------------------------

    #[tokio::test]
    async fn deposit_then_withdraw_by_amount() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());
        let alice = addr(&alice_key());

        let (status, body) = post_signed(
            &router,
            "/deposit",
            &alice_key(),
            serde_json::json!({ "depositor": alice, "amount": 1_000 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shares"], 1_000);

        let (status, body) = get(&router, &format!("/depositors/{alice}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"], 1_000);

        let (status, body) = post_signed(
            &router,
            "/withdraw",
            &alice_key(),
            serde_json::json!({ "depositor": alice, "amount": 400 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"], 400);
        assert_eq!(state.vault.shares_of(&alice), 600);
    }

    #[tokio::test]
    async fn withdraw_needs_exactly_one_of_shares_and_amount() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let alice = addr(&alice_key());
        let (status, _) = post_signed(
            &router,
            "/withdraw",
            &alice_key(),
            serde_json::json!({ "depositor": alice, "amount": 1, "shares": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_signed(
            &router,
            "/withdraw",
            &alice_key(),
            serde_json::json!({ "depositor": alice }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_deposit_is_a_bad_request() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = post_signed(
            &router,
            "/deposit",
            &alice_key(),
            serde_json::json!({ "depositor": addr(&alice_key()), "amount": 0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("zero"));
    }

    #[tokio::test]
    async fn failed_release_is_claimed_later() {
        let (state, adapter) = test_app_state();
        let router = create_router(state.clone());
        let alice = addr(&alice_key());
        state.vault.deposit(&alice, 1_000).unwrap();

        adapter.fail_withdrawals(true);
        let (status, body) = post_signed(
            &router,
            "/withdraw",
            &alice_key(),
            serde_json::json!({ "depositor": alice, "shares": 1_000 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deferred"], 1_000);

        let (_, faults) = get(&router, "/faults").await;
        assert_eq!(faults.as_array().unwrap().len(), 1);

        adapter.fail_withdrawals(false);
        let claim = serde_json::json!({ "depositor": alice });
        let (status, body) = post_signed(&router, "/claim", &alice_key(), claim.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"], 1_000);
        assert_eq!(body["remaining"], 0);

        let (status, _) = post_signed(&router, "/claim", &alice_key(), claim).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // -- Authentication -----------------------------------------------------------

    #[tokio::test]
    async fn unsigned_calls_are_unauthenticated() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());
        let alice = addr(&alice_key());
        state.vault.deposit(&alice, 1_000).unwrap();

        let (status, body) = post_json(&router, "/admin/pause", serde_json::json!({ "caller": owner() })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(auth::PUBLIC_KEY_HEADER));

        let (status, _) = post_json(
            &router,
            "/withdraw",
            serde_json::json!({ "depositor": alice, "shares": 1_000 }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!state.vault.is_paused());
        assert_eq!(state.vault.shares_of(&alice), 1_000);
    }

    #[tokio::test]
    async fn signer_cannot_act_for_another_address() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());
        let alice = addr(&alice_key());
        state.vault.deposit(&alice, 1_000).unwrap();

        // A valid signature over a body that names the owner.
        let (status, _) = post_signed(
            &router,
            "/admin/pause",
            &mallory_key(),
            serde_json::json!({ "caller": owner() }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!state.vault.is_paused());

        // Or names alice as the depositor.
        let (status, body) = post_signed(
            &router,
            "/withdraw",
            &mallory_key(),
            serde_json::json!({ "depositor": alice, "shares": 1_000 }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("cannot act for"));
        assert_eq!(state.vault.shares_of(&alice), 1_000);
    }

    #[tokio::test]
    async fn tampered_body_fails_verification() {
        let (state, _) = test_app_state();
        let router = create_router(state.clone());
        let alice = addr(&alice_key());
        state.vault.deposit(&alice, 1_000).unwrap();

        let signed = serde_json::to_vec(&serde_json::json!({ "depositor": alice, "shares": 1 })).unwrap();
        let sent = serde_json::to_vec(&serde_json::json!({ "depositor": alice, "shares": 1_000 })).unwrap();
        let now = chrono::Utc::now().timestamp();
        let mut builder = Request::builder().method("POST").uri("/withdraw");
        for (name, value) in auth::sign_request(&alice_key(), "POST", "/withdraw", now, &signed) {
            builder = builder.header(name, value);
        }
        let (status, _) = send(&router, builder.body(Body::from(sent)).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(state.vault.shares_of(&alice), 1_000);
    }

    // -- Operator flow ----------------------------------------------------------

    #[tokio::test]
    async fn strangers_cannot_pause() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let mallory = addr(&mallory_key());
        let (status, _) = post_signed(
            &router,
            "/admin/pause",
            &mallory_key(),
            serde_json::json!({ "caller": mallory }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn paused_vault_answers_locked() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let as_owner = serde_json::json!({ "caller": owner() });

        let (status, body) = post_signed(&router, "/admin/pause", &owner_key(), as_owner.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);
        assert_eq!(body["paused"], true);

        let (status, _) = post_signed(
            &router,
            "/deposit",
            &alice_key(),
            serde_json::json!({ "depositor": addr(&alice_key()), "amount": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::LOCKED);

        let (_, body) = post_signed(&router, "/admin/pause", &owner_key(), as_owner.clone()).await;
        assert_eq!(body["changed"], false);
        let (_, body) = post_signed(&router, "/admin/unpause", &owner_key(), as_owner).await;
        assert_eq!(body["paused"], false);
    }

    #[tokio::test]
    async fn health_check_trips_on_an_unhealthy_adapter() {
        let (state, adapter) = test_app_state();
        let router = create_router(state.clone());

        adapter.set_unhealthy(true);
        let (status, body) = post_json(&router, "/admin/health-check", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], false);
        assert_eq!(body["tripped_now"], true);
        assert_eq!(state.metrics.breaker_tripped.get(), 1);

        adapter.set_unhealthy(false);
        let (_, body) = post_signed(
            &router,
            "/admin/breaker/reset",
            &owner_key(),
            serde_json::json!({ "caller": owner() }),
        )
        .await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["breaker_tripped"], false);
    }

    #[tokio::test]
    async fn active_adapter_cannot_be_deactivated() {
        let (state, adapter) = test_app_state();
        let router = create_router(state);
        let path = format!("/admin/adapters/{}/deactivate", adapter.id());
        let as_owner = serde_json::json!({ "caller": owner() });

        let (status, _) = post_signed(&router, &path, &owner_key(), as_owner.clone()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = post_signed(
            &router,
            "/admin/active-adapter",
            &owner_key(),
            serde_json::json!({ "caller": owner(), "adapter": null }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["active_adapter"].is_null());

        let (status, body) = post_signed(&router, &path, &owner_key(), as_owner).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);
    }

    #[tokio::test]
    async fn rebalance_into_unknown_adapter_is_not_found() {
        let (state, adapter) = test_app_state();
        state.vault.deposit(&addr(&alice_key()), 1_000).unwrap();
        let router = create_router(state);

        let (status, _) = post_signed(
            &router,
            "/admin/rebalance",
            &owner_key(),
            serde_json::json!({
                "caller": owner(),
                "from": adapter.id(),
                "to": Address::derive("elsewhere"),
                "amount": 500,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reconcile_without_legacy_backend_is_empty() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/legacy/reconcile").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[test]
    fn error_statuses_follow_the_error_family() {
        let id = Address::derive("x");
        assert_eq!(status_for(&VaultError::ZeroAmount), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&VaultError::Unauthorized(id)), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&VaultError::AdapterNotRegistered(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&VaultError::AdapterInUse(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&VaultError::ClaimsUnfunded {
                pending: 10,
                available: 4
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&VaultError::Adapter {
                adapter: id,
                source: aion_vault::AdapterError::Unavailable("down".into()),
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
