use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        multipart::MultipartRejection, DefaultBodyLimit, FromRequest, FromRequestParts, Multipart,
        Path, Query, State,
    },
    http::{header, request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_shared::constants::{CHAT_HUB_PATH, HISTORY_PAGE_SIZE, PHOTO_PAGE_SIZE};
use tandem_shared::protocol::{MessageDeleted, MessageView};
use tandem_shared::types::{BlockState, ChatId, FileFlag, MessageId, UserId};
use tandem_store::StoreHandle;

use crate::authz::AuthorizationService;
use crate::chats::{ChatCreated, ChatService, PhotoView, UserView};
use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::file_store::FileStore;
use crate::gatekeeper::Gatekeeper;
use crate::gateway::{FileGateway, StoredFile};
use crate::pipeline::MessagePipeline;
use crate::registry::GroupRegistry;
use crate::signing::{UrlSigner, FILE_ROUTE_PREFIX};
use crate::tokens::{Claims, Session, TokenService};
use crate::ws;

/// Headroom over the upload limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: StoreHandle,
    pub tokens: Arc<TokenService>,
    pub authz: Arc<AuthorizationService>,
    pub gateway: Arc<FileGateway>,
    pub registry: GroupRegistry,
    pub gatekeeper: Gatekeeper,
    pub pipeline: Arc<MessagePipeline>,
    pub chats: Arc<ChatService>,
}

impl AppState {
    /// Wire every component from the configuration and an open store.
    pub async fn new(config: ServerConfig, store: StoreHandle) -> Result<Self, ChatError> {
        let signer = UrlSigner::new(&config.url_signing_key, config.public_base_url.clone())?;
        let tokens = Arc::new(TokenService::from_config(&config, store.clone()));
        let authz = Arc::new(AuthorizationService::new(
            store.clone(),
            signer,
            config.file_url_expiry_hours,
        ));
        let files = FileStore::new(config.file_storage_path.clone(), config.max_upload_size).await?;
        let gateway = Arc::new(FileGateway::new(files, authz.clone(), store.clone()));
        let registry = GroupRegistry::new();
        let gatekeeper = Gatekeeper::new(tokens.clone(), authz.clone(), registry.clone());
        let pipeline = Arc::new(MessagePipeline::new(
            store.clone(),
            authz.clone(),
            gateway.clone(),
            registry.clone(),
        ));
        let chats = Arc::new(ChatService::new(
            store.clone(),
            authz.clone(),
            config.avatar_url_expiry_hours,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            authz,
            gateway,
            registry,
            gatekeeper,
            pipeline,
            chats,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        .route(CHAT_HUB_PATH, get(ws::chat_hub))
        .route(&format!("{FILE_ROUTE_PREFIX}/:folder/:file"), get(file_fetch))
        .route("/api/auth/refresh", post(auth_refresh))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/auth/check", get(auth_check))
        .route("/api/chat/create", post(chat_create))
        .route("/api/chat/photos/:chat_id", get(chat_photos))
        .route("/api/messages/:chat_id", get(message_history))
        .route(
            "/api/messages/id/:message_id",
            get(message_get).delete(message_delete),
        )
        .route("/api/files/upload/:chat_id", post(file_upload))
        .route("/api/users/search", get(user_search))
        .route("/api/users/block/:user_name", post(user_block))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Authentication ───

/// Caller identity from `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn id(&self) -> UserId {
        self.0.sub
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ChatError::Authentication("Missing bearer token".to_string()))?;

        state.tokens.validate_access_token(token.trim()).map(AuthUser)
    }
}

// ─── Extractors (rejections become `ChatError::Validation`) ───

#[derive(FromRequest)]
#[from_request(via(Json), rejection(ChatError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ChatError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ChatError))]
pub struct ApiQuery<T>(pub T);

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    user1_id: UserId,
    user2_id: UserId,
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Deserialize)]
struct FileQuery {
    expires: Option<i64>,
    hash: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    username: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockResponse {
    user_name: String,
    block_state: BlockState,
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn auth_refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<Session>, ChatError> {
    state
        .tokens
        .refresh_access_token(&req.refresh_token)
        .await?
        .map(Json)
        .ok_or_else(|| ChatError::Authentication("Invalid or expired refresh token".to_string()))
}

async fn auth_logout(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ChatError> {
    state.tokens.revoke_for_user(user.id()).await?;
    info!(user = %user.id(), "User logged out");
    Ok(Json(serde_json::json!({ "revoked": true })))
}

async fn auth_check(user: AuthUser, State(state): State<AppState>) -> Result<Json<UserView>, ChatError> {
    Ok(Json(state.chats.profile(user.id()).await?))
}

async fn chat_create(
    user: AuthUser,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> Result<(StatusCode, Json<ChatCreated>), ChatError> {
    if user.id() != req.user1_id && user.id() != req.user2_id {
        return Err(ChatError::Authorization(
            "Chats can only be opened by a participant".to_string(),
        ));
    }
    let created = state.chats.create_chat(req.user1_id, req.user2_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn chat_photos(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<ChatId>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Json<Vec<PhotoView>>, ChatError> {
    let photos = state
        .chats
        .chat_photos(
            user.id(),
            chat_id,
            page.limit.unwrap_or(PHOTO_PAGE_SIZE),
            page.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(photos))
}

async fn message_history(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<ChatId>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Json<Vec<MessageView>>, ChatError> {
    let messages = state
        .pipeline
        .history(
            user.id(),
            chat_id,
            page.limit.unwrap_or(HISTORY_PAGE_SIZE),
            page.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(messages))
}

async fn message_get(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<MessageId>,
) -> Result<Json<MessageView>, ChatError> {
    Ok(Json(state.pipeline.get(user.id(), message_id).await?))
}

async fn message_delete(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(message_id): ApiPath<MessageId>,
) -> Result<Json<MessageDeleted>, ChatError> {
    Ok(Json(state.pipeline.delete(user.id(), message_id).await?))
}

async fn file_upload(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<ChatId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<StoredFile>, ChatError> {
    let mut multipart =
        multipart.map_err(|e| ChatError::Validation(format!("Invalid multipart request: {e}")))?;
    let max = state.gateway.max_upload_size();
    let mut data = None;
    let mut extension = None;
    let mut flag = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, max))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if extension.is_none() {
                    extension = field
                        .file_name()
                        .and_then(|n| n.rsplit_once('.'))
                        .map(|(_, ext)| ext.to_string());
                }
                data = Some(field.bytes().await.map_err(|e| multipart_error(e, max))?);
            }
            "fileExtension" => {
                extension = Some(field.text().await.map_err(|e| multipart_error(e, max))?);
            }
            "fileFlag" => {
                let raw = field.text().await.map_err(|e| multipart_error(e, max))?;
                let parsed = raw
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .and_then(FileFlag::from_byte)
                    .ok_or_else(|| ChatError::Validation(format!("Invalid fileFlag: {raw:?}")))?;
                flag = Some(parsed);
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| {
        ChatError::Validation("Missing 'file' field in multipart form".to_string())
    })?;
    let flag = flag.ok_or_else(|| ChatError::Validation("Missing 'fileFlag' field".to_string()))?;
    let extension =
        extension.ok_or_else(|| ChatError::Validation("File has no extension".to_string()))?;

    let stored = state
        .gateway
        .store(user.id(), chat_id, flag, &extension, &data)
        .await?;
    Ok(Json(stored))
}

fn multipart_error(e: axum::extract::multipart::MultipartError, max: usize) -> ChatError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ChatError::PayloadTooLarge { max }
    } else {
        ChatError::Validation(format!("Multipart error: {e}"))
    }
}

async fn file_fetch(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath((folder, file)): ApiPath<(String, String)>,
    ApiQuery(query): ApiQuery<FileQuery>,
) -> Result<Response, ChatError> {
    let (Some(expires), Some(hash)) = (query.expires, query.hash) else {
        return Err(ChatError::Validation("Missing expires or hash".to_string()));
    };

    let content = state
        .gateway
        .fetch(user.id(), &folder, &file, expires, &hash)
        .await?;
    Ok(([(header::CONTENT_TYPE, content.content_type)], content.bytes).into_response())
}

async fn user_search(
    _user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<UserView>, ChatError> {
    let name = query.username.unwrap_or_default();
    Ok(Json(state.chats.search_user(&name).await?))
}

async fn user_block(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(user_name): ApiPath<String>,
) -> Result<Json<BlockResponse>, ChatError> {
    let block_state = state.chats.block_user(user.id(), &user_name).await?;
    Ok(Json(BlockResponse {
        user_name,
        block_state,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
