//! In-memory stand-in for the notes backend.
//!
//! Serves the same routes the real API exposes under `/api/user/` plus the
//! `/api/token/refresh/` endpoint, records every request it receives, and lets
//! tests steer token validity and refresh behaviour.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{error, info};

mod handlers;
pub mod tokens;

pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "alice-password";
pub const BOB_EMAIL: &str = "bob@example.com";
pub const BOB_PASSWORD: &str = "bob-password";

/// How the refresh endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Exchange live refresh tokens for new access tokens
    Normal,
    /// Answer every refresh with the given status
    Fail(u16),
    /// Answer 200 with a body that has no `access` field
    Malformed,
}

/// A request as seen by the fixture, before routing
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

impl RecordedRequest {
    /// The bearer token carried by this request, if any
    pub fn bearer(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub id: u64,
    pub email: String,
    pub name: String,
    pub bio: String,
    pub password: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub(crate) struct AttachmentRecord {
    pub id: u64,
    pub file: String,
    pub content: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct NoteRecord {
    pub id: u64,
    pub owner: u64,
    pub title: String,
    pub body: String,
    pub slug: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attachments: Vec<AttachmentRecord>,
    pub ratings: HashMap<u64, u8>,
    pub bookmarks: HashSet<u64>,
}

pub(crate) struct BackendState {
    pub users: Vec<UserRecord>,
    pub notes: Vec<NoteRecord>,
    pub refresh_tokens: HashMap<String, u64>,
    pub revoked_access: HashSet<String>,
    pub reject_all_access: bool,
    pub refresh_mode: RefreshMode,
    pub refresh_delay: Duration,
    pub search_broken: bool,
    pub requests: Vec<RecordedRequest>,
    pub next_id: u64,
}

impl BackendState {
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn user(&self, id: u64) -> Option<&UserRecord> {
        self.users.iter().find(|user| user.id == id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
    }

    /// Look a user up the way public profile routes do: by email, then by display name
    pub fn user_by_username(&self, username: &str) -> Option<&UserRecord> {
        self.user_by_email(username).or_else(|| {
            self.users
                .iter()
                .find(|user| user.name.eq_ignore_ascii_case(username))
        })
    }

    /// Issue a fresh access/refresh pair for a user
    pub fn issue_tokens(&mut self, user_id: u64) -> (String, String) {
        let serial = self.next_id();
        let access = tokens::mint_access_token(user_id, tokens::ACCESS_TOKEN_TTL_SECS, serial);
        let refresh = tokens::mint_refresh_token(user_id, serial);
        self.refresh_tokens.insert(refresh.clone(), user_id);
        (access, refresh)
    }
}

/// Handle to a mock notes backend. Clones share the same state.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend seeded with two users (Alice is an admin) and three notes
    pub fn new() -> Self {
        let day = |month: u32, day: u32| {
            Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now)
        };

        let users = vec![
            UserRecord {
                id: 1,
                email: ALICE_EMAIL.to_string(),
                name: "Alice".to_string(),
                bio: "Writes about Rust".to_string(),
                password: ALICE_PASSWORD.to_string(),
                is_admin: true,
                is_active: true,
                created_at: day(1, 1),
                last_login: Some(day(3, 1)),
                last_seen: None,
            },
            UserRecord {
                id: 2,
                email: BOB_EMAIL.to_string(),
                name: "Bob".to_string(),
                bio: String::new(),
                password: BOB_PASSWORD.to_string(),
                is_admin: false,
                is_active: true,
                created_at: day(1, 5),
                last_login: None,
                last_seen: None,
            },
        ];

        let note = |id: u64,
                    owner: u64,
                    title: &str,
                    category: &str,
                    created: DateTime<Utc>,
                    updated: DateTime<Utc>| NoteRecord {
            id,
            owner,
            title: title.to_string(),
            body: format!("{title}: body text"),
            slug: handlers::slugify(title, id),
            category: category.to_string(),
            created_at: created,
            updated_at: updated,
            attachments: Vec::new(),
            ratings: HashMap::new(),
            bookmarks: HashSet::new(),
        };

        let mut first = note(1, 1, "Rust ownership primer", "programming", day(1, 10), day(1, 12));
        first.attachments.push(AttachmentRecord {
            id: 1,
            file: "attachments/ownership.txt".to_string(),
            content: b"moves, borrows and lifetimes".to_vec(),
            uploaded_at: day(1, 10),
        });
        first.ratings.insert(2, 4);

        let notes = vec![
            first,
            note(2, 2, "Organic chemistry summary", "science", day(2, 1), day(2, 1)),
            note(3, 2, "Borrow checker tips", "programming", day(2, 3), day(2, 4)),
        ];

        let state = BackendState {
            users,
            notes,
            refresh_tokens: HashMap::new(),
            revoked_access: HashSet::new(),
            reject_all_access: false,
            refresh_mode: RefreshMode::Normal,
            refresh_delay: Duration::ZERO,
            search_broken: false,
            requests: Vec::new(),
            next_id: 100,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().expect("fixture state lock poisoned")
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/token/refresh/", post(handlers::refresh_token))
            .route("/api/user/register/", post(handlers::register))
            .route("/api/user/login/", post(handlers::login))
            .route(
                "/api/user/profile/",
                get(handlers::own_profile).patch(handlers::update_profile),
            )
            .route("/api/user/profile/:username/", get(handlers::public_profile))
            .route("/api/user/users/:user_id/", get(handlers::user_by_id))
            .route("/api/user/change-password/", post(handlers::change_password))
            .route(
                "/api/user/send-reset-password-email/",
                post(handlers::send_reset_email),
            )
            .route(
                "/api/user/reset-password/:uid/:token/",
                post(handlers::reset_password),
            )
            .route(
                "/api/user/notes/",
                get(handlers::list_notes).post(handlers::create_note),
            )
            .route("/api/user/notes/mine/", get(handlers::my_notes))
            .route("/api/user/notes/bookmarked/", get(handlers::bookmarked_notes))
            .route(
                "/api/user/notes/by-user/:username/",
                get(handlers::notes_by_user),
            )
            .route(
                "/api/user/notes/:slug/",
                get(handlers::note_detail)
                    .put(handlers::update_note)
                    .delete(handlers::delete_note),
            )
            .route(
                "/api/user/notes/:slug/rate/",
                post(handlers::rate_note).delete(handlers::unrate_note),
            )
            .route(
                "/api/user/notes/:slug/bookmark/",
                post(handlers::bookmark_note).delete(handlers::unbookmark_note),
            )
            .route("/api/user/search_notes/", get(handlers::search_notes))
            .route(
                "/api/user/download/attachment/:pk/",
                get(handlers::download_attachment),
            )
            .route("/api/user/admin/users/", get(handlers::admin_users))
            .route(
                "/api/user/admin/users/:user_id/",
                patch(handlers::admin_update_user)
                    .delete(handlers::admin_delete_user),
            )
            .route("/api/user/heartbeat/", post(handlers::heartbeat))
            .layer(middleware::from_fn_with_state(self.clone(), record_request))
            .with_state(self.clone())
    }

    /// Serve on an ephemeral localhost port and return the base URL
    pub async fn spawn(&self) -> anyhow::Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = self.router();

        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!("Mock notes backend stopped: {:?}", err);
            }
        });

        info!("Mock notes backend listening on {}", addr);
        Ok(format!("http://{addr}"))
    }

    /// Access token for a seeded or registered user; negative TTLs are already expired
    pub fn access_token_for(&self, email: &str, ttl_secs: i64) -> String {
        let mut state = self.state();
        let user_id = state
            .user_by_email(email)
            .map(|user| user.id)
            .unwrap_or_else(|| panic!("no fixture user {email}"));
        let serial = state.next_id();
        tokens::mint_access_token(user_id, ttl_secs, serial)
    }

    /// A live refresh token for a user
    pub fn refresh_token_for(&self, email: &str) -> String {
        let mut state = self.state();
        let user_id = state
            .user_by_email(email)
            .map(|user| user.id)
            .unwrap_or_else(|| panic!("no fixture user {email}"));
        let serial = state.next_id();
        let token = tokens::mint_refresh_token(user_id, serial);
        state.refresh_tokens.insert(token.clone(), user_id);
        token
    }

    /// Make a still-valid access token answer 401
    pub fn revoke_access_token(&self, token: &str) {
        self.state().revoked_access.insert(token.to_string());
    }

    /// Answer 401 to every bearer token, including freshly refreshed ones
    pub fn reject_all_access_tokens(&self, reject: bool) {
        self.state().reject_all_access = reject;
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.state().refresh_mode = mode;
    }

    /// Hold refresh responses back so concurrent callers overlap
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state().refresh_delay = delay;
    }

    /// Make the search endpoint answer with an HTML error page
    pub fn break_search(&self, broken: bool) {
        self.state().search_broken = broken;
    }

    /// The uid/token pair a reset email would carry for this user
    pub fn reset_link_for(&self, email: &str) -> Option<(String, String)> {
        self.state()
            .user_by_email(email)
            .map(|user| (user.id.to_string(), handlers::reset_token(user.id)))
    }

    pub fn last_seen(&self, email: &str) -> Option<DateTime<Utc>> {
        self.state()
            .user_by_email(email)
            .and_then(|user| user.last_seen)
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.state()
            .user_by_email(email)
            .map(|user| user.password.clone())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Requests matching a method and exact path
    pub fn calls(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .cloned()
            .collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls("POST", "/api/token/refresh/").len()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }
}

async fn record_request(
    State(backend): State<MockBackend>,
    request: Request,
    next: Next,
) -> Response {
    let recorded = RecordedRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        authorization: request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };
    backend.state().requests.push(recorded);

    next.run(request).await
}
