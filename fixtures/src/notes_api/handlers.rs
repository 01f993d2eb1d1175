use std::collections::{HashMap, HashSet};

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::{tokens, AttachmentRecord, BackendState, MockBackend, NoteRecord, RefreshMode, UserRecord};

type HandlerResult = Result<Response, Response>;

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn token_not_valid() -> Response {
    reply(
        StatusCode::UNAUTHORIZED,
        json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid",
        }),
    )
}

fn not_found(message: &str) -> Response {
    reply(StatusCode::NOT_FOUND, json!({ "error": message }))
}

fn forbidden() -> Response {
    reply(
        StatusCode::FORBIDDEN,
        json!({ "detail": "You do not have permission to perform this action." }),
    )
}

fn non_field_error(message: &str) -> Response {
    reply(
        StatusCode::BAD_REQUEST,
        json!({ "errors": { "non_field_errors": [message] } }),
    )
}

/// Resolve the caller from the bearer header.
/// A bad token is rejected even on public routes, the way JWT authentication does.
fn caller(state: &BackendState, headers: &HeaderMap) -> Result<Option<u64>, Response> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(token_not_valid)?;

    if state.reject_all_access || state.revoked_access.contains(token) {
        return Err(token_not_valid());
    }

    let claims = tokens::verify_access_token(token).ok_or_else(token_not_valid)?;
    match state.user(claims.user_id) {
        Some(user) if user.is_active => Ok(Some(user.id)),
        _ => Err(token_not_valid()),
    }
}

fn require_user(state: &BackendState, headers: &HeaderMap) -> Result<u64, Response> {
    caller(state, headers)?.ok_or_else(|| {
        reply(
            StatusCode::UNAUTHORIZED,
            json!({ "detail": "Authentication credentials were not provided." }),
        )
    })
}

fn require_admin(state: &BackendState, headers: &HeaderMap) -> Result<u64, Response> {
    let user_id = require_user(state, headers)?;
    match state.user(user_id) {
        Some(user) if user.is_admin => Ok(user_id),
        _ => Err(forbidden()),
    }
}

pub(crate) fn slugify(title: &str, id: u64) -> String {
    let mut slug = String::new();
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    format!("{slug}-{id}")
}

pub(crate) fn reset_token(user_id: u64) -> String {
    format!("reset-{user_id}-fixture")
}

fn is_online(user: &UserRecord) -> bool {
    user.last_seen
        .map(|seen| (Utc::now() - seen).num_seconds() < 120)
        .unwrap_or(false)
}

fn note_json(state: &BackendState, note: &NoteRecord, viewer: Option<u64>) -> Value {
    let owner = state.user(note.owner);
    let ratings_count = note.ratings.len();
    let avg_rating = if ratings_count == 0 {
        Value::Null
    } else {
        let sum: u32 = note.ratings.values().map(|value| u32::from(*value)).sum();
        json!((f64::from(sum) / ratings_count as f64 * 10.0).round() / 10.0)
    };

    let attachments: Vec<Value> = note
        .attachments
        .iter()
        .map(|attachment| {
            json!({
                "id": attachment.id,
                "file": attachment.file,
                "file_url": format!("/media/{}", attachment.file),
                "uploaded_at": attachment.uploaded_at,
            })
        })
        .collect();

    json!({
        "id": note.id,
        "title": note.title,
        "body": note.body,
        "slug": note.slug,
        "category": note.category,
        "created_at": note.created_at,
        "updated_at": note.updated_at,
        "attachments": attachments,
        "username": owner.map(|user| user.email.clone()),
        "name": owner.map(|user| user.name.clone()),
        "avg_rating": avg_rating,
        "ratings_count": ratings_count,
        "user_rating": viewer.and_then(|viewer| note.ratings.get(&viewer).copied()),
        "is_bookmarked": viewer.is_some_and(|viewer| note.bookmarks.contains(&viewer)),
    })
}

/// Newest first: updated_at, then created_at, then id
fn notes_json<'a>(
    state: &BackendState,
    notes: impl Iterator<Item = &'a NoteRecord>,
    viewer: Option<u64>,
) -> Value {
    let mut notes: Vec<&NoteRecord> = notes.collect();
    notes.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then(b.created_at.cmp(&a.created_at))
            .then(b.id.cmp(&a.id))
    });
    Value::Array(
        notes
            .into_iter()
            .map(|note| note_json(state, note, viewer))
            .collect(),
    )
}

fn profile_json(state: &BackendState, user: &UserRecord, viewer: Option<u64>) -> Value {
    let own_notes = state.notes.iter().filter(|note| note.owner == user.id);
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "bio": user.bio,
        "created_at": user.created_at,
        "last_login": user.last_login,
        "last_seen": user.last_seen,
        "is_admin": user.is_admin,
        "is_active": user.is_active,
        "online": is_online(user),
        "notes_count": state.notes.iter().filter(|note| note.owner == user.id).count(),
        "notes": notes_json(state, own_notes, viewer),
    })
}

fn admin_user_json(state: &BackendState, user: &UserRecord) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "is_admin": user.is_admin,
        "is_active": user.is_active,
        "created_at": user.created_at,
        "last_login": user.last_login,
        "last_seen": user.last_seen,
        "online": is_online(user),
        "notes_count": state.notes.iter().filter(|note| note.owner == user.id).count(),
    })
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y"
        ),
        Value::Null => false,
        _ => true,
    }
}

pub async fn refresh_token(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    let (mode, delay) = {
        let state = backend.state();
        (state.refresh_mode, state.refresh_delay)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    match mode {
        RefreshMode::Fail(status) => {
            return reply(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                json!({ "detail": "Token is invalid or expired", "code": "token_not_valid" }),
            )
        }
        RefreshMode::Malformed => return reply(StatusCode::OK, json!({ "detail": "refreshed" })),
        RefreshMode::Normal => {}
    }

    let Some(refresh) = str_field(&body, "refresh") else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "refresh": ["This field is required."] }),
        );
    };

    let mut state = backend.state();
    let Some(user_id) = state.refresh_tokens.get(&refresh).copied() else {
        return reply(
            StatusCode::UNAUTHORIZED,
            json!({ "detail": "Token is invalid or expired", "code": "token_not_valid" }),
        );
    };

    let serial = state.next_id();
    let access = tokens::mint_access_token(user_id, tokens::ACCESS_TOKEN_TTL_SECS, serial);
    reply(StatusCode::OK, json!({ "access": access }))
}

pub async fn register(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    let email = str_field(&body, "email").unwrap_or_default();
    let name = str_field(&body, "name").unwrap_or_default();
    let password = str_field(&body, "password").unwrap_or_default();
    let password2 = str_field(&body, "password2").unwrap_or_default();

    if email.is_empty() || password.is_empty() {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "errors": { "email": ["This field is required."] } }),
        );
    }
    if password != password2 {
        return non_field_error("Password and Confirm Password doesn't match");
    }

    let mut state = backend.state();
    if state.user_by_email(&email).is_some() {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "errors": { "email": ["user with this Email already exists."] } }),
        );
    }

    let id = state.next_id();
    state.users.push(UserRecord {
        id,
        email,
        name,
        bio: String::new(),
        password,
        is_admin: false,
        is_active: true,
        created_at: Utc::now(),
        last_login: None,
        last_seen: None,
    });
    let (access, refresh) = state.issue_tokens(id);

    reply(
        StatusCode::CREATED,
        json!({
            "token": { "access": access, "refresh": refresh },
            "msg": "Registration Successful",
        }),
    )
}

pub async fn login(State(backend): State<MockBackend>, Json(body): Json<Value>) -> Response {
    let email = str_field(&body, "email").unwrap_or_default();
    let password = str_field(&body, "password").unwrap_or_default();

    let mut state = backend.state();
    let found = state.users.iter().position(|user| {
        user.email.eq_ignore_ascii_case(&email) && user.password == password && user.is_active
    });
    let Some(index) = found else {
        return reply(
            StatusCode::NOT_FOUND,
            json!({ "errors": { "non_field_errors": ["Email or Password is not Valid"] } }),
        );
    };

    state.users[index].last_login = Some(Utc::now());
    let user = state.users[index].clone();
    let (access, refresh) = state.issue_tokens(user.id);

    reply(
        StatusCode::OK,
        json!({
            "token": { "access": access, "refresh": refresh },
            "email": user.email,
            "name": user.name,
            "is_admin": user.is_admin,
            "is_active": user.is_active,
            "msg": "Login Success",
        }),
    )
}

pub async fn own_profile(State(backend): State<MockBackend>, headers: HeaderMap) -> HandlerResult {
    let state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let user = state.user(user_id).ok_or_else(token_not_valid)?;
    Ok(reply(StatusCode::OK, profile_json(&state, user, Some(user_id))))
}

pub async fn update_profile(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;

    if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
        if let Some(name) = str_field(&body, "name") {
            user.name = name;
        }
        if let Some(email) = str_field(&body, "email") {
            user.email = email;
        }
        if let Some(bio) = str_field(&body, "bio") {
            user.bio = bio;
        }
    }

    let user = state.user(user_id).ok_or_else(token_not_valid)?;
    Ok(reply(StatusCode::OK, profile_json(&state, user, Some(user_id))))
}

pub async fn public_profile(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> HandlerResult {
    let state = backend.state();
    let viewer = caller(&state, &headers)?;
    let user = state
        .user_by_username(&username)
        .ok_or_else(|| not_found("User not found"))?;
    Ok(reply(StatusCode::OK, profile_json(&state, user, viewer)))
}

pub async fn user_by_id(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(user_id): Path<u64>,
) -> HandlerResult {
    let state = backend.state();
    let viewer = caller(&state, &headers)?;
    let user = state.user(user_id).ok_or_else(|| not_found("User not found"))?;
    Ok(reply(StatusCode::OK, profile_json(&state, user, viewer)))
}

pub async fn change_password(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let password = str_field(&body, "password").unwrap_or_default();
    if password.is_empty() || Some(&password) != str_field(&body, "password2").as_ref() {
        return Err(non_field_error("Password and Confirm Password doesn't match"));
    }

    if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
        user.password = password;
    }
    Ok(reply(StatusCode::OK, json!({ "msg": "Password Changed Successfully" })))
}

pub async fn send_reset_email(
    State(backend): State<MockBackend>,
    Json(body): Json<Value>,
) -> Response {
    let email = str_field(&body, "email").unwrap_or_default();
    if backend.state().user_by_email(&email).is_none() {
        return non_field_error("You are not a Registered User");
    }
    reply(
        StatusCode::OK,
        json!({ "msg": "Password Reset link sent. Please check your Email" }),
    )
}

pub async fn reset_password(
    State(backend): State<MockBackend>,
    Path((uid, token)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let password = str_field(&body, "password").unwrap_or_default();
    if password.is_empty() || Some(&password) != str_field(&body, "password2").as_ref() {
        return non_field_error("Password and Confirm Password doesn't match");
    }

    let Some(user_id) = uid.parse::<u64>().ok().filter(|id| token == reset_token(*id)) else {
        return non_field_error("Token is not Valid or Expired");
    };

    let mut state = backend.state();
    match state.users.iter_mut().find(|user| user.id == user_id) {
        Some(user) => {
            user.password = password;
            reply(StatusCode::OK, json!({ "msg": "Password Reset Successfully" }))
        }
        None => non_field_error("Token is not Valid or Expired"),
    }
}

pub async fn list_notes(State(backend): State<MockBackend>, headers: HeaderMap) -> HandlerResult {
    let state = backend.state();
    let viewer = caller(&state, &headers)?;
    Ok(reply(StatusCode::OK, notes_json(&state, state.notes.iter(), viewer)))
}

pub async fn my_notes(State(backend): State<MockBackend>, headers: HeaderMap) -> HandlerResult {
    let state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let notes = state.notes.iter().filter(|note| note.owner == user_id);
    Ok(reply(StatusCode::OK, notes_json(&state, notes, Some(user_id))))
}

pub async fn bookmarked_notes(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
) -> HandlerResult {
    let state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let notes = state
        .notes
        .iter()
        .filter(|note| note.bookmarks.contains(&user_id));
    Ok(reply(StatusCode::OK, notes_json(&state, notes, Some(user_id))))
}

pub async fn notes_by_user(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> HandlerResult {
    let state = backend.state();
    let viewer = caller(&state, &headers)?;
    let owner = state
        .user_by_username(&username)
        .map(|user| user.id)
        .ok_or_else(|| not_found("User not found"))?;
    let notes = state.notes.iter().filter(|note| note.owner == owner);
    Ok(reply(StatusCode::OK, notes_json(&state, notes, viewer)))
}

pub async fn note_detail(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> HandlerResult {
    let state = backend.state();
    let viewer = caller(&state, &headers)?;
    let note = state
        .notes
        .iter()
        .find(|note| note.slug == slug)
        .ok_or_else(|| not_found("Note not found"))?;
    Ok(reply(StatusCode::OK, note_json(&state, note, viewer)))
}

#[derive(Default)]
struct NoteForm {
    title: Option<String>,
    body: Option<String>,
    category: Option<String>,
    existing_attachments: Option<String>,
    files: Vec<(String, Vec<u8>)>,
}

fn bad_multipart(err: MultipartError) -> Response {
    reply(StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
}

async fn read_note_form(mut multipart: Multipart) -> Result<NoteForm, Response> {
    let mut form = NoteForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(bad_multipart)?;
        let text = || String::from_utf8_lossy(&bytes).into_owned();

        match name.as_str() {
            "title" => form.title = Some(text()),
            "body" => form.body = Some(text()),
            "category" => form.category = Some(text()),
            "existingAttachments" => form.existing_attachments = Some(text()),
            "attachments" => form.files.push((
                file_name.unwrap_or_else(|| "upload.bin".to_string()),
                bytes.to_vec(),
            )),
            _ => {}
        }
    }

    Ok(form)
}

/// Attachment ids to keep: a JSON list of ids or of `{ "id": .. }` objects
fn keep_ids(raw: &str) -> Option<HashSet<u64>> {
    let items: Vec<Value> = serde_json::from_str(raw).ok()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_u64().or_else(|| item.get("id")?.as_u64()))
            .collect(),
    )
}

fn new_attachments(state: &mut BackendState, files: Vec<(String, Vec<u8>)>) -> Vec<AttachmentRecord> {
    files
        .into_iter()
        .map(|(file_name, content)| AttachmentRecord {
            id: state.next_id(),
            file: format!("attachments/{file_name}"),
            content,
            uploaded_at: Utc::now(),
        })
        .collect()
}

pub async fn create_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    multipart: Multipart,
) -> HandlerResult {
    let user_id = require_user(&backend.state(), &headers)?;
    let form = read_note_form(multipart).await?;

    let title = form.title.filter(|title| !title.trim().is_empty()).ok_or_else(|| {
        reply(
            StatusCode::BAD_REQUEST,
            json!({ "title": ["This field is required."] }),
        )
    })?;

    let mut state = backend.state();
    let id = state.next_id();
    let attachments = new_attachments(&mut state, form.files);
    let now = Utc::now();
    let note = NoteRecord {
        id,
        owner: user_id,
        slug: slugify(&title, id),
        title,
        body: form.body.unwrap_or_default(),
        category: form.category.unwrap_or_default(),
        created_at: now,
        updated_at: now,
        attachments,
        ratings: HashMap::new(),
        bookmarks: HashSet::new(),
    };
    let body = note_json(&state, &note, Some(user_id));
    state.notes.push(note);

    Ok(reply(StatusCode::CREATED, body))
}

/// Locate a note the caller may modify: owners and admins only
fn editable_note(state: &BackendState, headers: &HeaderMap, slug: &str) -> Result<(usize, u64), Response> {
    let user_id = require_user(state, headers)?;
    let index = state
        .notes
        .iter()
        .position(|note| note.slug == slug)
        .ok_or_else(|| not_found("Note not found"))?;

    let is_admin = state.user(user_id).is_some_and(|user| user.is_admin);
    if state.notes[index].owner != user_id && !is_admin {
        return Err(reply(
            StatusCode::FORBIDDEN,
            json!({ "error": "You do not have permission to modify this note" }),
        ));
    }
    Ok((index, user_id))
}

pub async fn update_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> HandlerResult {
    editable_note(&backend.state(), &headers, &slug)?;
    let form = read_note_form(multipart).await?;

    let mut state = backend.state();
    let (index, user_id) = editable_note(&state, &headers, &slug)?;
    let added = new_attachments(&mut state, form.files);
    let keep = form.existing_attachments.as_deref().and_then(keep_ids);

    let note = &mut state.notes[index];
    if let Some(title) = form.title {
        note.title = title;
    }
    if let Some(body) = form.body {
        note.body = body;
    }
    if let Some(category) = form.category {
        note.category = category;
    }
    if let Some(keep) = keep {
        note.attachments.retain(|attachment| keep.contains(&attachment.id));
    }
    note.attachments.extend(added);
    note.updated_at = Utc::now();

    let body = note_json(&state, &state.notes[index], Some(user_id));
    Ok(reply(StatusCode::OK, body))
}

pub async fn delete_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> HandlerResult {
    let mut state = backend.state();
    let (index, _) = editable_note(&state, &headers, &slug)?;
    state.notes.remove(index);
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn note_index(state: &BackendState, slug: &str) -> Result<usize, Response> {
    state
        .notes
        .iter()
        .position(|note| note.slug == slug)
        .ok_or_else(|| reply(StatusCode::NOT_FOUND, json!({ "detail": "Not found." })))
}

pub async fn rate_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let value = body
        .get("value")
        .and_then(Value::as_u64)
        .filter(|value| (1..=5).contains(value))
        .ok_or_else(|| {
            reply(
                StatusCode::BAD_REQUEST,
                json!({ "value": ["Ensure this value is between 1 and 5."] }),
            )
        })?;

    let index = note_index(&state, &slug)?;
    state.notes[index].ratings.insert(user_id, value as u8);

    let body = note_json(&state, &state.notes[index], Some(user_id));
    Ok(reply(StatusCode::OK, body))
}

pub async fn unrate_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let index = note_index(&state, &slug)?;
    state.notes[index].ratings.remove(&user_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn bookmark_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let index = note_index(&state, &slug)?;
    state.notes[index].bookmarks.insert(user_id);

    let body = note_json(&state, &state.notes[index], Some(user_id));
    Ok(reply(StatusCode::OK, body))
}

pub async fn unbookmark_note(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let index = note_index(&state, &slug)?;
    state.notes[index].bookmarks.remove(&user_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn search_notes(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    let state = backend.state();
    if state.search_broken {
        return Ok((
            StatusCode::NOT_FOUND,
            Html("<!doctype html><title>Not Found</title><h1>Not Found</h1>"),
        )
            .into_response());
    }

    let query = params.get("q").map(|q| q.trim()).unwrap_or_default();
    if query.is_empty() {
        return Ok(reply(StatusCode::OK, json!([])));
    }

    // Search is scoped to the caller's own notes; anonymous callers hit the error path
    let Some(user_id) = caller(&state, &headers)? else {
        return Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Something went wrong" }),
        ));
    };

    let needle = query.to_lowercase();
    let mut hits: Vec<&NoteRecord> = state
        .notes
        .iter()
        .filter(|note| note.owner == user_id)
        .filter(|note| {
            note.title.to_lowercase().contains(&needle)
                || note.body.to_lowercase().contains(&needle)
                || note.category.to_lowercase().contains(&needle)
        })
        .collect();
    hits.sort_by(|a, b| b.id.cmp(&a.id));

    let results: Vec<Value> = hits
        .into_iter()
        .take(10)
        .map(|note| {
            json!({
                "id": note.id,
                "title": note.title,
                "body_snippet": note.body.chars().take(50).collect::<String>(),
            })
        })
        .collect();

    Ok(reply(StatusCode::OK, Value::Array(results)))
}

pub async fn download_attachment(
    State(backend): State<MockBackend>,
    Path(pk): Path<u64>,
) -> Response {
    let state = backend.state();
    let attachment = state
        .notes
        .iter()
        .flat_map(|note| note.attachments.iter())
        .find(|attachment| attachment.id == pk);

    match attachment {
        Some(attachment) => {
            let file_name = attachment
                .file
                .rsplit('/')
                .next()
                .unwrap_or(&attachment.file)
                .to_string();
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                attachment.content.clone(),
            )
                .into_response()
        }
        None => reply(StatusCode::NOT_FOUND, json!({ "detail": "File not found" })),
    }
}

pub async fn admin_users(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    let state = backend.state();
    require_admin(&state, &headers)?;

    let show_all = matches!(
        params.get("all").map(String::as_str),
        Some("1" | "true" | "True")
    );
    let mut users: Vec<&UserRecord> = state
        .users
        .iter()
        .filter(|user| show_all || user.last_login.is_some())
        .collect();
    users.sort_by(|a, b| {
        b.last_login
            .cmp(&a.last_login)
            .then(b.created_at.cmp(&a.created_at))
    });

    let body: Vec<Value> = users
        .into_iter()
        .map(|user| admin_user_json(&state, user))
        .collect();
    Ok(reply(StatusCode::OK, Value::Array(body)))
}

pub async fn admin_update_user(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(user_id): Path<u64>,
    Json(body): Json<Value>,
) -> HandlerResult {
    let mut state = backend.state();
    let admin_id = require_admin(&state, &headers)?;

    let is_admin = body.get("is_admin").map(parse_bool);
    let is_active = body.get("is_active").map(parse_bool);

    if user_id == admin_id {
        if is_admin == Some(false) {
            return Err(reply(
                StatusCode::BAD_REQUEST,
                json!({ "detail": "You cannot revoke your own admin role." }),
            ));
        }
        if is_active == Some(false) {
            return Err(reply(
                StatusCode::BAD_REQUEST,
                json!({ "detail": "You cannot deactivate your own account." }),
            ));
        }
    }

    let user = state
        .users
        .iter_mut()
        .find(|user| user.id == user_id)
        .ok_or_else(|| reply(StatusCode::NOT_FOUND, json!({ "detail": "Not found." })))?;
    if let Some(flag) = is_admin {
        user.is_admin = flag;
    }
    if let Some(flag) = is_active {
        user.is_active = flag;
    }

    let user = user.clone();
    Ok(reply(StatusCode::OK, admin_user_json(&state, &user)))
}

pub async fn admin_delete_user(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(user_id): Path<u64>,
) -> HandlerResult {
    let mut state = backend.state();
    let admin_id = require_admin(&state, &headers)?;
    if user_id == admin_id {
        return Err(reply(
            StatusCode::BAD_REQUEST,
            json!({ "detail": "You cannot delete your own account." }),
        ));
    }

    let before = state.users.len();
    state.users.retain(|user| user.id != user_id);
    if state.users.len() == before {
        return Err(reply(StatusCode::NOT_FOUND, json!({ "detail": "Not found." })));
    }
    state.notes.retain(|note| note.owner != user_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn heartbeat(State(backend): State<MockBackend>, headers: HeaderMap) -> HandlerResult {
    let mut state = backend.state();
    let user_id = require_user(&state, &headers)?;
    let now = Utc::now();
    if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
        user.last_seen = Some(now);
    }
    Ok(reply(StatusCode::OK, json!({ "ok": true, "last_seen": now })))
}
