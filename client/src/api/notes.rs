use std::path::Path;

use serde_json::json;

use super::{read_empty, read_json, segment, user_path};
use crate::errors::{ensure_success, Error, Result};
use crate::gateway::{ApiRequest, FormPart, Gateway};
use crate::models::{Note, NoteDraft, SearchHit};

/// Multipart field the backend reads uploaded files from
pub const ATTACHMENTS_FIELD: &str = "attachments";

fn note_path(slug: &str, suffix: &str) -> String {
    user_path(&format!("notes/{}/{suffix}", segment(slug)))
}

/// Load a file from disk as a note attachment
pub async fn attachment_from_path(path: &Path) -> Result<FormPart> {
    FormPart::from_path(ATTACHMENTS_FIELD, path).await
}

/// An in-memory file as a note attachment
pub fn attachment(file_name: impl Into<String>, bytes: Vec<u8>) -> FormPart {
    FormPart::file(ATTACHMENTS_FIELD, file_name, bytes)
}

fn draft_parts(draft: &NoteDraft) -> Vec<FormPart> {
    [
        ("title", &draft.title),
        ("body", &draft.body),
        ("category", &draft.category),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.as_ref().map(|value| FormPart::text(name, value.clone())))
    .collect()
}

/// The shared feed
pub async fn feed(gateway: &Gateway) -> Result<Vec<Note>> {
    read_json(gateway.send(ApiRequest::get(user_path("notes/"))).await?).await
}

/// Notes owned by the signed-in user
pub async fn mine(gateway: &Gateway) -> Result<Vec<Note>> {
    read_json(gateway.send(ApiRequest::get(user_path("notes/mine/"))).await?).await
}

pub async fn bookmarked(gateway: &Gateway) -> Result<Vec<Note>> {
    read_json(gateway.send(ApiRequest::get(user_path("notes/bookmarked/"))).await?).await
}

pub async fn by_user(gateway: &Gateway, username: &str) -> Result<Vec<Note>> {
    let path = user_path(&format!("notes/by-user/{}/", segment(username)));
    read_json(gateway.send(ApiRequest::get(path)).await?).await
}

pub async fn detail(gateway: &Gateway, slug: &str) -> Result<Note> {
    read_json(gateway.send(ApiRequest::get(note_path(slug, ""))).await?).await
}

pub async fn create(gateway: &Gateway, draft: &NoteDraft, attachments: Vec<FormPart>) -> Result<Note> {
    if draft.title.as_deref().map_or(true, |title| title.trim().is_empty()) {
        return Err(Error::Invalid("Title is required".to_string()));
    }

    let mut parts = draft_parts(draft);
    parts.extend(attachments);

    let request = ApiRequest::post(user_path("notes/")).multipart(parts);
    read_json(gateway.send(request).await?).await
}

/// Edit a note. Only attachments listed in `keep_attachments` survive; new
/// files in `attachments` are added alongside them.
pub async fn update(
    gateway: &Gateway,
    slug: &str,
    draft: &NoteDraft,
    keep_attachments: &[u64],
    attachments: Vec<FormPart>,
) -> Result<Note> {
    let mut parts = draft_parts(draft);
    parts.push(FormPart::text(
        "existingAttachments",
        serde_json::to_string(keep_attachments)?,
    ));
    parts.extend(attachments);

    let request = ApiRequest::put(note_path(slug, "")).multipart(parts);
    read_json(gateway.send(request).await?).await
}

pub async fn delete(gateway: &Gateway, slug: &str) -> Result<()> {
    read_empty(gateway.send(ApiRequest::delete(note_path(slug, ""))).await?).await
}

/// Rate a note from 1 to 5 stars
pub async fn rate(gateway: &Gateway, slug: &str, value: u8) -> Result<Note> {
    if !(1..=5).contains(&value) {
        return Err(Error::Invalid(format!("Rating must be between 1 and 5, got {value}")));
    }

    let request = ApiRequest::post(note_path(slug, "rate/")).json(&json!({ "value": value }))?;
    read_json(gateway.send(request).await?).await
}

pub async fn unrate(gateway: &Gateway, slug: &str) -> Result<()> {
    read_empty(gateway.send(ApiRequest::delete(note_path(slug, "rate/"))).await?).await
}

pub async fn bookmark(gateway: &Gateway, slug: &str) -> Result<Note> {
    read_json(gateway.send(ApiRequest::post(note_path(slug, "bookmark/"))).await?).await
}

pub async fn unbookmark(gateway: &Gateway, slug: &str) -> Result<()> {
    read_empty(gateway.send(ApiRequest::delete(note_path(slug, "bookmark/"))).await?).await
}

/// Backend search. Fails on anything other than a JSON list of hits; see
/// [`crate::search::search_with_fallback`] for the forgiving variant.
pub async fn search(gateway: &Gateway, query: &str) -> Result<Vec<SearchHit>> {
    let request = ApiRequest::get(user_path("search_notes/")).query("q", query);
    read_json(gateway.send(request).await?).await
}

/// Raw bytes of an attachment
pub async fn download_attachment(gateway: &Gateway, attachment_id: u64) -> Result<Vec<u8>> {
    let path = user_path(&format!("download/attachment/{attachment_id}/"));
    let response = ensure_success(gateway.send(ApiRequest::get(path)).await?).await?;
    Ok(response.bytes().await?.to_vec())
}
