//! Search with a local fallback, plus the feed filtering and ordering helpers.

use std::cmp::Reverse;
use std::str::FromStr;

use serde_json::Value;
use tracing::warn;

use crate::api::user_path;
use crate::errors::Error;
use crate::gateway::{ApiRequest, Gateway};
use crate::models::{Note, SearchHit};

/// Which note field a local search matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchField {
    Title,
    Category,
    /// Author display name, else username
    User,
    #[default]
    All,
}

impl FromStr for SearchField {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "title" => Ok(SearchField::Title),
            "category" => Ok(SearchField::Category),
            "user" | "author" => Ok(SearchField::User),
            "all" => Ok(SearchField::All),
            other => Err(Error::Invalid(format!("Unknown search field {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchResults {
    /// Hits ranked by the backend
    Remote(Vec<SearchHit>),
    /// The backend was unusable; these notes matched locally
    Local(Vec<Note>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Remote(hits) => hits.len(),
            SearchResults::Local(notes) => notes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn matches(note: &Note, needle: &str, field: SearchField) -> bool {
    let title = || contains(&note.title, needle);
    let category = || contains(&note.category, needle);
    let user = || note.author().is_some_and(|author| contains(author, needle));

    match field {
        SearchField::Title => title(),
        SearchField::Category => category(),
        SearchField::User => user(),
        SearchField::All => title() || category() || user(),
    }
}

/// Case-insensitive substring match over `notes`
pub fn filter_local(notes: &[Note], query: &str, field: SearchField) -> Vec<Note> {
    let needle = query.to_lowercase();
    notes
        .iter()
        .filter(|note| matches(note, &needle, field))
        .cloned()
        .collect()
}

/// Keep notes whose category equals `category` exactly; an empty category keeps all
pub fn filter_by_category(notes: &[Note], category: &str) -> Vec<Note> {
    notes
        .iter()
        .filter(|note| category.is_empty() || note.category == category)
        .cloned()
        .collect()
}

/// Newest first by last update (creation time when never updated), then by id
pub fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by_key(|note| (Reverse(note.updated_at.or(note.created_at)), Reverse(note.id)));
}

/// What the home feed shows for a category and free-text query
pub fn feed_view(notes: &[Note], category: &str, query: &str) -> Vec<Note> {
    let mut view = filter_by_category(notes, category);
    if !query.is_empty() {
        view = filter_local(&view, query, SearchField::All);
    }
    sort_newest_first(&mut view);
    view
}

/// Ask the backend first; fall back to filtering `notes` locally when the
/// endpoint errors, answers with something other than JSON, or returns an
/// unexpected shape.
pub async fn search_with_fallback(
    gateway: &Gateway,
    query: &str,
    field: SearchField,
    notes: &[Note],
) -> SearchResults {
    if query.is_empty() {
        return SearchResults::Remote(Vec::new());
    }

    let request = ApiRequest::get(user_path("search_notes/")).query("q", query);
    let response = match gateway.send(request).await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!("Search endpoint returned HTTP {}", response.status());
            return SearchResults::Local(filter_local(notes, query, field));
        }
        Err(err) => {
            warn!("Search request failed: {}", err);
            return SearchResults::Local(filter_local(notes, query, field));
        }
    };

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => {
            warn!("Could not read search response: {}", err);
            return SearchResults::Local(filter_local(notes, query, field));
        }
    };

    match parse_hits(&body) {
        Some(hits) => SearchResults::Remote(hits),
        None => SearchResults::Local(filter_local(notes, query, field)),
    }
}

fn parse_hits(body: &[u8]) -> Option<Vec<SearchHit>> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            warn!("Search endpoint returned non-JSON, searching locally");
            return None;
        }
    };

    match value {
        Value::Array(_) => serde_json::from_value(value)
            .map_err(|err| warn!("Unexpected search hit shape: {}", err))
            .ok(),
        Value::Object(ref map) if map.contains_key("error") => {
            warn!("Search endpoint reported an error: {}", map["error"]);
            None
        }
        _ => {
            warn!("Unexpected search response shape, searching locally");
            None
        }
    }
}
