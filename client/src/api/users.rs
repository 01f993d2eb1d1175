use super::{read_empty, read_json, segment, user_path};
use crate::errors::Result;
use crate::gateway::{ApiRequest, Gateway};
use crate::models::{AdminUser, AdminUserUpdate, HeartbeatAck, Profile, ProfileUpdate};

/// The signed-in user's profile, including their notes
pub async fn own_profile(gateway: &Gateway) -> Result<Profile> {
    read_json(gateway.send(ApiRequest::get(user_path("profile/"))).await?).await
}

pub async fn update_profile(gateway: &Gateway, update: &ProfileUpdate) -> Result<Profile> {
    let request = ApiRequest::patch(user_path("profile/")).json(update)?;
    read_json(gateway.send(request).await?).await
}

/// Public profile by username (email) or display name
pub async fn public_profile(gateway: &Gateway, username: &str) -> Result<Profile> {
    let path = user_path(&format!("profile/{}/", segment(username)));
    read_json(gateway.send(ApiRequest::get(path)).await?).await
}

pub async fn user_by_id(gateway: &Gateway, user_id: u64) -> Result<Profile> {
    let path = user_path(&format!("users/{user_id}/"));
    read_json(gateway.send(ApiRequest::get(path)).await?).await
}

/// Admin listing. Without `include_all` only users who have logged in are returned.
pub async fn admin_list(gateway: &Gateway, include_all: bool) -> Result<Vec<AdminUser>> {
    let mut request = ApiRequest::get(user_path("admin/users/"));
    if include_all {
        request = request.query("all", "1");
    }
    read_json(gateway.send(request).await?).await
}

pub async fn admin_update(gateway: &Gateway, user_id: u64, update: &AdminUserUpdate) -> Result<AdminUser> {
    let request = ApiRequest::patch(user_path(&format!("admin/users/{user_id}/"))).json(update)?;
    read_json(gateway.send(request).await?).await
}

pub async fn admin_delete(gateway: &Gateway, user_id: u64) -> Result<()> {
    let request = ApiRequest::delete(user_path(&format!("admin/users/{user_id}/")));
    read_empty(gateway.send(request).await?).await
}

/// Mark the signed-in user as online
pub async fn heartbeat(gateway: &Gateway) -> Result<HeartbeatAck> {
    read_json(gateway.send(ApiRequest::post(user_path("heartbeat/"))).await?).await
}
