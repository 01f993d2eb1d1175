use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use tracing::info;

use super::{read_json, segment, user_path};
use crate::credentials::SessionUser;
use crate::errors::{Error, Result};
use crate::gateway::{ApiRequest, Gateway};
use crate::models::{LoginResponse, Message, RegisterResponse, Registration};
use crate::storage::Scope;

const PASSWORD_SPECIALS: &str = "!@#$%^&*(),.?\":{}|<>";

fn login_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("Invalid login email regex"))
}

fn strict_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid registration email regex")
    })
}

fn invalid(message: &str) -> Error {
    Error::Invalid(message.to_string())
}

/// Checks run before a login request is sent
pub fn validate_login(email: &str, password: &str) -> Result<()> {
    if email.is_empty() {
        return Err(invalid("Email is required"));
    }
    if !login_email_re().is_match(email) {
        return Err(invalid("Email is invalid"));
    }
    if password.is_empty() {
        return Err(invalid("Password is required"));
    }
    if password.chars().count() < 6 {
        return Err(invalid("Password must be at least 6 characters"));
    }
    Ok(())
}

fn password_strength(password: &str, require_special: bool) -> Result<()> {
    if password.trim().is_empty() {
        return Err(invalid("Password is required"));
    }
    if password.chars().count() < 8 {
        return Err(invalid("Password must be at least 8 characters"));
    }
    if !password.chars().any(|ch| ch.is_ascii_uppercase()) {
        return Err(invalid("Password must contain at least one uppercase letter"));
    }
    if !password.chars().any(|ch| ch.is_ascii_digit()) {
        return Err(invalid("Password must contain at least one number"));
    }
    if require_special && !password.chars().any(|ch| PASSWORD_SPECIALS.contains(ch)) {
        return Err(invalid("Password must contain at least one special character"));
    }
    Ok(())
}

/// Rules for a password being set: reset and change
pub fn validate_new_password(password: &str, password2: &str) -> Result<()> {
    password_strength(password, false)?;
    if password != password2 {
        return Err(invalid("Passwords do not match"));
    }
    Ok(())
}

/// Registration is stricter than a reset: a special character is also required
pub fn validate_registration(registration: &Registration) -> Result<()> {
    if registration.name.trim().is_empty() {
        return Err(invalid("Name is required"));
    }
    if registration.email.is_empty() {
        return Err(invalid("Email is required"));
    }
    if !strict_email_re().is_match(&registration.email) {
        return Err(invalid("Invalid email format"));
    }
    password_strength(&registration.password, true)?;
    if registration.password != registration.password2 {
        return Err(invalid("Passwords do not match"));
    }
    if !registration.tc {
        return Err(invalid("You must agree to the terms"));
    }
    Ok(())
}

/// Create an account. Does not sign in; the caller logs in afterwards.
pub async fn register(gateway: &Gateway, registration: &Registration) -> Result<RegisterResponse> {
    validate_registration(registration)?;

    let request = ApiRequest::post(user_path("register/")).json(registration)?;
    let response = read_json(gateway.send_public(request).await?).await?;
    info!("Registered {}", registration.email);
    Ok(response)
}

/// Sign in and store the credentials: `remember` keeps them across restarts,
/// otherwise they last for this process only.
pub async fn login(
    gateway: &Gateway,
    email: &str,
    password: &str,
    remember: bool,
) -> Result<LoginResponse> {
    validate_login(email, password)?;

    let request = ApiRequest::post(user_path("login/"))
        .json(&json!({ "email": email, "password": password }))?;
    let login: LoginResponse = read_json(gateway.send_public(request).await?).await?;

    let user = SessionUser {
        email: login
            .email
            .clone()
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| email.to_string()),
        name: login.name.clone().filter(|name| !name.is_empty()),
        is_admin: login.is_admin,
    };
    let scope = if remember {
        Scope::Persistent
    } else {
        Scope::Session
    };
    gateway.credentials().save_login(scope, &login.token, &user)?;

    Ok(login)
}

/// Forget the stored session. The backend keeps no server-side session to end.
pub fn logout(gateway: &Gateway) -> Result<()> {
    gateway.credentials().sign_out()
}

pub async fn change_password(gateway: &Gateway, password: &str, password2: &str) -> Result<Message> {
    validate_new_password(password, password2)?;

    let request = ApiRequest::post(user_path("change-password/"))
        .json(&json!({ "password": password, "password2": password2 }))?;
    read_json(gateway.send(request).await?).await
}

pub async fn send_reset_email(gateway: &Gateway, email: &str) -> Result<Message> {
    if !strict_email_re().is_match(email) {
        return Err(invalid("Invalid email format"));
    }

    let request =
        ApiRequest::post(user_path("send-reset-password-email/")).json(&json!({ "email": email }))?;
    read_json(gateway.send_public(request).await?).await
}

/// Complete a reset with the `uid`/`token` pair from the reset email
pub async fn reset_password(
    gateway: &Gateway,
    uid: &str,
    token: &str,
    password: &str,
    password2: &str,
) -> Result<Message> {
    validate_new_password(password, password2)?;

    let path = user_path(&format!("reset-password/{}/{}/", segment(uid), segment(token)));
    let request =
        ApiRequest::post(path).json(&json!({ "password": password, "password2": password2 }))?;
    read_json(gateway.send_public(request).await?).await
}
