use actix_web::{http::header, HttpRequest};
use base64::{engine::general_purpose, Engine as _};
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    Absent,
    Malformed,
}

/// Reads `Authorization: Basic <base64(user:password)>` from the request.
pub fn extract_basic_credentials(request: &HttpRequest) -> Result<Credentials, CredentialError> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(CredentialError::Absent)?;
    let value = value.to_str().map_err(|_| CredentialError::Malformed)?;
    parse_basic_credentials(value)
}

pub fn parse_basic_credentials(value: &str) -> Result<Credentials, CredentialError> {
    let (scheme, encoded) = value
        .trim()
        .split_once(' ')
        .ok_or(CredentialError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(CredentialError::Malformed);
    }

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| CredentialError::Malformed)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::Malformed)?;
    let (username, password) = decoded.split_once(':').ok_or(CredentialError::Malformed)?;

    Ok(Credentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

pub fn verify_password(provided: &str, stored: &SecretString) -> bool {
    // Passwords are kept as plain secrets; no hashing in this service.
    provided == stored.expose_secret()
}

/// Returns the reason the password is rejected, if any.
pub fn check_password_policy(password: &str, min_length: usize) -> Result<(), String> {
    if password.chars().count() < min_length {
        return Err(format!(
            "Password must be at least {} characters long",
            min_length
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number".to_owned());
    }
    Ok(())
}
