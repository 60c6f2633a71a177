use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// JWT claims minted by the token exchange.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub exp: usize,  // expiration time
    pub iat: usize,  // issued at
    pub iss: String, // issuer
    pub aud: String, // audience
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

/// Body of POST /auth/signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

/// Echo of the accepted signup; deliberately excludes the confirmation code,
/// which only ever travels by mail.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub username: String,
    pub email: String,
}

/// Body of POST /auth/token.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub confirmation_code: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}
