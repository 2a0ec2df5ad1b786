use jsonwebtoken::{DecodingKey, Validation, decode};

use quad_types::api::Claims;

/// Verify an HS256 token issued by the identity service.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
