use crate::errors::{AppError, ErrorType};
use crate::models::Role;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bearer token claims. The role is a snapshot taken at login; the auth
/// filter re-checks the store for the live role and active flag per request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize, // Expiration timestamp in seconds
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

pub fn issue_token(
    user_id: &str,
    role: Role,
    secret: &str,
    expires_in: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let issued_at = unix_now();

    let claims = Claims {
        id: user_id.to_string(),
        role,
        iat: issued_at as usize,
        exp: (issued_at + expires_in) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Accepts the raw header value (with or without the `Bearer ` prefix).
pub fn decode_token(authorization: &str, secret: &str) -> Result<Claims, AppError> {
    let token = authorization.trim_start_matches("Bearer ");

    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let decoded = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|_| AppError::new("Token is not valid", ErrorType::Unauthenticated))?;

    Ok(decoded.claims)
}

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|err| {
            AppError::new(
                &format!("Internal Error: {:#?}", err),
                ErrorType::Internal,
            )
        })?;

    Ok(hash.to_string())
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed_hash) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed_hash)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trip_keeps_subject_and_role() {
        let token = issue_token("507f1f77bcf86cd799439011", Role::Admin, SECRET, 8 * 3600).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert_eq!(claims.id, "507f1f77bcf86cd799439011");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 8 * 3600);
    }

    #[test]
    fn bearer_prefix_is_accepted() {
        let token = issue_token("abc", Role::Operator, SECRET, 3600).unwrap();
        let claims = decode_token(&format!("Bearer {}", token), SECRET).unwrap();
        assert_eq!(claims.role, Role::Operator);
    }

    #[test]
    fn expired_token_is_rejected() {
        // Expired well past the default validation leeway.
        let issued_at = (unix_now() - 7200) as usize;
        let claims = Claims {
            id: "abc".to_string(),
            role: Role::Operator,
            iat: issued_at,
            exp: issued_at + 60,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_ref()),
        )
        .unwrap();

        let err = decode_token(&token, SECRET).unwrap_err();
        assert_eq!(err.err_type, ErrorType::Unauthenticated);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = issue_token("abc", Role::Operator, SECRET, 3600).unwrap();
        assert!(decode_token(&token, "other-secret").is_err());

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(decode_token(&tampered, SECRET).is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("admin123").unwrap();
        assert_ne!(hash, "admin123");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("admin124", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("admin123", "not-a-phc-string"));
    }
}
