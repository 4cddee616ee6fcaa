/*!
Password checking and bearer-key issuance.

Passwords are stored as bcrypt hashes in the `users` table; bearer keys are
HS256 JWTs carrying the user's id and role, good for 24 hours. Nothing here
touches the database: the login handler fetches the user row, verifies the
password against its hash, and asks `Auth` for a key; the authentication
middleware asks `Auth` to check the key on every protected request.
*/
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::user::User;

/// bcrypt work factor. Matches what the rest of the deployment's tooling
/// was already writing into the users table.
const BCRYPT_COST: u32 = 10;

const KEY_LIFETIME: Duration = Duration::hours(24);

#[derive(Debug, PartialEq)]
pub struct AuthError(String);

impl AuthError {
    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(e: bcrypt::BcryptError) -> AuthError {
        AuthError(format!("bcrypt: {}", &e))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> AuthError {
        AuthError(format!("jwt: {}", &e))
    }
}

/// What a bearer key asserts about its holder.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// `users.id` of the holder.
    pub sub: i64,
    pub role: String,
    pub exp: u64,
}

/// Outcome of checking a presented bearer key.
#[derive(Debug)]
pub enum AuthResult {
    Claims(Claims),
    InvalidKey,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let h = bcrypt::hash(password, BCRYPT_COST)?;
    Ok(h)
}

/// `true` iff `password` matches `pwhash`. An unparseable hash counts as
/// a mismatch rather than an error; the caller only cares whether to let
/// the login through.
pub fn check_password(password: &str, pwhash: &str) -> bool {
    bcrypt::verify(password, pwhash).unwrap_or(false)
}

pub struct Auth {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Auth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a fresh bearer key for `user`.
    pub fn issue_key(&self, user: &User) -> Result<String, AuthError> {
        log::trace!("Auth::issue_key( [ user {} ] ) called.", &user.id);

        let exp = OffsetDateTime::now_utc() + KEY_LIFETIME;
        let claims = Claims {
            sub: user.id,
            role: user.role.to_string(),
            exp: exp.unix_timestamp() as u64,
        };

        let key = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)?;
        Ok(key)
    }

    /// Check a presented bearer key. Expired, malformed, and badly-signed
    /// keys all come back as `InvalidKey`; the distinction isn't one we
    /// report to the client.
    pub fn check_key(&self, key: &str) -> AuthResult {
        log::trace!("Auth::check_key(...) called.");

        match jsonwebtoken::decode::<Claims>(key, &self.decoding, &Validation::default()) {
            Ok(data) => AuthResult::Claims(data.claims),
            Err(e) => {
                log::trace!("    ...key rejected: {}", &e);
                AuthResult::InvalidKey
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;
    use crate::user::Role;

    fn fake_user(id: i64, role: Role) -> User {
        User {
            id,
            name: "Testy McTestface".to_owned(),
            email: "testy@example.edu".to_owned(),
            role,
            created_at: OffsetDateTime::now_utc(),
            pwhash: String::new(),
        }
    }

    #[test]
    fn password_round_trip() {
        ensure_logging();

        let h = hash_password("hunter2").unwrap();
        assert!(check_password("hunter2", &h));
        assert!(!check_password("hunter3", &h));
        assert!(!check_password("hunter2", "not even a bcrypt hash"));
    }

    #[test]
    fn key_round_trip() {
        ensure_logging();

        let auth = Auth::new("test-secret");
        let u = fake_user(17, Role::Teacher);
        let key = auth.issue_key(&u).unwrap();

        match auth.check_key(&key) {
            AuthResult::Claims(c) => {
                assert_eq!(c.sub, 17);
                assert_eq!(c.role, "Teacher");
            },
            x => panic!("expected Claims, got {:?}", &x),
        }
    }

    #[test]
    fn tampered_key_rejected() {
        ensure_logging();

        let auth = Auth::new("test-secret");
        let u = fake_user(17, Role::Student);
        let mut key = auth.issue_key(&u).unwrap();
        // Flip a character in the signature segment.
        let last = key.pop().unwrap();
        key.push(if last == 'A' { 'B' } else { 'A' });

        assert!(matches!(auth.check_key(&key), AuthResult::InvalidKey));
        assert!(matches!(
            Auth::new("other-secret").check_key(&auth.issue_key(&u).unwrap()),
            AuthResult::InvalidKey
        ));
    }
}
