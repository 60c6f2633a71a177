use async_trait::async_trait;
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::dto::JwtKeys;
use crate::error::ApiError;
use crate::mailer::Mailer;
use crate::policy::Role;
use crate::users::repo::{NewUser, User};

const MAX_USERNAME_LEN: usize = 150;
const MAX_EMAIL_LEN: usize = 254;

/// 32-symbol alphabet without the lookalikes I, O, 0 and 1.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub(crate) const CODE_LEN: usize = 8;

const MAIL_SUBJECT: &str = "Confirmation code";

/// What the credential flow needs from the user store. `PgPool` is the real
/// backend; tests swap in an in-memory one.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, ApiError>;
    /// Create an unconfirmed user; a unique violation on username or email
    /// must surface as Conflict.
    async fn create_pending(&self, username: &str, email: &str) -> Result<User, ApiError>;
    async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError>;
    /// Clear and return the stored code in one step.
    async fn take_confirmation_code(&self, id: Uuid) -> Result<Option<String>, ApiError>;
}

#[async_trait]
impl CredentialStore for PgPool {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        User::find_by_username(self, username).await
    }

    async fn create_pending(&self, username: &str, email: &str) -> Result<User, ApiError> {
        User::create(
            self,
            NewUser {
                username,
                email,
                role: Role::User,
                bio: None,
                first_name: None,
                last_name: None,
            },
        )
        .await
    }

    async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError> {
        User::set_confirmation_code(self, id, code).await
    }

    async fn take_confirmation_code(&self, id: Uuid) -> Result<Option<String>, ApiError> {
        User::take_confirmation_code(self, id).await
    }
}

pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
    }
    // Length bounds count characters, not bytes.
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::Validation(
            "username must be between 1 and 150 characters".into(),
        ));
    }
    if username.eq_ignore_ascii_case("me") {
        return Err(ApiError::Validation("username \"me\" is reserved".into()));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(ApiError::Validation(
            "username contains forbidden characters".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    if email.chars().count() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(email) {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    Ok(())
}

/// Draws from the OS CSPRNG; the code is the only secret in the signup flow.
pub(crate) fn generate_confirmation_code() -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Signup: get-or-create the user for the exact (username, email) pair, then
/// issue a fresh confirmation code by mail. Calling it again for the same
/// pair reissues a code on the same record; a partial collision with a
/// different identity is a conflict.
pub async fn signup(
    store: &dyn CredentialStore,
    mailer: &dyn Mailer,
    username: &str,
    email: &str,
) -> Result<(), ApiError> {
    validate_username(username)?;
    validate_email(email)?;

    let user = match store.find_by_username(username).await? {
        Some(u) if u.email == email => u,
        Some(_) => {
            return Err(ApiError::Conflict(
                "username or email already registered".into(),
            ))
        }
        None => store.create_pending(username, email).await?,
    };

    let code = generate_confirmation_code();
    store.set_confirmation_code(user.id, &code).await?;

    let body = format!("Your confirmation code: {code}");
    if let Err(e) = mailer.send(&user.email, MAIL_SUBJECT, &body).await {
        // Fire-and-forget: delivery failures are not this flow's problem and
        // the user can always request a fresh code.
        warn!(error = %e, username = %user.username, "confirmation mail failed");
    }

    info!(user_id = %user.id, username = %user.username, "confirmation code issued");
    Ok(())
}

/// Exchange a confirmation code for an access token. The stored code is
/// cleared before the comparison result is acted on, so every issued code
/// allows exactly one exchange attempt, successful or not.
pub async fn exchange_token(
    store: &dyn CredentialStore,
    keys: &JwtKeys,
    username: &str,
    code: &str,
) -> Result<String, ApiError> {
    let user = store
        .find_by_username(username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let stored = store.take_confirmation_code(user.id).await?;
    match stored {
        Some(ref expected) if expected == code => {
            let token = keys.sign(user.id)?;
            info!(user_id = %user.id, username = %user.username, "access token minted");
            Ok(token)
        }
        _ => {
            warn!(username = %user.username, "confirmation code mismatch, code burned");
            Err(ApiError::InvalidCode)
        }
    }
}

#[cfg(test)]
mod validator_tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn accepts_reasonable_usernames() {
        for name in ["reader", "jo.smith", "user+tag", "a_b-c@d", "Капибара"] {
            assert!(validate_username(name).is_ok(), "rejected {name}");
        }
    }

    #[test]
    fn rejects_reserved_me() {
        assert!(validate_username("me").is_err());
        assert!(validate_username("ME").is_err());
        assert!(validate_username("Me").is_err());
        // Only the exact name is reserved.
        assert!(validate_username("me2").is_ok());
    }

    #[test]
    fn rejects_forbidden_characters_and_bad_lengths() {
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("semi;colon").is_err());
        assert!(validate_username(&"x".repeat(151)).is_err());
        assert!(validate_username(&"x".repeat(150)).is_ok());
    }

    #[test]
    fn username_length_counts_characters_not_bytes() {
        // 150 two-byte characters are within the limit.
        assert!(validate_username(&"ы".repeat(150)).is_ok());
        assert!(validate_username(&"ы".repeat(151)).is_err());
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("reader@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@@example.com").is_err());
        assert!(validate_email("spaced @example.com").is_err());
        assert!(validate_email("no-tld@example").is_err());
        let long = format!("{}@example.com", "x".repeat(250));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn codes_have_fixed_length_and_alphabet() {
        for _ in 0..100 {
            let code = generate_confirmation_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn codes_do_not_repeat_in_practice() {
        let drawn: HashSet<String> = (0..50).map(|_| generate_confirmation_code()).collect();
        assert_eq!(drawn.len(), 50);
    }
}

#[cfg(test)]
mod flow_tests {
    use super::*;
    use axum::extract::FromRef;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    use crate::state::AppState;

    fn fresh_user(username: &str, email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            role: "user".into(),
            bio: None,
            first_name: None,
            last_name: None,
            confirmation_code: None,
            is_superuser: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// In-memory stand-in mirroring the unique constraints the real store
    /// enforces.
    #[derive(Default)]
    struct MemStore {
        users: Mutex<Vec<User>>,
    }

    impl MemStore {
        fn with_user(username: &str, email: &str) -> Self {
            let store = Self::default();
            store.users.lock().unwrap().push(fresh_user(username, email));
            store
        }

        fn stored(&self, username: &str) -> Option<User> {
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.username == username)
                .cloned()
        }

        fn len(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CredentialStore for MemStore {
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
            Ok(self.stored(username))
        }

        async fn create_pending(&self, username: &str, email: &str) -> Result<User, ApiError> {
            let mut users = self.users.lock().unwrap();
            if users
                .iter()
                .any(|u| u.username == username || u.email == email)
            {
                return Err(ApiError::Conflict(
                    "username or email already registered".into(),
                ));
            }
            let user = fresh_user(username, email);
            users.push(user.clone());
            Ok(user)
        }

        async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError> {
            let mut users = self.users.lock().unwrap();
            let user = users.iter_mut().find(|u| u.id == id).expect("known user");
            user.confirmation_code = Some(code.to_string());
            Ok(())
        }

        async fn take_confirmation_code(&self, id: Uuid) -> Result<Option<String>, ApiError> {
            let mut users = self.users.lock().unwrap();
            let user = users.iter_mut().find(|u| u.id == id).expect("known user");
            Ok(user.confirmation_code.take())
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, _subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((to.into(), body.into()));
            Ok(())
        }
    }

    fn keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    #[tokio::test]
    async fn signup_creates_pending_user_and_mails_the_code() {
        let store = MemStore::default();
        let mailer = RecordingMailer::default();

        signup(&store, &mailer, "reader", "reader@example.com")
            .await
            .expect("signup");

        assert_eq!(store.len(), 1);
        let user = store.stored("reader").expect("created");
        let code = user.confirmation_code.expect("code stored");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "reader@example.com");
        assert!(sent[0].1.contains(&code));
    }

    #[tokio::test]
    async fn repeat_signup_reissues_on_the_same_record() {
        let store = MemStore::default();
        let mailer = RecordingMailer::default();

        signup(&store, &mailer, "reader", "reader@example.com")
            .await
            .expect("first signup");
        let first_code = store.stored("reader").unwrap().confirmation_code.unwrap();

        signup(&store, &mailer, "reader", "reader@example.com")
            .await
            .expect("second signup");

        // Still one user, and the earlier code no longer exchanges.
        assert_eq!(store.len(), 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
        let err = exchange_token(&store, &keys(), "reader", &first_code)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
    }

    #[tokio::test]
    async fn signup_rejects_partial_identity_collision() {
        let store = MemStore::with_user("reader", "reader@example.com");
        let mailer = RecordingMailer::default();

        // Same username, different email.
        let err = signup(&store, &mailer, "reader", "other@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Different username, same email.
        let err = signup(&store, &mailer, "other", "reader@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        assert_eq!(store.len(), 1);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exchange_mints_a_token_bound_to_the_user() {
        let store = MemStore::with_user("reader", "reader@example.com");
        let user = store.stored("reader").unwrap();
        store
            .set_confirmation_code(user.id, "ABCD2345")
            .await
            .unwrap();

        let keys = keys();
        let token = exchange_token(&store, &keys, "reader", "ABCD2345")
            .await
            .expect("exchange");
        assert_eq!(keys.verify(&token).expect("claims").sub, user.id);
    }

    #[tokio::test]
    async fn successful_exchange_burns_the_code() {
        let store = MemStore::with_user("reader", "reader@example.com");
        let user = store.stored("reader").unwrap();
        store
            .set_confirmation_code(user.id, "ABCD2345")
            .await
            .unwrap();

        exchange_token(&store, &keys(), "reader", "ABCD2345")
            .await
            .expect("first exchange");
        let err = exchange_token(&store, &keys(), "reader", "ABCD2345")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
    }

    #[tokio::test]
    async fn failed_exchange_burns_the_code_too() {
        let store = MemStore::with_user("reader", "reader@example.com");
        let user = store.stored("reader").unwrap();
        store
            .set_confirmation_code(user.id, "ABCD2345")
            .await
            .unwrap();

        let err = exchange_token(&store, &keys(), "reader", "WRONG234")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));

        // One wrong guess spends the code; the right one no longer works.
        let err = exchange_token(&store, &keys(), "reader", "ABCD2345")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
        assert!(store.stored("reader").unwrap().confirmation_code.is_none());
    }

    #[tokio::test]
    async fn exchange_for_unknown_user_is_not_found() {
        let store = MemStore::default();
        let err = exchange_token(&store, &keys(), "ghost", "ABCD2345")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn case_sensitive_code_comparison() {
        let store = MemStore::with_user("reader", "reader@example.com");
        let user = store.stored("reader").unwrap();
        store
            .set_confirmation_code(user.id, "ABCD2345")
            .await
            .unwrap();

        let err = exchange_token(&store, &keys(), "reader", "abcd2345")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
    }
}
