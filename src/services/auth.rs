use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{PendingUserData, Session, TokenPair, User},
    phone::normalize_phone,
    services::pending::PendingRegistrationService,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub sid: String, // session_id
    pub iss: String, // issuer
    pub exp: i64,    // expiry
    pub iat: i64,    // issued at
}

pub struct AuthService {
    db: SqlitePool,
    config: Config,
}

impl AuthService {
    pub fn new(db: SqlitePool, config: Config) -> Self {
        Self { db, config }
    }

    // Registration handshake

    /// Store the signup payload as a pending registration and hand back the
    /// verification token for the bot deep link. The password is hashed
    /// here, once; nothing downstream ever sees it in the clear.
    pub async fn submit_registration(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        phone: &str,
        address: Option<&str>,
    ) -> AppResult<String> {
        let phone = normalize_phone(phone);

        let existing: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE email = ? OR phone = ?")
                .bind(email)
                .bind(&phone)
                .fetch_optional(&self.db)
                .await?;

        if existing.is_some() {
            return Err(AppError::UserAlreadyExists);
        }

        let password_hash =
            hash(password, DEFAULT_COST).map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;

        let user_data = PendingUserData {
            email: email.to_string(),
            password_hash,
            full_name: full_name.to_string(),
            address: address.map(|a| a.to_string()),
        };

        let token = generate_token();
        PendingRegistrationService::new(self.db.clone())
            .save(&phone, &user_data, &token)
            .await?;

        Ok(token)
    }

    /// Poll endpoint body: `Ok(None)` means "not verified yet", and the client
    /// keeps polling; it is not an error.
    pub async fn finish_registration(
        &self,
        phone: &str,
        token: &str,
    ) -> AppResult<Option<(User, TokenPair)>> {
        let phone = normalize_phone(phone);
        let pending = PendingRegistrationService::new(self.db.clone());

        // A previous poll (or a concurrent one) may have already created
        // the user; report success instead of re-creating.
        if let Some(user) = self.find_user_by_phone(&phone).await? {
            let tokens = self.open_session(&user).await?;
            return Ok(Some((user, tokens)));
        }

        let Some(row) = pending.find_by_token(token).await? else {
            return Err(AppError::RegistrationNotFound);
        };
        if row.phone != phone {
            return Err(AppError::RegistrationNotFound);
        }
        if !row.verified {
            return Ok(None);
        }

        let data = row.user_data.0;

        // The conditional delete of the verified pending row is the one-shot
        // gate: exactly one concurrent poll gets rows_affected = 1 and
        // inserts the user; the loser re-reads the created row.
        let mut tx = self.db.begin().await?;

        let consumed = sqlx::query(
            r#"
            DELETE FROM pending_registrations
            WHERE phone = ? AND verification_token = ? AND verified = 1
            "#,
        )
        .bind(&phone)
        .bind(token)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if consumed == 0 {
            tx.rollback().await?;
            let user = self
                .find_user_by_phone(&phone)
                .await?
                .ok_or(AppError::RegistrationNotFound)?;
            let tokens = self.open_session(&user).await?;
            return Ok(Some((user, tokens)));
        }

        let now = Utc::now();
        let user: User = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, address, is_admin, balance, telegram_chat_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, '0', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&data.email)
        .bind(&data.password_hash)
        .bind(&data.full_name)
        .bind(&phone)
        .bind(&data.address)
        .bind(row.telegram_chat_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::UserAlreadyExists,
            _ => AppError::Database(e),
        })?;

        tx.commit().await?;

        let tokens = self.open_session(&user).await?;
        Ok(Some((user, tokens)))
    }

    // Login

    pub async fn login(&self, email: &str, password: &str) -> AppResult<(User, TokenPair)> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        let user = user.ok_or(AppError::InvalidCredentials)?;

        let matches = verify(password, &user.password_hash)
            .map_err(|e| anyhow::anyhow!("Verify error: {}", e))?;
        if !matches {
            return Err(AppError::InvalidCredentials);
        }

        let tokens = self.open_session(&user).await?;
        Ok((user, tokens))
    }

    // Token validation

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let key = DecodingKey::from_secret(self.config.jwt.secret.as_bytes());
        let validation = Validation::default();

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }

    // Refresh token

    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = self.validate_token(refresh_token)?;
        let session_id = Uuid::parse_str(&claims.sid).map_err(|_| AppError::InvalidToken)?;

        let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?;

        let session = session.ok_or(AppError::InvalidToken)?;

        if !verify(refresh_token, &session.refresh_token_hash)
            .map_err(|e| anyhow::anyhow!("Verify error: {}", e))?
        {
            return Err(AppError::InvalidToken);
        }

        let tokens = self.generate_token_pair(&claims.sub, &claims.sid)?;

        let token_hash = hash(&tokens.access_token, DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;
        let refresh_hash = hash(&tokens.refresh_token, DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;

        sqlx::query(
            "UPDATE sessions SET token_hash = ?, refresh_token_hash = ?, expires_at = ?, last_used_at = ? WHERE id = ?",
        )
        .bind(token_hash)
        .bind(refresh_hash)
        .bind(tokens.expires_at)
        .bind(Utc::now())
        .bind(session.id)
        .execute(&self.db)
        .await?;

        Ok(tokens)
    }

    // Logout

    pub async fn logout(&self, session_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    // Helper methods

    async fn find_user_by_phone(&self, phone: &str) -> AppResult<Option<User>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    /// Issue a token pair and persist the session row.
    async fn open_session(&self, user: &User) -> AppResult<TokenPair> {
        let session_id = Uuid::new_v4();
        let tokens = self.generate_token_pair(&user.id.to_string(), &session_id.to_string())?;

        let token_hash = hash(&tokens.access_token, DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;
        let refresh_hash = hash(&tokens.refresh_token, DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, refresh_token_hash, expires_at, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(user.id)
        .bind(token_hash)
        .bind(refresh_hash)
        .bind(tokens.expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(tokens)
    }

    fn generate_token_pair(&self, user_id: &str, session_id: &str) -> AppResult<TokenPair> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.config.jwt.access_token_ttl.as_secs() as i64);
        let refresh_exp =
            now + Duration::seconds(self.config.jwt.refresh_token_ttl.as_secs() as i64);

        let access_claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iss: self.config.jwt.issuer.clone(),
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };

        let refresh_claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iss: self.config.jwt.issuer.clone(),
            exp: refresh_exp.timestamp(),
            iat: now.timestamp(),
        };

        let key = EncodingKey::from_secret(self.config.jwt.secret.as_bytes());

        let access_token = encode(&Header::default(), &access_claims, &key)?;
        let refresh_token = encode(&Header::default(), &refresh_claims, &key)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at: access_exp,
        })
    }
}

/// Opaque per-attempt verification token for the bot deep link.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
