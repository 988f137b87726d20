//! Enrollment token minting.

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::{
    credentials,
    persistence::{EnrollmentTokenRecord, FleetRepositoryRef},
    Result,
};
use common::api::EnrollmentTokenCreateResponse;

const TOKEN_LEN: usize = 48;
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHARSET[rng.random_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Mint a single-use enrollment token valid for `ttl_secs`.
///
/// The plaintext is returned to the caller exactly once; storage only ever
/// sees the digest.
pub async fn mint_enrollment_token(
    repo: &FleetRepositoryRef,
    ttl_secs: u64,
) -> Result<EnrollmentTokenCreateResponse> {
    let token = generate_token();
    let digest = credentials::digest_credential(&token)
        .map_err(|err| anyhow::anyhow!("generated token failed digesting: {err}"))?;
    let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);

    let record = EnrollmentTokenRecord {
        id: Uuid::new_v4(),
        credential_digest: digest,
        expires_at,
        consumed_at: None,
        node_id: None,
        created_at: Utc::now(),
    };
    let token_id = record.id;
    repo.insert_enrollment_token(record).await?;
    info!(%token_id, %expires_at, "enrollment token minted");

    Ok(EnrollmentTokenCreateResponse { token, expires_at })
}
