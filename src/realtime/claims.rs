//! Bootstrap JWT claims: `{projectId, userId, epoch, epochUser,
//! accessSource}`. The token itself is signed by the auth/JWT issuer, which
//! is out of scope; this module only decodes and validates the claims the
//! `ws` layer hands to `RealTimeManager::bootstrap`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RtError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapClaims {
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub epoch: u64,
    #[serde(rename = "epochUser")]
    pub epoch_user: u64,
    #[serde(rename = "accessSource")]
    pub access_source: String,
}

/// Decode and verify the JWT carried in the `Sec-WebSocket-Protocol`
/// bootstrap token (`<jwt>.bootstrap.v8.real-time.overleaf.com`). A failure
/// here is not fatal to the connection itself; the error is deferred to the
/// first frame sent (`connectionRejected` / `BadWsBootstrapBlob`), so
/// callers translate `Err` into that frame rather than refusing the
/// upgrade.
pub fn decode_bootstrap_jwt(token: &str, secret: &[u8]) -> Result<BootstrapClaims, RtError> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    // `BootstrapClaims` carries no `exp`/`aud`. This token's lifetime is
    // the bootstrap window itself (10s), enforced by the caller's timeout,
    // not by a claim inside the JWT.
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<BootstrapClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|err| RtError::Validation(format!("bad bootstrap jwt: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(claims: &BootstrapClaims, secret: &[u8]) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let claims = BootstrapClaims {
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            epoch: 1,
            epoch_user: 2,
            access_source: "token".into(),
        };
        let secret = b"test-secret";
        let jwt = token(&claims, secret);
        let decoded = decode_bootstrap_jwt(&jwt, secret).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = BootstrapClaims {
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            epoch: 1,
            epoch_user: 1,
            access_source: "token".into(),
        };
        let jwt = token(&claims, b"right-secret");
        assert!(decode_bootstrap_jwt(&jwt, b"wrong-secret").is_err());
    }
}
