use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use subtle::ConstantTimeEq;

use crate::error::Result;
use crate::services::kv::KeyValueStore;

/// One-time login codes. Storage goes through the injected TTL store;
/// delivery of the code (mail/SMS) is an external concern of the caller.
#[derive(Clone)]
pub struct OtpService {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl OtpService {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn issue(&self, email: &str) -> Result<String> {
        let code = generate_code();
        self.kv
            .set(&storage_key(email), code.clone(), self.ttl)
            .await?;
        Ok(code)
    }

    /// Single use: a matching code is deleted before returning true.
    pub async fn verify(&self, email: &str, code: &str) -> Result<bool> {
        let key = storage_key(email);
        let Some(stored) = self.kv.get(&key).await? else {
            return Ok(false);
        };
        let matches: bool = stored.as_bytes().ct_eq(code.as_bytes()).into();
        if matches {
            self.kv.delete(&key).await?;
        }
        Ok(matches)
    }
}

fn storage_key(email: &str) -> String {
    format!("otp:{}", email.to_ascii_lowercase())
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::InMemoryKvStore;

    fn service() -> OtpService {
        OtpService::new(Arc::new(InMemoryKvStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn issued_code_verifies_exactly_once() {
        let otp = service();
        let code = otp.issue("alice@example.com").await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(otp.verify("alice@example.com", &code).await.unwrap());
        // consumed
        assert!(!otp.verify("alice@example.com", &code).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_and_not_consumed() {
        let otp = service();
        let code = otp.issue("bob@example.com").await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(!otp.verify("bob@example.com", wrong).await.unwrap());
        assert!(otp.verify("bob@example.com", &code).await.unwrap());
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let otp = service();
        let code = otp.issue("Carol@Example.com").await.unwrap();
        assert!(otp.verify("carol@example.com", &code).await.unwrap());
    }
}
