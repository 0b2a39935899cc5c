//! Answer tokens for clarification questions.
//!
//! Each clarification gets a random single-use token that is sent to the
//! human as part of an answer link. Only a keyed hash of the token is stored,
//! bound to the clarification id so a token cannot be replayed against
//! another question.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use taskpilot_core::{
    AgentStage, Clarification, ClarificationId, ClarificationState, QuestionDraft, WorkItemId,
};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// Issues and checks clarification tokens with a server-side secret.
#[derive(Clone)]
pub struct TokenSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|_| anyhow::anyhow!("clarification secret is not a usable HMAC key"))?;
        Ok(Self { keyed })
    }

    fn mac(&self, id: &ClarificationId, token: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(id.as_str().as_bytes());
        mac.update(b".");
        mac.update(token.as_bytes());
        mac
    }

    /// Hex-encoded keyed hash stored in place of `token`.
    pub fn hash(&self, id: &ClarificationId, token: &str) -> String {
        hex::encode(self.mac(id, token).finalize().into_bytes())
    }

    /// Constant-time check of `token` against a stored hash.
    pub fn verify(&self, id: &ClarificationId, token: &str, stored_hash: &str) -> bool {
        let Ok(expected) = hex::decode(stored_hash) else {
            return false;
        };
        self.mac(id, token).verify_slice(&expected).is_ok()
    }

    /// Build a pending clarification for `draft` and return it with its
    /// plaintext token.
    pub fn issue(
        &self,
        item_id: &WorkItemId,
        agent: AgentStage,
        draft: QuestionDraft,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> (Clarification, String) {
        let id = ClarificationId::generate();
        let token = generate_token();
        let clarification = Clarification {
            token_hash: self.hash(&id, &token),
            id,
            item_id: item_id.clone(),
            agent,
            question: draft.question,
            context: draft.context,
            options: draft.options,
            state: ClarificationState::Pending,
            created_at: now,
            expires_at: now + ttl,
        };
        (clarification, token)
    }
}

/// 32 random bytes, base64url without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Link a human follows to answer a clarification.
pub fn answer_link(public_base_url: &str, id: &ClarificationId, token: &str) -> String {
    format!(
        "{}/clarifications/{}/answer?token={}",
        public_base_url.trim_end_matches('/'),
        id,
        token
    )
}

/// Notification text for a newly issued clarification.
pub fn question_message(title: &str, clarification: &Clarification, link: &str) -> String {
    let mut message = format!(
        "{} agent has a question about \"{}\":\n\n{}",
        clarification.agent.display_name(),
        title,
        clarification.question
    );
    if !clarification.context.trim().is_empty() {
        message.push_str(&format!("\n\n{}", clarification.context.trim()));
    }
    if !clarification.options.is_empty() {
        message.push_str("\n\nOptions:");
        for option in &clarification.options {
            message.push_str(&format!("\n- {}", option));
        }
    }
    message.push_str(&format!(
        "\n\nAnswer before {}: {}",
        clarification.expires_at.format("%Y-%m-%d %H:%M UTC"),
        link
    ));
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::transition::test_support::now;

    fn draft() -> QuestionDraft {
        QuestionDraft {
            question: "Include archived rows?".to_string(),
            context: "The export format is undocumented.".to_string(),
            options: vec!["yes".to_string(), "no".to_string()],
        }
    }

    #[test]
    fn test_tokens_are_random_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_issued_token_verifies_only_for_its_clarification() {
        let signer = TokenSigner::new(b"secret").unwrap();
        let (clarification, token) = signer.issue(
            &"item".into(),
            AgentStage::ProductDesign,
            draft(),
            now(),
            Duration::hours(1),
        );

        assert!(!clarification.token_hash.contains(&token));
        assert!(signer.verify(&clarification.id, &token, &clarification.token_hash));
        assert!(!signer.verify(&clarification.id, "guess", &clarification.token_hash));
        assert!(!signer.verify(&"other".into(), &token, &clarification.token_hash));
        assert!(!signer.verify(&clarification.id, &token, "not hex"));
        assert!(!TokenSigner::new(b"another secret").unwrap().verify(
            &clarification.id,
            &token,
            &clarification.token_hash
        ));
        assert_eq!(clarification.expires_at, now() + Duration::hours(1));
        assert!(clarification.is_pending());
    }

    #[test]
    fn test_answer_link() {
        assert_eq!(
            answer_link("https://pilot.example.com/", &"c1".into(), "tok"),
            "https://pilot.example.com/clarifications/c1/answer?token=tok"
        );
    }

    #[test]
    fn test_question_message() {
        let signer = TokenSigner::new(b"secret").unwrap();
        let (clarification, _) = signer.issue(
            &"item".into(),
            AgentStage::TechDesign,
            draft(),
            now(),
            Duration::hours(24),
        );
        insta::assert_snapshot!(
            question_message("Export CSV", &clarification, "https://x/answer"),
            @r###"
        Technical design agent has a question about "Export CSV":

        Include archived rows?

        The export format is undocumented.

        Options:
        - yes
        - no

        Answer before 2026-04-02 10:00 UTC: https://x/answer
        "###
        );
    }
}
