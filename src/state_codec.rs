use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::StateConfig;
use crate::errors::QuizError;
use crate::models::{CategoryTally, QuizState};

type HmacSha256 = Hmac<Sha256>;

/// Flat field representation. Every field is optional on the wire so a missing
/// one surfaces as `MalformedState` rather than an extractor rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_scores: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl StateFields {
    /// True when no state field at all was supplied.
    pub fn is_empty(&self) -> bool {
        self.q_index.is_none()
            && self.correct_count.is_none()
            && self.total_count.is_none()
            && self.category_scores.is_none()
            && self.questions_order.is_none()
            && self.started_at.is_none()
            && self.duration.is_none()
    }
}

/// Transport encodings for [`QuizState`].
///
/// Two shapes are supported and both round-trip losslessly:
/// - a compact URL-safe token (`base64url(json)[.signature]`) for links and redirects
/// - flat form fields mirroring the classic hidden-input layout
///   (`q_index`, `correct_count`, `total_count`, `category_scores`,
///   `questions_order`, `started_at`, `duration`, `sig`)
///
/// When a signing key is configured every encoding carries an HMAC-SHA256 over
/// the canonical JSON of the state, and decoding rejects anything that does not
/// verify.
#[derive(Clone)]
pub struct StateCodec {
    signing_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("signed", &self.signing_key.is_some())
            .finish()
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, QuizError> {
    value
        .as_deref()
        .ok_or_else(|| QuizError::malformed(format!("missing field '{}'", name)))
}

fn number<T: std::str::FromStr>(value: &Option<String>, name: &str) -> Result<T, QuizError> {
    let raw = required(value, name)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| QuizError::malformed(format!("field '{}' is not a valid number: '{}'", name, raw)))
}

/// Structural checks applied to every decoded state.
pub fn validate_state(state: &QuizState) -> Result<(), QuizError> {
    if state.order.is_empty() {
        return Err(QuizError::malformed("question order is empty"));
    }
    if state.order.iter().any(|id| id.is_empty() || id.contains(',')) {
        return Err(QuizError::malformed("question order contains an invalid id"));
    }
    if state.cursor > state.order.len() {
        return Err(QuizError::malformed("cursor is past the end of the question order"));
    }
    if state.total_count as usize > state.cursor {
        return Err(QuizError::malformed("total count exceeds answered questions"));
    }
    if state.correct_count > state.total_count {
        return Err(QuizError::malformed("correct count exceeds total count"));
    }
    if state
        .category_tally
        .values()
        .any(|counts| counts.correct > counts.total)
    {
        return Err(QuizError::malformed("category tally has more correct than total answers"));
    }
    let tally_total: u64 = state.category_tally.values().map(|c| c.total as u64).sum();
    if tally_total != state.total_count as u64 {
        return Err(QuizError::malformed("category tally does not add up to total count"));
    }
    Ok(())
}

impl StateCodec {
    /// Codec that trusts the client (no signature is produced or checked).
    pub fn unsigned() -> Self {
        Self { signing_key: None }
    }

    pub fn with_key(key: &[u8]) -> Self {
        Self {
            signing_key: Some(key.to_vec()),
        }
    }

    /// Signed with the configured key, or a random per-process key when none is set.
    pub fn from_config(config: &StateConfig) -> Self {
        if !config.signing_enabled {
            return Self::unsigned();
        }
        match &config.signing_key {
            Some(key) => Self::with_key(key.as_bytes()),
            None => {
                let key: [u8; 32] = rand::thread_rng().r#gen();
                Self::with_key(&key)
            }
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signing_key.is_some()
    }

    fn canonical(state: &QuizState) -> Result<String, QuizError> {
        serde_json::to_string(state).map_err(|e| QuizError::Storage(e.into()))
    }

    fn sign(&self, message: &str) -> Option<String> {
        let key = self.signing_key.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(message.as_bytes());
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, state: &QuizState, signature: Option<&str>) -> Result<(), QuizError> {
        let Some(key) = self.signing_key.as_ref() else {
            return Ok(());
        };
        let signature = signature.ok_or_else(|| QuizError::malformed("missing signature"))?;
        let expected = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| QuizError::malformed("signature is not valid base64"))?;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| QuizError::malformed("signing key rejected"))?;
        mac.update(Self::canonical(state)?.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| QuizError::malformed("signature does not match"))
    }

    pub fn encode_token(&self, state: &QuizState) -> Result<String, QuizError> {
        let canonical = Self::canonical(state)?;
        let body = URL_SAFE_NO_PAD.encode(canonical.as_bytes());
        Ok(match self.sign(&canonical) {
            Some(sig) => format!("{}.{}", body, sig),
            None => body,
        })
    }

    pub fn decode_token(&self, token: &str) -> Result<QuizState, QuizError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(QuizError::malformed("missing state"));
        }
        let (body, signature) = match token.split_once('.') {
            Some((body, sig)) => (body, Some(sig)),
            None => (token, None),
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| QuizError::malformed("state is not valid base64"))?;
        let state: QuizState = serde_json::from_slice(&bytes)
            .map_err(|e| QuizError::malformed(format!("state is not valid: {}", e)))?;
        validate_state(&state)?;
        self.verify(&state, signature)?;
        Ok(state)
    }

    pub fn encode_fields(&self, state: &QuizState) -> Result<StateFields, QuizError> {
        let category_scores =
            serde_json::to_string(&state.category_tally).map_err(|e| QuizError::Storage(e.into()))?;
        Ok(StateFields {
            q_index: Some(state.cursor.to_string()),
            correct_count: Some(state.correct_count.to_string()),
            total_count: Some(state.total_count.to_string()),
            category_scores: Some(category_scores),
            questions_order: Some(state.order.join(",")),
            started_at: Some(state.started_at.to_string()),
            duration: Some(state.duration.to_string()),
            sig: self.sign(&Self::canonical(state)?),
        })
    }

    pub fn decode_fields(&self, fields: &StateFields) -> Result<QuizState, QuizError> {
        let category_tally: CategoryTally =
            serde_json::from_str(required(&fields.category_scores, "category_scores")?)
                .map_err(|e| QuizError::malformed(format!("category_scores is not valid: {}", e)))?;
        let order: Vec<String> = required(&fields.questions_order, "questions_order")?
            .split(',')
            .map(str::to_string)
            .collect();

        let state = QuizState {
            cursor: number(&fields.q_index, "q_index")?,
            order,
            correct_count: number(&fields.correct_count, "correct_count")?,
            total_count: number(&fields.total_count, "total_count")?,
            category_tally,
            started_at: number(&fields.started_at, "started_at")?,
            duration: number(&fields.duration, "duration")?,
        };
        validate_state(&state)?;
        self.verify(&state, fields.sig.as_deref())?;
        Ok(state)
    }

    /// Fields rendered as a URL query string, for links and redirects.
    pub fn query_string(&self, state: &QuizState) -> Result<String, QuizError> {
        let fields = self.encode_fields(state)?;
        serde_urlencoded::to_string(&fields).map_err(|e| QuizError::Storage(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryCounts, UNKNOWN_LABEL};

    fn sample_state() -> QuizState {
        let mut state = QuizState::new(
            vec!["q_1".into(), "q_2".into(), "q_3".into()],
            1_700_000_000,
            1200,
        );
        state.cursor = 2;
        state.total_count = 2;
        state.correct_count = 1;
        state
            .category_tally
            .insert("1".into(), CategoryCounts { correct: 1, total: 1 });
        state
            .category_tally
            .insert(UNKNOWN_LABEL.into(), CategoryCounts { correct: 0, total: 1 });
        state
    }

    #[test]
    fn test_token_round_trip_signed_and_unsigned() {
        let state = sample_state();
        for codec in [StateCodec::unsigned(), StateCodec::with_key(b"secret")] {
            let token = codec.encode_token(&state).unwrap();
            assert!(!token.contains('/') && !token.contains('+') && !token.contains('='));
            assert_eq!(codec.decode_token(&token).unwrap(), state);
        }
    }

    #[test]
    fn test_fields_round_trip_through_query_string() {
        let state = sample_state();
        let codec = StateCodec::with_key(b"secret");
        let query = codec.query_string(&state).unwrap();
        assert!(query.contains("questions_order=q_1%2Cq_2%2Cq_3"));
        let parsed: StateFields = serde_urlencoded::from_str(&query).unwrap();
        assert_eq!(codec.decode_fields(&parsed).unwrap(), state);

        let fields = codec.encode_fields(&state).unwrap();
        assert_eq!(codec.decode_fields(&fields).unwrap(), state);
    }

    #[test]
    fn test_fresh_state_round_trips() {
        let state = QuizState::new(vec!["q_9".into()], 0, 60);
        let codec = StateCodec::unsigned();
        let fields = codec.encode_fields(&state).unwrap();
        assert_eq!(fields.category_scores.as_deref(), Some("{}"));
        assert_eq!(codec.decode_fields(&fields).unwrap(), state);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let codec = StateCodec::unsigned();
        let mut fields = codec.encode_fields(&sample_state()).unwrap();
        fields.started_at = None;
        let err = codec.decode_fields(&fields).unwrap_err();
        assert!(matches!(err, QuizError::MalformedState(ref m) if m.contains("started_at")));

        assert!(matches!(
            codec.decode_fields(&StateFields::default()),
            Err(QuizError::MalformedState(_))
        ));
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let codec = StateCodec::unsigned();
        let mut fields = codec.encode_fields(&sample_state()).unwrap();
        fields.q_index = Some("two".into());
        assert!(matches!(
            codec.decode_fields(&fields),
            Err(QuizError::MalformedState(_))
        ));
    }

    #[test]
    fn test_tampering_is_detected_when_signed() {
        let codec = StateCodec::with_key(b"secret");
        let mut fields = codec.encode_fields(&sample_state()).unwrap();
        fields.correct_count = Some("2".into());
        fields.category_scores = Some(r#"{"1":{"correct":1,"total":1},"Unknown":{"correct":1,"total":1}}"#.into());
        assert!(matches!(
            codec.decode_fields(&fields),
            Err(QuizError::MalformedState(ref m)) if m.contains("signature")
        ));

        // Unsigned codec trusts the same forged fields.
        let mut unsigned = StateCodec::unsigned().encode_fields(&sample_state()).unwrap();
        unsigned.correct_count = fields.correct_count.clone();
        unsigned.category_scores = fields.category_scores.clone();
        assert_eq!(StateCodec::unsigned().decode_fields(&unsigned).unwrap().correct_count, 2);
    }

    #[test]
    fn test_wrong_key_and_missing_signature_rejected() {
        let token = StateCodec::with_key(b"one").encode_token(&sample_state()).unwrap();
        assert!(StateCodec::with_key(b"two").decode_token(&token).is_err());

        let unsigned_token = StateCodec::unsigned().encode_token(&sample_state()).unwrap();
        assert!(matches!(
            StateCodec::with_key(b"one").decode_token(&unsigned_token),
            Err(QuizError::MalformedState(ref m)) if m == "missing signature"
        ));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let codec = StateCodec::unsigned();
        for token in ["", "!!!", "bm90IGpzb24"] {
            assert!(matches!(
                codec.decode_token(token),
                Err(QuizError::MalformedState(_))
            ));
        }
    }

    #[test]
    fn test_inconsistent_state_rejected() {
        let codec = StateCodec::unsigned();

        let mut state = sample_state();
        state.cursor = 5;
        let token = codec.encode_token(&state).unwrap();
        assert!(codec.decode_token(&token).is_err());

        let mut state = sample_state();
        state.correct_count = 3;
        let token = codec.encode_token(&state).unwrap();
        assert!(codec.decode_token(&token).is_err());

        let mut state = sample_state();
        state.category_tally.clear();
        let token = codec.encode_token(&state).unwrap();
        assert!(codec.decode_token(&token).is_err());
    }
}
