use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::{Candidate, ContentType, GeneratorRound, SessionType};
use crate::services::exclusions::ExclusionContext;
use crate::services::signals::TasteSignals;

/// Sampling temperature for the first attempt
pub const INITIAL_TEMPERATURE: f64 = 0.9;
/// Sampling temperature for the single corrective retry
pub const RETRY_TEMPERATURE: f64 = 0.2;

const MAX_EXCLUDED_TITLES: usize = 120;
const MAX_NEGATIVE_TITLES: usize = 40;
const MAX_NOTES: usize = 10;
pub const SCORE_MIN: i64 = 70;
pub const SCORE_MAX: i64 = 99;

const SYSTEM_PROMPT: &str = "You are a film and TV recommendation engine. \
You respond with a single JSON object and nothing else.";

/// Chat-style generative model client
///
/// One structured request per attempt; the retry policy lives in
/// [`generate_round`], independent of transport and parsing.
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str, temperature: f64) -> AppResult<String>;
}

/// Everything the prompt embeds for one generation round
pub struct GenerationRequest<'a> {
    /// Exact number of items the model must return
    pub count: usize,
    pub allowed_types: &'a [ContentType],
    pub session_type: SessionType,
    pub mood_input: &'a serde_json::Value,
    pub signals: &'a TasteSignals,
    pub exclusions: &'a ExclusionContext,
    /// Titles already accepted this session (top-up rounds only)
    pub already_chosen: &'a [String],
}

fn join_section(out: &mut String, label: &str, items: &[String], cap: usize) {
    if items.is_empty() {
        return;
    }
    out.push_str(label);
    out.push_str(": ");
    out.push_str(
        &items
            .iter()
            .take(cap)
            .cloned()
            .collect::<Vec<_>>()
            .join("; "),
    );
    out.push('\n');
}

/// Builds the deterministic generation prompt
///
/// Same inputs always produce the same prompt text, so a retry differs only
/// by the appended corrective instruction.
pub fn build_prompt(req: &GenerationRequest) -> String {
    let types = req
        .allowed_types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Recommend exactly {} titles. Allowed content types: {}.\n",
        req.count, types
    ));
    prompt.push_str(&format!(
        "Session type: {}. Mood context: {}.\n",
        serde_json::to_value(req.session_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        req.mood_input
    ));

    let signals = req.signals;
    join_section(&mut prompt, "Liked genres", &signals.positive_genres, 10);
    join_section(&mut prompt, "Disliked genres", &signals.negative_genres, 10);
    join_section(&mut prompt, "Liked tags", &signals.positive_tags, 20);
    join_section(&mut prompt, "Disliked tags", &signals.negative_tags, 20);

    let mut notes = Vec::new();
    for note in signals.positive_notes.iter().take(MAX_NOTES / 2) {
        notes.push(format!("likes: {}", note));
    }
    for note in signals.negative_notes.iter().take(MAX_NOTES / 2) {
        notes.push(format!("dislikes: {}", note));
    }
    join_section(&mut prompt, "Viewer notes", &notes, MAX_NOTES);

    let negative_titles: Vec<String> = signals
        .hard_excluded
        .iter()
        .map(|e| e.display.clone())
        .collect();
    join_section(
        &mut prompt,
        "Titles the viewer disliked",
        &negative_titles,
        MAX_NEGATIVE_TITLES,
    );

    join_section(
        &mut prompt,
        "Never recommend",
        &req.exclusions.hard_titles,
        MAX_EXCLUDED_TITLES,
    );
    join_section(
        &mut prompt,
        "Already watched, do not repeat",
        &req.exclusions.soft_titles,
        MAX_EXCLUDED_TITLES,
    );
    join_section(
        &mut prompt,
        "Already chosen this session, do not repeat",
        req.already_chosen,
        MAX_EXCLUDED_TITLES,
    );

    prompt.push_str(&format!(
        "\nRespond with one JSON object: {{\"recommendations\": [{{\"title\": string, \
\"type\": one of [{}], \"search_query\": string, \"genres\": [1-3 strings], \
\"tone_tags\": [2-5 strings], \"reason\": string, \
\"match_score\": integer {}-{}}}]}}.\n\
The recommendations array must contain exactly {} items. \
Do not wrap the JSON in markdown fencing.",
        types, SCORE_MIN, SCORE_MAX, req.count
    ));

    prompt
}

// ============================================================================
// Payload parsing
// ============================================================================

/// Strips a wrapping markdown code fence, if present
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end_matches('`').trim()
}

/// Finds the first balanced JSON object substring, string-aware
fn balanced_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses an untrusted generator response into a JSON value
///
/// Strict parse first, then a code-fence strip, then a balanced-brace scan
/// for the first JSON object substring.
pub fn parse_generator_payload(raw: &str) -> Result<serde_json::Value, String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
        return Ok(value);
    }

    let unfenced = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(unfenced) {
        return Ok(value);
    }

    if let Some(candidate) = balanced_json_object(raw) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            return Ok(value);
        }
    }

    Err("response is not parseable JSON".to_string())
}

#[derive(Debug, Deserialize)]
struct GeneratorEnvelope {
    recommendations: Vec<Candidate>,
}

/// Validates the exact-cardinality output contract
pub fn validate_payload(
    value: &serde_json::Value,
    expected_count: usize,
) -> Result<Vec<Candidate>, String> {
    let envelope: GeneratorEnvelope = serde_json::from_value(value.clone())
        .map_err(|e| format!("schema mismatch: {}", e))?;

    let candidates = envelope.recommendations;
    if candidates.len() != expected_count {
        return Err(format!(
            "expected exactly {} items, got {}",
            expected_count,
            candidates.len()
        ));
    }

    for (i, candidate) in candidates.iter().enumerate() {
        if candidate.title.trim().is_empty() {
            return Err(format!("item {} has an empty title", i));
        }
        if !(SCORE_MIN..=SCORE_MAX).contains(&candidate.match_score) {
            return Err(format!(
                "item {} match_score {} outside {}..={}",
                i, candidate.match_score, SCORE_MIN, SCORE_MAX
            ));
        }
        if candidate.genres.is_empty() || candidate.genres.len() > 3 {
            return Err(format!(
                "item {} must carry 1-3 genres, got {}",
                i,
                candidate.genres.len()
            ));
        }
        if candidate.tone_tags.len() < 2 || candidate.tone_tags.len() > 5 {
            return Err(format!(
                "item {} must carry 2-5 tone tags, got {}",
                i,
                candidate.tone_tags.len()
            ));
        }
    }

    Ok(candidates)
}

/// Runs one generation round under the retry protocol
///
/// First attempt at high temperature; on any contract violation, exactly one
/// retry at low temperature with a corrective instruction appended. Two
/// failures propagate a generator-contract error.
pub async fn generate_round(
    client: &dyn GeneratorClient,
    req: &GenerationRequest<'_>,
) -> AppResult<GeneratorRound> {
    let prompt = build_prompt(req);

    let first = client
        .complete(SYSTEM_PROMPT, &prompt, INITIAL_TEMPERATURE)
        .await?;

    let first_violation = match parse_generator_payload(&first)
        .and_then(|value| validate_payload(&value, req.count))
    {
        Ok(candidates) => {
            return Ok(GeneratorRound {
                candidates,
                raw_response: first,
            })
        }
        Err(violation) => violation,
    };

    tracing::warn!(
        violation = %first_violation,
        requested = req.count,
        "Generator contract violation, retrying at low temperature"
    );

    let strict_prompt = format!(
        "{}\n\nYour previous output violated the contract: {}. \
Fix your output. Return only the JSON object, with exactly {} items.",
        prompt, first_violation, req.count
    );

    let second = client
        .complete(SYSTEM_PROMPT, &strict_prompt, RETRY_TEMPERATURE)
        .await?;

    match parse_generator_payload(&second).and_then(|value| validate_payload(&value, req.count)) {
        Ok(candidates) => Ok(GeneratorRound {
            candidates,
            raw_response: second,
        }),
        Err(violation) => {
            tracing::error!(
                violation = %violation,
                requested = req.count,
                "Generator contract violated twice, giving up on this round"
            );
            Err(AppError::GeneratorContract(violation))
        }
    }
}

// ============================================================================
// OpenAI-compatible HTTP client
// ============================================================================

/// Chat-completions client for an OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenAiGenerator {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, api_url: String, model: String, timeout: Duration) -> Self {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            api_key,
            api_url,
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl GeneratorClient for OpenAiGenerator {
    async fn complete(&self, system: &str, user: &str, temperature: f64) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": temperature,
                "response_format": {"type": "json_object"},
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Generator API returned status {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::ExternalApi("Generator returned no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::exclusions::build_exclusions;
    use std::sync::Mutex;

    fn valid_item(title: &str) -> serde_json::Value {
        json!({
            "title": title,
            "type": "movie",
            "search_query": title,
            "genres": ["Drama"],
            "tone_tags": ["tense", "gritty"],
            "reason": "fits the mood",
            "match_score": 88
        })
    }

    fn valid_response(titles: &[&str]) -> String {
        json!({
            "recommendations": titles.iter().map(|t| valid_item(t)).collect::<Vec<_>>()
        })
        .to_string()
    }

    #[test]
    fn test_parse_plain_json() {
        let raw = valid_response(&["Heat"]);
        assert!(parse_generator_payload(&raw).is_ok());
    }

    #[test]
    fn test_parse_strips_code_fence() {
        let raw = format!("```json\n{}\n```", valid_response(&["Heat"]));
        let value = parse_generator_payload(&raw).unwrap();
        assert!(value["recommendations"].is_array());
    }

    #[test]
    fn test_parse_fence_without_language_tag() {
        let raw = format!("```\n{}\n```", valid_response(&["Heat"]));
        assert!(parse_generator_payload(&raw).is_ok());
    }

    #[test]
    fn test_parse_extracts_embedded_object() {
        let raw = format!(
            "Here are your recommendations:\n{}\nEnjoy!",
            valid_response(&["Heat"])
        );
        let value = parse_generator_payload(&raw).unwrap();
        assert_eq!(value["recommendations"][0]["title"], "Heat");
    }

    #[test]
    fn test_balanced_scan_is_string_aware() {
        // A brace inside a string must not close the object early
        let raw = r#"noise {"recommendations": [], "note": "a } inside"} trailing"#;
        let value = parse_generator_payload(raw).unwrap();
        assert_eq!(value["note"], "a } inside");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_generator_payload("no json here").is_err());
        assert!(parse_generator_payload("{truncated").is_err());
    }

    #[test]
    fn test_validate_exact_count() {
        let value: serde_json::Value =
            serde_json::from_str(&valid_response(&["A", "B", "C"])).unwrap();
        assert!(validate_payload(&value, 3).is_ok());
        let err = validate_payload(&value, 5).unwrap_err();
        assert!(err.contains("exactly 5"));
    }

    #[test]
    fn test_validate_score_range() {
        let mut item = valid_item("A");
        item["match_score"] = json!(65);
        let value = json!({"recommendations": [item]});
        assert!(validate_payload(&value, 1).unwrap_err().contains("match_score"));

        let mut item = valid_item("A");
        item["match_score"] = json!(100);
        let value = json!({"recommendations": [item]});
        assert!(validate_payload(&value, 1).is_err());
    }

    #[test]
    fn test_validate_genre_and_tag_cardinality() {
        let mut item = valid_item("A");
        item["genres"] = json!([]);
        let value = json!({"recommendations": [item]});
        assert!(validate_payload(&value, 1).unwrap_err().contains("genres"));

        let mut item = valid_item("A");
        item["tone_tags"] = json!(["one"]);
        let value = json!({"recommendations": [item]});
        assert!(validate_payload(&value, 1).unwrap_err().contains("tone tags"));
    }

    #[test]
    fn test_validate_missing_field_is_schema_mismatch() {
        let value = json!({"recommendations": [{"title": "A"}]});
        assert!(validate_payload(&value, 1).unwrap_err().contains("schema"));
    }

    struct ScriptedGenerator {
        responses: Mutex<Vec<String>>,
        temperatures: Mutex<Vec<f64>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GeneratorClient for ScriptedGenerator {
        async fn complete(&self, _system: &str, _user: &str, temperature: f64) -> AppResult<String> {
            self.temperatures.lock().unwrap().push(temperature);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(AppError::ExternalApi("exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn request_fixture<'a>(
        count: usize,
        signals: &'a TasteSignals,
        exclusions: &'a ExclusionContext,
        mood: &'a serde_json::Value,
    ) -> GenerationRequest<'a> {
        GenerationRequest {
            count,
            allowed_types: &[ContentType::Movie, ContentType::Tv],
            session_type: SessionType::Mood,
            mood_input: mood,
            signals,
            exclusions,
            already_chosen: &[],
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_first_violation() {
        let signals = TasteSignals::default();
        let exclusions = build_exclusions(&signals, &[]);
        let mood = json!({"mood": "tense"});
        let req = request_fixture(2, &signals, &exclusions, &mood);

        let generator = ScriptedGenerator::new(vec![
            "not json at all".to_string(),
            valid_response(&["Heat", "Collateral"]),
        ]);

        let round = generate_round(&generator, &req).await.unwrap();
        assert_eq!(round.candidates.len(), 2);

        let temperatures = generator.temperatures.lock().unwrap().clone();
        assert_eq!(temperatures, vec![INITIAL_TEMPERATURE, RETRY_TEMPERATURE]);
    }

    #[tokio::test]
    async fn test_two_violations_propagate_contract_error() {
        let signals = TasteSignals::default();
        let exclusions = build_exclusions(&signals, &[]);
        let mood = json!({});
        let req = request_fixture(2, &signals, &exclusions, &mood);

        let generator = ScriptedGenerator::new(vec![
            valid_response(&["OnlyOne"]),
            "still broken".to_string(),
        ]);

        let err = generate_round(&generator, &req).await.unwrap_err();
        assert!(matches!(err, AppError::GeneratorContract(_)));
        assert_eq!(generator.temperatures.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_when_first_attempt_valid() {
        let signals = TasteSignals::default();
        let exclusions = build_exclusions(&signals, &[]);
        let mood = json!({});
        let req = request_fixture(1, &signals, &exclusions, &mood);

        let generator = ScriptedGenerator::new(vec![valid_response(&["Heat"])]);
        let round = generate_round(&generator, &req).await.unwrap();
        assert_eq!(round.candidates[0].title, "Heat");
        assert_eq!(generator.temperatures.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_prompt_is_deterministic_and_embeds_contract() {
        let mut signals = TasteSignals::default();
        signals.positive_genres = vec!["Thriller".to_string()];
        signals.hard_excluded = vec![];
        let exclusions = build_exclusions(&signals, &[]);
        let mood = json!({"mood": "tense"});
        let req = request_fixture(5, &signals, &exclusions, &mood);

        let a = build_prompt(&req);
        let b = build_prompt(&req);
        assert_eq!(a, b);
        assert!(a.contains("exactly 5"));
        assert!(a.contains("Liked genres: Thriller"));
        assert!(a.contains("70-99"));
        assert!(a.contains("markdown"));
    }
}
