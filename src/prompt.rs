//! Prompt construction for research requests.
//!
//! [`build_prompt`] turns a user query into the instruction text sent to the
//! model, together with the JSON schema the reply is expected to follow.
//! [`request_body`] wraps a [`Prompt`] in the request shape of a given
//! provider family.
//!
//! Building a prompt cannot fail: missing inputs are treated as empty text.

use serde_json::{json, Value};

use crate::llm::Provider;

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 1.0;

/// Minimum number of bibliography entries requested from the model.
pub const MIN_BIBLIOGRAPHY_ENTRIES: usize = 25;

const ROLE_FRAMING: &str = "You are a Deep Research AI that provides comprehensive, detailed analysis on complex physics topics across multiple disciplines. Your expertise lies in producing scholarly research papers with extensive citations and in-depth analysis. You have access to a vast knowledge base and can synthesize information from multiple sources to create comprehensive research papers.";

/// Inputs to [`build_prompt`].
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub query: String,
    /// Full content of the previous turn, sent back in continuation mode.
    pub previous_content: Option<String>,
    pub continuation: bool,
    pub temperature: Option<f64>,
}

impl PromptRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn continuing(query: impl Into<String>, previous_content: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            previous_content: Some(previous_content.into()),
            continuation: true,
            temperature: None,
        }
    }
}

/// A fully built prompt, ready to be shaped into a provider request.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub instruction: String,
    pub response_schema: Value,
    pub temperature: f64,
}

/// Clamps a temperature into the supported range.
pub fn clamp_temperature(t: f64) -> f64 {
    if t.is_nan() {
        return MAX_TEMPERATURE;
    }
    t.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// JSON schema the model reply must follow.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["title", "content"],
                "additionalProperties": false
            },
            "citations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "url": { "type": "string" }
                    },
                    "required": ["title", "url"],
                    "additionalProperties": false
                }
            },
            "assets": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "url": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["url", "description"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["content", "citations", "assets"],
        "additionalProperties": false
    })
}

/// Builds the instruction text and schema for a research request.
///
/// `default_temperature` applies when the request carries none.
pub fn build_prompt(req: &PromptRequest, default_temperature: f64) -> Prompt {
    let query = req.query.as_str();
    let previous = req.previous_content.as_deref().unwrap_or("");

    let mut instruction = String::new();
    instruction.push_str(ROLE_FRAMING);

    if req.continuation {
        instruction.push_str(&format!(
            "\n\nIMPORTANT: You are continuing to generate a research paper.\n\
             The original user query was: \"{query}\".\n\
             The content of the previous response was: \"{previous}\".\n\
             Please expand significantly upon the previous response so that the entire research paper \
             reaches a comprehensive document of approximately 9,000-10,000 words.\n\
             Extend the existing paper rather than restarting it: add depth, examples and analysis, and make sure \
             every section (introduction, main body, conclusion, bibliography) is well developed.\n\
             Ensure the bibliography has at least {MIN_BIBLIOGRAPHY_ENTRIES} entries.\n\
             Do not repeat the title or introduction unless it is a natural continuation."
        ));
    } else {
        instruction.push_str(&format!("\n\nUser query: {query}"));
    }

    instruction.push_str(&format!(
        "\n\nStructure your response as a formal research paper:\n\
         1. Begin with a clear, descriptive title relevant to the query.\n\
         2. Include an abstract/introduction summarizing key points and research objectives.\n\
         3. Organize content into logical sections with clear headings.\n\
         4. Include a comprehensive conclusion that synthesizes findings and suggests future research directions.\n\
         5. Provide a bibliography with at least {MIN_BIBLIOGRAPHY_ENTRIES} entries, cited as [1], [2], [3], etc. throughout the text.\n\
         \n\
         LENGTH REQUIREMENTS:\n\
         - Aim for approximately 12 pages (around 11,000-12,000 words).\n\
         - Adapt the length to the complexity of the subject; develop sections in proportion to their importance.\n\
         - Include detailed explanations, examples and applications.\n\
         \n\
         CITATION REQUIREMENTS:\n\
         - Include a minimum of {MIN_BIBLIOGRAPHY_ENTRIES} bibliography entries covering seminal works, recent research and varied perspectives.\n\
         - Where available, include the full URL for each source.\n\
         \n\
         If images are conceptually relevant, list them as assets with a URL and a description.\n\
         Do not include your reasoning process. Present only the final paper.\n\
         \n\
         OUTPUT FORMAT: respond with a single JSON object matching this schema, with the paper title in \
         `content.title`, the paper body in `content.content`, the bibliography in `citations[]` \
         (each with `title` and `url`) and suggested media in `assets[]` (each with `url` and `description`):\n{}",
        response_schema()
    ));

    let temperature = clamp_temperature(req.temperature.unwrap_or(default_temperature));

    Prompt {
        system: ROLE_FRAMING.to_string(),
        instruction,
        response_schema: response_schema(),
        temperature,
    }
}

/// Shapes a prompt into the JSON request body of a provider family.
///
/// `previous_response_id` links continuation turns and is only understood by
/// the Responses API; other providers receive the prior content in the
/// instruction text instead.
pub fn request_body(
    provider: Provider,
    model: &str,
    prompt: &Prompt,
    previous_response_id: Option<&str>,
) -> Value {
    match provider {
        Provider::OpenAiChat | Provider::Perplexity => json!({
            "model": model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.instruction }
            ],
            "temperature": prompt.temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "research_paper",
                    "schema": prompt.response_schema
                }
            }
        }),
        Provider::OpenAiResponses => {
            let mut body = json!({
                "model": model,
                "instructions": prompt.system,
                "input": prompt.instruction,
                "temperature": prompt.temperature,
                "text": {
                    "format": {
                        "type": "json_schema",
                        "name": "research_paper",
                        "schema": prompt.response_schema,
                        "strict": true
                    }
                }
            });
            if let Some(id) = previous_response_id {
                body["previous_response_id"] = json!(id);
            }
            body
        }
        Provider::Gemini => json!({
            "contents": [
                { "role": "user", "parts": [{ "text": prompt.instruction }] }
            ],
            "generationConfig": {
                "temperature": prompt.temperature,
                "responseMimeType": "application/json"
            }
        }),
    }
}
