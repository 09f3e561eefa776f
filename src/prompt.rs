//! Per-variant prompt construction and delivery formatting.
//!
//! The two workers share the whole pipeline and differ only here: the prompt sent to
//! the model, its sampling parameters, the sentinel text used when generation fails,
//! and how the artifact is rendered for the outbound channel.

/// Max topic length embedded in a prompt
pub const MAX_TOPIC_PROMPT_LEN: usize = 200;

/// Stop sequences for ChatML-style instruction models
pub const CHATML_STOP: [&str; 2] = ["<|im_end|>", "<|endoftext|>"];

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub repeat_penalty: f64,
    pub stop: Vec<String>,
}

pub trait PromptTemplate: Send + Sync {
    /// Full prompt for `topic`.
    fn render(&self, topic: &str) -> String;

    fn sampling(&self) -> SamplingParams;

    /// Text substituted for the artifact when generation fails.
    fn fallback_text(&self) -> &'static str;
}

pub trait MessageFormatter: Send + Sync {
    fn format(&self, topic: &str, text: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    MotorcycleFacts,
    Jokes,
}

impl Variant {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Variant::MotorcycleFacts => "motorcycle-facts",
            Variant::Jokes => "jokes",
        }
    }
}

impl PromptTemplate for Variant {
    fn render(&self, topic: &str) -> String {
        let topic = sanitize_topic(topic);
        let (system, user) = match self {
            Variant::MotorcycleFacts => (
                "You are a motorcycle expert and historian. Your goal is to tell an interesting fact, \
                 historical detail, or slogan about the motorcycle brand provided by the user.\n\
                 Keep it concise, engaging, and factual. Do not repeat yourself.",
                format!("Tell me something interesting about the motorcycle brand: {topic}"),
            ),
            Variant::Jokes => (
                "You are a stand-up comedian. Your goal is to tell one short, clean, original joke \
                 about the subject provided by the user.\n\
                 Reply with the joke only. Do not explain it.",
                format!("Tell me a short joke about: {topic}"),
            ),
        };

        format!(
            "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
        )
    }

    fn sampling(&self) -> SamplingParams {
        let temperature = match self {
            // Low temperature keeps brand facts accurate
            Variant::MotorcycleFacts => 0.4,
            Variant::Jokes => 0.8,
        };
        SamplingParams {
            max_tokens: 128,
            temperature,
            repeat_penalty: 1.3,
            stop: CHATML_STOP.iter().map(ToString::to_string).collect(),
        }
    }

    fn fallback_text(&self) -> &'static str {
        match self {
            Variant::MotorcycleFacts => "Error generating motorcycle info",
            Variant::Jokes => "Error generating joke",
        }
    }
}

impl MessageFormatter for Variant {
    fn format(&self, topic: &str, text: &str) -> String {
        match self {
            Variant::MotorcycleFacts => format!("**{topic}**: {text}"),
            Variant::Jokes => text.to_string(),
        }
    }
}

/// Remove control characters and ChatML turn markers, then hard-truncate a topic before
/// embedding it in a prompt.
///
/// Only the prompt sees the sanitized form; cache keys always use the raw topic.
pub fn sanitize_topic(raw: &str) -> String {
    let mut topic: String = raw.chars().filter(|c| !c.is_control()).collect();
    // Removing one marker can join the halves of another
    while let Some(pos) = topic.find("<|im_") {
        let end = topic[pos..]
            .find("|>")
            .map_or(topic.len(), |offset| pos + offset + 2);
        topic.replace_range(pos..end, "");
    }
    topic.chars().take(MAX_TOPIC_PROMPT_LEN).collect()
}
