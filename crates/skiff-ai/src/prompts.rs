/// Prompt template families. Selected from the model filename; the runtime
/// never interprets prompt content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelFamily {
    Lfm,
    Qwen,
    /// Generic ChatML scaffolding for anything unrecognized.
    #[default]
    ChatMl,
}

impl ModelFamily {
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.contains("lfm") {
            ModelFamily::Lfm
        } else if lower.contains("qwen") {
            ModelFamily::Qwen
        } else {
            ModelFamily::ChatMl
        }
    }
}

pub fn format_prompt(family: ModelFamily, system: &str, user: &str) -> String {
    match family {
        ModelFamily::Lfm => format!(
            "<|startoftext|><|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
        ),
        ModelFamily::Qwen | ModelFamily::ChatMl => format!(
            "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
        ),
    }
}

pub fn stop_sequences() -> Vec<String> {
    vec![
        "<|im_end|>".to_string(),
        "<|endoftext|>".to_string(),
        "\n\n\n".to_string(),
    ]
}

/// Adaptive summarization budget: token ceiling and instruction keyed off the
/// email's word count.
pub fn summary_budget(word_count: usize) -> (u32, &'static str) {
    match word_count {
        0..=50 => (
            50,
            "Summarize this short email in 1 sentence, capturing the key point.",
        ),
        51..=150 => (
            80,
            "Summarize this email in 1-2 sentences, capturing the main point and any action needed.",
        ),
        151..=400 => (
            120,
            "Summarize this email in 2-3 sentences, covering the main points and any required actions.",
        ),
        401..=800 => (
            180,
            "Summarize this email in 3-4 sentences, ensuring all important points and action items are captured.",
        ),
        _ => (
            250,
            "Provide a comprehensive summary of this long email in 4-5 sentences. Capture all key points, decisions, action items, and important details.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_detection_from_filename() {
        assert_eq!(
            ModelFamily::from_filename("LFM2.5-1.2B-Instruct-Q4_K_M.gguf"),
            ModelFamily::Lfm
        );
        assert_eq!(
            ModelFamily::from_filename("qwen2.5-3b-instruct-q4_k_m.gguf"),
            ModelFamily::Qwen
        );
        assert_eq!(
            ModelFamily::from_filename("mystery-7b.gguf"),
            ModelFamily::ChatMl
        );
    }

    #[test]
    fn budget_matches_word_count_bands() {
        assert_eq!(summary_budget(42).0, 50);
        assert_eq!(summary_budget(51).0, 80);
        assert_eq!(summary_budget(150).0, 80);
        assert_eq!(summary_budget(400).0, 120);
        assert_eq!(summary_budget(800).0, 180);
        assert_eq!(summary_budget(900).0, 250);
    }

    #[test]
    fn lfm_prompts_carry_start_of_text() {
        let prompt = format_prompt(ModelFamily::Lfm, "sys", "usr");
        assert!(prompt.starts_with("<|startoftext|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }
}
