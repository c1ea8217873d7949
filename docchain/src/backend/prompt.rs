//! Prompt rendering for text-completion backends.

use super::GenerationRequest;
use serde_json::Value;
use std::fmt::Write as _;

/// System prompt sent with every structured generation call.
pub const SYSTEM_PROMPT: &str = "You produce structured documents. \
Answer with exactly one JSON object that conforms to the output contract you are given. \
Do not add commentary before or after the object.";

/// Renders a request into a single user prompt.
///
/// Text inputs are written verbatim; structured inputs are pretty-printed
/// JSON. The contract descriptor closes the prompt.
#[must_use]
pub fn render_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();

    if !request.intent.is_empty() {
        let _ = writeln!(prompt, "{}\n", request.intent.trim());
    }

    if !request.inputs.is_empty() {
        prompt.push_str("## Inputs\n");
        for (name, value) in &request.inputs {
            let _ = writeln!(prompt, "\n### {name}\n{}", render_value(value));
        }
        prompt.push('\n');
    }

    let descriptor = serde_json::to_string_pretty(&request.contract_descriptor)
        .unwrap_or_else(|_| request.contract_descriptor.to_string());
    let _ = write!(
        prompt,
        "## Output\nRespond with one JSON object for the contract '{}'. \
         Field descriptions are guidance for the content of each field.\n\n{descriptor}\n",
        request.output_contract
    );

    if request.attempt > 1 {
        prompt.push_str("\nYour previous answer did not match the contract. Follow it exactly.\n");
    }

    prompt
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn request(attempt: usize) -> GenerationRequest {
        GenerationRequest {
            run_id: Uuid::new_v4(),
            stage: "poc".to_string(),
            model_id: "m".to_string(),
            intent: "Generate a proof of concept plan".to_string(),
            inputs: vec![
                ("job_posting".to_string(), json!("Build a data pipeline")),
                ("proposal".to_string(), json!({"proposal": "We will"})),
            ],
            output_contract: "Poc".to_string(),
            contract_descriptor: json!({"contract": "Poc", "fields": []}),
            max_output_tokens: 4000,
            attempt,
        }
    }

    #[test]
    fn test_prompt_sections() {
        let prompt = render_prompt(&request(1));

        assert!(prompt.starts_with("Generate a proof of concept plan"));
        assert!(prompt.contains("### job_posting\nBuild a data pipeline"));
        assert!(prompt.contains("\"proposal\": \"We will\""));
        assert!(prompt.contains("contract 'Poc'"));
        assert!(!prompt.contains("previous answer"));
    }

    #[test]
    fn test_retry_prompt_mentions_previous_answer() {
        assert!(render_prompt(&request(2)).contains("previous answer"));
    }
}
