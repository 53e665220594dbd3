//! Prompt builders for the interviewer and the evaluator.

/// Spoken when the completion backend fails for a turn.
pub const FALLBACK_REPLY: &str =
    "I apologize, but I'm having trouble processing your response right now.";

const INTERVIEWER_IDENTITY: &str = "You are an AI recruiting assistant that screens candidates on a phone interview. \
     Ask the candidate questions for a short interview (approx 30 min) to see if they are \
     qualified for the following job description based on the criteria in a more behavioral way.";

const SPOKEN_STYLE: &str = "Your replies are converted to speech. Keep each reply to one or two \
     short sentences, ask one question at a time, and never use lists, markdown, or emoji.";

/// Build the interviewer's system framing for a job description.
pub fn build_system_prompt(job_description: &str) -> String {
    let mut parts = vec![INTERVIEWER_IDENTITY.to_string(), SPOKEN_STYLE.to_string()];

    let job = job_description.trim();
    if !job.is_empty() {
        parts.push(format!("--- Job Description ---\n{job}"));
    }

    parts.join("\n\n")
}

/// System framing for the one-shot evaluation call.
pub fn build_evaluation_system_prompt() -> String {
    "You evaluate recorded screening interviews for a recruiting team. \
     You are concise, fair, and base your judgement only on what the candidate said."
        .to_string()
}

/// Evaluation instruction over the full transcript.
pub fn build_evaluation_prompt(job_description: &str, transcript: &str) -> String {
    format!(
        "Evaluate the candidate's answers in the interview transcript below against the job \
         description. Respond with a single paragraph. The paragraph must start with exactly one \
         verdict label, [STRONG], [NEUTRAL], or [WEAK], followed by your assessment.\n\n\
         --- Job Description ---\n{}\n\n--- Transcript ---\n{}",
        job_description.trim(),
        transcript.trim()
    )
}
