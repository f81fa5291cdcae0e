//! Prompt templates for every model call the engine makes.

/// Ask the model to place a new message relative to the current block.
pub fn classify_intent_shift(
    title: &str,
    intent: &str,
    summary: &str,
    last_user: &str,
    last_assistant: &str,
    new_message: &str,
) -> String {
    format!(
        r#"TOPIC SHIFT CHECK
Decide whether the user's new message stays on the current topic or moves away from it.

CURRENT BLOCK:
Title: {title}
Intent: {intent}
Summary so far: {summary}

LAST EXCHANGE IN THIS BLOCK:
User: {last_user}
Assistant: {last_assistant}

NEW USER MESSAGE:
{new_message}

Pick exactly one:
- CONTINUE: same topic, no meaningful shift
- DEEPEN: a closer look at part of the same topic
- NEW_CHILD: a related but distinct subtopic (one or more)
- TANGENT: unrelated, belongs in a separate conversation

Reply with a single JSON object and nothing else:
{{
  "classification": "CONTINUE | DEEPEN | NEW_CHILD | TANGENT",
  "confidence": 0.0,
  "reasoning": "one sentence",
  "new_blocks": [{{"title": "short title", "intent": "one-sentence intent"}}]
}}
Keep every string on one line. Use "new_blocks": [] when no new block is needed."#
    )
}

/// Ask the model to summarize a block from its full history.
pub fn block_summary(intent: &str, context: &str) -> String {
    format!(
        r#"BLOCK SUMMARY REQUEST
Summarize this block of a conversation. Its intent: {intent}

{context}
Reply with a single JSON object and nothing else:
{{
  "summary": "2-3 sentences on what was discussed and concluded (under 150 words)",
  "key_points": ["takeaway"],
  "open_questions": ["unresolved question or next step"],
  "title_suggestion": "better title, or null"
}}"#
    )
}

/// Ask the model for the intent and title of a brand-new thread.
pub fn extract_intent(message: &str) -> String {
    format!(
        r#"NEW THREAD
The user is opening a new discussion with this message:
{message}

Reply with a single JSON object and nothing else:
{{
  "intent": "one sentence: what the user wants to understand or achieve",
  "title": "3-5 word title"
}}"#
    )
}

/// The answer prompt: block context plus the raw user message.
pub fn answer_in_block(intent: &str, context: &str, message: &str) -> String {
    format!(
        r#"FOCUSED ANSWER
You are in a focused discussion scoped to one topic.

{context}
USER'S NEW MESSAGE:
{message}

Answer within this topic's scope. If the user drifts elsewhere, acknowledge it briefly
and steer back to: {intent}. Stay under 300 words unless depth is requested, and you may
close with one or two questions that move this topic forward."#
    )
}
