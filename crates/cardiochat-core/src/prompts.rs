//! Prompt file helpers.

/// Default system instruction sent ahead of every conversation history.
pub const SYSTEM_INSTRUCTION: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/system_instruction.md"
));
