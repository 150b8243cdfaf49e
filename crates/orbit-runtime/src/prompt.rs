//! System prompt construction and tool formatting.

use orbit_core::ToolInfo;

/// Build the system prompt with tool descriptions, agent identity, and
/// safety rules.
pub fn build_system_prompt(tools: &[ToolInfo]) -> String {
    let tools_desc = format_tools(tools);

    format!(
        r#"You are a terminal-native coding agent.

## Role
You help users write, refactor, debug, and understand code. You have access to
tools for file operations, command execution, and code search.

## Tools Available
{tools_desc}

## Safety Rules
- Never run destructive commands without confirmation
- Never commit secrets to version control
- Always verify file paths before editing
- Use the bash tool with caution - it has full system access
- Never put more than ~8000 characters in a single create_file call (JSON truncation). For larger files, create a small skeleton first, then use multiple edit_file calls to add or replace sections incrementally.

## Behavior
- Be concise and direct
- Make autonomous decisions when clear
- Ask for clarification only when truly ambiguous
"#
    )
}

pub(crate) fn format_tools(tools: &[ToolInfo]) -> String {
    if tools.is_empty() {
        return "No tools available.".to_string();
    }

    tools
        .iter()
        .map(|t| {
            format!(
                "- **{}**: {}",
                t.name,
                t.description.lines().next().unwrap_or("No description")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
