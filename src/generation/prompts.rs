//! Prompt text for the two-phase protocol.
use super::Prompt;

/// Marker the generator appends when the file it produced is complete.
pub const STOP_SENTINEL: &str = "<!-- END OF FILE, DO NOT CONTINUE -->";

/// Inputs shared by both phases for one file.
#[derive(Debug, Clone)]
pub struct FileRequest<'a> {
    pub path: &'a str,
    pub source: &'a str,
    pub instruction: &'a str,
    pub stop_sentinel: &'a str,
}

/// Phase 1: apply the change and emit the complete new file.
#[must_use]
pub fn request_prompt(req: &FileRequest<'_>) -> Prompt {
    let system = "You are a code modification assistant. You receive one complete source file \
                  and a change request. Apply the change and output the complete modified file. \
                  Reply with code only: no explanations and no Markdown fences."
        .to_string();

    let user = format!(
        "Apply the following change to `{path}` and output the full new file. \
         If the file is complete, write `{stop}` on the last line.\n\
         Change request: {instruction}\n\n\
         Current source:\n```\n{source}\n```",
        path = req.path,
        stop = req.stop_sentinel,
        instruction = req.instruction,
        source = req.source.trim(),
    );

    Prompt { system, user }
}

/// Phase 2: continue from where the phase-1 output stopped.
#[must_use]
pub fn continuation_prompt(req: &FileRequest<'_>, partial: &str) -> Prompt {
    let system = "You are a code continuation assistant. You receive the original file, the \
                  change request and a truncated first attempt. Continue from the exact end of \
                  the truncated code until the file is structurally complete. Reply with the new \
                  code only: no explanations and no Markdown fences."
        .to_string();

    let user = format!(
        "If the truncated code below already satisfies the request or already ends with \
         `{stop}`, reply with `{stop}` and nothing else.\n\n\
         Original source of `{path}`, for reference only:\n```ORIGINAL_SOURCE\n{source}\n```\n\n\
         Truncated output of the first attempt:\n```PARTIAL_CODE\n{partial}\n```\n\n\
         Change request: {instruction}\n\n\
         Continue from the end of the truncated code. Never repeat code that is already there.",
        stop = req.stop_sentinel,
        path = req.path,
        source = req.source.trim(),
        partial = partial.trim(),
        instruction = req.instruction,
    );

    Prompt { system, user }
}

/// Ask which files of the project a change request concerns.
///
/// `payload` is the file-block context of the candidate files.
#[must_use]
pub fn file_selection_prompt(instruction: &str, payload: &str) -> Prompt {
    let system = "You are a full-stack Python developer. You receive a change request and \
                  excerpts of a project. Name the files that must be modified."
        .to_string();

    let user = format!(
        "Output only the relative paths of the files to modify, one per line. \
         No explanations, no code and no Markdown.\n\n\
         Change request: {instruction}\n\n\
         Project files:\n{payload}\n\n\
         Files to modify:\n"
    );

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FileRequest<'static> {
        FileRequest {
            path: "app.py",
            source: "def f():\n    return 1\n",
            instruction: "return 2 instead",
            stop_sentinel: STOP_SENTINEL,
        }
    }

    #[test]
    fn test_request_prompt_carries_source_and_sentinel() {
        let prompt = request_prompt(&request());
        assert!(prompt.user.contains("def f():\n    return 1"));
        assert!(prompt.user.contains("return 2 instead"));
        assert!(prompt.user.contains(STOP_SENTINEL));
    }

    #[test]
    fn test_continuation_prompt_carries_all_context() {
        let prompt = continuation_prompt(&request(), "def f():\n    ret");
        assert!(prompt.user.contains("ORIGINAL_SOURCE\ndef f():\n    return 1"));
        assert!(prompt.user.contains("PARTIAL_CODE\ndef f():\n    ret\n"));
        assert!(prompt.user.contains("return 2 instead"));
    }

    #[test]
    fn test_continuation_prompt_asks_for_sentinel_when_done() {
        let prompt = continuation_prompt(&request(), "def f():\n    return 2\n");
        assert!(prompt.user.contains(&format!("reply with `{STOP_SENTINEL}` and nothing else")));
        assert!(!prompt.user.contains("output nothing"));
    }

    #[test]
    fn test_file_selection_prompt_carries_payload() {
        let prompt = file_selection_prompt("fix login", "---FILE: users.py\ndef login():\n");
        assert!(prompt.user.contains("Change request: fix login"));
        assert!(prompt.user.contains("---FILE: users.py\ndef login():"));
    }
}
