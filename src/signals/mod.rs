//! Free-text signal parsing for multi-party threads.
//!
//! Pure functions, no I/O. The orchestrator uses these to drive review-state
//! transitions: an approval or `/accept` accepts the thread, a rejection or
//! `/reject` rejects it, anything else resumes the conversation.

use once_cell::sync::Lazy;
use regex::Regex;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_][A-Za-z0-9_-]*)").expect("mention regex"));

/// Phrases that count as an approval when present (case-insensitive).
const APPROVE_PHRASES: [&str; 6] = [
    "approved",
    "approve",
    "lgtm",
    "looks good to me",
    "looks good",
    "ship it",
];

/// Phrases that count as a rejection.
const REJECT_PHRASES: [&str; 5] = [
    "rejected",
    "reject",
    "not approved",
    "needs work",
    "start over",
];

/// Negations that turn an approval phrase into a non-signal ("I would not
/// approve this yet").
const NEGATIONS: [&str; 4] = ["not ", "n't ", "don't ", "never "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalSignal {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Accept,
    Reject,
    Help,
    Status,
    Rename(String),
}

/// Extract `@name` mentions: deduped, lowercased, in first-seen order.
pub fn parse_mentions(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in MENTION_RE.captures_iter(text) {
        let name = cap[1].to_lowercase();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Parse a leading-slash command. Anything that does not start with `/` is
/// ordinary chat.
pub fn parse_command(text: &str) -> Option<SlashCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let verb = parts.next()?.to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or("");
    match verb.as_str() {
        "accept" => Some(SlashCommand::Accept),
        "reject" => Some(SlashCommand::Reject),
        "help" => Some(SlashCommand::Help),
        "status" => Some(SlashCommand::Status),
        "rename" if !arg.is_empty() => Some(SlashCommand::Rename(arg.to_string())),
        _ => None,
    }
}

/// Classify free text as an approval signal, if it is one.
///
/// Rejection phrases are checked first since "not approved" contains
/// "approved"; approval phrases preceded by a negation are not approvals.
pub fn classify_approval(text: &str) -> Option<ApprovalSignal> {
    let lower = text.to_lowercase();
    if REJECT_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(ApprovalSignal::Reject);
    }
    for phrase in APPROVE_PHRASES {
        if let Some(idx) = lower.find(phrase) {
            let prefix = &lower[..idx];
            let negated = NEGATIONS.iter().any(|n| prefix.ends_with(n));
            if !negated {
                return Some(ApprovalSignal::Approve);
            }
        }
    }
    None
}

/// Consensus requires at least `quorum` distinct approving users and no
/// rejections at all.
pub fn has_consensus(signals: &[(String, ApprovalSignal)], quorum: usize) -> bool {
    if signals
        .iter()
        .any(|(_, s)| *s == ApprovalSignal::Reject)
    {
        return false;
    }
    let mut approvers: Vec<&str> = signals
        .iter()
        .filter(|(_, s)| *s == ApprovalSignal::Approve)
        .map(|(u, _)| u.as_str())
        .collect();
    approvers.sort_unstable();
    approvers.dedup();
    approvers.len() >= quorum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_deduped_and_lowercased() {
        assert_eq!(
            parse_mentions("cc @Alice and @bob — @alice should review"),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert!(parse_mentions("no mentions here").is_empty());
    }

    #[test]
    fn commands_require_leading_slash() {
        assert_eq!(parse_command("/accept"), Some(SlashCommand::Accept));
        assert_eq!(parse_command("  /REJECT  "), Some(SlashCommand::Reject));
        assert_eq!(
            parse_command("/rename My New Name"),
            Some(SlashCommand::Rename("My New Name".into()))
        );
        assert_eq!(parse_command("/rename"), None);
        assert_eq!(parse_command("accept this"), None);
        assert_eq!(parse_command("/unknown"), None);
    }

    #[test]
    fn approval_classification() {
        assert_eq!(classify_approval("LGTM!"), Some(ApprovalSignal::Approve));
        assert_eq!(
            classify_approval("ship it when ready"),
            Some(ApprovalSignal::Approve)
        );
        assert_eq!(
            classify_approval("this needs work"),
            Some(ApprovalSignal::Reject)
        );
        assert_eq!(classify_approval("what is the plan?"), None);
    }

    #[test]
    fn negated_approval_is_not_approval() {
        assert_eq!(
            classify_approval("not approved yet"),
            Some(ApprovalSignal::Reject)
        );
        assert_eq!(classify_approval("I don't approve of the tone"), None);
        assert_eq!(classify_approval("this is never looks good"), None);
    }

    #[test]
    fn consensus_counts_distinct_approvers() {
        let a = ("alice".to_string(), ApprovalSignal::Approve);
        let a2 = ("alice".to_string(), ApprovalSignal::Approve);
        let b = ("bob".to_string(), ApprovalSignal::Approve);
        assert!(!has_consensus(&[a.clone(), a2], 2));
        assert!(has_consensus(&[a.clone(), b.clone()], 2));
        let r = ("carol".to_string(), ApprovalSignal::Reject);
        assert!(!has_consensus(&[a, b, r], 2));
    }
}
