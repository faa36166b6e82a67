use chrono::{TimeZone, Utc};

use crate::issuer::{IssueOutcome, IssuedInvite};

const RULE: &str = "----------------------------------------";

fn format_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("{} (ms since epoch)", ms),
    }
}

/// The text printed to stdout after a successful run. The link is on its own
/// line so it can be copied without trimming.
pub fn render_report(issued: &IssuedInvite) -> String {
    let mut out = String::new();

    match issued.outcome {
        IssueOutcome::Regenerated => {
            out.push_str("An active invite token exists, but its plain token can't be recovered from the stored hash.\n");
            out.push_str("Invalidated it and generated a new one.\n");
        }
        IssueOutcome::MintedForOwner => {
            out.push_str("Generated a new invite token.\n");
        }
    }

    out.push('\n');
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Agency: {}\n", issued.token.agency_id));
    match &issued.user {
        Some(user) => out.push_str(&format!("User: {}\n", user.display())),
        None => out.push_str(&format!("User: {}\n", issued.token.user_id)),
    }
    out.push_str(RULE);
    out.push('\n');

    out.push_str("\nInvite link:\n");
    out.push_str(&format!("   {}\n\n", issued.link));

    out.push_str(&format!(
        "Expires: {}\n",
        format_millis(issued.token.expires_at)
    ));
    if !issued.invalidated.is_empty() {
        out.push_str(&format!(
            "Invalidated {} earlier token(s).\n",
            issued.invalidated.len()
        ));
    }

    out.push_str("\nThis link is shown once. If it's lost, run this again for a new one.\n");
    out.push_str("Next steps:\n");
    out.push_str("   1. Copy the invite link above\n");
    out.push_str("   2. Open it in your browser\n");
    out.push_str("   3. Set your password (min 8 characters)\n");

    out
}
