//! Reply text posted back to channels.

use std::collections::{BTreeMap, HashMap};

use karmabot_slack_runtime::SlackUser;

pub const NO_KARMA_REPLY: &str = "No karma yet";
pub const ROSTER_UNAVAILABLE_REPLY: &str = "Could not fetch users to resolve karma";
pub const NEGATIVE_KARMA_REPLY: &str = ":angry:";

pub fn self_target_reply(actor_id: &str) -> String {
    format!("Nice try <@{actor_id}>!")
}

pub fn thank_you_reply(actor_id: &str) -> String {
    format!("Thank you <@{actor_id}>!")
}

pub fn unknown_user_reply(name: &str) -> String {
    format!("Who the heck is {name}?")
}

pub fn render_karma_help(bot_name: &str) -> String {
    [
        format!("```{bot_name} karma - Display current karma"),
        "user[++|--] - give or remove karma from user".to_string(),
        format!("{bot_name} help - Ask {bot_name} for help```"),
    ]
    .join("\n")
}

/// Highest score first, ties by user id. Users missing from the roster are
/// shown by id.
pub fn render_karma_leaderboard(scores: &BTreeMap<String, i64>, roster: &[SlackUser]) -> String {
    if scores.is_empty() {
        return NO_KARMA_REPLY.to_string();
    }
    let names = roster
        .iter()
        .map(|user| (user.id.as_str(), user.name.as_str()))
        .collect::<HashMap<_, _>>();

    let mut rows = scores.iter().collect::<Vec<_>>();
    rows.sort_by(|(left_id, left), (right_id, right)| {
        right.cmp(left).then_with(|| left_id.cmp(right_id))
    });

    let mut rendered = String::from("Current Karma:```\n");
    for (user_id, score) in rows {
        let name = names
            .get(user_id.as_str())
            .copied()
            .filter(|name| !name.is_empty())
            .unwrap_or(user_id.as_str());
        rendered.push_str(&format!("{name}: {score}\n"));
    }
    rendered.push_str("```");
    rendered
}
