//! Karma bookkeeping for karmabot: token scanning, the append-only ledger,
//! reply rendering, and the Slack message handler that ties them together.

mod karma_handler;
mod karma_ledger;
mod karma_parser;
mod karma_render;

pub use karma_handler::{
    register_karma_handlers, BotIdentity, KarmaCommand, KarmaHandler, KarmaIdentityHook,
    SharedBotIdentity,
};
pub use karma_ledger::{
    parse_ledger_records, KarmaApplyOutcome, KarmaLedger, KarmaLedgerError, LedgerRecord,
    DEFAULT_KARMA_FILE,
};
pub use karma_parser::{
    net_delta, resolve_karma_target, scan_karma_tokens, KarmaDelta, KarmaLookupError,
    KarmaTarget, KarmaToken,
};
pub use karma_render::{
    render_karma_help, render_karma_leaderboard, self_target_reply, thank_you_reply,
    unknown_user_reply, NEGATIVE_KARMA_REPLY, NO_KARMA_REPLY, ROSTER_UNAVAILABLE_REPLY,
};
